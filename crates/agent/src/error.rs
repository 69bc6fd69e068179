// SPDX-License-Identifier: Apache-2.0

//! Errors for the balancing worker lifecycle.

use miette::Diagnostic;

/// Errors that can occur while starting or stopping the worker.
///
/// Everything the worker does *inside* its loop is transient and logged,
/// never surfaced; these variants cover only the lifecycle edges the host
/// cares about.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// `start()` was called while a worker is already running.
    #[error("power agent worker already running")]
    AlreadyRunning,

    /// The worker OS thread could not be spawned.
    #[error("failed to spawn power agent worker: {source}")]
    ThreadSpawn {
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The worker thread panicked; observed at join time.
    #[error("power agent worker panicked: {panic_message}")]
    WorkerPanic {
        /// Panic payload, formatted.
        panic_message: String,
    },
}
