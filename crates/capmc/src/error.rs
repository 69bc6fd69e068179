// SPDX-License-Identifier: Apache-2.0

//! Errors raised by power agent invocations.
//!
//! Every variant is transient from the balancer's point of view: the caller
//! logs it, abandons that ingest or apply call, and lets the next tick
//! rebuild its view from telemetry.

use miette::Diagnostic;
use std::path::PathBuf;
use std::time::Duration;

/// Failure of a single power agent invocation.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The agent binary could not be spawned or waited on.
    #[error("capmc {verb}: failed to run `{path}`: {source}")]
    Spawn {
        /// The verb being invoked.
        verb: String,
        /// Path of the binary we tried to execute.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The agent did not finish within the wall-clock deadline; it was
    /// killed.
    #[error("capmc {verb}: no response within {deadline:?}")]
    Deadline {
        /// The verb being invoked.
        verb: String,
        /// The deadline that expired.
        deadline: Duration,
    },

    /// The agent exited with a nonzero status.
    #[error("capmc {verb}: exit {code:?}: {detail}")]
    CommandFailed {
        /// The verb being invoked.
        verb: String,
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Trailing diagnostic output captured from the child.
        detail: String,
    },

    /// The agent exited cleanly but produced no output to parse.
    #[error("capmc {verb}: empty response")]
    EmptyResponse {
        /// The verb being invoked.
        verb: String,
    },

    /// The response body was not the JSON document the verb promises.
    #[error("capmc {verb}: malformed response: {source}")]
    MalformedResponse {
        /// The verb being invoked.
        verb: String,
        /// Decode failure detail.
        #[source]
        source: serde_json::Error,
    },
}
