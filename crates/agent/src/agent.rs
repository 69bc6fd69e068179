// SPDX-License-Identifier: Apache-2.0

//! The long-lived balancing worker and its lifecycle.
//!
//! [`PowerAgent`] owns the pieces the original plugin kept as globals: the
//! active configuration snapshot, the worker handle, and the cancellation
//! signal. The worker itself is a non-Send async task on a dedicated OS
//! thread with a single-threaded runtime; it observes its cancellation
//! token after every wait, so a stop request is honored within one second
//! plus whatever child process is already in flight.

use crate::apply::apply_cap_changes;
use crate::balance::{clear_caps, rebalance};
use crate::error::Error;
use crate::ingest::{ingest_capabilities, ingest_caps, ingest_energy, ingest_readiness};
use arc_swap::ArcSwap;
use capbal_capmc::CapmcClient;
use capbal_config::PowerConfig;
use capbal_state::ClusterState;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::{runtime::Builder as RtBuilder, task::LocalSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Interval between capability range refreshes.
const CAPABILITY_REFRESH: Duration = Duration::from_secs(600);

/// The background power-cap balancer.
///
/// One worker at a time; `start` refuses a second. All loop-internal
/// failures are logged and absorbed; the only errors surfaced here are the
/// lifecycle edges (spawn failure, double start, worker panic).
pub struct PowerAgent {
    state: Arc<ClusterState>,
    config: Arc<ArcSwap<PowerConfig>>,
    worker: Mutex<Option<WorkerHandle>>,
}

struct WorkerHandle {
    cancel: CancellationToken,
    join: thread::JoinHandle<()>,
}

impl PowerAgent {
    /// Creates an agent over the given cluster state.
    pub fn new(state: Arc<ClusterState>, config: PowerConfig) -> Self {
        Self {
            state,
            config: Arc::new(ArcSwap::from_pointee(config)),
            worker: Mutex::new(None),
        }
    }

    /// The cluster state this agent balances.
    pub fn cluster(&self) -> Arc<ClusterState> {
        Arc::clone(&self.state)
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<PowerConfig> {
        self.config.load_full()
    }

    /// Re-parses the PowerParameters string and swaps the active snapshot.
    ///
    /// The worker picks the new values up on its next tick; the cached nid
    /// range string is rebuilt on next use.
    pub fn reconfigure(&self, params: &str) {
        let _running = self.worker.lock();
        self.config.store(Arc::new(PowerConfig::parse(params)));
        self.state.invalidate_nid_range();
    }

    /// Spawns the worker thread. Errors if one is already running.
    pub fn start(&self) -> Result<(), Error> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            debug!("power agent already running, not starting another");
            return Err(Error::AlreadyRunning);
        }
        let cancel = CancellationToken::new();
        let state = Arc::clone(&self.state);
        let config = Arc::clone(&self.config);
        let join = spawn_worker("power-agent", {
            let cancel = cancel.clone();
            move || run_loop(state, config, cancel)
        })?;
        *worker = Some(WorkerHandle { cancel, join });
        info!("power agent started");
        Ok(())
    }

    /// Signals the worker to stop and waits for it to finish.
    ///
    /// A child process already in flight is allowed to complete; its
    /// deadline bounds the wait. A no-op when the worker is not running.
    pub fn shutdown(&self) -> Result<(), Error> {
        let Some(handle) = self.worker.lock().take() else {
            return Ok(());
        };
        handle.cancel.cancel();
        handle.join.join().map_err(|panic| Error::WorkerPanic {
            panic_message: format!("{panic:?}"),
        })?;
        info!("power agent stopped");
        Ok(())
    }
}

impl Drop for PowerAgent {
    fn drop(&mut self) {
        // Best effort; a panic report has nowhere to go here.
        let _ = self.shutdown();
    }
}

/// Runs a non-Send async task on a dedicated OS thread with a
/// single-threaded runtime and LocalSet.
fn spawn_worker<F, Fut>(name: &str, task_factory: F) -> Result<thread::JoinHandle<()>, Error>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: 'static + Future<Output = ()>,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            let rt = RtBuilder::new_current_thread()
                .enable_all()
                .build()
                .expect("Failed to create runtime");
            let local = LocalSet::new();
            rt.block_on(local.run_until(task_factory()));
        })
        .map_err(|source| Error::ThreadSpawn { source })
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// The tick loop: wait, ingest, allocate, apply.
async fn run_loop(
    state: Arc<ClusterState>,
    config: Arc<ArcSwap<PowerConfig>>,
    cancel: CancellationToken,
) {
    let mut last_balance = Instant::now();
    let mut last_capabilities: Option<Instant> = None;
    let mut caps_seeded = false;
    let mut last_cap_watts: Option<u32> = None;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
        if cancel.is_cancelled() {
            break;
        }
        let config = config.load_full();
        if last_balance.elapsed() < Duration::from_secs(config.balance_interval) {
            continue;
        }
        // Nothing to balance and nothing left to clear.
        if last_cap_watts == Some(0) && config.cap_watts == 0 {
            continue;
        }
        last_cap_watts = Some(config.cap_watts);

        let client = CapmcClient::new(&config.capmc_path);
        if !caps_seeded {
            // Seed state from the caps already installed on the hardware.
            ingest_caps(&client, &state).await;
            caps_seeded = true;
        }
        if last_capabilities.is_none_or(|at| at.elapsed() >= CAPABILITY_REFRESH) {
            ingest_capabilities(&client, &state).await;
            last_capabilities = Some(Instant::now());
        }
        ingest_energy(&client, &state).await;
        ingest_readiness(&client, &state).await;

        let changes = {
            let jobs = state.jobs();
            let mut nodes = state.nodes_mut();
            let summary = nodes.power_summary();
            debug!(
                alloc_watts = summary.alloc_watts,
                used_watts = summary.used_watts,
                "cluster power"
            );
            if config.cap_watts == 0 {
                clear_caps(&nodes)
            } else {
                rebalance(&mut nodes, &jobs, &config, epoch_secs())
            }
        };
        apply_cap_changes(&client, &changes).await;
        last_balance = Instant::now();
    }
    debug!("power agent worker exiting");
}
