// SPDX-License-Identifier: Apache-2.0

//! Client for the site power agent (`capmc`).
//!
//! The power agent is an external command-line tool: every operation spawns
//! it as a child process with positional arguments and reads one UTF-8 JSON
//! document from its standard output. A nonzero exit status means failure.
//! Calls are bounded by a wall-clock deadline (5 seconds by default); on
//! expiry the child is killed and the call reports [`Error::Deadline`].
//!
//! Responses deserialize into the typed records in [`response`]; unknown
//! fields are tolerated so newer agent versions remain consumable.

use crate::response::{
    CapabilitiesResponse, EnergyCounterResponse, NodeStatusResponse, PowerCapsResponse,
};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

pub mod error;
pub mod response;
pub mod time;

pub use error::Error;

/// Default wall-clock deadline for one power agent invocation.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Handle for invoking the site power agent binary.
#[derive(Debug, Clone)]
pub struct CapmcClient {
    path: PathBuf,
    deadline: Duration,
}

impl CapmcClient {
    /// Creates a client for the agent binary at `path` with the default
    /// 5-second deadline.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Overrides the per-invocation deadline. Mainly for tests.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Path of the agent binary this client invokes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `get_power_cap_capabilities`: per-node-group min/max watt ranges.
    pub async fn power_cap_capabilities(&self) -> Result<CapabilitiesResponse, Error> {
        self.invoke("get_power_cap_capabilities", &[]).await
    }

    /// `get_power_cap --nids <range>`: caps currently installed.
    pub async fn power_caps(&self, nids: &str) -> Result<PowerCapsResponse, Error> {
        self.invoke("get_power_cap", &["--nids", nids]).await
    }

    /// `node_status`: which nodes are ready for cap changes.
    pub async fn node_status(&self) -> Result<NodeStatusResponse, Error> {
        self.invoke("node_status", &[]).await
    }

    /// `get_node_energy_counter --nids <range>`: monotonic joule counters
    /// with wall-clock sample times.
    pub async fn node_energy_counters(&self, nids: &str) -> Result<EnergyCounterResponse, Error> {
        self.invoke("get_node_energy_counter", &["--nids", nids]).await
    }

    /// `set_power_cap --nids <range> [--node <watts>] --accel 0`.
    ///
    /// `node_watts` of `None` omits the `--node` control, which the agent
    /// treats as clearing the cap. Accelerators are always forced to zero.
    /// The response body is ignored; the exit status is the signal.
    pub async fn set_power_cap(&self, nids: &str, node_watts: Option<u32>) -> Result<(), Error> {
        let watts;
        let mut args = vec!["--nids", nids];
        if let Some(value) = node_watts {
            watts = value.to_string();
            args.push("--node");
            args.push(&watts);
        }
        args.push("--accel");
        args.push("0");
        let _ = self.run("set_power_cap", &args).await?;
        Ok(())
    }

    async fn invoke<T: DeserializeOwned>(&self, verb: &str, args: &[&str]) -> Result<T, Error> {
        let stdout = self.run(verb, args).await?;
        if stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(Error::EmptyResponse {
                verb: verb.to_owned(),
            });
        }
        serde_json::from_slice(&stdout).map_err(|source| Error::MalformedResponse {
            verb: verb.to_owned(),
            source,
        })
    }

    /// Spawns the agent and returns its standard output on clean exit.
    async fn run(&self, verb: &str, args: &[&str]) -> Result<Vec<u8>, Error> {
        let child = Command::new(&self.path)
            .arg(verb)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                verb: verb.to_owned(),
                path: self.path.clone(),
                source,
            })?;

        // Dropping the timed-out future kills the child (kill_on_drop).
        let output = tokio::time::timeout(self.deadline, child.wait_with_output())
            .await
            .map_err(|_| Error::Deadline {
                verb: verb.to_owned(),
                deadline: self.deadline,
            })?
            .map_err(|source| Error::Spawn {
                verb: verb.to_owned(),
                path: self.path.clone(),
                source,
            })?;

        if !output.status.success() {
            let detail = if output.stderr.is_empty() {
                String::from_utf8_lossy(&output.stdout).into_owned()
            } else {
                String::from_utf8_lossy(&output.stderr).into_owned()
            };
            return Err(Error::CommandFailed {
                verb: verb.to_owned(),
                code: output.status.code(),
                detail: detail.trim().to_owned(),
            });
        }
        debug!(verb, bytes = output.stdout.len(), "capmc responded");
        Ok(output.stdout)
    }
}
