// SPDX-License-Identifier: Apache-2.0

//! Run the power-cap balancing loop against a node inventory.
//!
//! The balancer normally lives inside a workload manager that owns the node
//! and job tables; this binary stands the tables up from a nid range on the
//! command line and runs the loop until interrupted, which is enough to
//! operate a cluster that manages jobs elsewhere or to exercise a site
//! power agent end to end.

use capbal_agent::PowerAgent;
use capbal_config::PowerConfig;
use capbal_state::{ClusterState, NodeRecord, NodeTable, name_from_nid, parse_nids};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "capbal", version, about = "Power-cap balancing loop for Cray-style clusters")]
struct Cli {
    /// Nid range of the nodes to balance, e.g. "1-16" or "2,5-9,12".
    #[arg(long)]
    nids: String,

    /// PowerParameters-style configuration: comma-separated key=value pairs
    /// (balance_interval, capmc_path, cap_watts, decrease_rate,
    /// increase_rate, lower_threshold, upper_threshold, recent_job,
    /// job_level / job_no_level).
    #[arg(long, default_value = "")]
    parameters: String,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let Some(nids) = parse_nids(&cli.nids) else {
        return Err(miette::miette!("invalid nid range `{}`", cli.nids));
    };
    let records = nids
        .iter()
        .map(|&nid| NodeRecord::new(name_from_nid(nid), nid))
        .collect();
    let state = Arc::new(ClusterState::new(NodeTable::new(records)));
    info!(nodes = nids.len(), "node table built");

    let agent = PowerAgent::new(state, PowerConfig::parse(&cli.parameters));
    agent.start()?;

    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "interrupt handler failed, shutting down");
    } else {
        info!("interrupt received, shutting down");
    }
    agent.shutdown()?;
    Ok(())
}
