// SPDX-License-Identifier: Apache-2.0

//! Telemetry ingest: copy power agent responses into node state.
//!
//! Each operation has the same shape: invoke the power agent (no locks
//! held), parse, then take the node write lock only for the span needed to
//! apply the parsed results. A failed invocation is logged and leaves prior
//! state intact; the next tick retries from scratch.

use capbal_capmc::CapmcClient;
use capbal_state::{ClusterState, compress_nids};
use tracing::{debug, warn};

/// Refreshes every node's capability range (`min_watts`/`max_watts`).
///
/// Accelerator ranges are parsed and reported at debug level but never
/// written anywhere; accelerators stay capped at zero.
pub async fn ingest_capabilities(client: &CapmcClient, state: &ClusterState) {
    let response = match client.power_cap_capabilities().await {
        Ok(response) => response,
        Err(error) => {
            warn!(%error, "capability ingest failed");
            return;
        }
    };
    let mut nodes = state.nodes_mut();
    for group in &response.groups {
        let Some(node_range) = group.node_range() else {
            continue;
        };
        for &nid in &group.nids {
            match nodes.get_mut_by_nid(nid) {
                Some(record) => {
                    let power = record.power_mut();
                    power.min_watts = node_range.min;
                    power.max_watts = node_range.max;
                }
                None => debug!(nid, "capability for node not in table"),
            }
        }
        let (accel_min, accel_max) = group
            .accel_range()
            .map(|r| (r.min, r.max))
            .unwrap_or_default();
        debug!(
            node_min = node_range.min,
            node_max = node_range.max,
            accel_min,
            accel_max,
            nodes = %compress_nids(&group.nids),
            "capability group"
        );
    }
}

/// Seeds `cap_watts` from the caps currently installed on the hardware.
/// Run once, on the first tick.
pub async fn ingest_caps(client: &CapmcClient, state: &ClusterState) {
    let Some(range) = state.full_nid_range() else {
        warn!("no nodes known, skipping cap ingest");
        return;
    };
    let response = match client.power_caps(&range).await {
        Ok(response) => response,
        Err(error) => {
            warn!(%error, "installed-cap ingest failed");
            return;
        }
    };
    let mut nodes = state.nodes_mut();
    for entry in &response.nids {
        match nodes.get_mut_by_nid(entry.nid) {
            Some(record) => {
                if let Some(cap) = entry.node_cap() {
                    record.power_mut().cap_watts = cap;
                }
            }
            None => debug!(nid = entry.nid, "installed cap for node not in table"),
        }
    }
}

/// Marks which nodes are ready for cap changes.
///
/// Sweeps every node to not-ready first, then raises the `ready` bucket, so
/// nodes that fell out of the bucket lose the flag. Other buckets are
/// ignored.
pub async fn ingest_readiness(client: &CapmcClient, state: &ClusterState) {
    let response = match client.node_status().await {
        Ok(response) => response,
        Err(error) => {
            warn!(%error, "readiness ingest failed");
            return;
        }
    };
    let mut nodes = state.nodes_mut();
    for record in nodes.iter_mut() {
        record.power_mut().ready = false;
    }
    for &nid in &response.ready {
        match nodes.get_mut_by_nid(nid) {
            Some(record) => record.power_mut().ready = true,
            None => debug!(nid, "ready node not in table"),
        }
    }
}

/// Folds fresh energy counter samples into every node, updating the
/// consumption estimates.
///
/// Estimates are swept to zero first: a node missing from this tick's
/// telemetry reads as "no estimate" rather than keeping stale watts.
pub async fn ingest_energy(client: &CapmcClient, state: &ClusterState) {
    let Some(range) = state.full_nid_range() else {
        warn!("no nodes known, skipping energy ingest");
        return;
    };
    let response = match client.node_energy_counters(&range).await {
        Ok(response) => response,
        Err(error) => {
            warn!(%error, "energy ingest failed");
            return;
        }
    };
    let mut nodes = state.nodes_mut();
    for record in nodes.iter_mut() {
        record.power_mut().current_watts = 0;
    }
    for sample in &response.nodes {
        match nodes.get_mut_by_nid(sample.nid) {
            Some(record) => {
                record
                    .power_mut()
                    .record_energy_sample(sample.energy_ctr, sample.time_usec());
            }
            None => debug!(nid = sample.nid, "energy sample for node not in table"),
        }
    }
}
