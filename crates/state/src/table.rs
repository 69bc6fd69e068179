// SPDX-License-Identifier: Apache-2.0

//! Node and job tables and the locking facade shared with the host.

use crate::nid::{compress_nids, nid_from_name};
use crate::node::NodeRecord;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use tracing::debug;

/// The host's table of compute nodes, indexed by nid.
#[derive(Debug, Default)]
pub struct NodeTable {
    records: Vec<NodeRecord>,
    by_nid: HashMap<u32, usize>,
}

impl NodeTable {
    /// Builds a table from node records, keeping their order.
    pub fn new(records: Vec<NodeRecord>) -> Self {
        let by_nid = records
            .iter()
            .enumerate()
            .map(|(idx, record)| (record.nid, idx))
            .collect();
        Self { records, by_nid }
    }

    /// Number of nodes in the table.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates node records in table order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> {
        self.records.iter()
    }

    /// Iterates node records mutably, in table order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut NodeRecord> {
        self.records.iter_mut()
    }

    /// Looks a node up by table index.
    pub fn get(&self, index: usize) -> Option<&NodeRecord> {
        self.records.get(index)
    }

    /// Looks a node up mutably by table index.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut NodeRecord> {
        self.records.get_mut(index)
    }

    /// Looks a node up by its nid.
    pub fn get_by_nid(&self, nid: u32) -> Option<&NodeRecord> {
        self.by_nid.get(&nid).and_then(|&idx| self.records.get(idx))
    }

    /// Looks a node up mutably by its nid.
    pub fn get_mut_by_nid(&mut self, nid: u32) -> Option<&mut NodeRecord> {
        match self.by_nid.get(&nid) {
            Some(&idx) => self.records.get_mut(idx),
            None => None,
        }
    }

    /// Nids of every node whose name carries the `nid` scheme, in table
    /// order. Foreign names are logged and skipped.
    pub fn named_nids(&self) -> Vec<u32> {
        self.records
            .iter()
            .filter_map(|record| {
                let nid = nid_from_name(&record.name);
                if nid.is_none() {
                    debug!(name = %record.name, "node name carries no nid");
                }
                nid
            })
            .collect()
    }

    /// Sums the cluster's allocated and consumed power.
    ///
    /// A node's allocation is its installed cap, or its capability maximum
    /// while uncapped; consumption is the latest wattage estimate.
    pub fn power_summary(&self) -> PowerSummary {
        let mut summary = PowerSummary::default();
        for record in &self.records {
            let Some(power) = record.power.as_ref() else {
                continue;
            };
            if power.cap_watts != 0 {
                summary.alloc_watts += u64::from(power.cap_watts);
            } else {
                summary.alloc_watts += u64::from(power.max_watts);
            }
            summary.used_watts += u64::from(power.current_watts);
        }
        summary
    }
}

/// Cluster-wide power totals, reported each tick at debug level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerSummary {
    /// Sum of installed caps (capability maximum where uncapped), watts.
    pub alloc_watts: u64,
    /// Sum of per-node consumption estimates, watts.
    pub used_watts: u64,
}

/// One entry of the host's job table. Read-only to the balancer.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Job id assigned by the workload manager.
    pub job_id: u32,
    /// Whether the job is currently running.
    pub running: bool,
    /// Whether the job asked for a common cap across its nodes.
    pub level: bool,
    /// Indices into the node table for the nodes the job occupies.
    pub nodes: Vec<usize>,
}

/// Node and job tables behind the host's reader-writer locks, plus the
/// cached nid range string covering every known node.
#[derive(Debug, Default)]
pub struct ClusterState {
    nodes: RwLock<NodeTable>,
    jobs: RwLock<Vec<JobRecord>>,
    nid_range: Mutex<Option<String>>,
}

impl ClusterState {
    /// Creates cluster state over the given node table with no jobs.
    pub fn new(nodes: NodeTable) -> Self {
        Self {
            nodes: RwLock::new(nodes),
            jobs: RwLock::new(Vec::new()),
            nid_range: Mutex::new(None),
        }
    }

    /// Acquires the node table read lock.
    pub fn nodes(&self) -> RwLockReadGuard<'_, NodeTable> {
        self.nodes.read()
    }

    /// Acquires the node table write lock.
    pub fn nodes_mut(&self) -> RwLockWriteGuard<'_, NodeTable> {
        self.nodes.write()
    }

    /// Acquires the job table read lock.
    pub fn jobs(&self) -> RwLockReadGuard<'_, Vec<JobRecord>> {
        self.jobs.read()
    }

    /// Acquires the job table write lock.
    pub fn jobs_mut(&self) -> RwLockWriteGuard<'_, Vec<JobRecord>> {
        self.jobs.write()
    }

    /// Range string covering every node in the table, e.g. `"1-16"`.
    ///
    /// Built once and cached until [`ClusterState::invalidate_nid_range`];
    /// `None` when the node table is empty.
    pub fn full_nid_range(&self) -> Option<String> {
        let mut cached = self.nid_range.lock();
        if cached.is_none() {
            let nids = self.nodes.read().named_nids();
            if nids.is_empty() {
                return None;
            }
            *cached = Some(compress_nids(&nids));
        }
        cached.clone()
    }

    /// Drops the cached nid range string; rebuilt on next use.
    pub fn invalidate_nid_range(&self) {
        *self.nid_range.lock() = None;
    }

    /// Records that a job was just bound to its nodes (job start or resume),
    /// stamping `new_job_time` so the allocator's recent-job window applies.
    pub fn note_job_start(&self, job_id: u32, now: u64) {
        let jobs = self.jobs.read();
        let Some(job) = jobs.iter().find(|job| job.job_id == job_id) else {
            debug!(job_id, "job not in table, no new-job stamp");
            return;
        };
        let mut nodes = self.nodes.write();
        for &index in &job.nodes {
            if let Some(record) = nodes.get_mut(index) {
                record.power_mut().new_job_time = now;
            }
        }
    }
}
