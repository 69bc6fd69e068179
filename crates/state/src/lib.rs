// SPDX-License-Identifier: Apache-2.0

//! Shared cluster state for the power-cap balancer.
//!
//! The workload manager owns a node table and a job table; the balancer is
//! the sole writer of each node's power sub-record and a pure reader of
//! everything else. This crate models both tables behind reader-writer locks
//! with the same discipline the host applies: telemetry ingest takes the node
//! write lock only for the span needed to copy parsed results in, the
//! allocator holds read locks over both tables for the whole of one pass.

pub mod nid;
pub mod node;
pub mod table;

pub use nid::{compress_nids, name_from_nid, nid_from_name, parse_nids};
pub use node::{NodePower, NodeRecord, USEC_PER_DAY};
pub use table::{ClusterState, JobRecord, NodeTable, PowerSummary};
