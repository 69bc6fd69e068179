// SPDX-License-Identifier: Apache-2.0

//! Typed response schemas for the power agent verbs.
//!
//! One record shape per verb; the balancer never sees untyped JSON. Fields
//! the agent may omit default to zero/empty, and fields this build does not
//! know about are ignored.

use serde::Deserialize;

/// Control name for whole-node power on Cray hardware.
pub const CONTROL_NODE: &str = "node";
/// Control name for accelerator power on Cray hardware.
pub const CONTROL_ACCEL: &str = "accel";

/// `get_power_cap_capabilities` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilitiesResponse {
    /// Groups of nodes sharing identical power specifications.
    #[serde(default)]
    pub groups: Vec<CapabilityGroup>,
    /// Agent error number; 0 on success. Currently unused by the balancer.
    #[serde(default, rename = "e")]
    pub error_code: i64,
    /// Agent error message accompanying `e`.
    #[serde(default)]
    pub err_msg: String,
}

/// One group of nodes with identical capability ranges.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapabilityGroup {
    /// Node ids in the group.
    #[serde(default)]
    pub nids: Vec<u32>,
    /// Named watt ranges (`node`, `accel`, ...).
    #[serde(default)]
    pub controls: Vec<ControlRange>,
}

impl CapabilityGroup {
    /// The whole-node watt range, when present.
    pub fn node_range(&self) -> Option<&ControlRange> {
        self.controls.iter().find(|c| c.name == CONTROL_NODE)
    }

    /// The accelerator watt range, when present. Parsed but never applied;
    /// accelerators are held at zero.
    pub fn accel_range(&self) -> Option<&ControlRange> {
        self.controls.iter().find(|c| c.name == CONTROL_ACCEL)
    }
}

/// A named min/max watt range.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlRange {
    /// Control name, e.g. `node` or `accel`.
    #[serde(default)]
    pub name: String,
    /// Minimum settable watts.
    #[serde(default)]
    pub min: u32,
    /// Maximum settable watts.
    #[serde(default)]
    pub max: u32,
}

/// `get_power_cap` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PowerCapsResponse {
    /// Per-node installed control values.
    #[serde(default)]
    pub nids: Vec<NodeCaps>,
}

/// Installed control values for one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeCaps {
    /// Node id.
    #[serde(default)]
    pub nid: u32,
    /// Named installed values (`node`, `accel`, ...).
    #[serde(default)]
    pub controls: Vec<ControlValue>,
}

impl NodeCaps {
    /// The installed whole-node cap, watts; `None` when the agent reported
    /// no `node` control for this nid.
    pub fn node_cap(&self) -> Option<u32> {
        self.controls
            .iter()
            .find(|c| c.name == CONTROL_NODE)
            .map(|c| c.val)
    }
}

/// A named installed control value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlValue {
    /// Control name, e.g. `node` or `accel`.
    #[serde(default)]
    pub name: String,
    /// Installed watts; 0 means uncapped.
    #[serde(default)]
    pub val: u32,
}

/// `node_status` response. Buckets other than `ready` are ignored by the
/// balancer but kept for completeness.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeStatusResponse {
    /// Nodes whose caps may be changed.
    #[serde(default)]
    pub ready: Vec<u32>,
    /// Powered-off nodes.
    #[serde(default)]
    pub off: Vec<u32>,
    /// Powered-on but not ready nodes.
    #[serde(default)]
    pub on: Vec<u32>,
    /// Agent error number; 0 on success.
    #[serde(default, rename = "e")]
    pub error_code: i64,
    /// Agent error message accompanying `e`.
    #[serde(default)]
    pub err_msg: String,
}

/// `get_node_energy_counter` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnergyCounterResponse {
    /// Per-node counter samples.
    #[serde(default)]
    pub nodes: Vec<EnergyNode>,
}

/// One node's energy counter sample.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnergyNode {
    /// Node id.
    #[serde(default)]
    pub nid: u32,
    /// Monotonic energy counter, joules.
    #[serde(default)]
    pub energy_ctr: u64,
    /// Wall-clock sample time, `YYYY-MM-DD HH:MM:SS.uuuuuu-TZ`.
    #[serde(default)]
    pub time: String,
}

impl EnergyNode {
    /// Sample time as microseconds since local midnight; 0 when the
    /// timestamp cannot be understood (the estimator then skips the sample).
    pub fn time_usec(&self) -> u64 {
        crate::time::time_of_day_usec(&self.time).unwrap_or(0)
    }
}
