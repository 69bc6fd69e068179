// SPDX-License-Identifier: Apache-2.0

//! Per-node power records and the wattage estimator.

/// Microseconds in one day; the telemetry clock wraps at local midnight.
pub const USEC_PER_DAY: u64 = 86_400_000_000;

/// Power management state for one node.
///
/// Lazily allocated on the first telemetry observation of the node and kept
/// for the lifetime of the node entry. All watt fields are instantaneous
/// values; `joule_counter`/`time_usec` carry the previous energy sample used
/// by the estimator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePower {
    /// Lowest cap the hardware accepts, watts.
    pub min_watts: u32,
    /// Highest cap the hardware accepts, watts.
    pub max_watts: u32,
    /// Cap currently installed on the node; 0 means uncapped or unknown.
    pub cap_watts: u32,
    /// Most recent consumption estimate; 0 until two usable samples exist.
    pub current_watts: u32,
    /// Cap proposed by the allocator this tick. Scratch field.
    pub new_cap_watts: u32,
    /// Monotonic energy counter from the last sample, joules.
    pub joule_counter: u64,
    /// Timestamp of the last sample, microseconds since local midnight.
    pub time_usec: u64,
    /// Whether the site power agent reports the node ready; caps may only be
    /// changed on ready nodes.
    pub ready: bool,
    /// When this node was most recently bound to a fresh job, epoch seconds.
    /// 0 if never.
    pub new_job_time: u64,
}

impl NodePower {
    /// Folds a fresh `(joules, time_usec)` energy sample into the record,
    /// updating `current_watts` when an estimate is possible.
    ///
    /// No estimate is produced when either timestamp is zero or the joule
    /// counter did not advance; a timestamp that moved backwards by less than
    /// a day is treated as a single midnight wrap. The sample itself is
    /// always stored for the next tick.
    pub fn record_energy_sample(&mut self, joules: u64, time_usec: u64) {
        let mut delta_time = 0u64;
        if self.time_usec == 0 || time_usec == 0 {
            // First sample, or the telemetry clock is not running.
        } else if time_usec > self.time_usec {
            delta_time = time_usec - self.time_usec;
        } else if time_usec + USEC_PER_DAY > self.time_usec {
            delta_time = (time_usec + USEC_PER_DAY) - self.time_usec;
        }
        if delta_time > 0 && joules > self.joule_counter {
            let delta_joules = (joules - self.joule_counter) * 1_000_000;
            self.current_watts = u32::try_from(delta_joules / delta_time).unwrap_or(u32::MAX);
        }
        self.joule_counter = joules;
        self.time_usec = time_usec;
    }
}

/// One entry of the host's node table.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    /// Node name, `"nid"` followed by a zero-padded numeric.
    pub name: String,
    /// Numeric node id used by the site power agent.
    pub nid: u32,
    /// Power sub-record; `None` until the node is first observed.
    pub power: Option<NodePower>,
}

impl NodeRecord {
    /// Creates a record with no power sub-record yet.
    pub fn new(name: impl Into<String>, nid: u32) -> Self {
        Self {
            name: name.into(),
            nid,
            power: None,
        }
    }

    /// Returns the power sub-record, allocating it on first use.
    pub fn power_mut(&mut self) -> &mut NodePower {
        self.power.get_or_insert_with(NodePower::default)
    }
}
