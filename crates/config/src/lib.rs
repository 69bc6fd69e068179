// SPDX-License-Identifier: Apache-2.0

//! PowerParameters configuration surface.
//!
//! The balancer is configured through a single comma-separated `key=value`
//! string (the workload manager's `PowerParameters` setting). Only the keys
//! listed on [`PowerConfig`] are recognized; unknown keys are ignored so that
//! newer sites can carry extra parameters without breaking older builds.
//!
//! Parsing never fails: a value that does not satisfy its constraint is reset
//! to the key's default and a warning is logged, keeping the control loop
//! alive across operator typos.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default tick period, in seconds.
pub const DEFAULT_BALANCE_INTERVAL: u64 = 30;
/// Default location of the site power agent binary.
pub const DEFAULT_CAPMC_PATH: &str = "/opt/cray/capmc/default/bin/capmc";
/// Default global budget; 0 disables capping.
pub const DEFAULT_CAP_WATTS: u32 = 0;
/// Default maximum per-tick cap reduction, percent of (max - min).
pub const DEFAULT_DECREASE_RATE: u32 = 50;
/// Default maximum per-tick cap rise, percent of (max - min).
pub const DEFAULT_INCREASE_RATE: u32 = 20;
/// Default under-use threshold, percent of the installed cap.
pub const DEFAULT_LOWER_THRESHOLD: u32 = 90;
/// Default pressing threshold, percent of the installed cap.
pub const DEFAULT_UPPER_THRESHOLD: u32 = 95;
/// Default window, in seconds, within which a job binding counts as recent.
pub const DEFAULT_RECENT_JOB: u64 = 300;

/// Whether cap levelling applies to all jobs, to none, or per job request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobLevel {
    /// Level every running job regardless of its own flag.
    ForceOn,
    /// Never level, even for jobs that requested it.
    ForceOff,
    /// Level only jobs carrying the level flag.
    #[default]
    PerJob,
}

/// Recognized PowerParameters keys and their effective values.
///
/// Field semantics follow the key table in the site documentation:
/// `balance_interval`, `capmc_path`, `cap_watts` (with `k`/`K`/`m`/`M`
/// suffixes), `decrease_rate`, `increase_rate`, `lower_threshold`,
/// `upper_threshold`, `recent_job`, and the bare `job_level` /
/// `job_no_level` tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerConfig {
    /// Tick period of the balancing loop, seconds.
    pub balance_interval: u64,
    /// Path to the site power agent binary.
    pub capmc_path: String,
    /// Global power budget in watts; 0 means capping is disabled and
    /// previously installed caps are cleared.
    pub cap_watts: u32,
    /// Maximum per-tick cap reduction as a percentage of (max - min) watts.
    pub decrease_rate: u32,
    /// Maximum per-tick cap rise as a percentage of (max - min) watts.
    pub increase_rate: u32,
    /// Percent of the installed cap below which a node is under-using.
    pub lower_threshold: u32,
    /// Percent of the installed cap above which a node wants more power.
    pub upper_threshold: u32,
    /// Seconds within which a node's newest job binding counts as recent.
    pub recent_job: u64,
    /// Levelling policy for jobs that span multiple nodes.
    pub job_level: JobLevel,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            balance_interval: DEFAULT_BALANCE_INTERVAL,
            capmc_path: DEFAULT_CAPMC_PATH.to_owned(),
            cap_watts: DEFAULT_CAP_WATTS,
            decrease_rate: DEFAULT_DECREASE_RATE,
            increase_rate: DEFAULT_INCREASE_RATE,
            lower_threshold: DEFAULT_LOWER_THRESHOLD,
            upper_threshold: DEFAULT_UPPER_THRESHOLD,
            recent_job: DEFAULT_RECENT_JOB,
            job_level: JobLevel::default(),
        }
    }
}

impl PowerConfig {
    /// Parses a comma-separated `key=value` PowerParameters string.
    ///
    /// Later occurrences of a key override earlier ones. Values that violate
    /// their constraint reset that key to its default with a warning; unknown
    /// keys are skipped silently.
    pub fn parse(params: &str) -> Self {
        let mut config = Self::default();
        for token in params.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token {
                "job_level" => {
                    config.job_level = JobLevel::ForceOn;
                    continue;
                }
                "job_no_level" => {
                    config.job_level = JobLevel::ForceOff;
                    continue;
                }
                _ => {}
            }
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "balance_interval" => {
                    config.balance_interval = parse_min_1_u64(key, value)
                        .unwrap_or(DEFAULT_BALANCE_INTERVAL);
                }
                "capmc_path" => {
                    if value.is_empty() {
                        warn!(key, "PowerParameters: empty path, using default");
                        config.capmc_path = DEFAULT_CAPMC_PATH.to_owned();
                    } else {
                        config.capmc_path = value.to_owned();
                    }
                }
                "cap_watts" => {
                    config.cap_watts =
                        parse_cap_watts(value).unwrap_or(DEFAULT_CAP_WATTS);
                }
                "decrease_rate" => {
                    config.decrease_rate =
                        parse_min_1_u32(key, value).unwrap_or(DEFAULT_DECREASE_RATE);
                }
                "increase_rate" => {
                    config.increase_rate =
                        parse_min_1_u32(key, value).unwrap_or(DEFAULT_INCREASE_RATE);
                }
                "lower_threshold" => {
                    config.lower_threshold =
                        parse_min_1_u32(key, value).unwrap_or(DEFAULT_LOWER_THRESHOLD);
                }
                "upper_threshold" => {
                    config.upper_threshold =
                        parse_min_1_u32(key, value).unwrap_or(DEFAULT_UPPER_THRESHOLD);
                }
                "recent_job" => {
                    config.recent_job =
                        parse_min_1_u64(key, value).unwrap_or(DEFAULT_RECENT_JOB);
                }
                _ => {}
            }
        }
        debug!(
            balance_interval = config.balance_interval,
            capmc_path = %config.capmc_path,
            cap_watts = config.cap_watts,
            decrease_rate = config.decrease_rate,
            increase_rate = config.increase_rate,
            lower_threshold = config.lower_threshold,
            upper_threshold = config.upper_threshold,
            recent_job = config.recent_job,
            job_level = ?config.job_level,
            "PowerParameters loaded"
        );
        config
    }
}

fn parse_min_1_u32(key: &str, value: &str) -> Option<u32> {
    match value.parse::<u32>() {
        Ok(v) if v >= 1 => Some(v),
        _ => {
            warn!(key, value, "PowerParameters: invalid value, using default");
            None
        }
    }
}

fn parse_min_1_u64(key: &str, value: &str) -> Option<u64> {
    match value.parse::<u64>() {
        Ok(v) if v >= 1 => Some(v),
        _ => {
            warn!(key, value, "PowerParameters: invalid value, using default");
            None
        }
    }
}

/// Parses a watts value with an optional `k`/`K` (×10³) or `m`/`M` (×10⁶)
/// suffix. Values below 1 are invalid.
fn parse_cap_watts(value: &str) -> Option<u32> {
    let (digits, multiplier) = match value.as_bytes().last() {
        Some(b'k' | b'K') => (&value[..value.len() - 1], 1_000u32),
        Some(b'm' | b'M') => (&value[..value.len() - 1], 1_000_000u32),
        _ => (value, 1u32),
    };
    match digits.parse::<u32>() {
        Ok(v) if v >= 1 => v.checked_mul(multiplier).or_else(|| {
            warn!(value, "PowerParameters: cap_watts overflows, using default");
            None
        }),
        _ => {
            warn!(value, "PowerParameters: cap_watts invalid, using default");
            None
        }
    }
}
