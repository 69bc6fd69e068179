// SPDX-License-Identifier: Apache-2.0

//! Cap application: install the change list through the power agent.

use crate::balance::{CapChange, Direction};
use capbal_capmc::CapmcClient;
use tracing::{debug, warn};

/// Installs the change list, all decreases before any increase.
///
/// The ordering keeps the installed sum of caps from ever transiently
/// exceeding the budget. A failed decrease aborts the tick's remaining
/// applications (raising without the paired lowering could overshoot); a
/// failed increase only skips that record. Either way the next tick
/// re-derives truth from telemetry.
pub async fn apply_cap_changes(client: &CapmcClient, changes: &[CapChange]) {
    for change in changes
        .iter()
        .filter(|change| change.direction == Direction::Decrease)
    {
        if let Err(error) = client.set_power_cap(&change.nids, change.watts).await {
            warn!(%error, nids = %change.nids, "power cap decrease failed");
            return;
        }
        debug!(nids = %change.nids, watts = ?change.watts, "caps lowered");
    }
    for change in changes
        .iter()
        .filter(|change| change.direction == Direction::Increase)
    {
        if let Err(error) = client.set_power_cap(&change.nids, change.watts).await {
            warn!(%error, nids = %change.nids, "power cap increase failed");
            continue;
        }
        debug!(nids = %change.nids, watts = ?change.watts, "caps raised");
    }
}
