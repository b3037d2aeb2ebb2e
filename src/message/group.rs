//! Group state as reported by devices and published to UIs

use serde::{Deserialize, Serialize};

use super::{DeviceId, GroupId};

/// Group membership as seen by one device
///
/// Devices report periodically; the group coordinator keeps the report with
/// the highest term per group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReport {
    /// `None` when the device left every group
    pub group: Option<GroupId>,
    pub term: u64,
    pub leader: Option<DeviceId>,
    #[serde(default)]
    pub members: Vec<DeviceId>,
}

impl GroupReport {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            group: None,
            term: 0,
            leader: None,
            members: Vec::new(),
        }
    }
}

/// Resolved view of a group after a report was applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub reporter: DeviceId,
    pub group: Option<GroupId>,
    pub term: u64,
    /// Leader with a registered handler
    pub leader: Option<DeviceId>,
    /// Members with a registered handler
    pub members: Vec<DeviceId>,
    /// Reported members the coordinator has no handler for
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_members: Vec<DeviceId>,
}
