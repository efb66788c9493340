//! Values returned by the telemetry store.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A live instance and the requests it has handled in its current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceLoad {
    pub instance_id: String,
    pub count: u64,
}

/// Renders as `instance_id:count`, the form the dump endpoint reports.
impl fmt::Display for InstanceLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance_id, self.count)
    }
}

/// Point-in-time view of everything the store is holding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    pub live_devices: u64,
    pub retained_readings: u64,
    pub instances: Vec<InstanceLoad>,
    /// Null measurements coerced to zero since the store was opened.
    pub sanitized_fields: u64,
}

/// What a purge pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub devices: u64,
    pub readings: u64,
    pub instances: u64,
}

impl PurgeStats {
    pub fn is_empty(&self) -> bool {
        self.devices == 0 && self.readings == 0 && self.instances == 0
    }
}
