//! redb table definitions for the telemetry store.
//!
//! Device windows use a composite `(device_id, score, seq)` key so a range
//! scan over one device walks its readings in score order. `seq` keeps
//! same-millisecond readings from overwriting each other.

use redb::TableDefinition;

/// Serialized readings keyed by `(device_id, score, seq)`.
pub const DEVICE_WINDOWS: TableDefinition<(&str, u64, u64), &str> =
    TableDefinition::new("device_windows");

/// Expiry deadline (Unix epoch milliseconds) per device window.
pub const DEVICE_EXPIRY: TableDefinition<&str, u64> = TableDefinition::new("device_expiry");

/// `(count, expires_at_ms)` keyed by instance id.
pub const INSTANCE_COUNTERS: TableDefinition<&str, (u64, u64)> =
    TableDefinition::new("instance_counters");
