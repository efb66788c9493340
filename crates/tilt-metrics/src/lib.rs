//! tilt-metrics — read-side views over the telemetry store.
//!
//! # Architecture
//!
//! ```text
//! RangeAggregator
//!   └── dump(min_score) → { timestamp, data, min_score, instance }
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod aggregator;
pub mod prometheus;

pub use aggregator::{DEFAULT_MIN_SCORE, Dump, RangeAggregator};
pub use prometheus::render_prometheus;
