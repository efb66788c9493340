//! tilt-state — windowed telemetry store for Tiltgrid.
//!
//! Backed by [redb](https://docs.rs/redb) with its in-memory backend. Holds
//! two kinds of short-lived state, both with a rolling expiry that every
//! write pushes forward:
//!
//! - device windows: per-device readings ordered by [`Timestamp`] score,
//!   expiring as a whole once the device goes quiet;
//! - instance counters: per-instance request counts, used as a load and
//!   liveness signal.
//!
//! Every insert and its expiry update commit in one write transaction.
//! Expired state is invisible to reads immediately; [`ExpirySweeper`]
//! reclaims it later.
//!
//! [`Timestamp`]: tilt_core::Timestamp

pub mod error;
pub mod store;
pub mod sweeper;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StoreOptions, TelemetryStore};
pub use sweeper::ExpirySweeper;
pub use types::*;
