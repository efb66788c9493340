//! tilt-autoscale — bounded scale decisions.
//!
//! Validates a requested instance count against fixed fleet limits and,
//! when an executor and credentials are configured, hands the decision to
//! it. Talking to the platform is the executor's business, not this crate's.
//!
//! ```text
//! target < 1 or target > 8          → Rejected (no call)
//! executor + credentials configured → Executed
//! otherwise                         → DryRun
//! ```

pub mod gate;

pub use gate::{
    BoxFuture, MAX_INSTANCES, MIN_INSTANCES, ScaleCallback, ScaleDecision, ScaleGate, ScaleRequest,
};
