//! Range aggregator — everything retained between a floor score and now.
//!
//! Holds no state of its own. The upper bound is read from the store's
//! clock at call time, so a reading committed before that instant is in the
//! result and one committed after it is not.

use serde::{Deserialize, Serialize};
use tracing::debug;

use tilt_core::Timestamp;
use tilt_state::{StateResult, TelemetryStore};

/// Floor used when the caller gives none: everything still retained.
pub const DEFAULT_MIN_SCORE: i64 = 0;

/// Response body of a dump query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dump {
    /// Upper bound of the query.
    pub timestamp: Timestamp,
    /// Serialized readings, one JSON document per entry.
    pub data: Vec<String>,
    /// The caller's floor, echoed unchanged.
    pub min_score: i64,
    /// Live instances as `instance_id:count`.
    pub instance: Vec<String>,
}

#[derive(Clone)]
pub struct RangeAggregator {
    store: TelemetryStore,
}

impl RangeAggregator {
    pub fn new(store: TelemetryStore) -> Self {
        Self { store }
    }

    pub fn dump(&self, min_score: i64) -> StateResult<Dump> {
        let max = self.store.now();
        // Scores are never negative; a negative floor means "everything".
        let min = Timestamp::from_raw(u64::try_from(min_score).unwrap_or(0));

        let data = self.store.range_query(min, max)?;
        let instance = self
            .store
            .live_instances()?
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        debug!(
            min_score,
            max_score = %max,
            readings = data.len(),
            instances = instance.len(),
            "range dump"
        );
        Ok(Dump {
            timestamp: max,
            data,
            min_score,
            instance,
        })
    }
}
