//! TelemetryStore — redb-backed sliding windows and load counters.
//!
//! Expiry is a deadline stored next to the data, not a background timer:
//! each write rewrites the deadline in the same transaction as the insert,
//! and reads skip anything whose deadline has passed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable, Table};
use tracing::debug;

use tilt_core::{Clock, Reading, Timestamp};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type WindowTable<'txn> = Table<'txn, (&'static str, u64, u64), &'static str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// How long a device window or instance counter survives without a write.
    pub window: Duration,
    /// Calendar used to stamp readings.
    pub clock: Clock,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3),
            clock: Clock::Utc,
        }
    }
}

/// Thread-safe telemetry store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TelemetryStore {
    db: Arc<Database>,
    options: StoreOptions,
    seq: Arc<AtomicU64>,
    sanitized: Arc<AtomicU64>,
}

impl TelemetryStore {
    /// Open an in-memory store with the default 3-second window.
    pub fn open_in_memory() -> StateResult<Self> {
        Self::open_in_memory_with(StoreOptions::default())
    }

    pub fn open_in_memory_with(options: StoreOptions) -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Unavailable))?;
        let store = Self {
            db: Arc::new(db),
            options,
            seq: Arc::new(AtomicU64::new(0)),
            sanitized: Arc::new(AtomicU64::new(0)),
        };
        store.ensure_tables()?;
        debug!(window_ms = store.window_ms(), "in-memory telemetry store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Unavailable))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEVICE_WINDOWS).map_err(map_err!(Table))?;
        txn.open_table(DEVICE_EXPIRY).map_err(map_err!(Table))?;
        txn.open_table(INSTANCE_COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Confirm the database answers reads.
    pub fn ping(&self) -> StateResult<()> {
        let txn = self.db.begin_read().map_err(map_err!(Unavailable))?;
        txn.open_table(DEVICE_EXPIRY).map_err(map_err!(Unavailable))?;
        txn.open_table(INSTANCE_COUNTERS).map_err(map_err!(Unavailable))?;
        Ok(())
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Current time on the store's clock.
    pub fn now(&self) -> Timestamp {
        self.options.clock.now()
    }

    fn window_ms(&self) -> u64 {
        u64::try_from(self.options.window.as_millis()).unwrap_or(u64::MAX)
    }

    fn deadline(&self, now_ms: u64) -> u64 {
        now_ms.saturating_add(self.window_ms())
    }

    // ── Device windows ─────────────────────────────────────────────

    /// Sanitize, stamp, and append a reading to its device's window.
    ///
    /// Resets the whole window's expiry. A write landing on an already
    /// expired window discards the old entries first. Returns the score the
    /// reading was stored under.
    pub fn record(&self, mut reading: Reading) -> StateResult<Timestamp> {
        let fixed = reading.sanitize();
        if !fixed.is_empty() {
            self.sanitized
                .fetch_add(fixed.len() as u64, Ordering::Relaxed);
        }

        let ts = self.now();
        reading.stamp(ts);
        let device = reading.device_id().to_string();
        let payload = serde_json::to_string(&reading).map_err(map_err!(Serialize))?;
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let now_ms = epoch_millis();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut expiry = txn.open_table(DEVICE_EXPIRY).map_err(map_err!(Table))?;
            let mut windows = txn.open_table(DEVICE_WINDOWS).map_err(map_err!(Table))?;

            let stale = expiry
                .get(device.as_str())
                .map_err(map_err!(Read))?
                .is_some_and(|deadline| deadline.value() <= now_ms);
            if stale {
                let dropped = clear_window(&mut windows, &device)?;
                debug!(%device, dropped, "expired window restarted");
            }

            windows
                .insert((device.as_str(), ts.as_u64(), seq), payload.as_str())
                .map_err(map_err!(Write))?;
            expiry
                .insert(device.as_str(), self.deadline(now_ms))
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%device, %ts, "reading recorded");
        Ok(ts)
    }

    /// Serialized readings from every live window scored within `[min, max]`.
    ///
    /// Readings of one device come out in ascending score order; no order is
    /// promised across devices.
    pub fn range_query(&self, min: Timestamp, max: Timestamp) -> StateResult<Vec<String>> {
        if min > max {
            return Ok(Vec::new());
        }
        let now_ms = epoch_millis();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let expiry = txn.open_table(DEVICE_EXPIRY).map_err(map_err!(Table))?;
        let windows = txn.open_table(DEVICE_WINDOWS).map_err(map_err!(Table))?;

        let mut results = Vec::new();
        for entry in expiry.iter().map_err(map_err!(Read))? {
            let (device, deadline) = entry.map_err(map_err!(Read))?;
            if deadline.value() <= now_ms {
                continue;
            }
            let device = device.value();
            let lo = (device, min.as_u64(), 0u64);
            let hi = (device, max.as_u64(), u64::MAX);
            for row in windows.range(lo..=hi).map_err(map_err!(Read))? {
                let (_, payload) = row.map_err(map_err!(Read))?;
                results.push(payload.value().to_string());
            }
        }
        Ok(results)
    }

    // ── Instance counters ──────────────────────────────────────────

    /// Announce an instance with a zero count and a fresh expiry.
    pub fn register_instance(&self, instance_id: &str) -> StateResult<()> {
        let now_ms = epoch_millis();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut counters = txn.open_table(INSTANCE_COUNTERS).map_err(map_err!(Table))?;
            counters
                .insert(instance_id, (0u64, self.deadline(now_ms)))
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%instance_id, "instance registered");
        Ok(())
    }

    /// Count one request against an instance and push its expiry forward.
    ///
    /// An absent or expired counter restarts at 1. Returns the new count.
    pub fn touch(&self, instance_id: &str) -> StateResult<u64> {
        let now_ms = epoch_millis();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut counters = txn.open_table(INSTANCE_COUNTERS).map_err(map_err!(Table))?;
            let current = counters
                .get(instance_id)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .filter(|&(_, deadline)| deadline > now_ms)
                .map_or(0, |(count, _)| count);
            count = current + 1;
            counters
                .insert(instance_id, (count, self.deadline(now_ms)))
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    /// All counters that have not expired, ordered by instance id.
    pub fn live_instances(&self) -> StateResult<Vec<InstanceLoad>> {
        let now_ms = epoch_millis();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let counters = txn.open_table(INSTANCE_COUNTERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in counters.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let (count, deadline) = value.value();
            if deadline > now_ms {
                results.push(InstanceLoad {
                    instance_id: key.value().to_string(),
                    count,
                });
            }
        }
        Ok(results)
    }

    // ── Housekeeping ───────────────────────────────────────────────

    /// Physically remove expired windows and counters.
    pub fn purge_expired(&self) -> StateResult<PurgeStats> {
        let now_ms = epoch_millis();
        let mut stats = PurgeStats::default();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut expiry = txn.open_table(DEVICE_EXPIRY).map_err(map_err!(Table))?;
            let mut windows = txn.open_table(DEVICE_WINDOWS).map_err(map_err!(Table))?;
            let mut counters = txn.open_table(INSTANCE_COUNTERS).map_err(map_err!(Table))?;

            let mut devices = Vec::new();
            for entry in expiry.iter().map_err(map_err!(Read))? {
                let (device, deadline) = entry.map_err(map_err!(Read))?;
                if deadline.value() <= now_ms {
                    devices.push(device.value().to_string());
                }
            }
            for device in &devices {
                stats.readings += clear_window(&mut windows, device)?;
                expiry.remove(device.as_str()).map_err(map_err!(Write))?;
            }
            stats.devices = devices.len() as u64;

            let mut instances = Vec::new();
            for entry in counters.iter().map_err(map_err!(Read))? {
                let (instance, value) = entry.map_err(map_err!(Read))?;
                let (_, deadline) = value.value();
                if deadline <= now_ms {
                    instances.push(instance.value().to_string());
                }
            }
            for instance in &instances {
                counters.remove(instance.as_str()).map_err(map_err!(Write))?;
            }
            stats.instances = instances.len() as u64;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if !stats.is_empty() {
            debug!(
                devices = stats.devices,
                readings = stats.readings,
                instances = stats.instances,
                "expired state purged"
            );
        }
        Ok(stats)
    }

    /// Counts of live devices, retained readings, and live instances.
    pub fn load_snapshot(&self) -> StateResult<LoadSnapshot> {
        let now_ms = epoch_millis();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let expiry = txn.open_table(DEVICE_EXPIRY).map_err(map_err!(Table))?;
        let windows = txn.open_table(DEVICE_WINDOWS).map_err(map_err!(Table))?;

        let mut snapshot = LoadSnapshot {
            sanitized_fields: self.sanitized.load(Ordering::Relaxed),
            ..LoadSnapshot::default()
        };
        for entry in expiry.iter().map_err(map_err!(Read))? {
            let (device, deadline) = entry.map_err(map_err!(Read))?;
            if deadline.value() <= now_ms {
                continue;
            }
            let device = device.value();
            let lo = (device, 0u64, 0u64);
            let hi = (device, u64::MAX, u64::MAX);
            snapshot.live_devices += 1;
            snapshot.retained_readings +=
                windows.range(lo..=hi).map_err(map_err!(Read))?.count() as u64;
        }
        drop(windows);
        drop(expiry);
        drop(txn);

        snapshot.instances = self.live_instances()?;
        Ok(snapshot)
    }
}

/// Delete every reading of one device. Returns how many were removed.
fn clear_window(windows: &mut WindowTable<'_>, device: &str) -> StateResult<u64> {
    let keys: Vec<(u64, u64)> = windows
        .range((device, 0u64, 0u64)..=(device, u64::MAX, u64::MAX))
        .map_err(map_err!(Read))?
        .map(|row| {
            row.map(|(key, _)| {
                let (_, score, seq) = key.value();
                (score, seq)
            })
        })
        .collect::<Result<_, _>>()
        .map_err(map_err!(Read))?;
    for &(score, seq) in &keys {
        windows
            .remove((device, score, seq))
            .map_err(map_err!(Write))?;
    }
    Ok(keys.len() as u64)
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::thread::sleep;

    const SHORT: Duration = Duration::from_millis(300);

    fn short_store() -> TelemetryStore {
        TelemetryStore::open_in_memory_with(StoreOptions {
            window: SHORT,
            clock: Clock::Utc,
        })
        .unwrap()
    }

    fn reading(devid: &str, tilt_lr: Value) -> Reading {
        Reading::from_value(json!({
            "devid": devid,
            "TiltFB": 3,
            "TiltLR": tilt_lr,
            "Direction": 90,
            "altitude": 100,
            "latitude": 1.0,
            "longitude": 2.0,
        }))
        .unwrap()
    }

    fn everything(store: &TelemetryStore) -> Vec<Value> {
        store
            .range_query(Timestamp::MIN, Timestamp::MAX)
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    // ── Device windows ─────────────────────────────────────────────

    #[test]
    fn record_is_visible_at_its_own_score() {
        let store = TelemetryStore::open_in_memory().unwrap();
        let ts = store.record(reading("A", json!(4))).unwrap();

        let hits = store.range_query(ts, ts).unwrap();
        assert_eq!(hits.len(), 1);
        let stored: Value = serde_json::from_str(&hits[0]).unwrap();
        assert_eq!(stored["devid"], "A");
        assert_eq!(stored["timestamp"], json!(ts.as_u64()));
        assert_eq!(ts.to_string().len(), 17);
    }

    #[test]
    fn null_field_is_stored_as_zero() {
        let store = TelemetryStore::open_in_memory().unwrap();
        let ts = store.record(reading("A", Value::Null)).unwrap();

        let stored = &everything(&store)[0];
        assert_eq!(
            *stored,
            json!({
                "devid": "A",
                "TiltFB": 3,
                "TiltLR": 0,
                "Direction": 90,
                "altitude": 100,
                "latitude": 1.0,
                "longitude": 2.0,
                "timestamp": ts.as_u64(),
            })
        );
        assert_eq!(store.load_snapshot().unwrap().sanitized_fields, 1);
    }

    #[test]
    fn client_timestamp_is_overwritten() {
        let store = TelemetryStore::open_in_memory().unwrap();
        let mut payload = reading("A", json!(1)).into_value();
        payload["timestamp"] = json!(42);
        let ts = store.record(Reading::from_value(payload).unwrap()).unwrap();

        assert_eq!(everything(&store)[0]["timestamp"], json!(ts.as_u64()));
    }

    #[test]
    fn range_bounds_are_inclusive_and_filter() {
        let store = TelemetryStore::open_in_memory().unwrap();
        let ts = store.record(reading("A", json!(1))).unwrap();
        let before = Timestamp::from_raw(ts.as_u64() - 1);
        let after = Timestamp::from_raw(ts.as_u64() + 1);

        assert_eq!(store.range_query(before, ts).unwrap().len(), 1);
        assert_eq!(store.range_query(ts, after).unwrap().len(), 1);
        assert!(store.range_query(after, Timestamp::MAX).unwrap().is_empty());
        assert!(store.range_query(Timestamp::MIN, before).unwrap().is_empty());
    }

    #[test]
    fn inverted_range_is_empty() {
        let store = TelemetryStore::open_in_memory().unwrap();
        store.record(reading("A", json!(1))).unwrap();
        assert!(store.range_query(Timestamp::MAX, Timestamp::MIN).unwrap().is_empty());
    }

    #[test]
    fn query_spans_devices() {
        let store = TelemetryStore::open_in_memory().unwrap();
        store.record(reading("A", json!(1))).unwrap();
        store.record(reading("B", json!(2))).unwrap();
        store.record(reading("C", json!(3))).unwrap();

        let mut devices: Vec<String> = everything(&store)
            .iter()
            .map(|r| r["devid"].as_str().unwrap().to_string())
            .collect();
        devices.sort();
        assert_eq!(devices, vec!["A", "B", "C"]);
    }

    #[test]
    fn device_window_is_ascending() {
        let store = TelemetryStore::open_in_memory().unwrap();
        for i in 0..5 {
            store.record(reading("A", json!(i))).unwrap();
            sleep(Duration::from_millis(2));
        }

        let readings = everything(&store);
        assert_eq!(readings.len(), 5);
        let scores: Vec<u64> = readings
            .iter()
            .map(|r| r["timestamp"].as_u64().unwrap())
            .collect();
        assert!(scores.windows(2).all(|w| w[0] <= w[1]), "{scores:?}");
        let order: Vec<i64> = readings
            .iter()
            .map(|r| r["TiltLR"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn same_millisecond_writes_are_all_kept() {
        let store = TelemetryStore::open_in_memory().unwrap();
        for i in 0..50 {
            store.record(reading("A", json!(i))).unwrap();
        }
        assert_eq!(everything(&store).len(), 50);
    }

    #[test]
    fn quiet_window_expires_wholesale() {
        let store = short_store();
        for i in 0..3 {
            store.record(reading("A", json!(i))).unwrap();
        }
        let fresh = store.record(reading("B", json!(0))).unwrap();
        assert_eq!(everything(&store).len(), 4);

        sleep(SHORT + Duration::from_millis(150));
        assert!(store.range_query(Timestamp::MIN, Timestamp::MAX).unwrap().is_empty());
        assert!(store.range_query(fresh, fresh).unwrap().is_empty());
    }

    #[test]
    fn writes_keep_the_whole_window_alive() {
        let store = TelemetryStore::open_in_memory_with(StoreOptions {
            window: Duration::from_millis(400),
            clock: Clock::Utc,
        })
        .unwrap();
        store.record(reading("A", json!(1))).unwrap();
        sleep(Duration::from_millis(250));
        store.record(reading("A", json!(2))).unwrap();
        sleep(Duration::from_millis(250));

        // The first reading is older than the window but the device is not.
        assert_eq!(everything(&store).len(), 2);
    }

    #[test]
    fn write_after_expiry_starts_fresh_window() {
        let store = short_store();
        store.record(reading("A", json!(1))).unwrap();
        store.record(reading("A", json!(2))).unwrap();
        sleep(SHORT + Duration::from_millis(150));

        store.record(reading("A", json!(3))).unwrap();
        let readings = everything(&store);
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0]["TiltLR"], json!(3));
    }

    #[test]
    fn concurrent_records_are_all_stored() {
        let store = TelemetryStore::open_in_memory().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store.record(reading(&format!("dev-{}", t % 2), json!(i))).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(everything(&store).len(), 200);
        assert_eq!(store.load_snapshot().unwrap().live_devices, 2);
    }

    // ── Instance counters ──────────────────────────────────────────

    #[test]
    fn default_options_stamp_in_utc() {
        let options = StoreOptions::default();
        assert_eq!(options.clock, Clock::Utc);
        assert_eq!(options.window, Duration::from_secs(3));
    }

    #[test]
    fn concurrent_touches_are_all_counted() {
        let store = TelemetryStore::open_in_memory().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store.touch("5000").unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(
            store.live_instances().unwrap(),
            vec![InstanceLoad {
                instance_id: "5000".to_string(),
                count: 400,
            }]
        );
    }

    #[test]
    fn touch_counts_up() {
        let store = TelemetryStore::open_in_memory().unwrap();
        assert_eq!(store.touch("5000").unwrap(), 1);
        assert_eq!(store.touch("5000").unwrap(), 2);
        assert_eq!(store.touch("5000").unwrap(), 3);

        assert_eq!(
            store.live_instances().unwrap(),
            vec![InstanceLoad {
                instance_id: "5000".to_string(),
                count: 3,
            }]
        );
    }

    #[test]
    fn idle_counter_disappears() {
        let store = short_store();
        store.touch("5000").unwrap();
        store.touch("5000").unwrap();
        store.touch("5000").unwrap();
        sleep(SHORT + Duration::from_millis(150));

        assert!(store.live_instances().unwrap().is_empty());
        // A fresh request starts a new count.
        assert_eq!(store.touch("5000").unwrap(), 1);
    }

    #[test]
    fn register_instance_reports_zero() {
        let store = TelemetryStore::open_in_memory().unwrap();
        store.register_instance("5001").unwrap();
        assert_eq!(store.live_instances().unwrap()[0].to_string(), "5001:0");
        assert_eq!(store.touch("5001").unwrap(), 1);
    }

    #[test]
    fn instances_are_independent() {
        let store = TelemetryStore::open_in_memory().unwrap();
        store.touch("5000").unwrap();
        store.touch("5001").unwrap();
        store.touch("5001").unwrap();

        let loads: Vec<String> = store
            .live_instances()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(loads, vec!["5000:1", "5001:2"]);
    }

    // ── Housekeeping ───────────────────────────────────────────────

    #[test]
    fn purge_reclaims_expired_state() {
        let store = short_store();
        store.record(reading("A", json!(1))).unwrap();
        store.record(reading("A", json!(2))).unwrap();
        store.touch("5000").unwrap();

        assert!(store.purge_expired().unwrap().is_empty());
        sleep(SHORT + Duration::from_millis(150));
        store.record(reading("B", json!(1))).unwrap();

        let stats = store.purge_expired().unwrap();
        assert_eq!(
            stats,
            PurgeStats {
                devices: 1,
                readings: 2,
                instances: 1,
            }
        );
        assert_eq!(everything(&store).len(), 1);
    }

    #[test]
    fn load_snapshot_counts_live_state() {
        let store = TelemetryStore::open_in_memory().unwrap();
        store.record(reading("A", json!(1))).unwrap();
        store.record(reading("A", Value::Null)).unwrap();
        store.record(reading("B", json!(1))).unwrap();
        store.touch("5000").unwrap();

        let snapshot = store.load_snapshot().unwrap();
        assert_eq!(snapshot.live_devices, 2);
        assert_eq!(snapshot.retained_readings, 3);
        assert_eq!(snapshot.instances.len(), 1);
        assert_eq!(snapshot.sanitized_fields, 1);
    }

    #[test]
    fn empty_store_operations() {
        let store = TelemetryStore::open_in_memory().unwrap();
        store.ping().unwrap();
        assert!(everything(&store).is_empty());
        assert!(store.live_instances().unwrap().is_empty());
        assert!(store.purge_expired().unwrap().is_empty());
        assert_eq!(store.load_snapshot().unwrap(), LoadSnapshot::default());
    }
}
