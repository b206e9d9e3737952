//! In-memory storage backend for testing.
//!
//! [`MemoryStore`] implements both [`TelemetryStore`] and
//! [`AggregationReader`] on plain collections, so engine behavior can be
//! exercised without SQLite.
//!
//! # Features
//!
//! - **Failure injection**: fail rollup writes (always or for the next N
//!   calls), latest-value writes, or aggregation reads
//! - **Latency simulation**: delay rollup writes to widen race windows
//! - **Call counters**: observe how often the engine hit the backend

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use hydroleaf_store::{Error as StoreError, Result, RollupQuery};
use hydroleaf_types::{
    BucketAverage, BucketWidth, CompositeId, Device, DeviceGroup, LatestAverage,
    LatestSensorValue, SensorRollup, from_unix_millis, to_unix_millis,
};

use crate::traits::{AggregationReader, TelemetryStore};

#[derive(Debug, Default)]
struct Inner {
    groups: Vec<DeviceGroup>,
    devices: HashMap<String, Device>,
    latest: HashMap<(String, String), LatestSensorValue>,
    rollups: Vec<SensorRollup>,
}

/// An in-memory telemetry store for tests.
///
/// # Example
///
/// ```
/// use hydroleaf_core::{MemoryStore, TelemetryStore};
///
/// #[tokio::main]
/// async fn main() {
///     let store = MemoryStore::new();
///     store.fail_rollup_writes(1);
///
///     assert!(store.persist_rollups(&[]).await.is_err());
///     assert!(store.persist_rollups(&[]).await.is_ok());
/// }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    fail_writes: AtomicBool,
    fail_latest: AtomicBool,
    fail_reads: AtomicBool,
    remaining_write_failures: AtomicU32,
    write_latency_ms: AtomicU64,
    persist_calls: AtomicU32,
    aggregate_calls: AtomicU32,
    device_inserts: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Test control methods ---

    /// Make every rollup write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Fail the next `count` rollup writes, then succeed.
    pub fn fail_rollup_writes(&self, count: u32) {
        self.remaining_write_failures.store(count, Ordering::Relaxed);
    }

    /// Make latest-value upserts fail.
    pub fn set_fail_latest(&self, fail: bool) {
        self.fail_latest.store(fail, Ordering::Relaxed);
    }

    /// Make aggregation reads fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Delay every rollup write by `latency`.
    pub fn set_write_latency(&self, latency: Duration) {
        self.write_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of `persist_rollups` calls, including failed ones.
    pub fn persist_calls(&self) -> u32 {
        self.persist_calls.load(Ordering::Relaxed)
    }

    /// Number of `aggregate` calls, including failed ones.
    pub fn aggregate_calls(&self) -> u32 {
        self.aggregate_calls.load(Ordering::Relaxed)
    }

    /// Number of device rows actually created.
    pub fn device_inserts(&self) -> u32 {
        self.device_inserts.load(Ordering::Relaxed)
    }

    /// All rollups written so far, in insertion order.
    pub async fn rollups(&self) -> Vec<SensorRollup> {
        self.inner.read().await.rollups.clone()
    }

    /// Append rollups directly, bypassing failure injection.
    pub async fn seed_rollups(&self, rollups: impl IntoIterator<Item = SensorRollup>) {
        self.inner.write().await.rollups.extend(rollups);
    }

    fn take_write_failure(&self) -> bool {
        // Transient failures first, then the sticky flag
        let transient = self
            .remaining_write_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        transient || self.fail_writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn find_device(&self, composite_id: &str) -> Result<Option<Device>> {
        Ok(self.inner.read().await.devices.get(composite_id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let mut devices: Vec<_> = self.inner.read().await.devices.values().cloned().collect();
        devices.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.composite_id.cmp(&b.composite_id))
        });
        Ok(devices)
    }

    async fn find_or_create_group(&self, name: &str) -> Result<DeviceGroup> {
        let mut inner = self.inner.write().await;
        if let Some(group) = inner.groups.iter().find(|g| g.name == name) {
            return Ok(group.clone());
        }
        let group = DeviceGroup {
            id: inner.groups.len() as i64 + 1,
            name: name.to_string(),
        };
        inner.groups.push(group.clone());
        Ok(group)
    }

    async fn insert_device_if_absent(
        &self,
        id: &CompositeId,
        group_id: i64,
        registered_at: OffsetDateTime,
    ) -> Result<(Device, bool)> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.devices.get(id.as_str()) {
            return Ok((existing.clone(), false));
        }

        let group = inner
            .groups
            .iter()
            .find(|g| g.id == group_id)
            .cloned()
            .ok_or_else(|| StoreError::Unavailable(format!("no group with id {group_id}")))?;

        let device = Device {
            composite_id: id.as_str().to_string(),
            system: id.system().to_string(),
            layer: id.layer().to_string(),
            device_id: id.device_id().to_string(),
            group,
            registered_at,
        };
        inner
            .devices
            .insert(device.composite_id.clone(), device.clone());
        self.device_inserts.fetch_add(1, Ordering::Relaxed);
        Ok((device, true))
    }

    async fn upsert_latest(&self, value: &LatestSensorValue) -> Result<()> {
        if self.fail_latest.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("injected latest-value failure".into()));
        }
        let key = (value.composite_id.clone(), value.sensor_type.clone());
        self.inner.write().await.latest.insert(key, value.clone());
        Ok(())
    }

    async fn read_latest(
        &self,
        composite_id: &str,
        sensor_type: &str,
    ) -> Result<Option<LatestSensorValue>> {
        let key = (composite_id.to_string(), sensor_type.to_string());
        Ok(self.inner.read().await.latest.get(&key).cloned())
    }

    async fn latest_for_device(&self, composite_id: &str) -> Result<Vec<LatestSensorValue>> {
        let inner = self.inner.read().await;
        let mut values: Vec<_> = inner
            .latest
            .values()
            .filter(|v| v.composite_id == composite_id)
            .cloned()
            .collect();
        values.sort_by(|a, b| a.sensor_type.cmp(&b.sensor_type));
        Ok(values)
    }

    async fn latest_average(
        &self,
        system: &str,
        layer: &str,
        sensor_type: &str,
    ) -> Result<LatestAverage> {
        let inner = self.inner.read().await;
        let values: Vec<f64> = inner
            .latest
            .values()
            .filter(|v| v.sensor_type == sensor_type)
            .filter(|v| {
                inner
                    .devices
                    .get(&v.composite_id)
                    .is_some_and(|d| d.system == system && d.layer == layer)
            })
            .map(|v| v.value)
            .collect();

        Ok(LatestAverage {
            system: system.to_string(),
            layer: layer.to_string(),
            sensor_type: sensor_type.to_string(),
            average: (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64),
            device_count: values.len() as u64,
        })
    }

    async fn persist_rollups(&self, rollups: &[SensorRollup]) -> Result<usize> {
        self.persist_calls.fetch_add(1, Ordering::Relaxed);

        let latency = self.write_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.take_write_failure() {
            return Err(StoreError::Unavailable("injected rollup write failure".into()));
        }

        self.inner.write().await.rollups.extend_from_slice(rollups);
        Ok(rollups.len())
    }
}

#[async_trait]
impl AggregationReader for MemoryStore {
    async fn aggregate(
        &self,
        composite_id: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
        bucket: BucketWidth,
        sensor_type: Option<&str>,
    ) -> Result<Vec<BucketAverage>> {
        self.aggregate_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }

        let inner = self.inner.read().await;
        let mut groups: BTreeMap<(i64, String, Option<String>), (f64, u64)> = BTreeMap::new();

        for rollup in inner.rollups.iter().filter(|r| {
            r.composite_id == composite_id
                && r.value_time >= from
                && r.value_time < to
                && sensor_type.is_none_or(|t| r.sensor_type == t)
        }) {
            let bucket_start = to_unix_millis(bucket.truncate(rollup.value_time));
            let slot = groups
                .entry((bucket_start, rollup.sensor_type.clone(), rollup.unit.clone()))
                .or_insert((0.0, 0));
            slot.0 += rollup.value;
            slot.1 += 1;
        }

        groups
            .into_iter()
            .map(|((bucket_start, sensor_type, unit), (sum, n))| {
                Ok(BucketAverage {
                    sensor_type,
                    unit,
                    bucket_time: from_unix_millis(bucket_start)
                        .map_err(|e| StoreError::InvalidTimestamp(e.to_string()))?,
                    avg_value: sum / n as f64,
                })
            })
            .collect()
    }

    async fn rollups(&self, query: &RollupQuery) -> Result<Vec<SensorRollup>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<SensorRollup> = inner
            .rollups
            .iter()
            .filter(|r| {
                query.composite_id.as_ref().is_none_or(|id| &r.composite_id == id)
                    && query.sensor_type.as_ref().is_none_or(|t| &r.sensor_type == t)
                    && query.since.is_none_or(|since| r.value_time >= since)
                    && query.until.is_none_or(|until| r.value_time < until)
            })
            .cloned()
            .collect();

        // Stable sort keeps insertion order as the tie-break, like the row id
        rows.sort_by_key(|r| r.value_time);
        if query.newest_first {
            rows.reverse();
        }

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_rollups(&self, composite_id: Option<&str>) -> Result<u64> {
        let inner = self.inner.read().await;
        let count = inner
            .rollups
            .iter()
            .filter(|r| composite_id.is_none_or(|id| r.composite_id == id))
            .count();
        Ok(count as u64)
    }
}
