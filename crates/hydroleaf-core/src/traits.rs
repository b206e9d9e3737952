//! Storage seams consumed by the engine.
//!
//! [`TelemetryStore`] covers device registration, the latest-value mirror and
//! rollup persistence. [`AggregationReader`] answers per-bucket average
//! queries. Both are implemented by [`SqliteStore`](crate::SqliteStore) for
//! production and by [`MemoryStore`](crate::MemoryStore) for tests.

use async_trait::async_trait;
use time::OffsetDateTime;

use hydroleaf_store::{Result, RollupQuery};
use hydroleaf_types::{
    BucketAverage, BucketWidth, CompositeId, Device, DeviceGroup, LatestAverage,
    LatestSensorValue, SensorRollup,
};

/// Durable storage used by ingestion.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    // --- Devices ---

    /// Look up a registered device.
    async fn find_device(&self, composite_id: &str) -> Result<Option<Device>>;

    /// All registered devices, oldest registration first.
    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// Get a group by name, creating it on first use.
    async fn find_or_create_group(&self, name: &str) -> Result<DeviceGroup>;

    /// Register a device unless it already exists.
    ///
    /// Returns the stored device and whether this call created it. Concurrent
    /// callers for the same identifier must observe exactly one insert.
    async fn insert_device_if_absent(
        &self,
        id: &CompositeId,
        group_id: i64,
        registered_at: OffsetDateTime,
    ) -> Result<(Device, bool)>;

    // --- Latest values ---

    /// Create or overwrite the mirrored latest value.
    async fn upsert_latest(&self, value: &LatestSensorValue) -> Result<()>;

    /// Read the mirrored latest value of one sensor.
    async fn read_latest(
        &self,
        composite_id: &str,
        sensor_type: &str,
    ) -> Result<Option<LatestSensorValue>>;

    /// Read all mirrored latest values of a device.
    async fn latest_for_device(&self, composite_id: &str) -> Result<Vec<LatestSensorValue>>;

    /// Mean of the latest `sensor_type` values across one system layer.
    async fn latest_average(
        &self,
        system: &str,
        layer: &str,
        sensor_type: &str,
    ) -> Result<LatestAverage>;

    // --- Rollups ---

    /// Append rollups atomically. Returns the number of rows written.
    async fn persist_rollups(&self, rollups: &[SensorRollup]) -> Result<usize>;
}

/// Read side of the rollup table.
#[async_trait]
pub trait AggregationReader: Send + Sync {
    /// Per-bucket averages.
    ///
    /// Implementations return one row per (bucket, sensor type, unit) among
    /// the epoch-aligned buckets of `bucket` inside `[from, to)`, ordered by
    /// bucket time, then sensor type, then unit. An empty vector means no
    /// data.
    async fn aggregate(
        &self,
        composite_id: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
        bucket: BucketWidth,
        sensor_type: Option<&str>,
    ) -> Result<Vec<BucketAverage>>;

    /// Raw rollup rows matching `query`.
    async fn rollups(&self, query: &RollupQuery) -> Result<Vec<SensorRollup>>;

    /// Number of stored rollups, optionally for one device.
    async fn count_rollups(&self, composite_id: Option<&str>) -> Result<u64>;
}
