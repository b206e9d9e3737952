//! SQLite-backed implementation of the storage traits.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use hydroleaf_store::{AggregateQuery, Result, RollupQuery, Store, StoredRollup};
use hydroleaf_types::{
    BucketAverage, BucketWidth, CompositeId, Device, DeviceGroup, LatestAverage,
    LatestSensorValue, SensorRollup,
};

use crate::traits::{AggregationReader, TelemetryStore};

/// Shared handle to a [`Store`].
///
/// The lock is held for one statement or transaction at a time. Cloning is
/// cheap and every clone talks to the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<Mutex<Store>>,
}

impl SqliteStore {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl TelemetryStore for SqliteStore {
    async fn find_device(&self, composite_id: &str) -> Result<Option<Device>> {
        self.inner.lock().await.get_device(composite_id)
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        self.inner.lock().await.list_devices()
    }

    async fn find_or_create_group(&self, name: &str) -> Result<DeviceGroup> {
        self.inner.lock().await.get_or_create_group(name)
    }

    async fn insert_device_if_absent(
        &self,
        id: &CompositeId,
        group_id: i64,
        registered_at: OffsetDateTime,
    ) -> Result<(Device, bool)> {
        self.inner
            .lock()
            .await
            .insert_device_if_absent(id, group_id, registered_at)
    }

    async fn upsert_latest(&self, value: &LatestSensorValue) -> Result<()> {
        self.inner.lock().await.upsert_latest(value)
    }

    async fn read_latest(
        &self,
        composite_id: &str,
        sensor_type: &str,
    ) -> Result<Option<LatestSensorValue>> {
        self.inner.lock().await.get_latest(composite_id, sensor_type)
    }

    async fn latest_for_device(&self, composite_id: &str) -> Result<Vec<LatestSensorValue>> {
        self.inner.lock().await.list_latest(composite_id)
    }

    async fn latest_average(
        &self,
        system: &str,
        layer: &str,
        sensor_type: &str,
    ) -> Result<LatestAverage> {
        self.inner
            .lock()
            .await
            .latest_average(system, layer, sensor_type)
    }

    async fn persist_rollups(&self, rollups: &[SensorRollup]) -> Result<usize> {
        self.inner.lock().await.insert_rollups(rollups)
    }
}

#[async_trait]
impl AggregationReader for SqliteStore {
    async fn aggregate(
        &self,
        composite_id: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
        bucket: BucketWidth,
        sensor_type: Option<&str>,
    ) -> Result<Vec<BucketAverage>> {
        let mut query = AggregateQuery::new(composite_id, from, to, bucket);
        if let Some(sensor_type) = sensor_type {
            query = query.sensor_type(sensor_type);
        }
        self.inner.lock().await.aggregate(&query)
    }

    async fn rollups(&self, query: &RollupQuery) -> Result<Vec<SensorRollup>> {
        let rows = self.inner.lock().await.query_rollups(query)?;
        Ok(rows.into_iter().map(StoredRollup::into_rollup).collect())
    }

    async fn count_rollups(&self, composite_id: Option<&str>) -> Result<u64> {
        self.inner.lock().await.count_rollups(composite_id)
    }
}
