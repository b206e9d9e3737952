//! Latest-value mirror for live dashboards.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{Level, debug};

use hydroleaf_types::{Device, LatestAverage, LatestSensorValue};

use crate::error::{Error, Result};
use crate::traits::TelemetryStore;

/// Keeps the most recent raw reading per (device, sensor type).
///
/// Writes are last-write-wins: an older timestamp arriving after a newer one
/// still overwrites it.
pub struct LatestValueMirror {
    store: Arc<dyn TelemetryStore>,
}

impl LatestValueMirror {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    /// Create or overwrite the latest value of `sensor_type` on `device`.
    pub async fn upsert(
        &self,
        device: &Device,
        sensor_type: &str,
        value: f64,
        unit: Option<&str>,
        timestamp: OffsetDateTime,
    ) -> Result<()> {
        if tracing::enabled!(Level::DEBUG) {
            if let Ok(Some(previous)) = self
                .store
                .read_latest(&device.composite_id, sensor_type)
                .await
            {
                if previous.value_time > timestamp {
                    debug!(
                        "Latest {}/{} regressed from {} to {}",
                        device.composite_id, sensor_type, previous.value_time, timestamp
                    );
                }
            }
        }

        let row = LatestSensorValue {
            composite_id: device.composite_id.clone(),
            sensor_type: sensor_type.to_string(),
            value,
            unit: unit.map(str::to_string),
            value_time: timestamp,
        };

        self.store
            .upsert_latest(&row)
            .await
            .map_err(Error::StorageWrite)
    }

    /// All mirrored values of a device, ordered by sensor type.
    pub async fn latest(&self, composite_id: &str) -> Result<Vec<LatestSensorValue>> {
        self.store
            .latest_for_device(composite_id)
            .await
            .map_err(Error::StorageRead)
    }

    /// The mirrored value of one sensor.
    pub async fn get(
        &self,
        composite_id: &str,
        sensor_type: &str,
    ) -> Result<Option<LatestSensorValue>> {
        self.store
            .read_latest(composite_id, sensor_type)
            .await
            .map_err(Error::StorageRead)
    }

    /// Live average of `sensor_type` over every device of a system layer.
    ///
    /// The mean is rounded to one decimal place.
    pub async fn average(
        &self,
        system: &str,
        layer: &str,
        sensor_type: &str,
    ) -> Result<LatestAverage> {
        let mut average = self
            .store
            .latest_average(system, layer, sensor_type)
            .await
            .map_err(Error::StorageRead)?;
        average.average = average.average.map(|v| (v * 10.0).round() / 10.0);
        Ok(average)
    }
}
