//! The telemetry facade.
//!
//! [`Telemetry`] wires the registry, mirror, accumulator and aggregation
//! engine together and exposes the three entry points used by ingress
//! adapters and the HTTP layer: [`Telemetry::record`],
//! [`Telemetry::query_aggregated_history`] and [`Telemetry::resolve_device`].

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::warn;

use hydroleaf_store::{RollupQuery, Store};
use hydroleaf_types::{Device, LatestAverage, LatestSensorValue, SensorRollup};

use crate::accumulator::{Accumulator, FlushOutcome};
use crate::error::{Error, Result};
use crate::history::{AggregatedHistory, AggregationEngine, DEFAULT_MAX_RANGE, HistoryQuery};
use crate::mirror::LatestValueMirror;
use crate::registry::{DEFAULT_GROUP, DeviceRegistry};
use crate::sqlite::SqliteStore;
use crate::traits::{AggregationReader, TelemetryStore};

/// Tunables for [`Telemetry`].
#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    /// Group that auto-registered devices join.
    pub default_group: String,
    /// Widest accepted history query span.
    pub max_range: Duration,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            default_group: DEFAULT_GROUP.to_string(),
            max_range: DEFAULT_MAX_RANGE,
        }
    }
}

/// One sensor value inside a [`TelemetryMessage`].
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub sensor_type: String,
    pub value: f64,
    pub unit: Option<String>,
}

impl SensorReading {
    pub fn new(sensor_type: &str, value: f64) -> Self {
        Self {
            sensor_type: sensor_type.to_string(),
            value,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }
}

/// Several readings from one device sharing one timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryMessage {
    pub composite_id: String,
    /// Group to register an unseen device into; the default group if `None`.
    pub group: Option<String>,
    pub timestamp: OffsetDateTime,
    pub readings: Vec<SensorReading>,
}

/// Ingestion and query entry point.
pub struct Telemetry {
    registry: Arc<DeviceRegistry>,
    mirror: Arc<LatestValueMirror>,
    accumulator: Arc<Accumulator>,
    reader: Arc<dyn AggregationReader>,
    engine: AggregationEngine,
}

impl Telemetry {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        reader: Arc<dyn AggregationReader>,
        options: TelemetryOptions,
    ) -> Self {
        let registry = Arc::new(DeviceRegistry::with_default_group(
            Arc::clone(&store),
            &options.default_group,
        ));
        let mirror = Arc::new(LatestValueMirror::new(Arc::clone(&store)));
        let accumulator = Arc::new(Accumulator::new(store));
        let engine = AggregationEngine::new(
            Arc::clone(&registry),
            Arc::clone(&mirror),
            Arc::clone(&reader),
        )
        .with_max_range(options.max_range);

        Self {
            registry,
            mirror,
            accumulator,
            reader,
            engine,
        }
    }

    /// Build a facade backed by one SQLite store.
    pub fn sqlite(store: Store, options: TelemetryOptions) -> Self {
        let backend = Arc::new(SqliteStore::new(store));
        Self::new(backend.clone(), backend, options)
    }

    /// Record a single reading.
    ///
    /// The reading is validated before anything is touched. The device is
    /// then resolved (and registered if unseen), the value is added to the
    /// accumulator and the latest-value mirror is updated.
    pub async fn record(
        &self,
        composite_id: &str,
        sensor_type: &str,
        value: f64,
        unit: Option<&str>,
        timestamp: OffsetDateTime,
    ) -> Result<()> {
        validate_reading(sensor_type, value)?;
        let device = self.registry.resolve(composite_id).await?;
        self.accumulator
            .add_with_unit(&device.composite_id, sensor_type, value, unit, timestamp);
        self.mirror_reading(&device, sensor_type, value, unit, timestamp)
            .await
    }

    /// Record every reading of a message. Returns the number recorded.
    ///
    /// All readings are validated first; one invalid reading rejects the
    /// whole message. Every reading is buffered before the mirror is
    /// updated, so a mirror failure never drops a sample from the rollups.
    /// The first mirror error is returned after all upserts were attempted.
    pub async fn record_message(&self, message: &TelemetryMessage) -> Result<usize> {
        for reading in &message.readings {
            validate_reading(&reading.sensor_type, reading.value)?;
        }

        let device = match &message.group {
            Some(group) => {
                self.registry
                    .resolve_in_group(&message.composite_id, group)
                    .await?
            }
            None => self.registry.resolve(&message.composite_id).await?,
        };

        for reading in &message.readings {
            self.accumulator.add_with_unit(
                &device.composite_id,
                &reading.sensor_type,
                reading.value,
                reading.unit.as_deref(),
                message.timestamp,
            );
        }

        let mut first_error = None;
        for reading in &message.readings {
            if let Err(e) = self
                .mirror_reading(
                    &device,
                    &reading.sensor_type,
                    reading.value,
                    reading.unit.as_deref(),
                    message.timestamp,
                )
                .await
            {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(message.readings.len()),
        }
    }

    async fn mirror_reading(
        &self,
        device: &Device,
        sensor_type: &str,
        value: f64,
        unit: Option<&str>,
        timestamp: OffsetDateTime,
    ) -> Result<()> {
        self.mirror
            .upsert(device, sensor_type, value, unit, timestamp)
            .await
            .inspect_err(|e| {
                warn!(
                    "Failed to mirror {}/{}: {}",
                    device.composite_id, sensor_type, e
                )
            })
    }

    /// Run an aggregated history query.
    pub async fn query_aggregated_history(&self, query: &HistoryQuery) -> Result<AggregatedHistory> {
        self.engine.query(query).await
    }

    /// Resolve a device, registering it into the default group if unseen.
    pub async fn resolve_device(&self, composite_id: &str) -> Result<Device> {
        self.registry.resolve(composite_id).await
    }

    /// Look up a device without registering it.
    pub async fn device(&self, composite_id: &str) -> Result<Option<Device>> {
        self.registry.lookup(composite_id).await
    }

    /// All registered devices.
    pub async fn devices(&self) -> Result<Vec<Device>> {
        self.registry.list().await
    }

    /// Mirrored latest values of a registered device.
    pub async fn latest_values(&self, composite_id: &str) -> Result<Vec<LatestSensorValue>> {
        self.registry.require(composite_id).await?;
        self.mirror.latest(composite_id).await
    }

    /// Live average of one sensor type across a system layer.
    pub async fn latest_average(
        &self,
        system: &str,
        layer: &str,
        sensor_type: &str,
    ) -> Result<LatestAverage> {
        self.mirror.average(system, layer, sensor_type).await
    }

    /// Raw flushed rollups of a registered device.
    ///
    /// Any device filter already set on `query` is replaced by `composite_id`.
    pub async fn rollups(&self, composite_id: &str, query: RollupQuery) -> Result<Vec<SensorRollup>> {
        self.registry.require(composite_id).await?;
        self.reader
            .rollups(&query.device(composite_id))
            .await
            .map_err(Error::StorageRead)
    }

    /// Number of flushed rollups across all devices.
    pub async fn rollup_count(&self) -> Result<u64> {
        self.reader
            .count_rollups(None)
            .await
            .map_err(Error::StorageRead)
    }

    /// Flush the accumulator now.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        self.accumulator.flush().await
    }

    /// Shared handle to the accumulator, for the flush scheduler.
    pub fn accumulator(&self) -> Arc<Accumulator> {
        Arc::clone(&self.accumulator)
    }
}

fn validate_reading(sensor_type: &str, value: f64) -> Result<()> {
    if sensor_type.trim().is_empty() {
        return Err(Error::InvalidReading("sensor type must not be empty".into()));
    }
    if !value.is_finite() {
        return Err(Error::InvalidReading(format!(
            "value for '{sensor_type}' must be finite, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryStore;
    use hydroleaf_types::BucketWidth;
    use time::macros::datetime;

    fn telemetry() -> (Arc<MemoryStore>, Telemetry) {
        let store = Arc::new(MemoryStore::new());
        let telemetry = Telemetry::new(store.clone(), store.clone(), TelemetryOptions::default());
        (store, telemetry)
    }

    #[tokio::test]
    async fn test_record_registers_buffers_and_mirrors() {
        let (store, telemetry) = telemetry();
        let t = datetime!(2024-01-01 00:00 UTC);

        telemetry
            .record("S01-L02-esp32-01", "temperature", 21.5, Some("C"), t)
            .await
            .unwrap();

        let device = telemetry.device("S01-L02-esp32-01").await.unwrap().unwrap();
        assert_eq!(device.device_id, "esp32-01");
        assert_eq!(telemetry.accumulator().pending(), 1);

        let latest = telemetry.latest_values("S01-L02-esp32-01").await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].value, 21.5);
        assert!(store.rollups().await.is_empty());
    }

    #[tokio::test]
    async fn test_record_validates_before_side_effects() {
        let (store, telemetry) = telemetry();
        let t = datetime!(2024-01-01 00:00 UTC);

        assert!(matches!(
            telemetry.record("S01-L01-A1", "  ", 1.0, None, t).await,
            Err(Error::InvalidReading(_))
        ));
        assert!(matches!(
            telemetry.record("S01-L01-A1", "ph", f64::NAN, None, t).await,
            Err(Error::InvalidReading(_))
        ));
        assert!(matches!(
            telemetry.record("S01-L01", "ph", 6.0, None, t).await,
            Err(Error::MalformedIdentifier(_))
        ));

        assert_eq!(store.device_inserts(), 0);
        assert_eq!(telemetry.accumulator().pending(), 0);
    }

    #[tokio::test]
    async fn test_record_message_rejects_whole_message() {
        let (store, telemetry) = telemetry();
        let message = TelemetryMessage {
            composite_id: "S01-L01-A1".into(),
            group: None,
            timestamp: datetime!(2024-01-01 00:00 UTC),
            readings: vec![
                SensorReading::new("ph", 6.0),
                SensorReading::new("ec", f64::INFINITY),
            ],
        };

        assert!(telemetry.record_message(&message).await.is_err());
        assert_eq!(store.device_inserts(), 0);
        assert_eq!(telemetry.accumulator().pending(), 0);
    }

    #[tokio::test]
    async fn test_record_message_with_group() {
        let (_, telemetry) = telemetry();
        let message = TelemetryMessage {
            composite_id: "S03-L01-fan".into(),
            group: Some("greenhouse-3".into()),
            timestamp: datetime!(2024-01-01 00:00 UTC),
            readings: vec![
                SensorReading::new("rpm", 1200.0),
                SensorReading::new("temperature", 24.0).with_unit("C"),
            ],
        };

        assert_eq!(telemetry.record_message(&message).await.unwrap(), 2);
        let device = telemetry.resolve_device("S03-L01-fan").await.unwrap();
        assert_eq!(device.group.name, "greenhouse-3");
        assert_eq!(telemetry.accumulator().pending(), 2);
    }

    #[tokio::test]
    async fn test_mirror_failure_is_reported_but_buffered() {
        let (store, telemetry) = telemetry();
        store.set_fail_latest(true);

        let err = telemetry
            .record("S01-L01-A1", "ph", 6.0, None, datetime!(2024-01-01 00:00 UTC))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageWrite(_)));
        assert_eq!(telemetry.accumulator().pending(), 1);
    }

    #[tokio::test]
    async fn test_latest_values_unknown_device() {
        let (_, telemetry) = telemetry();
        assert!(matches!(
            telemetry.latest_values("S01-L01-A1").await,
            Err(Error::UnknownDevice(_))
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_with_sqlite() {
        let telemetry = Telemetry::sqlite(Store::open_in_memory().unwrap(), TelemetryOptions::default());
        let id = "S01-L02-esp32-01";

        let readings = [
            ("temperature", 20.0, datetime!(2024-01-01 00:01 UTC)),
            ("temperature", 22.0, datetime!(2024-01-01 00:02 UTC)),
            ("humidity", 60.0, datetime!(2024-01-01 00:03 UTC)),
        ];
        for (sensor_type, value, t) in readings {
            let unit = if sensor_type == "temperature" { "C" } else { "%" };
            telemetry
                .record(id, sensor_type, value, Some(unit), t)
                .await
                .unwrap();
        }

        // Queries never see unflushed data
        let query = HistoryQuery::new(id)
            .range(datetime!(2024-01-01 00:00 UTC), datetime!(2024-01-01 00:10 UTC))
            .bucket(BucketWidth::minutes(5).unwrap());
        assert!(telemetry.query_aggregated_history(&query).await.unwrap().series.is_empty());

        let outcome = telemetry.flush().await.unwrap();
        assert_eq!(outcome.written, 2);

        telemetry
            .record(id, "temperature", 30.0, Some("C"), datetime!(2024-01-01 00:07 UTC))
            .await
            .unwrap();
        telemetry.flush().await.unwrap();

        let history = telemetry.query_aggregated_history(&query).await.unwrap();
        assert_eq!(history.from, datetime!(2024-01-01 00:00 UTC));
        assert_eq!(history.to, datetime!(2024-01-01 00:10 UTC));
        assert_eq!(history.series.len(), 2);

        let temperature = history
            .series
            .iter()
            .find(|s| s.sensor_type == "temperature")
            .unwrap();
        assert_eq!(temperature.unit.as_deref(), Some("C"));
        let points: Vec<_> = temperature.points.iter().map(|p| (p.timestamp, p.value)).collect();
        assert_eq!(
            points,
            vec![
                (datetime!(2024-01-01 00:00 UTC), 21.0),
                (datetime!(2024-01-01 00:05 UTC), 30.0),
            ]
        );

        let humidity = history
            .series
            .iter()
            .find(|s| s.sensor_type == "humidity")
            .unwrap();
        assert_eq!(humidity.points.len(), 1);
        assert_eq!(humidity.points[0].value, 60.0);

        let filtered = telemetry
            .query_aggregated_history(&query.clone().sensor_types(["HUMIDITY"]))
            .await
            .unwrap();
        assert_eq!(filtered.series.len(), 1);
        assert_eq!(filtered.series[0].sensor_type, "humidity");
    }

    #[tokio::test]
    async fn test_mirror_failure_keeps_every_reading_buffered() {
        let (store, telemetry) = telemetry();
        store.set_fail_latest(true);
        let message = TelemetryMessage {
            composite_id: "S01-L01-A1".into(),
            group: None,
            timestamp: datetime!(2024-01-01 00:00 UTC),
            readings: vec![
                SensorReading::new("ph", 6.0),
                SensorReading::new("ec", 1.2),
                SensorReading::new("temperature", 21.0).with_unit("C"),
            ],
        };

        let err = telemetry.record_message(&message).await.unwrap_err();
        assert!(matches!(err, Error::StorageWrite(_)));
        assert_eq!(telemetry.accumulator().pending(), 3);

        store.set_fail_latest(false);
        assert_eq!(telemetry.flush().await.unwrap().written, 3);
        assert_eq!(store.rollups().await.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_message_registers_device() {
        let (_, telemetry) = telemetry();
        let message = TelemetryMessage {
            composite_id: "S01-L01-A1".into(),
            group: None,
            timestamp: datetime!(2024-01-01 00:00 UTC),
            readings: vec![],
        };

        assert_eq!(telemetry.record_message(&message).await.unwrap(), 0);
        assert!(telemetry.device("S01-L01-A1").await.unwrap().is_some());
        assert_eq!(telemetry.accumulator().pending(), 0);
    }

    #[tokio::test]
    async fn test_devices_and_layer_average() {
        let (_, telemetry) = telemetry();
        let t = datetime!(2024-01-01 00:00 UTC);

        telemetry.record("S01-L01-A1", "light", 400.0, Some("lux"), t).await.unwrap();
        telemetry.record("S01-L01-A2", "light", 600.0, Some("lux"), t).await.unwrap();
        telemetry.record("S01-L02-A3", "light", 10.0, Some("lux"), t).await.unwrap();

        assert_eq!(telemetry.devices().await.unwrap().len(), 3);

        let avg = telemetry.latest_average("S01", "L01", "light").await.unwrap();
        assert_eq!(avg.average, Some(500.0));
        assert_eq!(avg.device_count, 2);
    }

    #[tokio::test]
    async fn test_rollups_require_known_device() {
        let (_, telemetry) = telemetry();
        assert!(matches!(
            telemetry.rollups("S09-L09-X", RollupQuery::new()).await,
            Err(Error::UnknownDevice(_))
        ));
    }

    #[tokio::test]
    async fn test_two_samples_flush_into_one_bucket() {
        let telemetry = Telemetry::sqlite(Store::open_in_memory().unwrap(), TelemetryOptions::default());
        let id = "S01-L01-A1";
        let t0 = datetime!(2024-01-01 00:00:30 UTC);

        telemetry.resolve_device(id).await.unwrap();
        let accumulator = telemetry.accumulator();
        accumulator.add(id, "temperature", 20.0, t0);
        accumulator.add(id, "temperature", 22.0, t0 + Duration::seconds(10));

        assert_eq!(telemetry.flush().await.unwrap().written, 1);
        let rollups = telemetry.rollups(id, RollupQuery::new()).await.unwrap();
        assert_eq!(rollups.len(), 1);
        assert_eq!(rollups[0].sensor_type, "temperature");
        assert_eq!(rollups[0].value, 21.0);
        assert_eq!(rollups[0].sample_count, 2);
        assert_eq!(rollups[0].value_time, t0);
        assert_eq!(telemetry.rollup_count().await.unwrap(), 1);

        // from crosses into the previous bucket
        let query = HistoryQuery::new(id)
            .range(t0 - Duration::minutes(1), t0 + Duration::minutes(1))
            .bucket(BucketWidth::parse("5m").unwrap());
        let history = telemetry.query_aggregated_history(&query).await.unwrap();

        assert_eq!(history.from, datetime!(2023-12-31 23:55 UTC));
        assert_eq!(history.to, datetime!(2024-01-01 00:05 UTC));
        assert_eq!(history.series.len(), 1);
        assert_eq!(history.series[0].sensor_type, "temperature");
        assert_eq!(history.series[0].points.len(), 1);
        assert_eq!(history.series[0].points[0].timestamp, datetime!(2024-01-01 00:00 UTC));
        assert_eq!(history.series[0].points[0].value, 21.0);
    }
}
