//! Telemetry ingestion and time-bucketed aggregation for Hydroleaf.
//!
//! This crate is the engine behind the Hydroleaf greenhouse backend. It
//! accepts high-frequency sensor readings, buffers a running aggregate per
//! (device, sensor type), periodically flushes averaged rollups to durable
//! storage, mirrors the most recent raw value per sensor, and answers
//! paginated, bucketed history queries.
//!
//! # Components
//!
//! | Component | Role |
//! |-----------|------|
//! | [`DeviceRegistry`] | Resolves `<system>-<layer>-<deviceId>` identifiers, auto-registering unseen devices |
//! | [`LatestValueMirror`] | Last-write-wins latest value per (device, sensor type), live layer averages |
//! | [`Accumulator`] | Concurrent running sum/count/earliest timestamp, drained by [`Accumulator::flush`] |
//! | [`FlushScheduler`] | Background task flushing the accumulator on a fixed period |
//! | [`AggregationEngine`] | Range validation, bucket alignment, fan-out, collation, pagination |
//! | [`Telemetry`] | Facade wiring everything together |
//!
//! Storage is consumed through the [`TelemetryStore`] and
//! [`AggregationReader`] traits. [`SqliteStore`] implements both on top of
//! `hydroleaf-store`; [`MemoryStore`] is an in-memory backend for tests.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use hydroleaf_core::{FlushScheduler, HistoryQuery, Telemetry, TelemetryOptions};
//! use hydroleaf_store::Store;
//! use time::OffsetDateTime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let telemetry = Telemetry::sqlite(Store::open_default()?, TelemetryOptions::default());
//!     let scheduler = FlushScheduler::start(telemetry.accumulator(), Duration::from_secs(60));
//!
//!     let now = OffsetDateTime::now_utc();
//!     telemetry
//!         .record("S01-L02-esp32-01", "temperature", 21.5, Some("°C"), now)
//!         .await?;
//!
//!     scheduler.shutdown().await?;
//!
//!     let query = HistoryQuery::new("S01-L02-esp32-01")
//!         .range(now - time::Duration::hours(1), now);
//!     let history = telemetry.query_aggregated_history(&query).await?;
//!     println!("{} series", history.series.len());
//!     Ok(())
//! }
//! ```

pub mod accumulator;
pub mod error;
pub mod history;
pub mod mirror;
pub mod mock;
pub mod registry;
pub mod scheduler;
pub mod sqlite;
pub mod telemetry;
pub mod traits;

pub use accumulator::{Accumulator, AccumulatorEntry, FlushOutcome, SensorKey};
pub use error::{Error, Result};
pub use history::{
    AggregatedHistory, AggregationEngine, DEFAULT_MAX_RANGE, HistoryQuery, Page, SensorSeries,
    SeriesPoint,
};
pub use mirror::LatestValueMirror;
pub use mock::MemoryStore;
pub use registry::{DEFAULT_GROUP, DeviceRegistry};
pub use scheduler::{FlushScheduler, FlushStats, FlushStatsSnapshot};
pub use sqlite::SqliteStore;
pub use telemetry::{SensorReading, Telemetry, TelemetryMessage, TelemetryOptions};
pub use traits::{AggregationReader, TelemetryStore};

// Re-export the shared types so callers need only one dependency.
pub use hydroleaf_store::RollupQuery;
pub use hydroleaf_types::{
    BucketAverage, BucketWidth, CompositeId, Device, DeviceGroup, LatestAverage,
    LatestSensorValue, ParseError, SensorRollup, parse_instant,
};
