//! Shared data types for Hydroleaf greenhouse telemetry.
//!
//! This crate provides the plain types used by the storage layer
//! (hydroleaf-store), the ingestion and aggregation engine (hydroleaf-core)
//! and the HTTP service (hydroleaf-service).
//!
//! # Features
//!
//! - Composite device identifiers (`<system>-<layer>-<deviceId>`)
//! - Device, latest-value, rollup and bucket-average records
//! - Epoch-aligned bucket widths
//! - Timestamp parsing (RFC 3339 or epoch milliseconds)
//! - Error types for parsing
//!
//! # Example
//!
//! ```
//! use hydroleaf_types::{BucketWidth, CompositeId, parse_instant};
//!
//! let id: CompositeId = "S01-L02-esp32-01".parse().unwrap();
//! assert_eq!(id.device_id(), "esp32-01");
//!
//! let width: BucketWidth = "5m".parse().unwrap();
//! let t = parse_instant("2024-01-01T00:03:00Z").unwrap();
//! assert_eq!(width.truncate(t), parse_instant("2024-01-01T00:00:00Z").unwrap());
//! ```

pub mod bucket;
pub mod error;
pub mod timestamp;
pub mod types;

pub use bucket::BucketWidth;
pub use error::{ParseError, ParseResult};
pub use timestamp::{from_unix_millis, parse_instant, to_unix_millis};
pub use types::{
    BucketAverage, CompositeId, Device, DeviceGroup, LatestAverage, LatestSensorValue,
    SensorRollup,
};
