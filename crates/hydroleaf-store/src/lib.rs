//! Local data persistence for Hydroleaf telemetry.
//!
//! This crate provides SQLite-based storage for the telemetry engine:
//! device and group registration, the latest-value mirror, and the
//! append-only rollup table with epoch-aligned bucket aggregation.
//!
//! # Features
//!
//! - Insert-if-absent device registration
//! - Latest value per (device, sensor type), last write wins
//! - Transactional batch insert of flushed rollups
//! - Per-bucket averages grouped by sensor type and unit
//!
//! # Example
//!
//! ```no_run
//! use hydroleaf_store::{AggregateQuery, Store};
//! use hydroleaf_types::{BucketWidth, parse_instant};
//!
//! let store = Store::open_default()?;
//!
//! let query = AggregateQuery::new(
//!     "S01-L02-esp32-01",
//!     parse_instant("2024-01-01T00:00:00Z").unwrap(),
//!     parse_instant("2024-01-01T06:00:00Z").unwrap(),
//!     BucketWidth::default(),
//! );
//! let buckets = store.aggregate(&query)?;
//! # Ok::<(), hydroleaf_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::StoredRollup;
pub use queries::{AggregateQuery, RollupQuery};
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/hydroleaf/data.db`
/// - macOS: `~/Library/Application Support/hydroleaf/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\hydroleaf\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("hydroleaf")
        .join("data.db")
}
