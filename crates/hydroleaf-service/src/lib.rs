//! HTTP ingestion and aggregated history API for Hydroleaf telemetry.
//!
//! This crate provides a service that:
//! - Accepts sensor readings from greenhouse devices over HTTP
//! - Buffers them in memory and flushes averaged rollups on a schedule
//! - Answers bucketed, paginated history queries
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Flush statistics, pending entries and stored rollup count
//! - `GET /api/status/{system}/{layer}/{sensorType}/average` - Live layer average
//! - `POST /api/readings` - Record readings for one device
//! - `GET /api/devices` - List registered devices
//! - `GET /api/devices/{id}` - Get device info
//! - `GET /api/devices/{id}/latest` - Latest raw value per sensor type
//! - `GET /api/devices/{id}/rollups` - Raw flushed rollups, paginated
//! - `GET /api/history/aggregated` - Time-bucketed averages
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/hydroleaf/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [storage]
//! path = "~/.local/share/hydroleaf/data.db"
//!
//! [ingest]
//! flush_interval_secs = 60
//! default_group = "default"
//!
//! [history]
//! default_bucket = "5m"
//! max_range_days = 31
//! ```

pub mod api;
pub mod config;
pub mod state;

pub use config::{
    Config, ConfigError, HistoryConfig, IngestConfig, ServerConfig, StorageConfig,
    ValidationError,
};
pub use state::AppState;
