//! Application state shared across handlers.

use std::sync::Arc;

use hydroleaf_core::{FlushStats, Telemetry};
use hydroleaf_store::Store;
use time::OffsetDateTime;

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// Ingestion and query facade.
    pub telemetry: Arc<Telemetry>,
    /// Counters updated by the flush scheduler.
    pub flush_stats: Arc<FlushStats>,
    /// Configuration the service was started with.
    pub config: Config,
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create state backed by a SQLite store.
    pub fn new(store: Store, config: Config) -> Arc<Self> {
        let telemetry = Telemetry::sqlite(store, config.telemetry_options());
        Self::with_telemetry(Arc::new(telemetry), config)
    }

    /// Create state around an existing facade.
    pub fn with_telemetry(telemetry: Arc<Telemetry>, config: Config) -> Arc<Self> {
        Arc::new(Self {
            telemetry,
            flush_stats: Arc::new(FlushStats::new()),
            config,
            started_at: OffsetDateTime::now_utc(),
        })
    }
}
