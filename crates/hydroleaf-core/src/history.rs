//! Aggregated history queries.
//!
//! A query is resolved in four steps:
//!
//! 1. **Validation**: the device must exist, `from` and `to` must be given
//!    with `to > from`, and the span in whole days must not exceed the
//!    configured maximum. A 31 day limit therefore accepts `31d 23h`.
//! 2. **Alignment**: `from` is floored to its bucket and `to` is rounded up
//!    to the next bucket boundary, so `00:03..00:08` in 5 minute buckets
//!    becomes `00:00..00:10`.
//! 3. **Fan-out**: one unfiltered reader call when no sensor types are
//!    requested, otherwise one concurrent call per distinct requested type.
//!    Requested names are matched case-insensitively against the device's
//!    mirrored sensor types.
//! 4. **Collation and pagination**: rows are grouped into series by
//!    (sensor type, unit) in first-seen order, each series is windowed by
//!    `bucket_offset`/`bucket_limit`, then the series list is windowed by
//!    `sensor_offset`/`sensor_limit`.
//!
//! # Example
//!
//! ```ignore
//! use hydroleaf_core::HistoryQuery;
//!
//! let query = HistoryQuery::new("S01-L02-esp32-01")
//!     .range(from, to)
//!     .bucket("5m".parse()?)
//!     .sensor_types(["temperature", "humidity"])
//!     .bucket_limit(100);
//! let history = telemetry.query_aggregated_history(&query).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use hydroleaf_types::{BucketAverage, BucketWidth};

use crate::error::{Error, Result};
use crate::mirror::LatestValueMirror;
use crate::registry::DeviceRegistry;
use crate::traits::AggregationReader;

/// Default maximum query span.
pub const DEFAULT_MAX_RANGE: Duration = Duration::days(31);

/// An offset/limit window over a list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    /// `None` means everything after `offset`.
    pub limit: Option<usize>,
}

impl Page {
    pub fn new(offset: Option<usize>, limit: Option<usize>) -> Self {
        Self {
            offset: offset.unwrap_or(0),
            limit,
        }
    }

    /// Apply the window. Offsets past the end yield an empty list.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Parameters of an aggregated history query.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub composite_id: String,
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
    pub bucket: BucketWidth,
    /// Empty means all sensor types.
    pub sensor_types: Vec<String>,
    pub buckets: Page,
    pub sensors: Page,
}

impl HistoryQuery {
    pub fn new(composite_id: &str) -> Self {
        Self {
            composite_id: composite_id.to_string(),
            from: None,
            to: None,
            bucket: BucketWidth::default(),
            sensor_types: Vec::new(),
            buckets: Page::default(),
            sensors: Page::default(),
        }
    }

    pub fn from(mut self, from: OffsetDateTime) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: OffsetDateTime) -> Self {
        self.to = Some(to);
        self
    }

    pub fn range(self, from: OffsetDateTime, to: OffsetDateTime) -> Self {
        self.from(from).to(to)
    }

    pub fn bucket(mut self, bucket: BucketWidth) -> Self {
        self.bucket = bucket;
        self
    }

    pub fn sensor_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensor_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn bucket_offset(mut self, offset: usize) -> Self {
        self.buckets.offset = offset;
        self
    }

    pub fn bucket_limit(mut self, limit: usize) -> Self {
        self.buckets.limit = Some(limit);
        self
    }

    pub fn sensor_offset(mut self, offset: usize) -> Self {
        self.sensors.offset = offset;
        self
    }

    pub fn sensor_limit(mut self, limit: usize) -> Self {
        self.sensors.limit = Some(limit);
        self
    }
}

/// One averaged bucket of a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub value: f64,
}

/// All buckets of one (sensor type, unit) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSeries {
    pub sensor_type: String,
    pub unit: Option<String>,
    pub points: Vec<SeriesPoint>,
}

/// Response of an aggregated history query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedHistory {
    pub composite_id: String,
    /// Bucket-aligned inclusive start.
    #[serde(with = "time::serde::rfc3339")]
    pub from: OffsetDateTime,
    /// Bucket-aligned exclusive end.
    #[serde(with = "time::serde::rfc3339")]
    pub to: OffsetDateTime,
    pub bucket_seconds: u64,
    pub series: Vec<SensorSeries>,
}

/// Executes [`HistoryQuery`]s against an [`AggregationReader`].
pub struct AggregationEngine {
    registry: Arc<DeviceRegistry>,
    mirror: Arc<LatestValueMirror>,
    reader: Arc<dyn AggregationReader>,
    max_range: Duration,
}

impl AggregationEngine {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        mirror: Arc<LatestValueMirror>,
        reader: Arc<dyn AggregationReader>,
    ) -> Self {
        Self {
            registry,
            mirror,
            reader,
            max_range: DEFAULT_MAX_RANGE,
        }
    }

    pub fn with_max_range(mut self, max_range: Duration) -> Self {
        self.max_range = max_range;
        self
    }

    pub async fn query(&self, query: &HistoryQuery) -> Result<AggregatedHistory> {
        self.registry.require(&query.composite_id).await?;

        let (from, to) = match (query.from, query.to) {
            (Some(from), Some(to)) => (from, to),
            _ => return Err(Error::InvalidRange("from and to are required".into())),
        };
        if to <= from {
            return Err(Error::InvalidRange(format!(
                "to ({to}) must be after from ({from})"
            )));
        }
        if (to - from).whole_days() > self.max_range.whole_days() {
            return Err(Error::InvalidRange(format!(
                "range exceeds {} days",
                self.max_range.whole_days()
            )));
        }

        let bucket_from = query.bucket.truncate(from);
        let bucket_to = query.bucket.align_end(to);

        let sensor_types = self.resolve_sensor_types(query).await?;
        debug!(
            "History {} [{}, {}) bucket={} types={:?}",
            query.composite_id, bucket_from, bucket_to, query.bucket, sensor_types
        );

        let rows = self
            .fetch(&query.composite_id, bucket_from, bucket_to, query.bucket, &sensor_types)
            .await?;

        let series = collate(rows)
            .into_iter()
            .map(|mut s| {
                s.points = query.buckets.apply(s.points);
                s
            })
            .collect();

        Ok(AggregatedHistory {
            composite_id: query.composite_id.clone(),
            from: bucket_from,
            to: bucket_to,
            bucket_seconds: query.bucket.seconds(),
            series: query.sensors.apply(series),
        })
    }

    /// Map requested names onto stored sensor types, dropping duplicates.
    async fn resolve_sensor_types(&self, query: &HistoryQuery) -> Result<Vec<String>> {
        let requested: Vec<&str> = query
            .sensor_types
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect();
        if requested.is_empty() {
            return Ok(Vec::new());
        }

        let known: Vec<String> = self
            .mirror
            .latest(&query.composite_id)
            .await?
            .into_iter()
            .map(|v| v.sensor_type)
            .collect();

        let mut resolved: Vec<String> = Vec::with_capacity(requested.len());
        for name in requested {
            let stored = known
                .iter()
                .find(|k| k.eq_ignore_ascii_case(name))
                .cloned()
                .unwrap_or_else(|| name.to_string());
            if !resolved.iter().any(|r| r.eq_ignore_ascii_case(&stored)) {
                resolved.push(stored);
            }
        }
        Ok(resolved)
    }

    async fn fetch(
        &self,
        composite_id: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
        bucket: BucketWidth,
        sensor_types: &[String],
    ) -> Result<Vec<BucketAverage>> {
        if sensor_types.is_empty() {
            return self
                .reader
                .aggregate(composite_id, from, to, bucket, None)
                .await
                .map_err(Error::StorageRead);
        }

        let calls = sensor_types.iter().map(|sensor_type| {
            self.reader
                .aggregate(composite_id, from, to, bucket, Some(sensor_type.as_str()))
        });
        let per_type = try_join_all(calls).await.map_err(Error::StorageRead)?;
        Ok(per_type.into_iter().flatten().collect())
    }
}

/// Group rows into series keyed by (sensor type, unit), in first-seen order.
fn collate(rows: Vec<BucketAverage>) -> Vec<SensorSeries> {
    let mut index: HashMap<(String, Option<String>), usize> = HashMap::new();
    let mut series: Vec<SensorSeries> = Vec::new();

    for row in rows {
        let key = (row.sensor_type, row.unit);
        let idx = match index.get(&key) {
            Some(&idx) => idx,
            None => {
                series.push(SensorSeries {
                    sensor_type: key.0.clone(),
                    unit: key.1.clone(),
                    points: Vec::new(),
                });
                index.insert(key, series.len() - 1);
                series.len() - 1
            }
        };
        series[idx].points.push(SeriesPoint {
            timestamp: row.bucket_time,
            value: row.avg_value,
        });
    }

    series
}
