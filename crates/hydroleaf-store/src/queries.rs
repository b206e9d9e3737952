//! Query builders for rollups and bucket aggregation.
//!
//! Both [`RollupQuery`] and [`AggregateQuery`] follow the builder pattern.
//!
//! # Example
//!
//! ```
//! use hydroleaf_store::{AggregateQuery, RollupQuery, Store};
//! use hydroleaf_types::BucketWidth;
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let to = OffsetDateTime::now_utc();
//! let from = to - Duration::hours(6);
//!
//! let raw = RollupQuery::new().device("S01-L01-A1").since(from).limit(100);
//! let rollups = store.query_rollups(&raw)?;
//! assert!(rollups.is_empty());
//!
//! let agg = AggregateQuery::new("S01-L01-A1", from, to, BucketWidth::default())
//!     .sensor_type("temperature");
//! let buckets = store.aggregate(&agg)?;
//! assert!(buckets.is_empty());
//! # Ok::<(), hydroleaf_store::Error>(())
//! ```

use hydroleaf_types::{BucketWidth, to_unix_millis};
use time::OffsetDateTime;

/// Fluent query builder for raw rollup rows.
///
/// Results are ordered by `value_time` ascending unless
/// [`newest_first`](Self::newest_first) is set.
#[derive(Debug, Default, Clone)]
pub struct RollupQuery {
    /// Filter by composite device identifier.
    pub composite_id: Option<String>,
    /// Filter by exact sensor type.
    pub sensor_type: Option<String>,
    /// Rollups at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Rollups strictly before this time.
    pub until: Option<OffsetDateTime>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub newest_first: bool,
}

impl RollupQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, composite_id: &str) -> Self {
        self.composite_id = Some(composite_id.to_string());
        self
    }

    pub fn sensor_type(mut self, sensor_type: &str) -> Self {
        self.sensor_type = Some(sensor_type.to_string());
        self
    }

    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    pub fn until(mut self, time: OffsetDateTime) -> Self {
        self.until = Some(time);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    /// Build the WHERE clause and its bound parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref composite_id) = self.composite_id {
            conditions.push("composite_id = ?");
            params.push(Box::new(composite_id.clone()));
        }

        if let Some(ref sensor_type) = self.sensor_type {
            conditions.push("sensor_type = ?");
            params.push(Box::new(sensor_type.clone()));
        }

        if let Some(since) = self.since {
            conditions.push("value_time >= ?");
            params.push(Box::new(to_unix_millis(since)));
        }

        if let Some(until) = self.until {
            conditions.push("value_time < ?");
            params.push(Box::new(to_unix_millis(until)));
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (clause, params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, composite_id, sensor_type, unit, value, sample_count, value_time
             FROM sensor_value_rollups {} ORDER BY value_time {}, id {}",
            where_clause, order, order
        );

        // SQLite requires a LIMIT before OFFSET
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        sql
    }
}

/// Bucket aggregation over the half-open range `[from, to)` of one device.
///
/// Buckets are epoch-aligned to `bucket`; each result row is the plain mean
/// of the rollup values in one (bucket, sensor type, unit) group.
#[derive(Debug, Clone)]
pub struct AggregateQuery {
    pub composite_id: String,
    pub from: OffsetDateTime,
    pub to: OffsetDateTime,
    pub bucket: BucketWidth,
    /// Restrict to one sensor type (exact match).
    pub sensor_type: Option<String>,
}

impl AggregateQuery {
    pub fn new(
        composite_id: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
        bucket: BucketWidth,
    ) -> Self {
        Self {
            composite_id: composite_id.to_string(),
            from,
            to,
            bucket,
            sensor_type: None,
        }
    }

    pub fn sensor_type(mut self, sensor_type: &str) -> Self {
        self.sensor_type = Some(sensor_type.to_string());
        self
    }

    pub(crate) fn build_sql(&self) -> String {
        // Floor division that also holds for pre-epoch timestamps.
        let bucket_expr = "(value_time - (((value_time % ?4) + ?4) % ?4))";
        let type_filter = if self.sensor_type.is_some() {
            " AND sensor_type = ?5"
        } else {
            ""
        };

        format!(
            "SELECT {bucket_expr} AS bucket, sensor_type, unit, AVG(value)
             FROM sensor_value_rollups
             WHERE composite_id = ?1 AND value_time >= ?2 AND value_time < ?3{type_filter}
             GROUP BY bucket, sensor_type, unit
             ORDER BY bucket ASC, sensor_type ASC, unit ASC"
        )
    }

    pub(crate) fn params(&self) -> Vec<Box<dyn rusqlite::ToSql>> {
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(self.composite_id.clone()),
            Box::new(to_unix_millis(self.from)),
            Box::new(to_unix_millis(self.to)),
            Box::new(self.bucket.millis()),
        ];
        if let Some(ref sensor_type) = self.sensor_type {
            params.push(Box::new(sensor_type.clone()));
        }
        params
    }
}
