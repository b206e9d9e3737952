//! Data models for stored data.

use time::OffsetDateTime;

use hydroleaf_types::SensorRollup;

/// A rollup row as persisted, with its surrogate row ID.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRollup {
    /// Database row ID.
    pub id: i64,
    pub composite_id: String,
    pub sensor_type: String,
    pub unit: Option<String>,
    pub value: f64,
    pub sample_count: u64,
    pub value_time: OffsetDateTime,
}

impl StoredRollup {
    /// Convert to a [`SensorRollup`], dropping the row ID.
    pub fn into_rollup(self) -> SensorRollup {
        SensorRollup {
            composite_id: self.composite_id,
            sensor_type: self.sensor_type,
            unit: self.unit,
            value: self.value,
            sample_count: self.sample_count,
            value_time: self.value_time,
        }
    }
}
