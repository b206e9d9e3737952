//! Core types for Hydroleaf telemetry data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ParseError, ParseResult};

/// A composite device identifier of the form `<system>-<layer>-<deviceId>`.
///
/// The identifier is split on the first two hyphens only, so device ids may
/// themselves contain hyphens:
///
/// ```
/// use hydroleaf_types::CompositeId;
///
/// let id: CompositeId = "S01-L02-esp32-01".parse().unwrap();
/// assert_eq!(id.system(), "S01");
/// assert_eq!(id.layer(), "L02");
/// assert_eq!(id.device_id(), "esp32-01");
/// assert!(CompositeId::parse("S01-L02").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeId {
    raw: String,
    system: String,
    layer: String,
    device_id: String,
}

impl CompositeId {
    /// Parse a composite identifier.
    ///
    /// Fails with [`ParseError::MalformedIdentifier`] when there are fewer than
    /// three segments or when any segment is blank.
    pub fn parse(raw: &str) -> ParseResult<Self> {
        let mut parts = raw.splitn(3, '-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(system), Some(layer), Some(device_id))
                if !is_blank(system) && !is_blank(layer) && !is_blank(device_id) =>
            {
                Ok(Self {
                    raw: raw.to_string(),
                    system: system.to_string(),
                    layer: layer.to_string(),
                    device_id: device_id.to_string(),
                })
            }
            _ => Err(ParseError::MalformedIdentifier(raw.to_string())),
        }
    }

    /// The full identifier as originally supplied.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// System segment (e.g. `S01`).
    pub fn system(&self) -> &str {
        &self.system
    }

    /// Layer segment (e.g. `L02`).
    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Device segment, including any trailing hyphens.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

impl FromStr for CompositeId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for CompositeId {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

/// A logical grouping of devices.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DeviceGroup {
    /// Database row ID.
    pub id: i64,
    /// Unique group name.
    pub name: String,
}

/// A registered device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Device {
    /// Composite identifier, the primary key.
    pub composite_id: String,
    /// System segment.
    pub system: String,
    /// Layer segment.
    pub layer: String,
    /// Device segment.
    pub device_id: String,
    /// Group this device belongs to.
    pub group: DeviceGroup,
    /// When the device was first registered.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub registered_at: OffsetDateTime,
}

/// The most recent raw reading for a (device, sensor type) pair.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct LatestSensorValue {
    /// Device composite identifier.
    pub composite_id: String,
    /// Sensor type (e.g. `temperature`).
    pub sensor_type: String,
    /// Reported value.
    pub value: f64,
    /// Unit, if the device reported one.
    pub unit: Option<String>,
    /// Timestamp of the reading.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub value_time: OffsetDateTime,
}

/// One averaged row written by an accumulator flush.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SensorRollup {
    pub composite_id: String,
    pub sensor_type: String,
    pub unit: Option<String>,
    /// Mean of all values accumulated since the previous flush.
    pub value: f64,
    /// Number of readings that contributed to `value`.
    pub sample_count: u64,
    /// Earliest reading timestamp in the window.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub value_time: OffsetDateTime,
}

/// Average of all rollups of one sensor series inside one time bucket.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct BucketAverage {
    pub sensor_type: String,
    pub unit: Option<String>,
    /// Start of the bucket.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub bucket_time: OffsetDateTime,
    pub avg_value: f64,
}

/// Mean of the latest values of one sensor type across a system layer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct LatestAverage {
    pub system: String,
    pub layer: String,
    pub sensor_type: String,
    /// `None` when no device in the layer reports this sensor type.
    pub average: Option<f64>,
    /// Number of devices that contributed to `average`.
    pub device_count: u64,
}
