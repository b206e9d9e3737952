//! Main store implementation.

use std::path::Path;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use time::OffsetDateTime;
use tracing::{debug, info};

use hydroleaf_types::{
    BucketAverage, CompositeId, Device, DeviceGroup, LatestAverage, LatestSensorValue,
    SensorRollup, from_unix_millis, to_unix_millis,
};

use crate::error::{Error, Result};
use crate::models::StoredRollup;
use crate::queries::{AggregateQuery, RollupQuery};
use crate::schema;

const DEVICE_COLUMNS: &str = "d.composite_id, d.system, d.layer, d.device_id, g.id, g.name, d.registered_at
     FROM devices d JOIN device_groups g ON g.id = d.group_id";

/// SQLite-based store for Hydroleaf telemetry.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }
}

// Group and device operations
impl Store {
    /// Get a group by name, creating it if it does not exist yet.
    pub fn get_or_create_group(&self, name: &str) -> Result<DeviceGroup> {
        let created = self.conn.execute(
            "INSERT OR IGNORE INTO device_groups (name) VALUES (?1)",
            [name],
        )?;
        if created > 0 {
            info!("Created device group '{}'", name);
        }

        let group = self.conn.query_row(
            "SELECT id, name FROM device_groups WHERE name = ?1",
            [name],
            |row| {
                Ok(DeviceGroup {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )?;

        Ok(group)
    }

    /// Register a device unless a row for its identifier already exists.
    ///
    /// Returns the stored device and whether this call inserted it. When the
    /// device already exists the stored row wins and `group_id` is ignored.
    pub fn insert_device_if_absent(
        &self,
        id: &CompositeId,
        group_id: i64,
        registered_at: OffsetDateTime,
    ) -> Result<(Device, bool)> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO devices
             (composite_id, system, layer, device_id, group_id, registered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                id.as_str(),
                id.system(),
                id.layer(),
                id.device_id(),
                group_id,
                to_unix_millis(registered_at),
            ],
        )? > 0;

        let device = self
            .get_device(id.as_str())?
            .ok_or_else(|| Error::Unavailable(format!("device {id} vanished after insert")))?;

        Ok((device, inserted))
    }

    /// Get a device by composite identifier.
    pub fn get_device(&self, composite_id: &str) -> Result<Option<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} WHERE d.composite_id = ?1");
        let device = self
            .conn
            .query_row(&sql, [composite_id], device_from_row)
            .optional()?;
        Ok(device)
    }

    /// List all devices, oldest registration first.
    pub fn list_devices(&self) -> Result<Vec<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} ORDER BY d.registered_at ASC, d.composite_id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let devices = stmt
            .query_map([], device_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(devices)
    }
}

// Latest-value operations
impl Store {
    /// Create or overwrite the latest value for a (device, sensor type) pair.
    pub fn upsert_latest(&self, value: &LatestSensorValue) -> Result<()> {
        self.conn.execute(
            "INSERT INTO latest_sensor_values (composite_id, sensor_type, value, unit, value_time)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(composite_id, sensor_type) DO UPDATE SET
                value = excluded.value,
                unit = excluded.unit,
                value_time = excluded.value_time",
            rusqlite::params![
                value.composite_id,
                value.sensor_type,
                value.value,
                value.unit,
                to_unix_millis(value.value_time),
            ],
        )?;
        Ok(())
    }

    /// Get the latest value for a (device, sensor type) pair.
    pub fn get_latest(
        &self,
        composite_id: &str,
        sensor_type: &str,
    ) -> Result<Option<LatestSensorValue>> {
        let latest = self
            .conn
            .query_row(
                "SELECT composite_id, sensor_type, value, unit, value_time
                 FROM latest_sensor_values WHERE composite_id = ?1 AND sensor_type = ?2",
                [composite_id, sensor_type],
                latest_from_row,
            )
            .optional()?;
        Ok(latest)
    }

    /// List the latest value of every sensor type of a device.
    pub fn list_latest(&self, composite_id: &str) -> Result<Vec<LatestSensorValue>> {
        let mut stmt = self.conn.prepare(
            "SELECT composite_id, sensor_type, value, unit, value_time
             FROM latest_sensor_values WHERE composite_id = ?1 ORDER BY sensor_type ASC",
        )?;
        let values = stmt
            .query_map([composite_id], latest_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(values)
    }

    /// Mean of the latest `sensor_type` values across the devices of one
    /// system layer, with the number of devices that reported it.
    pub fn latest_average(
        &self,
        system: &str,
        layer: &str,
        sensor_type: &str,
    ) -> Result<LatestAverage> {
        let (average, count): (Option<f64>, i64) = self.conn.query_row(
            "SELECT AVG(l.value), COUNT(*)
             FROM latest_sensor_values l
             JOIN devices d ON d.composite_id = l.composite_id
             WHERE d.system = ?1 AND d.layer = ?2 AND l.sensor_type = ?3",
            [system, layer, sensor_type],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(LatestAverage {
            system: system.to_string(),
            layer: layer.to_string(),
            sensor_type: sensor_type.to_string(),
            average,
            device_count: count as u64,
        })
    }
}

// Rollup operations
impl Store {
    /// Append rollups in a single transaction.
    ///
    /// Either every row is written or none is.
    pub fn insert_rollups(&self, rollups: &[SensorRollup]) -> Result<usize> {
        if rollups.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO sensor_value_rollups
                 (composite_id, sensor_type, unit, value, sample_count, value_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for rollup in rollups {
                stmt.execute(rusqlite::params![
                    rollup.composite_id,
                    rollup.sensor_type,
                    rollup.unit,
                    rollup.value,
                    rollup.sample_count as i64,
                    to_unix_millis(rollup.value_time),
                ])?;
            }
        }
        tx.commit()?;

        debug!("Inserted {} rollups", rollups.len());
        Ok(rollups.len())
    }

    /// Query raw rollup rows.
    pub fn query_rollups(&self, query: &RollupQuery) -> Result<Vec<StoredRollup>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rollups = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok(StoredRollup {
                    id: row.get(0)?,
                    composite_id: row.get(1)?,
                    sensor_type: row.get(2)?,
                    unit: row.get(3)?,
                    value: row.get(4)?,
                    sample_count: row.get::<_, i64>(5)? as u64,
                    value_time: time_column(row, 6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rollups)
    }

    /// Count rollups, optionally for one device.
    pub fn count_rollups(&self, composite_id: Option<&str>) -> Result<u64> {
        let count: i64 = match composite_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM sensor_value_rollups WHERE composite_id = ?",
                [id],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                "SELECT COUNT(*) FROM sensor_value_rollups",
                [],
                |row| row.get(0),
            )?,
        };

        Ok(count as u64)
    }

    /// Per-bucket averages, ordered by bucket time, sensor type, then unit.
    pub fn aggregate(&self, query: &AggregateQuery) -> Result<Vec<BucketAverage>> {
        let sql = query.build_sql();
        let params = query.params();
        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        debug!(
            "Aggregating {} in {} buckets (type filter: {:?})",
            query.composite_id, query.bucket, query.sensor_type
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok(BucketAverage {
                    bucket_time: time_column(row, 0)?,
                    sensor_type: row.get(1)?,
                    unit: row.get(2)?,
                    avg_value: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let millis: i64 = row.get(idx)?;
    from_unix_millis(millis)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        composite_id: row.get(0)?,
        system: row.get(1)?,
        layer: row.get(2)?,
        device_id: row.get(3)?,
        group: DeviceGroup {
            id: row.get(4)?,
            name: row.get(5)?,
        },
        registered_at: time_column(row, 6)?,
    })
}

fn latest_from_row(row: &Row<'_>) -> rusqlite::Result<LatestSensorValue> {
    Ok(LatestSensorValue {
        composite_id: row.get(0)?,
        sensor_type: row.get(1)?,
        value: row.get(2)?,
        unit: row.get(3)?,
        value_time: time_column(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydroleaf_types::BucketWidth;
    use time::macros::datetime;

    fn store_with_device(raw: &str) -> (Store, Device) {
        let store = Store::open_in_memory().unwrap();
        let group = store.get_or_create_group("default").unwrap();
        let id = CompositeId::parse(raw).unwrap();
        let (device, _) = store
            .insert_device_if_absent(&id, group.id, datetime!(2024-01-01 00:00 UTC))
            .unwrap();
        (store, device)
    }

    fn rollup(sensor_type: &str, unit: Option<&str>, value: f64, t: OffsetDateTime) -> SensorRollup {
        SensorRollup {
            composite_id: "S01-L01-A1".to_string(),
            sensor_type: sensor_type.to_string(),
            unit: unit.map(str::to_string),
            value,
            sample_count: 1,
            value_time: t,
        }
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.list_devices().unwrap().is_empty());
        assert_eq!(store.count_rollups(None).unwrap(), 0);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.db");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        drop(store);

        // Reopen keeps data and schema
        let store = Store::open(&path).unwrap();
        assert!(store.list_devices().unwrap().is_empty());
    }

    #[test]
    fn test_get_or_create_group_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let a = store.get_or_create_group("default").unwrap();
        let b = store.get_or_create_group("default").unwrap();
        let c = store.get_or_create_group("greenhouse-2").unwrap();
        assert_eq!(a, b);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_insert_device_if_absent() {
        let store = Store::open_in_memory().unwrap();
        let group = store.get_or_create_group("default").unwrap();
        let other = store.get_or_create_group("other").unwrap();
        let id = CompositeId::parse("S01-L02-esp32-01").unwrap();

        let (first, inserted) = store
            .insert_device_if_absent(&id, group.id, datetime!(2024-01-01 00:00 UTC))
            .unwrap();
        assert!(inserted);
        assert_eq!(first.system, "S01");
        assert_eq!(first.layer, "L02");
        assert_eq!(first.device_id, "esp32-01");
        assert_eq!(first.group.name, "default");

        // Second insert keeps the original row
        let (second, inserted) = store
            .insert_device_if_absent(&id, other.id, datetime!(2024-06-01 00:00 UTC))
            .unwrap();
        assert!(!inserted);
        assert_eq!(second, first);
        assert_eq!(store.list_devices().unwrap().len(), 1);
    }

    #[test]
    fn test_get_device_missing() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_device("S01-L01-X").unwrap().is_none());
    }

    #[test]
    fn test_upsert_latest_overwrites() {
        let (store, device) = store_with_device("S01-L01-A1");

        let mut value = LatestSensorValue {
            composite_id: device.composite_id.clone(),
            sensor_type: "temperature".to_string(),
            value: 21.0,
            unit: Some("°C".to_string()),
            value_time: datetime!(2024-01-01 00:01 UTC),
        };
        store.upsert_latest(&value).unwrap();

        value.value = 22.5;
        value.unit = None;
        value.value_time = datetime!(2024-01-01 00:00 UTC);
        store.upsert_latest(&value).unwrap();

        let stored = store
            .get_latest(&device.composite_id, "temperature")
            .unwrap()
            .unwrap();
        assert_eq!(stored.value, 22.5);
        assert_eq!(stored.unit, None);
        assert_eq!(stored.value_time, datetime!(2024-01-01 00:00 UTC));
        assert_eq!(store.list_latest(&device.composite_id).unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_latest_requires_device() {
        let store = Store::open_in_memory().unwrap();
        let value = LatestSensorValue {
            composite_id: "S09-L09-ghost".to_string(),
            sensor_type: "ph".to_string(),
            value: 6.5,
            unit: None,
            value_time: datetime!(2024-01-01 00:00 UTC),
        };
        assert!(matches!(store.upsert_latest(&value), Err(Error::Database(_))));
    }

    #[test]
    fn test_latest_average_per_layer() {
        let store = Store::open_in_memory().unwrap();
        let group = store.get_or_create_group("default").unwrap();
        let t = datetime!(2024-01-01 00:00 UTC);
        for (raw, lux) in [("S01-L01-A", 100.0), ("S01-L01-B", 300.0), ("S01-L02-C", 900.0)] {
            let id = CompositeId::parse(raw).unwrap();
            store.insert_device_if_absent(&id, group.id, t).unwrap();
            store
                .upsert_latest(&LatestSensorValue {
                    composite_id: raw.to_string(),
                    sensor_type: "light".to_string(),
                    value: lux,
                    unit: Some("lux".to_string()),
                    value_time: t,
                })
                .unwrap();
        }

        let avg = store.latest_average("S01", "L01", "light").unwrap();
        assert_eq!(avg.average, Some(200.0));
        assert_eq!(avg.device_count, 2);

        let empty = store.latest_average("S01", "L01", "humidity").unwrap();
        assert_eq!(empty.average, None);
        assert_eq!(empty.device_count, 0);
    }

    #[test]
    fn test_insert_rollups_appends_duplicates() {
        let (store, _) = store_with_device("S01-L01-A1");
        let t = datetime!(2024-01-01 00:00 UTC);

        store.insert_rollups(&[rollup("ph", None, 6.0, t)]).unwrap();
        store.insert_rollups(&[rollup("ph", None, 7.0, t)]).unwrap();

        let rows = store
            .query_rollups(&RollupQuery::new().device("S01-L01-A1"))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_ne!(rows[0].id, rows[1].id);
        assert_eq!(rows[0].value, 6.0);
        assert_eq!(rows[1].value, 7.0);
    }

    #[test]
    fn test_insert_rollups_empty_is_noop() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.insert_rollups(&[]).unwrap(), 0);
        assert_eq!(store.count_rollups(None).unwrap(), 0);
    }

    #[test]
    fn test_query_rollups_preserves_sample_count_and_millis() {
        let (store, _) = store_with_device("S01-L01-A1");
        let mut row = rollup("ec", Some("mS/cm"), 1.2, datetime!(2024-01-01 00:00:00.250 UTC));
        row.sample_count = 42;
        store.insert_rollups(std::slice::from_ref(&row)).unwrap();

        let stored = store.query_rollups(&RollupQuery::new()).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].clone().into_rollup(), row);
    }

    #[test]
    fn test_aggregate_groups_by_bucket_type_and_unit() {
        let (store, _) = store_with_device("S01-L01-A1");
        store
            .insert_rollups(&[
                rollup("temperature", Some("C"), 20.0, datetime!(2024-01-01 00:01 UTC)),
                rollup("temperature", Some("C"), 22.0, datetime!(2024-01-01 00:04 UTC)),
                rollup("temperature", Some("F"), 70.0, datetime!(2024-01-01 00:02 UTC)),
                rollup("humidity", Some("%"), 55.0, datetime!(2024-01-01 00:03 UTC)),
                rollup("temperature", Some("C"), 30.0, datetime!(2024-01-01 00:06 UTC)),
            ])
            .unwrap();

        let query = AggregateQuery::new(
            "S01-L01-A1",
            datetime!(2024-01-01 00:00 UTC),
            datetime!(2024-01-01 00:10 UTC),
            BucketWidth::minutes(5).unwrap(),
        );
        let rows = store.aggregate(&query).unwrap();

        let summary: Vec<_> = rows
            .iter()
            .map(|r| (r.bucket_time, r.sensor_type.as_str(), r.unit.as_deref(), r.avg_value))
            .collect();
        assert_eq!(
            summary,
            vec![
                (datetime!(2024-01-01 00:00 UTC), "humidity", Some("%"), 55.0),
                (datetime!(2024-01-01 00:00 UTC), "temperature", Some("C"), 21.0),
                (datetime!(2024-01-01 00:00 UTC), "temperature", Some("F"), 70.0),
                (datetime!(2024-01-01 00:05 UTC), "temperature", Some("C"), 30.0),
            ]
        );
    }

    #[test]
    fn test_aggregate_range_is_half_open_and_filtered() {
        let (store, _) = store_with_device("S01-L01-A1");
        store
            .insert_rollups(&[
                rollup("ph", None, 6.0, datetime!(2024-01-01 00:00 UTC)),
                rollup("ph", None, 7.0, datetime!(2024-01-01 00:10 UTC)),
                rollup("ec", None, 1.0, datetime!(2024-01-01 00:01 UTC)),
            ])
            .unwrap();

        let query = AggregateQuery::new(
            "S01-L01-A1",
            datetime!(2024-01-01 00:00 UTC),
            datetime!(2024-01-01 00:10 UTC),
            BucketWidth::minutes(5).unwrap(),
        )
        .sensor_type("ph");
        let rows = store.aggregate(&query).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sensor_type, "ph");
        assert_eq!(rows[0].avg_value, 6.0);
        assert_eq!(rows[0].unit, None);
    }

    #[test]
    fn test_aggregate_no_data() {
        let store = Store::open_in_memory().unwrap();
        let query = AggregateQuery::new(
            "S01-L01-A1",
            datetime!(2024-01-01 00:00 UTC),
            datetime!(2024-01-02 00:00 UTC),
            BucketWidth::default(),
        );
        assert!(store.aggregate(&query).unwrap().is_empty());
    }
}
