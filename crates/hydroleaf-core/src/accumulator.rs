//! Buffering accumulator for raw readings.
//!
//! Readings are folded into a running sum, count and earliest timestamp per
//! (device, sensor type). A periodic [`Accumulator::flush`] drains every
//! entry into one averaged [`SensorRollup`] and writes the batch in a single
//! storage call.
//!
//! # Concurrency
//!
//! Entries live in a sharded [`DashMap`], so adds on different keys never
//! contend and adds on the same key are applied atomically. A flush never
//! blocks adds: it snapshots all entries, then removes each key only if its
//! value still equals the snapshot. An entry mutated in between stays in the
//! map and is picked up by the next flush.
//!
//! If the batch write fails, the drained entries are merged back so the data
//! is retried on the next cycle.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use hydroleaf_types::SensorRollup;

use crate::error::{Error, Result};
use crate::traits::TelemetryStore;

/// Accumulator key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SensorKey {
    pub composite_id: String,
    pub sensor_type: String,
}

impl SensorKey {
    pub fn new(composite_id: &str, sensor_type: &str) -> Self {
        Self {
            composite_id: composite_id.to_string(),
            sensor_type: sensor_type.to_string(),
        }
    }
}

/// Running aggregate for one key since the last flush.
#[derive(Debug, Clone, PartialEq)]
pub struct AccumulatorEntry {
    sum: f64,
    count: u64,
    first_timestamp: OffsetDateTime,
    unit: Option<String>,
}

impl AccumulatorEntry {
    fn new(value: f64, timestamp: OffsetDateTime, unit: Option<String>) -> Self {
        Self {
            sum: value,
            count: 1,
            first_timestamp: timestamp,
            unit,
        }
    }

    fn push(&mut self, value: f64, timestamp: OffsetDateTime, unit: Option<String>) {
        self.sum += value;
        self.count += 1;
        if timestamp < self.first_timestamp {
            self.first_timestamp = timestamp;
        }
        if unit.is_some() {
            self.unit = unit;
        }
    }

    /// Fold a drained entry back in. The live unit wins if it has one.
    fn absorb(&mut self, drained: AccumulatorEntry) {
        self.sum += drained.sum;
        self.count += drained.count;
        if drained.first_timestamp < self.first_timestamp {
            self.first_timestamp = drained.first_timestamp;
        }
        if self.unit.is_none() {
            self.unit = drained.unit;
        }
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn first_timestamp(&self) -> OffsetDateTime {
        self.first_timestamp
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }

    fn into_rollup(self, key: SensorKey) -> SensorRollup {
        SensorRollup {
            value: self.mean(),
            sample_count: self.count,
            value_time: self.first_timestamp,
            unit: self.unit,
            composite_id: key.composite_id,
            sensor_type: key.sensor_type,
        }
    }
}

/// Result of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Entries removed from the accumulator.
    pub drained: usize,
    /// Rollup rows written to storage.
    pub written: usize,
}

/// Concurrent in-memory accumulator with periodic flush to rollup storage.
pub struct Accumulator {
    entries: DashMap<SensorKey, AccumulatorEntry>,
    store: Arc<dyn TelemetryStore>,
    flush_lock: Mutex<()>,
}

impl Accumulator {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self {
            entries: DashMap::new(),
            store,
            flush_lock: Mutex::new(()),
        }
    }

    /// Add a reading without a unit.
    pub fn add(&self, composite_id: &str, sensor_type: &str, value: f64, timestamp: OffsetDateTime) {
        self.add_with_unit(composite_id, sensor_type, value, None, timestamp);
    }

    /// Add a reading. Non-finite values are dropped.
    pub fn add_with_unit(
        &self,
        composite_id: &str,
        sensor_type: &str,
        value: f64,
        unit: Option<&str>,
        timestamp: OffsetDateTime,
    ) {
        if !value.is_finite() {
            warn!(
                "Dropping non-finite value {} for {}/{}",
                value, composite_id, sensor_type
            );
            return;
        }

        let unit = unit.map(str::to_string);
        match self.entries.entry(SensorKey::new(composite_id, sensor_type)) {
            Entry::Occupied(mut slot) => slot.get_mut().push(value, timestamp, unit),
            Entry::Vacant(slot) => {
                slot.insert(AccumulatorEntry::new(value, timestamp, unit));
            }
        }
    }

    /// Number of keys currently buffered.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Copy of the buffered entry for a key.
    pub fn entry(&self, composite_id: &str, sensor_type: &str) -> Option<AccumulatorEntry> {
        self.entries
            .get(&SensorKey::new(composite_id, sensor_type))
            .map(|e| e.value().clone())
    }

    /// Drain all buffered entries into rollup storage.
    ///
    /// Only one flush runs at a time; a concurrent caller waits for the
    /// running one and then flushes whatever arrived since.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        let _guard = self.flush_lock.lock().await;

        // Collect first; removing while iterating would deadlock on the shard lock.
        let snapshot: Vec<(SensorKey, AccumulatorEntry)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        if snapshot.is_empty() {
            return Ok(FlushOutcome::default());
        }

        let mut drained = Vec::with_capacity(snapshot.len());
        for (key, seen) in snapshot {
            if let Some((key, entry)) = self.entries.remove_if(&key, |_, current| *current == seen)
            {
                drained.push((key, entry));
            }
        }

        if drained.is_empty() {
            debug!("All snapshotted entries changed before removal, deferring");
            return Ok(FlushOutcome::default());
        }

        let rollups: Vec<SensorRollup> = drained
            .iter()
            .map(|(key, entry)| entry.clone().into_rollup(key.clone()))
            .collect();

        match self.store.persist_rollups(&rollups).await {
            Ok(written) => {
                info!("Flushed {} rollups", written);
                Ok(FlushOutcome {
                    drained: drained.len(),
                    written,
                })
            }
            Err(e) => {
                warn!(
                    "Rollup write failed, re-queueing {} entries: {}",
                    drained.len(),
                    e
                );
                for (key, entry) in drained {
                    self.restore(key, entry);
                }
                Err(Error::StorageWrite(e))
            }
        }
    }

    fn restore(&self, key: SensorKey, drained: AccumulatorEntry) {
        match self.entries.entry(key) {
            Entry::Occupied(mut slot) => slot.get_mut().absorb(drained),
            Entry::Vacant(slot) => {
                slot.insert(drained);
            }
        }
    }
}
