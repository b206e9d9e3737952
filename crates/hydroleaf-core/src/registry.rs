//! Device registry with auto-registration.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info};

use hydroleaf_types::{CompositeId, Device};

use crate::error::{Error, Result};
use crate::traits::TelemetryStore;

/// Name of the group unknown devices join when no group is given.
pub const DEFAULT_GROUP: &str = "default";

/// Resolves composite identifiers to devices, registering unseen ones.
pub struct DeviceRegistry {
    store: Arc<dyn TelemetryStore>,
    default_group: String,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self::with_default_group(store, DEFAULT_GROUP)
    }

    pub fn with_default_group(store: Arc<dyn TelemetryStore>, default_group: &str) -> Self {
        Self {
            store,
            default_group: default_group.to_string(),
        }
    }

    /// Resolve a device, registering it into the default group if unseen.
    ///
    /// Fails only for malformed identifiers or storage errors.
    pub async fn resolve(&self, composite_id: &str) -> Result<Device> {
        self.resolve_in_group(composite_id, &self.default_group).await
    }

    /// Resolve a device, registering it into `group` if unseen.
    ///
    /// Known devices keep their original group.
    pub async fn resolve_in_group(&self, composite_id: &str, group: &str) -> Result<Device> {
        let id = CompositeId::parse(composite_id)?;

        if let Some(device) = self
            .store
            .find_device(id.as_str())
            .await
            .map_err(Error::StorageRead)?
        {
            return Ok(device);
        }

        let group = self
            .store
            .find_or_create_group(group)
            .await
            .map_err(Error::StorageWrite)?;

        let (device, inserted) = self
            .store
            .insert_device_if_absent(&id, group.id, OffsetDateTime::now_utc())
            .await
            .map_err(Error::StorageWrite)?;

        if inserted {
            info!(
                "Registered device {} (system={}, layer={}, group={})",
                device.composite_id, device.system, device.layer, device.group.name
            );
        } else {
            debug!("Device {} registered concurrently", device.composite_id);
        }

        Ok(device)
    }

    /// Look up a device without registering it.
    pub async fn lookup(&self, composite_id: &str) -> Result<Option<Device>> {
        self.store
            .find_device(composite_id)
            .await
            .map_err(Error::StorageRead)
    }

    /// Look up a device, failing with [`Error::UnknownDevice`] if absent.
    pub async fn require(&self, composite_id: &str) -> Result<Device> {
        self.lookup(composite_id)
            .await?
            .ok_or_else(|| Error::UnknownDevice(composite_id.to_string()))
    }

    /// All registered devices, oldest registration first.
    pub async fn list(&self) -> Result<Vec<Device>> {
        self.store.list_devices().await.map_err(Error::StorageRead)
    }
}
