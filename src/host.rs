/// Host-side collaborators the update engine produces to
use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::FloraError;
use crate::models::{Capability, DeviceSettings, PeripheralIdentity};

/// Receives each decoded value the device asked for
#[async_trait]
pub trait CapabilitySink: Send + Sync {
    async fn update_capability(
        &self,
        device: &PeripheralIdentity,
        capability: Capability,
        value: f64,
    ) -> Result<(), FloraError>;
}

/// Records firmware version, last update time and identity per device
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn set_device_settings(
        &self,
        device: &PeripheralIdentity,
        settings: DeviceSettings,
    ) -> Result<(), FloraError>;
}

/// Best-effort notification raised when a device runs out of retries
#[async_trait]
pub trait EventTrigger: Send + Sync {
    async fn emit_timeout(&self, device_name: &str, reason: &str) -> Result<(), FloraError>;
}

/// Latest known state of one device
#[derive(Debug, Clone, Default)]
pub struct DeviceRecord {
    pub name: String,
    pub values: HashMap<Capability, f64>,
    pub settings: DeviceSettings,
    pub timeouts: u32,
}

/// In-process device registry backing the daemon
///
/// Keeps only the most recent sample per device.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: Mutex<HashMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new(devices: &[PeripheralIdentity]) -> Self {
        let records = devices
            .iter()
            .map(|d| {
                (
                    d.address.clone(),
                    DeviceRecord {
                        name: d.name.clone(),
                        ..DeviceRecord::default()
                    },
                )
            })
            .collect();
        Self {
            records: Mutex::new(records),
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, DeviceRecord>> {
        // A poisoned lock only means another update panicked mid-write
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, address: &str) -> Option<DeviceRecord> {
        self.records().get(address).cloned()
    }
}

#[async_trait]
impl CapabilitySink for DeviceRegistry {
    async fn update_capability(
        &self,
        device: &PeripheralIdentity,
        capability: Capability,
        value: f64,
    ) -> Result<(), FloraError> {
        let mut records = self.records();
        let record = records
            .get_mut(&device.address)
            .ok_or_else(|| {
                FloraError::CapabilityUpdateFailed(format!("unknown device {}", device.address))
            })?;
        record.values.insert(capability, value);
        info!("{}: {} = {}", device.name, capability, value);
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for DeviceRegistry {
    async fn set_device_settings(
        &self,
        device: &PeripheralIdentity,
        settings: DeviceSettings,
    ) -> Result<(), FloraError> {
        let mut records = self.records();
        let record = records
            .get_mut(&device.address)
            .ok_or_else(|| {
                FloraError::SettingsPersistFailed(format!("unknown device {}", device.address))
            })?;
        record.settings = settings;
        Ok(())
    }
}

#[async_trait]
impl EventTrigger for DeviceRegistry {
    async fn emit_timeout(&self, device_name: &str, reason: &str) -> Result<(), FloraError> {
        let mut records = self.records();
        let record = records
            .values_mut()
            .find(|r| r.name == device_name)
            .ok_or_else(|| {
                FloraError::NotificationFailed(format!("unknown device {}", device_name))
            })?;
        record.timeouts += 1;
        warn!("sensor_timeout: device={} reason={}", device_name, reason);
        Ok(())
    }
}
