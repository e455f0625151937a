/// Turn scan results into devices the host can register
use log::info;
use tokio::time::Duration;

use crate::bluetooth::transport::Transport;
use crate::error::FloraError;
use crate::models::{Advertisement, Capability, DeviceSettings, PeripheralIdentity};

/// Per-driver matching rule and registration defaults
#[derive(Debug, Clone)]
pub struct DriverProfile {
    /// Local name the sensor broadcasts
    pub ble_identification: &'static str,
    /// Base of the generated display name
    pub ble_name: &'static str,
    pub default_settings: DeviceSettings,
    pub capabilities: Vec<Capability>,
}

impl DriverProfile {
    pub fn flower_care() -> Self {
        Self {
            ble_identification: "Flower care",
            ble_name: "Mi Flora",
            default_settings: DeviceSettings::default(),
            capabilities: Capability::ALL.to_vec(),
        }
    }

    pub fn ropot() -> Self {
        Self {
            ble_identification: "ropot",
            ble_name: "RoPot",
            default_settings: DeviceSettings::default(),
            capabilities: vec![
                Capability::Temperature,
                Capability::Fertility,
                Capability::Moisture,
                Capability::Battery,
            ],
        }
    }

    pub fn all() -> Vec<Self> {
        vec![Self::flower_care(), Self::ropot()]
    }
}

/// Identifying data stored with a registered device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceData {
    pub id: String,
    pub address: String,
    pub name: Option<String>,
    pub address_type: String,
    pub version: String,
}

/// A device found during pairing, ready to be registered
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateDevice {
    pub name: String,
    pub data: DeviceData,
    pub settings: DeviceSettings,
    pub capabilities: Vec<Capability>,
}

impl CandidateDevice {
    pub fn identity(&self) -> PeripheralIdentity {
        PeripheralIdentity {
            address: self.data.address.clone(),
            name: self.name.clone(),
            capabilities: self.capabilities.clone(),
        }
    }
}

/// Keep advertisements broadcasting the profile's name, numbering them from 1
pub fn discover_candidates(
    advertisements: &[Advertisement],
    profile: &DriverProfile,
    version: &str,
) -> Vec<CandidateDevice> {
    advertisements
        .iter()
        .filter(|a| a.local_name.as_deref() == Some(profile.ble_identification))
        .enumerate()
        .map(|(index, a)| CandidateDevice {
            name: format!("{} {}", profile.ble_name, index + 1),
            data: DeviceData {
                id: a.id.clone(),
                address: a.id.clone(),
                name: a.local_name.clone(),
                address_type: a.address_type.clone(),
                version: format!("v{}", version),
            },
            settings: profile.default_settings.clone(),
            capabilities: profile.capabilities.clone(),
        })
        .collect()
}

/// Scan once and map the results through every profile
pub async fn scan_candidates<T: Transport>(
    transport: &T,
    profiles: &[DriverProfile],
    window: Duration,
) -> Result<Vec<CandidateDevice>, FloraError> {
    let advertisements = transport.discover_advertisements(window).await?;
    info!("Scan saw {} advertisements", advertisements.len());

    let version = env!("CARGO_PKG_VERSION");
    Ok(profiles
        .iter()
        .flat_map(|profile| discover_candidates(&advertisements, profile, version))
        .collect())
}
