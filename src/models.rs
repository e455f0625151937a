use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::FloraError;

/// Retry ceiling for one device update, counted in full protocol runs
pub const MAX_RETRIES: u32 = 3;

/// Capabilities a plant sensor can report, named as the host platform names them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Temperature,
    Luminance,
    Fertility,
    Moisture,
    Battery,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Temperature,
        Capability::Luminance,
        Capability::Fertility,
        Capability::Moisture,
        Capability::Battery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Temperature => "measure_temperature",
            Capability::Luminance => "measure_luminance",
            Capability::Fertility => "flora_measure_fertility",
            Capability::Moisture => "flora_measure_moisture",
            Capability::Battery => "measure_battery",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = FloraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| FloraError::Config(format!("unknown capability '{}'", s)))
    }
}

/// A registered peripheral as the device registry knows it
#[derive(Debug, Clone, PartialEq)]
pub struct PeripheralIdentity {
    pub address: String,
    pub name: String,
    pub capabilities: Vec<Capability>,
}

impl PeripheralIdentity {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Broadcast record seen during one discovery scan
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub id: String,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    pub address_type: String,
}

/// Decoded content of the data characteristic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentReading {
    pub temperature_celsius: f64,
    pub luminance_lux: u32,
    pub fertility: u16,
    pub moisture: u16,
}

impl EnvironmentReading {
    pub fn value_of(&self, capability: Capability) -> Option<f64> {
        match capability {
            Capability::Temperature => Some(self.temperature_celsius),
            Capability::Luminance => Some(self.luminance_lux as f64),
            Capability::Fertility => Some(self.fertility as f64),
            Capability::Moisture => Some(self.moisture as f64),
            Capability::Battery => None,
        }
    }
}

/// Decoded content of the firmware characteristic
#[derive(Debug, Clone, PartialEq)]
pub struct FirmwareInfo {
    pub battery_percent: u8,
    pub firmware_version: String,
}

/// Capability values delivered during one successful cycle, in delivery order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorReading {
    pub values: Vec<(Capability, f64)>,
}

impl SensorReading {
    pub fn get(&self, capability: Capability) -> Option<f64> {
        self.values
            .iter()
            .find(|(c, _)| *c == capability)
            .map(|(_, v)| *v)
    }
}

/// Settings written back to the host after each successful cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSettings {
    pub firmware_version: String,
    pub last_updated: String,
    pub uuid: String,
}

/// Per-device failed-attempt counter, kept within `[0, MAX_RETRIES]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    count: u32,
}

impl RetryState {
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn record_failure(&mut self) -> u32 {
        self.count = (self.count + 1).min(MAX_RETRIES);
        self.count
    }

    pub fn is_exhausted(&self) -> bool {
        self.count >= MAX_RETRIES
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// A device as the update engine sees it: identity plus its retry counter
#[derive(Debug, Clone)]
pub struct RegisteredDevice {
    pub identity: PeripheralIdentity,
    pub retry: RetryState,
}

impl RegisteredDevice {
    pub fn new(identity: PeripheralIdentity) -> Self {
        Self {
            identity,
            retry: RetryState::default(),
        }
    }
}

/// What one successful link session produced
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub address: String,
    pub reading: SensorReading,
    pub battery_percent: u8,
    pub firmware_version: String,
    pub distance_meters: Option<f64>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum UpdateOutcome {
    Updated(SessionReport),
    Failed(FloraError),
}

impl UpdateOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, UpdateOutcome::Updated(_))
    }
}
