use log::debug;
use std::collections::{HashMap, HashSet};
use std::env;
use std::str::FromStr;
use tokio::time::Duration;

use crate::bluetooth::SessionTimeouts;
use crate::error::FloraError;
use crate::models::{Capability, PeripheralIdentity};

const DEFAULT_UPDATE_INTERVAL_MINUTES: u64 = 15;
const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RETRY_BACKOFF_SECS: u64 = 2;
const DEFAULT_DISCOVERY_SCAN_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub sensors: Vec<PeripheralIdentity>,
    pub update_interval: Duration,
    pub discovery_timeout: Duration,
    /// Zero disables the per-operation timeout
    pub operation_timeout: Duration,
    pub retry_backoff: Duration,
    pub discovery_scan: Duration,
}

impl PollerConfig {
    pub fn new() -> Result<Self, FloraError> {
        // Load environment variables
        dotenv::dotenv().ok();

        Self::from_vars(&env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, FloraError> {
        let capabilities = match vars.get("FLORA_CAPABILITIES") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Capability::from_str)
                .collect::<Result<Vec<_>, _>>()?,
            None => Capability::ALL.to_vec(),
        };

        let mut sensors = Vec::new();

        // Try FLORA_SENSORS format first
        if let Some(flora_sensors) = vars.get("FLORA_SENSORS") {
            debug!("Found FLORA_SENSORS: '{}'", flora_sensors);
            for pair in flora_sensors.split(',') {
                let pair = pair.trim();
                if pair.is_empty() {
                    continue;
                }
                let (mac, name) = pair.split_once('=').ok_or_else(|| {
                    FloraError::Config(format!("expected MAC=Name, got '{}'", pair))
                })?;
                let (mac, name) = (mac.trim(), name.trim());
                if !mac.is_empty() && !name.is_empty() {
                    sensors.push(identity(mac, name, &capabilities));
                }
            }
        } else {
            // Fallback to individual environment variables
            debug!("FLORA_SENSORS not found, trying individual variables");
            let mut indexed: Vec<(u32, &String)> = vars
                .iter()
                .filter_map(|(key, value)| {
                    key.strip_prefix("FLORA_SENSOR_")
                        .and_then(|s| s.strip_suffix("_MAC"))
                        .and_then(|index| index.parse().ok())
                        .map(|index| (index, value))
                })
                .collect();
            indexed.sort_by_key(|(index, _)| *index);

            for (index, mac) in indexed {
                let name_key = format!("FLORA_SENSOR_{}_NAME", index);
                if let Some(name) = vars.get(&name_key) {
                    sensors.push(identity(mac.trim(), name.trim(), &capabilities));
                }
            }
        }

        // Timeout events find a sensor by name, the registry by address
        let mut seen_names = HashSet::new();
        let mut seen_addresses = HashSet::new();
        for sensor in &sensors {
            debug!("Sensor: {} -> {}", sensor.address, sensor.name);
            if !seen_names.insert(sensor.name.as_str()) {
                return Err(FloraError::Config(format!(
                    "sensor name '{}' is used more than once",
                    sensor.name
                )));
            }
            if !seen_addresses.insert(sensor.address.as_str()) {
                return Err(FloraError::Config(format!(
                    "sensor address {} is listed more than once",
                    sensor.address
                )));
            }
        }

        let minutes = number(vars, "UPDATE_INTERVAL_MINUTES", DEFAULT_UPDATE_INTERVAL_MINUTES)?;
        let update_interval = minutes
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                FloraError::Config(format!("UPDATE_INTERVAL_MINUTES is too large: {}", minutes))
            })?;

        Ok(PollerConfig {
            sensors,
            update_interval,
            discovery_timeout: Duration::from_secs(number(
                vars,
                "DISCOVERY_TIMEOUT_SECS",
                DEFAULT_DISCOVERY_TIMEOUT_SECS,
            )?),
            operation_timeout: Duration::from_secs(number(
                vars,
                "OPERATION_TIMEOUT_SECS",
                DEFAULT_OPERATION_TIMEOUT_SECS,
            )?),
            retry_backoff: Duration::from_secs(number(
                vars,
                "RETRY_BACKOFF_SECS",
                DEFAULT_RETRY_BACKOFF_SECS,
            )?),
            discovery_scan: Duration::from_secs(number(
                vars,
                "DISCOVERY_SCAN_SECS",
                DEFAULT_DISCOVERY_SCAN_SECS,
            )?),
        })
    }

    /// Polling needs at least one sensor to talk to
    pub fn require_sensors(&self) -> Result<(), FloraError> {
        if self.sensors.is_empty() {
            return Err(FloraError::Config(
                "No plant sensors configured. Please set FLORA_SENSORS or \
                 FLORA_SENSOR_<N>_MAC/FLORA_SENSOR_<N>_NAME environment variables"
                    .into(),
            ));
        }
        Ok(())
    }

    pub fn session_timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            discovery: self.discovery_timeout,
            operation: (!self.operation_timeout.is_zero()).then_some(self.operation_timeout),
        }
    }
}

fn identity(mac: &str, name: &str, capabilities: &[Capability]) -> PeripheralIdentity {
    PeripheralIdentity {
        address: mac.to_uppercase(),
        name: name.to_string(),
        capabilities: capabilities.to_vec(),
    }
}

fn number(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<u64, FloraError> {
    match vars.get(key) {
        Some(value) => value.trim().parse().map_err(|_| {
            FloraError::Config(format!("{} must be a whole number, got '{}'", key, value))
        }),
        None => Ok(default),
    }
}
