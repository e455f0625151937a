/// In-memory fakes of the transport and host collaborators
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::bluetooth::session::SessionState;
use crate::bluetooth::transport::{
    Characteristic, Connection, Service, Transport, DATA_CHARACTERISTIC_UUID, DATA_SERVICE_UUID,
    FIRMWARE_CHARACTERISTIC_UUID, REALTIME_CHARACTERISTIC_UUID,
};
use crate::error::FloraError;
use crate::host::{CapabilitySink, EventTrigger, SettingsStore};
use crate::models::{
    Advertisement, Capability, DeviceSettings, PeripheralIdentity, SensorReading, SessionReport,
};
use crate::update::DeviceSession;

const GENERIC_ACCESS_UUID: Uuid = Uuid::from_u128(0x0000_1800_0000_1000_8000_0080_5f9b_34fb);

/// temperature 23.5, luminance 1500, moisture 45, fertility 300
pub const ENVIRONMENT_FRAME: [u8; 16] = [
    0xeb, 0x00, 0x00, 0xdc, 0x05, 0x00, 0x00, 0x2d, 0x2c, 0x01, 0x02, 0x3c, 0x00, 0xfb, 0x34, 0x9b,
];

/// battery 64, firmware 3.2.1
pub const FIRMWARE_FRAME: [u8; 7] = [0x64, 0x15, b'3', b'.', b'2', b'.', b'1'];

pub fn identity(address: &str, name: &str) -> PeripheralIdentity {
    PeripheralIdentity {
        address: address.to_string(),
        name: name.to_string(),
        capabilities: Capability::ALL.to_vec(),
    }
}

fn injected(state: SessionState) -> FloraError {
    FloraError::Transport(format!("injected failure while {}", state))
}

/// Records link operations so tests can check ordering and disconnects
#[derive(Clone, Default)]
pub struct FakeLog {
    events: Arc<Mutex<Vec<String>>>,
    disconnects: Arc<AtomicUsize>,
}

impl FakeLog {
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

/// Scriptable peripheral behind a fake radio
#[derive(Clone)]
pub struct FakeTransport {
    pub log: FakeLog,
    pub fail_at: Option<SessionState>,
    pub missing: Option<Uuid>,
    pub environment_frame: Vec<u8>,
    pub firmware_frame: Vec<u8>,
    pub failing_disconnect: bool,
    pub advertisements: Vec<Advertisement>,
    pub connect_delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            log: FakeLog::default(),
            fail_at: None,
            missing: None,
            environment_frame: ENVIRONMENT_FRAME.to_vec(),
            firmware_frame: FIRMWARE_FRAME.to_vec(),
            failing_disconnect: false,
            advertisements: Vec::new(),
            connect_delay: None,
        }
    }

    pub fn failing_at(state: SessionState) -> Self {
        Self {
            fail_at: Some(state),
            ..Self::new()
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    type Connection = FakeConnection;

    async fn discover_advertisements(
        &self,
        _window: Duration,
    ) -> Result<Vec<Advertisement>, FloraError> {
        Ok(self.advertisements.clone())
    }

    async fn find_advertisement(
        &self,
        identity: &PeripheralIdentity,
        _timeout: Duration,
    ) -> Result<Advertisement, FloraError> {
        self.log.push("find");
        if self.fail_at == Some(SessionState::Discovering) {
            return Err(FloraError::PeripheralNotFound(identity.address.clone()));
        }
        Ok(Advertisement {
            id: identity.address.clone(),
            local_name: Some("Flower care".to_string()),
            rssi: Some(-59),
            address_type: "public".to_string(),
        })
    }

    async fn connect(&self, _advertisement: &Advertisement) -> Result<FakeConnection, FloraError> {
        self.log.push("connect");
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_at == Some(SessionState::Connecting) {
            return Err(FloraError::ConnectFailed("injected".to_string()));
        }
        let mut connection = FakeConnection::new(self.log.clone(), self.fail_at);
        connection.missing = self.missing;
        connection.environment_frame = self.environment_frame.clone();
        connection.firmware_frame = self.firmware_frame.clone();
        connection.failing_disconnect = self.failing_disconnect;
        Ok(connection)
    }

    async fn abort_connect(&self, _advertisement: &Advertisement) -> Result<(), FloraError> {
        self.log.push("abort_connect");
        self.log.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeConnection {
    log: FakeLog,
    fail_at: Option<SessionState>,
    missing: Option<Uuid>,
    environment_frame: Vec<u8>,
    firmware_frame: Vec<u8>,
    failing_disconnect: bool,
    connected: AtomicBool,
}

impl FakeConnection {
    pub fn new(log: FakeLog, fail_at: Option<SessionState>) -> Self {
        Self {
            log,
            fail_at,
            missing: None,
            environment_frame: ENVIRONMENT_FRAME.to_vec(),
            firmware_frame: FIRMWARE_FRAME.to_vec(),
            failing_disconnect: false,
            connected: AtomicBool::new(true),
        }
    }

    fn characteristic(&self, uuid: Uuid) -> FakeCharacteristic {
        let value = if uuid == DATA_CHARACTERISTIC_UUID {
            self.environment_frame.clone()
        } else if uuid == FIRMWARE_CHARACTERISTIC_UUID {
            self.firmware_frame.clone()
        } else {
            Vec::new()
        };
        FakeCharacteristic {
            uuid,
            value,
            log: self.log.clone(),
            fail_at: self.fail_at,
        }
    }
}

#[async_trait]
impl Connection for FakeConnection {
    type Service = FakeService;

    async fn discover_services(&self) -> Result<Vec<FakeService>, FloraError> {
        self.log.push("discover_services");
        if self.fail_at == Some(SessionState::EnumeratingServices) {
            return Err(injected(SessionState::EnumeratingServices));
        }
        let mut services = vec![FakeService {
            uuid: GENERIC_ACCESS_UUID,
            characteristics: Vec::new(),
            log: self.log.clone(),
            fail_at: self.fail_at,
        }];
        if self.missing != Some(DATA_SERVICE_UUID) {
            let characteristics = [
                REALTIME_CHARACTERISTIC_UUID,
                DATA_CHARACTERISTIC_UUID,
                FIRMWARE_CHARACTERISTIC_UUID,
            ]
            .into_iter()
            .filter(|uuid| self.missing != Some(*uuid))
            .map(|uuid| self.characteristic(uuid))
            .collect();
            services.push(FakeService {
                uuid: DATA_SERVICE_UUID,
                characteristics,
                log: self.log.clone(),
                fail_at: self.fail_at,
            });
        }
        Ok(services)
    }

    async fn disconnect(&self) -> Result<(), FloraError> {
        self.log.push("disconnect");
        self.log.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if self.failing_disconnect {
            return Err(FloraError::Transport("link lost".to_string()));
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

pub struct FakeService {
    uuid: Uuid,
    characteristics: Vec<FakeCharacteristic>,
    log: FakeLog,
    fail_at: Option<SessionState>,
}

#[async_trait]
impl Service for FakeService {
    type Characteristic = FakeCharacteristic;

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn discover_characteristics(&self) -> Result<Vec<FakeCharacteristic>, FloraError> {
        self.log.push("discover_characteristics");
        if self.fail_at == Some(SessionState::EnumeratingCharacteristics) {
            return Err(injected(SessionState::EnumeratingCharacteristics));
        }
        Ok(self.characteristics.clone())
    }
}

#[derive(Clone)]
pub struct FakeCharacteristic {
    uuid: Uuid,
    value: Vec<u8>,
    log: FakeLog,
    fail_at: Option<SessionState>,
}

#[async_trait]
impl Characteristic for FakeCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn read(&self) -> Result<Vec<u8>, FloraError> {
        self.log.push(format!("read {}", self.uuid.simple()));
        let failing = match self.fail_at {
            Some(SessionState::ReadingEnvironment) => self.uuid == DATA_CHARACTERISTIC_UUID,
            Some(SessionState::ReadingFirmware) => self.uuid == FIRMWARE_CHARACTERISTIC_UUID,
            _ => false,
        };
        if failing {
            return Err(FloraError::Transport("read failed".to_string()));
        }
        Ok(self.value.clone())
    }

    async fn write(&self, value: &[u8]) -> Result<(), FloraError> {
        self.log.push(format!("write {} {:02x?}", self.uuid.simple(), value));
        if self.fail_at == Some(SessionState::SettingRealtimeMode) {
            return Err(FloraError::Transport("write failed".to_string()));
        }
        Ok(())
    }
}

/// Host collaborators that record every call
#[derive(Default)]
pub struct FakeHost {
    pub fail_at: Option<SessionState>,
    pub failing_trigger: bool,
    pub updates: Mutex<Vec<(String, Capability, f64)>>,
    pub settings: Mutex<Vec<(String, DeviceSettings)>>,
    pub timeouts: Mutex<Vec<(String, String)>>,
}

impl FakeHost {
    pub fn failing_at(state: SessionState) -> Self {
        Self {
            fail_at: Some(state),
            ..Self::default()
        }
    }
}

#[async_trait]
impl CapabilitySink for FakeHost {
    async fn update_capability(
        &self,
        device: &PeripheralIdentity,
        capability: Capability,
        value: f64,
    ) -> Result<(), FloraError> {
        let failing = match self.fail_at {
            Some(SessionState::ApplyingCapabilities) => capability != Capability::Battery,
            Some(SessionState::ApplyingBattery) => capability == Capability::Battery,
            _ => false,
        };
        if failing {
            return Err(FloraError::CapabilityUpdateFailed(capability.to_string()));
        }
        self.updates
            .lock()
            .unwrap()
            .push((device.address.clone(), capability, value));
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for FakeHost {
    async fn set_device_settings(
        &self,
        device: &PeripheralIdentity,
        settings: DeviceSettings,
    ) -> Result<(), FloraError> {
        if self.fail_at == Some(SessionState::PersistingMetadata) {
            return Err(FloraError::SettingsPersistFailed("store offline".to_string()));
        }
        self.settings
            .lock()
            .unwrap()
            .push((device.address.clone(), settings));
        Ok(())
    }
}

#[async_trait]
impl EventTrigger for FakeHost {
    async fn emit_timeout(&self, device_name: &str, reason: &str) -> Result<(), FloraError> {
        if self.failing_trigger {
            return Err(FloraError::NotificationFailed("no flow".to_string()));
        }
        self.timeouts
            .lock()
            .unwrap()
            .push((device_name.to_string(), reason.to_string()));
        Ok(())
    }
}

/// Session whose outcomes are scripted per device address
///
/// Each run pops the next scripted outcome; once the script is empty the
/// device keeps returning `default_ok`.
pub struct ScriptedSession {
    scripts: Mutex<Vec<(String, VecDeque<bool>, bool)>>,
    pub attempts: Mutex<Vec<String>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Fail `failures` times, then succeed
    pub fn failing_then_ok(self, address: &str, failures: usize) -> Self {
        self.script(address, vec![false; failures], true)
    }

    pub fn always_failing(self, address: &str) -> Self {
        self.script(address, Vec::new(), false)
    }

    fn script(self, address: &str, outcomes: Vec<bool>, default_ok: bool) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .push((address.to_string(), outcomes.into(), default_ok));
        self
    }

    pub fn attempts_for(&self, address: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.as_str() == address)
            .count()
    }
}

#[async_trait]
impl DeviceSession for ScriptedSession {
    async fn run(&self, device: &PeripheralIdentity) -> Result<SessionReport, FloraError> {
        self.attempts.lock().unwrap().push(device.address.clone());
        let ok = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.iter_mut().find(|(a, _, _)| *a == device.address) {
                Some((_, outcomes, default_ok)) => outcomes.pop_front().unwrap_or(*default_ok),
                None => true,
            }
        };
        if !ok {
            return Err(FloraError::PeripheralNotFound(device.address.clone()));
        }
        Ok(SessionReport {
            address: device.address.clone(),
            reading: SensorReading::default(),
            battery_percent: 64,
            firmware_version: "3.2.1".to_string(),
            distance_meters: None,
            elapsed: Duration::ZERO,
        })
    }
}
