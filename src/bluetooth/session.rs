/// One connect -> read -> disconnect run against a plant sensor
use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::bluetooth::codec::{decode_environment, decode_firmware};
use crate::bluetooth::transport::{
    settle, Characteristic, Connection, ConnectionGuard, Service, Transport,
    DATA_CHARACTERISTIC_UUID, DATA_SERVICE_UUID, FIRMWARE_CHARACTERISTIC_UUID,
    REALTIME_CHARACTERISTIC_UUID, REALTIME_ENABLE_COMMAND,
};
use crate::error::FloraError;
use crate::host::{CapabilitySink, SettingsStore};
use crate::models::{
    Capability, DeviceSettings, FirmwareInfo, PeripheralIdentity, SensorReading, SessionReport,
};
use crate::update::DeviceSession;
use crate::utils::{estimate_meters, iso8601_now};

/// Protocol steps, in the order a session walks through them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Discovering,
    Connecting,
    EnumeratingServices,
    EnumeratingCharacteristics,
    SettingRealtimeMode,
    ReadingEnvironment,
    ApplyingCapabilities,
    ReadingFirmware,
    ApplyingBattery,
    PersistingMetadata,
    Disconnecting,
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Discovering => "discovering",
            SessionState::Connecting => "connecting",
            SessionState::EnumeratingServices => "enumerating services",
            SessionState::EnumeratingCharacteristics => "enumerating characteristics",
            SessionState::SettingRealtimeMode => "setting realtime mode",
            SessionState::ReadingEnvironment => "reading environment",
            SessionState::ApplyingCapabilities => "applying capabilities",
            SessionState::ReadingFirmware => "reading firmware",
            SessionState::ApplyingBattery => "applying battery",
            SessionState::PersistingMetadata => "persisting metadata",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    /// Window for the target's advertisement to show up
    pub discovery: Duration,
    /// Bound on connect, enumeration, read and write; `None` waits forever
    pub operation: Option<Duration>,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            discovery: Duration::from_secs(10),
            operation: Some(Duration::from_secs(10)),
        }
    }
}

/// Drives one peripheral through the update protocol
///
/// Every run that gets a connection closes it again before returning,
/// whatever step failed.
pub struct LinkSession<'a, T: Transport> {
    transport: &'a T,
    sink: &'a dyn CapabilitySink,
    settings: &'a dyn SettingsStore,
    timeouts: SessionTimeouts,
}

impl<'a, T: Transport> LinkSession<'a, T> {
    pub fn new(
        transport: &'a T,
        sink: &'a dyn CapabilitySink,
        settings: &'a dyn SettingsStore,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            transport,
            sink,
            settings,
            timeouts,
        }
    }

    pub async fn run(&self, device: &PeripheralIdentity) -> Result<SessionReport, FloraError> {
        let started = Instant::now();

        enter(device, SessionState::Discovering);
        let advertisement = self
            .transport
            .find_advertisement(device, self.timeouts.discovery)
            .await?;

        let distance_meters = advertisement.rssi.map(|rssi| estimate_meters(rssi as f64));
        if let Some(distance) = distance_meters {
            debug!("{}: distance = {:.2} meter", device.name, distance);
        }

        enter(device, SessionState::Connecting);
        let connecting = self
            .bounded(SessionState::Connecting, self.transport.connect(&advertisement))
            .await;
        let connection = match connecting {
            Ok(connection) => connection,
            Err(e) => {
                // The radio may still complete a connect we stopped waiting for
                enter(device, SessionState::Disconnecting);
                if let Err(abort_err) = self.transport.abort_connect(&advertisement).await {
                    warn!("{}: teardown after failed connect: {}", device.name, abort_err);
                }
                return Err(e);
            }
        };
        let guard = ConnectionGuard::new(connection);

        let exchanged = self.exchange(device, guard.connection()).await;

        enter(device, SessionState::Disconnecting);
        let (reading, firmware) = settle(exchanged, guard.release().await)?;

        enter(device, SessionState::Done);
        let elapsed = started.elapsed();
        info!(
            "Device sync of {} complete in: {:.2} seconds",
            device.name,
            elapsed.as_secs_f64()
        );

        Ok(SessionReport {
            address: device.address.clone(),
            reading,
            battery_percent: firmware.battery_percent,
            firmware_version: firmware.firmware_version,
            distance_meters,
            elapsed,
        })
    }

    /// Steps that need the open connection
    async fn exchange(
        &self,
        device: &PeripheralIdentity,
        connection: &T::Connection,
    ) -> Result<(SensorReading, FirmwareInfo), FloraError> {
        enter(device, SessionState::EnumeratingServices);
        let services = self
            .bounded(SessionState::EnumeratingServices, connection.discover_services())
            .await?;
        let data_service = services
            .into_iter()
            .find(|s| s.uuid() == DATA_SERVICE_UUID)
            .ok_or(FloraError::MissingService)?;

        enter(device, SessionState::EnumeratingCharacteristics);
        let characteristics = self
            .bounded(
                SessionState::EnumeratingCharacteristics,
                data_service.discover_characteristics(),
            )
            .await?;
        let realtime =
            find_characteristic(&characteristics, REALTIME_CHARACTERISTIC_UUID, "realtime")?;
        let data = find_characteristic(&characteristics, DATA_CHARACTERISTIC_UUID, "data")?;
        let firmware =
            find_characteristic(&characteristics, FIRMWARE_CHARACTERISTIC_UUID, "firmware")?;

        enter(device, SessionState::SettingRealtimeMode);
        self.bounded(
            SessionState::SettingRealtimeMode,
            realtime.write(&REALTIME_ENABLE_COMMAND),
        )
        .await?;

        enter(device, SessionState::ReadingEnvironment);
        let frame = self
            .bounded(SessionState::ReadingEnvironment, data.read())
            .await?;
        let environment = decode_environment(&frame)?;
        debug!("{}: {:?}", device.name, environment);

        enter(device, SessionState::ApplyingCapabilities);
        let mut reading = SensorReading::default();
        for &capability in &device.capabilities {
            if let Some(value) = environment.value_of(capability) {
                self.sink.update_capability(device, capability, value).await?;
                reading.values.push((capability, value));
            }
        }

        enter(device, SessionState::ReadingFirmware);
        let frame = self
            .bounded(SessionState::ReadingFirmware, firmware.read())
            .await?;
        let info = decode_firmware(&frame)?;

        enter(device, SessionState::ApplyingBattery);
        if device.supports(Capability::Battery) {
            let battery = info.battery_percent as f64;
            self.sink
                .update_capability(device, Capability::Battery, battery)
                .await?;
            reading.values.push((Capability::Battery, battery));
        }

        enter(device, SessionState::PersistingMetadata);
        let settings = DeviceSettings {
            firmware_version: info.firmware_version.clone(),
            last_updated: iso8601_now(),
            uuid: device.address.clone(),
        };
        self.settings
            .set_device_settings(device, settings)
            .await
            .map_err(|e| match e {
                FloraError::SettingsPersistFailed(_) => e,
                other => FloraError::SettingsPersistFailed(other.to_string()),
            })?;

        Ok((reading, info))
    }

    async fn bounded<F, R>(&self, step: SessionState, operation: F) -> Result<R, FloraError>
    where
        F: Future<Output = Result<R, FloraError>>,
    {
        match self.timeouts.operation {
            Some(after) => tokio::time::timeout(after, operation)
                .await
                .map_err(|_| FloraError::OperationTimedOut { step, after })?,
            None => operation.await,
        }
    }
}

#[async_trait]
impl<'a, T: Transport> DeviceSession for LinkSession<'a, T> {
    async fn run(&self, device: &PeripheralIdentity) -> Result<SessionReport, FloraError> {
        LinkSession::run(self, device).await
    }
}

fn enter(device: &PeripheralIdentity, state: SessionState) {
    debug!("{}: {}", device.name, state);
}

fn find_characteristic<'c, C: Characteristic>(
    characteristics: &'c [C],
    uuid: uuid::Uuid,
    which: &'static str,
) -> Result<&'c C, FloraError> {
    characteristics
        .iter()
        .find(|c| c.uuid() == uuid)
        .ok_or(FloraError::MissingCharacteristic(which))
}
