/// BlueZ-backed transport for Linux hosts
use async_trait::async_trait;
use bluer::gatt::remote;
use bluer::{Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty};
use futures_util::{pin_mut, Stream, StreamExt};
use log::{debug, error, warn};
use std::future::Future;
use tokio::time::{sleep, timeout, Duration};
use uuid::Uuid;

use crate::bluetooth::transport::{Characteristic, Connection, Service, Transport};
use crate::error::FloraError;
use crate::models::{Advertisement, PeripheralIdentity};

pub struct BluezTransport {
    // Adapter handles stay valid only while the session lives
    _session: bluer::Session,
    adapter: Adapter,
}

impl BluezTransport {
    /// Open a BlueZ session on the default adapter, powered on and LE-only
    pub async fn new() -> Result<Self, FloraError> {
        let session = match bluer::Session::new().await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to create Bluetooth session: {}", e);
                return Err(e.into());
            }
        };

        let adapter = match session.default_adapter().await {
            Ok(adapter) => adapter,
            Err(e) => {
                error!("Failed to get default Bluetooth adapter: {}", e);
                return Err(e.into());
            }
        };

        if let Err(e) = adapter.set_powered(true).await {
            error!("Failed to power on adapter: {}", e);
            return Err(e.into());
        }

        let filter = bluer::DiscoveryFilter {
            transport: bluer::DiscoveryTransport::Le,
            duplicate_data: false,
            ..Default::default()
        };

        // Discovery still works unfiltered
        if let Err(e) = adapter.set_discovery_filter(filter).await {
            warn!("Failed to set discovery filter: {}", e);
        }

        Ok(Self {
            _session: session,
            adapter,
        })
    }
}

/// Wait until discovery reports `target` and it is actually on the air
///
/// BlueZ replays every cached device as `DeviceAdded` when discovery starts,
/// so the add alone proves nothing. The device counts as seen once it has an
/// RSSI, which BlueZ only sets from a live advertisement. `watch` yields the
/// current RSSI and the device's property changes.
async fn sighted<E, W, Fut, C>(events: E, target: Address, watch: W) -> Result<bool, FloraError>
where
    E: Stream<Item = AdapterEvent>,
    W: FnOnce() -> Fut,
    Fut: Future<Output = Result<(Option<i16>, C), FloraError>>,
    C: Stream<Item = DeviceEvent>,
{
    pin_mut!(events);

    let mut added = false;
    while let Some(event) = events.next().await {
        if let AdapterEvent::DeviceAdded(addr) = event {
            if addr == target {
                added = true;
                break;
            }
        }
    }
    if !added {
        return Ok(false);
    }

    let (rssi, changes) = watch().await?;
    if rssi.is_some() {
        return Ok(true);
    }

    // Discovery keeps running while `events` is alive
    pin_mut!(changes);
    while let Some(event) = changes.next().await {
        if let DeviceEvent::PropertyChanged(DeviceProperty::Rssi(_)) = event {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn advertisement_of(device: &Device) -> Result<Advertisement, FloraError> {
    Ok(Advertisement {
        id: device.address().to_string(),
        local_name: device.name().await?,
        rssi: device.rssi().await?,
        address_type: format!("{:?}", device.address_type().await?),
    })
}

#[async_trait]
impl Transport for BluezTransport {
    type Connection = BluezConnection;

    async fn discover_advertisements(
        &self,
        window: Duration,
    ) -> Result<Vec<Advertisement>, FloraError> {
        let discovery_stream = self.adapter.discover_devices().await?;
        let discovery_handle = tokio::spawn(async move {
            let stream = discovery_stream;
            pin_mut!(stream);
            while let Some(event) = stream.next().await {
                debug!("Discovery event: {:?}", event);
            }
        });

        sleep(window).await;
        discovery_handle.abort();

        let mut advertisements = Vec::new();
        for addr in self.adapter.device_addresses().await? {
            let device = match self.adapter.device(addr) {
                Ok(device) => device,
                Err(_) => continue,
            };
            match advertisement_of(&device).await {
                Ok(advertisement) => advertisements.push(advertisement),
                Err(e) => debug!("Skipping {}: {}", addr, e),
            }
        }

        Ok(advertisements)
    }

    async fn find_advertisement(
        &self,
        identity: &PeripheralIdentity,
        window: Duration,
    ) -> Result<Advertisement, FloraError> {
        let target: Address = identity
            .address
            .parse()
            .map_err(|_| FloraError::InvalidAddress(identity.address.clone()))?;

        let events = self.adapter.discover_devices().await?;

        let adapter = &self.adapter;
        let sighting = timeout(
            window,
            sighted(events, target, || async move {
                let device = adapter.device(target)?;
                // Subscribe before reading RSSI so no advertisement slips between
                let changes = device.events().await?;
                let rssi = device.rssi().await?;
                Ok::<_, FloraError>((rssi, changes))
            }),
        )
        .await;

        let seen = match sighting {
            Ok(seen) => seen?,
            Err(_) => false,
        };
        if !seen {
            return Err(FloraError::PeripheralNotFound(identity.address.clone()));
        }

        let device = self.adapter.device(target)?;
        advertisement_of(&device).await
    }

    async fn connect(&self, advertisement: &Advertisement) -> Result<BluezConnection, FloraError> {
        let addr: Address = advertisement
            .id
            .parse()
            .map_err(|_| FloraError::InvalidAddress(advertisement.id.clone()))?;
        let device = self.adapter.device(addr)?;

        device
            .connect()
            .await
            .map_err(|e| FloraError::ConnectFailed(e.to_string()))?;

        Ok(BluezConnection { device })
    }

    async fn abort_connect(&self, advertisement: &Advertisement) -> Result<(), FloraError> {
        let addr: Address = advertisement
            .id
            .parse()
            .map_err(|_| FloraError::InvalidAddress(advertisement.id.clone()))?;
        let device = self.adapter.device(addr)?;

        // Disconnect also cancels a Connect that bluetoothd has not answered yet
        if let Err(e) = device.disconnect().await {
            debug!("Teardown of {} after failed connect: {}", addr, e);
        }
        Ok(())
    }
}

pub struct BluezConnection {
    device: Device,
}

#[async_trait]
impl Connection for BluezConnection {
    type Service = BluezService;

    async fn discover_services(&self) -> Result<Vec<BluezService>, FloraError> {
        let mut services = Vec::new();
        for inner in self.device.services().await? {
            let uuid = inner.uuid().await?;
            services.push(BluezService { uuid, inner });
        }
        Ok(services)
    }

    async fn disconnect(&self) -> Result<(), FloraError> {
        self.device.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match self.device.is_connected().await {
            Ok(connected) => connected,
            Err(e) => {
                // Assume the link is up so disconnect is still attempted
                warn!("Cannot query connection state of {}: {}", self.device.address(), e);
                true
            }
        }
    }
}

pub struct BluezService {
    uuid: Uuid,
    inner: remote::Service,
}

#[async_trait]
impl Service for BluezService {
    type Characteristic = BluezCharacteristic;

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn discover_characteristics(&self) -> Result<Vec<BluezCharacteristic>, FloraError> {
        let mut characteristics = Vec::new();
        for inner in self.inner.characteristics().await? {
            let uuid = inner.uuid().await?;
            characteristics.push(BluezCharacteristic { uuid, inner });
        }
        Ok(characteristics)
    }
}

pub struct BluezCharacteristic {
    uuid: Uuid,
    inner: remote::Characteristic,
}

#[async_trait]
impl Characteristic for BluezCharacteristic {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn read(&self) -> Result<Vec<u8>, FloraError> {
        Ok(self.inner.read().await?)
    }

    async fn write(&self, value: &[u8]) -> Result<(), FloraError> {
        Ok(self.inner.write(value).await?)
    }
}
