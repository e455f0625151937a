/// Narrow view of the wireless transport consumed by the link session
use async_trait::async_trait;
use log::{debug, warn};
use std::time::Duration;
use uuid::Uuid;

use crate::error::FloraError;
use crate::models::{Advertisement, PeripheralIdentity};

// Plant sensor GATT layout
pub const DATA_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1204_0000_1000_8000_0080_5f9b_34fb);
pub const DATA_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_1a01_0000_1000_8000_0080_5f9b_34fb);
pub const FIRMWARE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_1a02_0000_1000_8000_0080_5f9b_34fb);
pub const REALTIME_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_1a00_0000_1000_8000_0080_5f9b_34fb);

/// Written to the realtime characteristic to enable live sampling
pub const REALTIME_ENABLE_COMMAND: [u8; 2] = [0xa0, 0x1f];

#[async_trait]
pub trait Transport: Send + Sync {
    type Connection: Connection;

    /// Scan for `window` and return every advertisement seen
    async fn discover_advertisements(
        &self,
        window: Duration,
    ) -> Result<Vec<Advertisement>, FloraError>;

    /// Wait up to `timeout` for the advertisement of `identity`
    async fn find_advertisement(
        &self,
        identity: &PeripheralIdentity,
        timeout: Duration,
    ) -> Result<Advertisement, FloraError>;

    async fn connect(&self, advertisement: &Advertisement) -> Result<Self::Connection, FloraError>;

    /// Tear down a link whose connect failed or timed out part way
    async fn abort_connect(&self, advertisement: &Advertisement) -> Result<(), FloraError>;
}

#[async_trait]
pub trait Connection: Send + Sync {
    type Service: Service;

    async fn discover_services(&self) -> Result<Vec<Self::Service>, FloraError>;
    async fn disconnect(&self) -> Result<(), FloraError>;
    async fn is_connected(&self) -> bool;
}

#[async_trait]
pub trait Service: Send + Sync {
    type Characteristic: Characteristic;

    fn uuid(&self) -> Uuid;
    async fn discover_characteristics(&self) -> Result<Vec<Self::Characteristic>, FloraError>;
}

#[async_trait]
pub trait Characteristic: Send + Sync {
    fn uuid(&self) -> Uuid;
    async fn read(&self) -> Result<Vec<u8>, FloraError>;
    async fn write(&self, value: &[u8]) -> Result<(), FloraError>;
}

/// Owns an open connection until it is released
///
/// `release` is the only way to give the connection up. Dropping a guard
/// that was never released is a bug and is reported in the log.
pub struct ConnectionGuard<C: Connection> {
    connection: Option<C>,
}

impl<C: Connection> ConnectionGuard<C> {
    pub fn new(connection: C) -> Self {
        Self {
            connection: Some(connection),
        }
    }

    pub fn connection(&self) -> &C {
        // Only `release` takes the connection, and it consumes the guard
        match &self.connection {
            Some(connection) => connection,
            None => unreachable!("connection guard used after release"),
        }
    }

    /// Disconnect if the link is still up
    pub async fn release(mut self) -> Result<(), FloraError> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };
        if connection.is_connected().await {
            debug!("Disconnecting peripheral");
            connection
                .disconnect()
                .await
                .map_err(|e| FloraError::DisconnectFailed(e.to_string()))?;
        }
        Ok(())
    }
}

impl<C: Connection> Drop for ConnectionGuard<C> {
    fn drop(&mut self) {
        if self.connection.is_some() {
            warn!("Connection dropped without disconnect");
        }
    }
}

/// Combine the outcome of a connected run with the outcome of its disconnect
///
/// An earlier error wins over a disconnect error; a disconnect error only
/// surfaces when the run itself succeeded.
pub fn settle<T>(
    run: Result<T, FloraError>,
    disconnect: Result<(), FloraError>,
) -> Result<T, FloraError> {
    match (run, disconnect) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(disconnect_err)) => {
            warn!("Disconnect after failure also failed: {}", disconnect_err);
            Err(e)
        }
    }
}
