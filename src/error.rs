/// Error type shared by the codec, the link session and the update engine
use std::time::Duration;
use thiserror::Error;

use crate::bluetooth::session::SessionState;

#[derive(Debug, Error)]
pub enum FloraError {
    /// The discovery window elapsed without seeing the peripheral
    #[error("peripheral {0} not found")]
    PeripheralNotFound(String),

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("missing data service")]
    MissingService,

    #[error("missing {0} characteristic")]
    MissingCharacteristic(&'static str),

    /// Frame too short or a field outside its domain
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("failed to update capability: {0}")]
    CapabilityUpdateFailed(String),

    #[error("failed to persist device settings: {0}")]
    SettingsPersistFailed(String),

    #[error("disconnect failed: {0}")]
    DisconnectFailed(String),

    #[error("max retries ({attempts}) exceeded, no success")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FloraError>,
    },

    #[error("{step} timed out after {after:?}")]
    OperationTimedOut { step: SessionState, after: Duration },

    /// GATT or adapter failure reported by the transport
    #[error("transport error: {0}")]
    Transport(String),

    #[error("cannot deliver notification: {0}")]
    NotificationFailed(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<bluer::Error> for FloraError {
    fn from(err: bluer::Error) -> Self {
        FloraError::Transport(err.to_string())
    }
}
