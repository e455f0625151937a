pub mod queue;
pub mod retry;

use async_trait::async_trait;

use crate::error::FloraError;
use crate::models::{PeripheralIdentity, SessionReport};

pub use queue::UpdateQueue;
pub use retry::RetryingUpdater;

/// One complete update attempt for a device
#[async_trait]
pub trait DeviceSession: Send + Sync {
    async fn run(&self, device: &PeripheralIdentity) -> Result<SessionReport, FloraError>;
}
