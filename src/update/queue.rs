/// Sequential update of every registered device
use log::{debug, error, info};

use crate::models::{RegisteredDevice, UpdateOutcome};
use crate::update::{DeviceSession, RetryingUpdater};

/// Runs devices one after another through a single updater
///
/// There is one radio, so a device is finished (updated or out of retries)
/// before the next one starts.
pub struct UpdateQueue<'a, S: DeviceSession> {
    updater: RetryingUpdater<'a, S>,
}

impl<'a, S: DeviceSession> UpdateQueue<'a, S> {
    pub fn new(updater: RetryingUpdater<'a, S>) -> Self {
        Self { updater }
    }

    /// Update all devices in order; one outcome per device, same order
    pub async fn run(&self, devices: &mut [RegisteredDevice]) -> Vec<UpdateOutcome> {
        info!("-----------------------------------------------------------------");
        info!("| New update sequence ({} devices)", devices.len());
        info!("-----------------------------------------------------------------");

        let mut outcomes = Vec::with_capacity(devices.len());
        for device in devices.iter_mut() {
            if device.retry.count() > 0 {
                debug!(
                    "Clearing {} leftover retries of {}",
                    device.retry.count(),
                    device.identity.name
                );
            }
            device.retry.reset();
            let outcome = match self.updater.update(device).await {
                Ok(report) => UpdateOutcome::Updated(report),
                Err(e) => {
                    error!("Failed to update {}: {}", device.identity.name, e);
                    UpdateOutcome::Failed(e)
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }
}
