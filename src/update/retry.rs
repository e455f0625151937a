/// Bounded full-protocol retries around a device session
use log::{error, info, warn};
use tokio::time::{sleep, Duration};

use crate::error::FloraError;
use crate::host::EventTrigger;
use crate::models::{RegisteredDevice, SessionReport, MAX_RETRIES};
use crate::update::DeviceSession;

/// Retry a whole session run until it succeeds or the device runs out of retries
///
/// The device's retry counter is the loop state: it goes up by one per
/// failed run and is back at zero whenever `update` returns.
pub struct RetryingUpdater<'a, S: DeviceSession> {
    session: &'a S,
    events: &'a dyn EventTrigger,
    backoff: Duration,
}

impl<'a, S: DeviceSession> RetryingUpdater<'a, S> {
    /// `backoff` is multiplied by the attempt number between runs
    pub fn new(session: &'a S, events: &'a dyn EventTrigger, backoff: Duration) -> Self {
        Self {
            session,
            events,
            backoff,
        }
    }

    pub async fn update(&self, device: &mut RegisteredDevice) -> Result<SessionReport, FloraError> {
        info!("# update device: {}", device.identity.name);

        loop {
            let err = match self.session.run(&device.identity).await {
                Ok(report) => {
                    device.retry.reset();
                    return Ok(report);
                }
                Err(err) => err,
            };

            let attempts = device.retry.record_failure();
            warn!(
                "Update of {} failed (attempt {}/{}): {}",
                device.identity.name, attempts, MAX_RETRIES, err
            );

            if !device.retry.is_exhausted() {
                if !self.backoff.is_zero() {
                    sleep(self.backoff * attempts).await;
                }
                continue;
            }

            error!(
                "Max retries ({}) exceeded for {}, no success",
                MAX_RETRIES, device.identity.name
            );
            match self
                .events
                .emit_timeout(&device.identity.name, &err.to_string())
                .await
            {
                Ok(()) => info!("Sent sensor_timeout for {}", device.identity.name),
                Err(e) => error!(
                    "Cannot trigger sensor_timeout for {}: {}",
                    device.identity.name, e
                ),
            }
            device.retry.reset();

            return Err(FloraError::RetriesExhausted {
                attempts,
                last: Box::new(err),
            });
        }
    }
}
