mod bluetooth;
mod config;
mod error;
mod host;
mod models;
mod update;
mod utils;

#[cfg(test)]
mod testing;

use log::{error, info, warn};
use time::OffsetDateTime;
use tokio::time::sleep;

use bluetooth::{scan_candidates, BluezTransport, DriverProfile, LinkSession};
use config::PollerConfig;
use error::FloraError;
use host::DeviceRegistry;
use models::{RegisteredDevice, UpdateOutcome};
use update::{RetryingUpdater, UpdateQueue};
use utils::format_datetime;

/// Log every sensor in range that a driver profile would pair with
async fn discover(config: &PollerConfig) -> Result<(), FloraError> {
    let transport = BluezTransport::new().await?;
    let candidates =
        scan_candidates(&transport, &DriverProfile::all(), config.discovery_scan).await?;

    if candidates.is_empty() {
        warn!("No plant sensors found");
    }
    for candidate in candidates {
        info!(
            "Found {} at {} (broadcast name {:?}, {}, {}), capabilities: {:?}",
            candidate.name,
            candidate.data.id,
            candidate.data.name,
            candidate.data.address_type,
            candidate.data.version,
            candidate
                .capabilities
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
        );
        info!("  default settings: {:?}", candidate.settings);
        let identity = candidate.identity();
        info!("  FLORA_SENSORS entry: {}={}", identity.address, identity.name);
    }

    Ok(())
}

async fn main_loop(config: PollerConfig) -> Result<(), FloraError> {
    info!("Starting plant sensor update service");

    config.require_sensors()?;
    let transport = BluezTransport::new().await?;
    let registry = DeviceRegistry::new(&config.sensors);
    let session = LinkSession::new(
        &transport,
        &registry,
        &registry,
        config.session_timeouts(),
    );
    let queue = UpdateQueue::new(RetryingUpdater::new(
        &session,
        &registry,
        config.retry_backoff,
    ));

    let mut devices: Vec<RegisteredDevice> = config
        .sensors
        .iter()
        .cloned()
        .map(RegisteredDevice::new)
        .collect();

    loop {
        let start_time = OffsetDateTime::now_utc();
        info!("Starting update sequence at: {}", format_datetime(&start_time));

        let outcomes = queue.run(&mut devices).await;

        // Print summary
        for (device, outcome) in devices.iter().zip(&outcomes) {
            match outcome {
                UpdateOutcome::Updated(report) => {
                    info!("Summary for {} ({}):", device.identity.name, report.address);
                    for (capability, value) in &report.reading.values {
                        info!("  {}: {}", capability, value);
                    }
                    info!(
                        "  Firmware: {}, battery: {}%",
                        report.firmware_version, report.battery_percent
                    );
                    info!("  Synced in {:.2} seconds", report.elapsed.as_secs_f64());
                    if let Some(distance) = report.distance_meters {
                        info!("  Distance: {:.2} m", distance);
                    }
                }
                UpdateOutcome::Failed(e) => {
                    warn!("{} not updated: {}", device.identity.name, e);
                    if let Some(record) = registry.record(&device.identity.address) {
                        if record.settings.last_updated.is_empty() {
                            warn!("  Never updated, {} timeouts", record.timeouts);
                        } else {
                            warn!(
                                "  Last update {} ({} timeouts), last known values: {:?}",
                                record.settings.last_updated, record.timeouts, record.values
                            );
                        }
                    }
                }
            }
        }

        let updated = outcomes.iter().filter(|o| o.is_updated()).count();
        if updated == 0 {
            warn!("No sensor could be updated in this sequence!");
        }

        // Wait until next interval should start
        let elapsed = (OffsetDateTime::now_utc() - start_time).unsigned_abs();
        if let Some(wait_time) = config.update_interval.checked_sub(elapsed) {
            info!(
                "Waiting {} seconds until next update sequence",
                wait_time.as_secs()
            );
            sleep(wait_time).await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match PollerConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if std::env::args().nth(1).as_deref() == Some("discover") {
        return discover(&config).await.map_err(Into::into);
    }

    // Handle Ctrl+C gracefully
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = tx.send(());
            }
            Err(e) => {
                // Keep the sender alive so the main loop is not cut short
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    // Run main loop or wait for shutdown signal
    tokio::select! {
        result = main_loop(config) => {
            match result {
                Ok(_) => info!("Program completed successfully"),
                Err(e) => error!("Fatal error: {}", e),
            }
        }
        _ = &mut rx => {
            info!("Program terminated by user. Exiting gracefully.");
        }
    }

    Ok(())
}
