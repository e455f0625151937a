/// Utility functions for timestamps and signal strength
use time::format_description::well_known::Rfc3339;
use time::{format_description, OffsetDateTime};

/// Measured signal strength at one meter
const REFERENCE_POWER_DBM: f64 = -59.0;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    match format_description::parse("[day].[month].[year] - [hour]:[minute]:[second]") {
        Ok(format) => dt.format(&format).unwrap_or_else(|_| dt.to_string()),
        Err(_) => dt.to_string(),
    }
}

/// Current UTC time as an ISO-8601 (RFC 3339) string
pub fn iso8601_now() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339).unwrap_or_else(|_| now.to_string())
}

/// Rough distance in meters for a received signal strength
///
/// Two-segment path-loss heuristic; only good enough for diagnostics.
pub fn estimate_meters(rssi: f64) -> f64 {
    let ratio = rssi / REFERENCE_POWER_DBM;

    if ratio < 1.0 {
        return ratio.powi(10);
    }

    0.19 * ratio.powi(8)
}
