/// Decoding of the plant sensor's data and firmware characteristic frames
use crate::error::FloraError;
use crate::models::{EnvironmentReading, FirmwareInfo};

const ENVIRONMENT_FRAME_MIN_LEN: usize = 10;
const FIRMWARE_FRAME_MIN_LEN: usize = 3;

/// Decode the data characteristic frame into environmental readings
///
/// The frame uses fixed offsets with mixed byte order:
/// - Bytes 0-1: Temperature (unsigned 16-bit LE, 0.1°C resolution)
/// - Byte 2: Unused
/// - Bytes 3-6: Luminance (unsigned 32-bit LE, lux)
/// - Bytes 6-7: Moisture (unsigned 16-bit BE, %)
/// - Bytes 8-9: Fertility (unsigned 16-bit LE, µS/cm)
///
/// Moisture shares byte 6 with the high byte of luminance and is read
/// big-endian. Both are wire-format properties and are kept as is.
///
/// # Arguments
/// * `frame` - Raw value of the data characteristic
///
/// # Returns
/// EnvironmentReading, or MalformedPayload if the frame is shorter than 10 bytes
pub fn decode_environment(frame: &[u8]) -> Result<EnvironmentReading, FloraError> {
    if frame.len() < ENVIRONMENT_FRAME_MIN_LEN {
        return Err(FloraError::MalformedPayload(format!(
            "environment frame has {} bytes, need at least {}",
            frame.len(),
            ENVIRONMENT_FRAME_MIN_LEN
        )));
    }

    let temperature = u16::from_le_bytes([frame[0], frame[1]]);
    let luminance = u32::from_le_bytes([frame[3], frame[4], frame[5], frame[6]]);
    let moisture = u16::from_be_bytes([frame[6], frame[7]]);
    let fertility = u16::from_le_bytes([frame[8], frame[9]]);

    Ok(EnvironmentReading {
        temperature_celsius: temperature as f64 / 10.0,
        luminance_lux: luminance,
        fertility,
        moisture,
    })
}

/// Decode the firmware characteristic frame into battery level and version
///
/// - Byte 0: Battery, read as the two hex digits of the byte (0x64 -> 64)
/// - Byte 1: Unused
/// - Bytes 2..: Firmware version as ASCII text
///
/// A battery byte with a non-decimal hex digit (anything beyond 0x99 or
/// with a nibble above 9) is out of domain and rejected.
pub fn decode_firmware(frame: &[u8]) -> Result<FirmwareInfo, FloraError> {
    if frame.len() < FIRMWARE_FRAME_MIN_LEN {
        return Err(FloraError::MalformedPayload(format!(
            "firmware frame has {} bytes, need at least {}",
            frame.len(),
            FIRMWARE_FRAME_MIN_LEN
        )));
    }

    let battery_percent = parse_hex_digits(frame[0])?;

    let version = &frame[2..];
    if !version.is_ascii() {
        return Err(FloraError::MalformedPayload(
            "firmware version is not ASCII".to_string(),
        ));
    }
    let firmware_version = version
        .iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim_end_matches('\0')
        .to_string();

    Ok(FirmwareInfo {
        battery_percent,
        firmware_version,
    })
}

fn parse_hex_digits(byte: u8) -> Result<u8, FloraError> {
    let (high, low) = (byte >> 4, byte & 0x0f);
    if high > 9 || low > 9 {
        return Err(FloraError::MalformedPayload(format!(
            "battery byte {:#04x} is out of domain",
            byte
        )));
    }
    Ok(high * 10 + low)
}
