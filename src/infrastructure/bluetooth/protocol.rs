//! Environmental Sensing Protocol
//!
//! GATT identifiers, lookup tables and descriptor parsing for the
//! Environmental Sensing Service (ESS) and the auxiliary relay service.

use crate::error::BleError;
use uuid::Uuid;

/// Expand a 16-bit SIG-assigned number into a full 128-bit UUID.
pub const fn bluetooth_uuid(short: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5f9b_34fb | ((short as u128) << 96))
}

/// Environmental Sensing Service
pub const ENV_SENSING_SERVICE_UUID: Uuid = bluetooth_uuid(0x181A);

/// ES Measurement descriptor, present on every ESS characteristic
pub const ENV_SENSING_MEASUREMENT_DESCRIPTOR_UUID: Uuid = bluetooth_uuid(0x290C);

/// Vendor relay service carrying the fan control characteristic
pub const RELAY_SERVICE_UUID: Uuid = Uuid::from_u128(0x8dc27700_8a2f_11eb_b538_0800200c9a66);

/// Fan speed / manual mode characteristic
pub const RELAY_CHAR_UUID: Uuid = Uuid::from_u128(0x8dc27701_8a2f_11eb_b538_0800200c9a66);

/// Value written to the relay characteristic to hand control back to the
/// device's manual mode
pub const RELAY_MANUAL_MODE: [u8; 1] = [0x00];

/// ESS characteristics by 16-bit UUID
const CHARACTERISTIC_NAMES: &[(u16, &str)] = &[
    (0x2A6C, "Elevation"),
    (0x2A6D, "Pressure"),
    (0x2A6E, "Temperature"),
    (0x2A6F, "Humidity"),
    (0x2A70, "True Wind Speed"),
    (0x2A71, "True Wind Direction"),
    (0x2A72, "Apparent Wind Speed"),
    (0x2A73, "Apparent Wind Direction"),
    (0x2A74, "Gust Factor"),
    (0x2A75, "Pollen Concentration"),
    (0x2A76, "UV Index"),
    (0x2A77, "Irradiance"),
    (0x2A78, "Rainfall"),
    (0x2A79, "Wind Chill"),
    (0x2A7A, "Heat Index"),
    (0x2A7B, "Dew Point"),
    (0x2A7D, "Descriptor Value Changed"),
    (0x2AA0, "Magnetic Flux Density - 2D"),
    (0x2AA1, "Magnetic Flux Density - 3D"),
    (0x2AA2, "Language"),
    (0x2AA3, "Barometric Pressure Trend"),
];

/// Measurement application / location identifiers, `0x00..=0x21`
const APPLICATIONS: [&str; 0x22] = [
    "Unspecified",
    "Air",
    "Water",
    "Barometric",
    "Soil",
    "Infrared",
    "Map Database",
    "Barometric Elevation Source",
    "GPS only Elevation Source",
    "GPS and Map database Elevation Source",
    "Vertical datum Elevation Source",
    "Onshore",
    "Onboard vessel or vehicle",
    "Front",
    "Back/Rear",
    "Upper",
    "Lower",
    "Primary",
    "Secondary",
    "Outdoor",
    "Indoor",
    "Top",
    "Bottom",
    "Main",
    "Backup",
    "Auxiliary",
    "Supplementary",
    "Inside",
    "Outside",
    "Left",
    "Right",
    "Internal",
    "External",
    "Solar",
];

/// Human readable name of a characteristic, falling back to its UUID.
pub fn characteristic_name(uuid: &Uuid) -> String {
    CHARACTERISTIC_NAMES
        .iter()
        .find(|(short, _)| bluetooth_uuid(*short) == *uuid)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| uuid.to_string())
}

/// Application name for an id, or the id itself when it is not assigned.
pub fn application_name(application_id: u8) -> String {
    APPLICATIONS
        .get(application_id as usize)
        .map(|name| (*name).to_string())
        .unwrap_or_else(|| application_id.to_string())
}

/// Size of the ES Measurement descriptor value
pub const MEASUREMENT_DESCRIPTOR_LEN: usize = 11;

/// Decoded ES Measurement descriptor
///
/// # Layout (11 bytes, little-endian)
///
/// ```text
/// [0-1]  : Flags (u16)
/// [2]    : Sampling function
/// [3-5]  : Measurement period (u24, seconds)
/// [6-8]  : Update interval (u24, seconds)
/// [9]    : Application
/// [10]   : Measurement uncertainty
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementDescriptor {
    pub flags: u16,
    pub sampling_function: u8,
    pub measurement_period: u32,
    pub update_interval: u32,
    pub application: u8,
    pub uncertainty: u8,
}

pub fn parse_measurement_descriptor(bytes: &[u8]) -> Result<MeasurementDescriptor, BleError> {
    if bytes.len() != MEASUREMENT_DESCRIPTOR_LEN {
        return Err(BleError::DescriptorFormat {
            expected: MEASUREMENT_DESCRIPTOR_LEN,
            actual: bytes.len(),
        });
    }

    let u24 = |b: &[u8]| u32::from_le_bytes([b[0], b[1], b[2], 0]);

    Ok(MeasurementDescriptor {
        flags: u16::from_le_bytes([bytes[0], bytes[1]]),
        sampling_function: bytes[2],
        measurement_period: u24(&bytes[3..6]),
        update_interval: u24(&bytes[6..9]),
        application: bytes[9],
        uncertainty: bytes[10],
    })
}

/// Payload for a fan speed write: the shared secret followed by the speed.
pub fn relay_speed_payload(secret: &[u8], speed: u8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(secret.len() + 1);
    payload.extend_from_slice(secret);
    payload.push(speed);
    payload
}
