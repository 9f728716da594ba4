use chrono::{DateTime, Utc};
use std::fmt;

/// A single decoded measurement, ready to be forwarded to the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub device_address: String,
    /// `"{measurement_name}_{application_name}"`, e.g. `Temperature_Outdoor`
    pub measurement_key: String,
    /// `None` when the payload could not be decoded
    pub value: Option<f64>,
}

impl Reading {
    pub fn new(device_address: &str, measurement_key: String, value: Option<f64>) -> Self {
        Self {
            timestamp: Utc::now(),
            device_address: device_address.to_string(),
            measurement_key,
            value,
        }
    }
}

/// Lifecycle of the sensor link, as driven by `SensorConnection::run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Scanning,
    Connecting,
    Subscribing,
    Active,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Active => "active",
        };
        f.write_str(name)
    }
}

/// What a characteristic measures and where, resolved from its
/// ES Measurement descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub measurement_name: String,
    pub application_id: u8,
    pub application_name: String,
}

impl CharacteristicDescriptor {
    pub fn measurement_key(&self) -> String {
        format!("{}_{}", self.measurement_name, self.application_name)
    }
}

/// Control request for the auxiliary relay / fan characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    Speed(u8),
    Manual,
}

impl RelayCommand {
    /// Parse an MQTT command payload: `manual` or a speed in `0..=255`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(payload).ok()?.trim();
        if text.eq_ignore_ascii_case("manual") {
            return Some(Self::Manual);
        }
        text.parse::<u8>().ok().map(Self::Speed)
    }
}
