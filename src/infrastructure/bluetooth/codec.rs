//! Measurement Codec
//!
//! Turns raw ESS notification payloads into physical values using
//! `value = M * raw * 10^d * 2^b`.

use tracing::debug;

/// Fixed-width little-endian integer encoding of a raw sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFormat {
    I16,
    U16,
    U32,
}

impl RawFormat {
    pub fn width(&self) -> usize {
        match self {
            Self::I16 | Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Unpack `bytes`, which must be exactly `width()` long.
    pub fn unpack(&self, bytes: &[u8]) -> Option<i64> {
        match self {
            Self::I16 => Some(i16::from_le_bytes(bytes.try_into().ok()?) as i64),
            Self::U16 => Some(u16::from_le_bytes(bytes.try_into().ok()?) as i64),
            Self::U32 => Some(u32::from_le_bytes(bytes.try_into().ok()?) as i64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementSpec {
    pub format: RawFormat,
    pub multiplier: f64,
    pub decimal_exponent: i32,
    pub binary_exponent: i32,
}

impl MeasurementSpec {
    pub fn scale(&self, raw: i64) -> f64 {
        let value = self.multiplier * raw as f64;
        // Divide rather than multiply by 10^-d so e.g. 2150 * 10^-2 lands on 21.5 exactly
        let value = if self.decimal_exponent >= 0 {
            value * 10f64.powi(self.decimal_exponent)
        } else {
            value / 10f64.powi(-self.decimal_exponent)
        };
        value * 2f64.powi(self.binary_exponent)
    }
}

const MEASUREMENT_SPECS: &[(&str, MeasurementSpec)] = &[
    (
        "Temperature",
        MeasurementSpec {
            format: RawFormat::I16,
            multiplier: 1.0,
            decimal_exponent: -2,
            binary_exponent: 0,
        },
    ),
    (
        "Pressure",
        MeasurementSpec {
            format: RawFormat::U32,
            multiplier: 1.0,
            decimal_exponent: -1,
            binary_exponent: 0,
        },
    ),
    (
        "Humidity",
        MeasurementSpec {
            format: RawFormat::U16,
            multiplier: 1.0,
            decimal_exponent: -2,
            binary_exponent: 0,
        },
    ),
];

pub fn spec_for(measurement_name: &str) -> Option<&'static MeasurementSpec> {
    MEASUREMENT_SPECS
        .iter()
        .find(|(name, _)| *name == measurement_name)
        .map(|(_, spec)| spec)
}

/// Decode a notification payload.
///
/// Returns `None` (a decode miss) for unknown measurements and for payloads
/// whose length does not match the measurement's format.
pub fn decode(measurement_name: &str, raw_bytes: &[u8]) -> Option<f64> {
    let Some(spec) = spec_for(measurement_name) else {
        debug!("No decoding rule for measurement '{}'", measurement_name);
        return None;
    };

    if raw_bytes.len() != spec.format.width() {
        debug!(
            "{} payload is {} bytes, expected {}",
            measurement_name,
            raw_bytes.len(),
            spec.format.width()
        );
        return None;
    }

    spec.format.unpack(raw_bytes).map(|raw| spec.scale(raw))
}
