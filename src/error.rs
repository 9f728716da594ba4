//! Error types for the sensor bridge.
//!
//! `BleError` covers anything a transport operation can report.
//! `SensorError` classifies those failures by how the connection state
//! machine reacts to them: only `TransportFatal` ever leaves `run()`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BleError {
    /// No usable Bluetooth adapter on this host.
    #[error("No Bluetooth adapter found")]
    AdapterUnavailable,

    #[error("Invalid Bluetooth address '{0}'")]
    InvalidAddress(String),

    #[error("Scan failed: {0}")]
    Scan(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Service {0} not found")]
    ServiceNotFound(Uuid),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("Descriptor {descriptor} not found on characteristic {characteristic}")]
    DescriptorNotFound { characteristic: Uuid, descriptor: Uuid },

    /// ES Measurement descriptor payload had the wrong size.
    #[error("Malformed measurement descriptor: expected {expected} bytes, got {actual}")]
    DescriptorFormat { expected: usize, actual: usize },

    #[error("Not connected")]
    NotConnected,

    #[error("Bluetooth error: {0}")]
    Btleplug(#[from] btleplug::Error),
}

#[derive(Debug, Error)]
pub enum SensorError {
    /// The device did not show up within the scan window. Retried.
    #[error("Device {0} could not be found")]
    ScanTimeout(String),

    /// The transport refused or dropped the connect request. Retried.
    #[error("Failed to connect: {0}")]
    ConnectFailure(#[source] BleError),

    /// Enumeration, descriptor read or notify registration failed.
    #[error("Failed to subscribe: {0}")]
    SubscribeFailure(#[source] BleError),

    /// Anything the state machine cannot recover from.
    #[error("Fatal transport error: {0}")]
    TransportFatal(#[source] BleError),
}
