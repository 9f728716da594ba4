//! Bluetooth Module
//!
//! Connects to the environmental sensor and turns its notifications into
//! readings.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    SensorConnection                      │
//! │  (State machine - scan, connect, subscribe, reconnect)   │
//! └──────────┬──────────────────┬──────────────────┬────────┘
//!            │                  │                  │
//!            ▼                  ▼                  ▼
//! ┌────────────────┐  ┌──────────────────┐  ┌──────────────┐
//! │  BleTransport  │  │ Protocol / Codec │  │    Relay     │
//! │                │  │                  │  │  Controller  │
//! │ - Scanner      │  │ - UUIDs, tables  │  │              │
//! │ - Connection   │  │ - Descriptors    │  │ - Fan speed  │
//! │   (btleplug)   │  │ - Value decoding │  │ - Manual     │
//! └────────────────┘  └──────────────────┘  └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`transport`] - Capability traits the state machine depends on
//! - [`scanner`] - Finding the sensor by address
//! - [`connection`] - btleplug implementation of the transport
//! - [`protocol`] - ESS identifiers, lookup tables and descriptor parsing
//! - [`codec`] - Raw payload to physical value decoding
//! - [`relay`] - Fan / relay control writes
//! - [`service`] - Connection state machine

pub mod codec;
pub mod connection;
pub mod protocol;
pub mod relay;
pub mod scanner;
pub mod service;
pub mod transport;

#[cfg(test)]
pub mod mock;

pub use connection::BtleplugTransport;
pub use relay::RelayController;
pub use service::{SensorConfig, SensorConnection};
