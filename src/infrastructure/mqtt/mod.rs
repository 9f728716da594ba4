//! MQTT Module
//!
//! Republishes readings to the broker and accepts relay commands from it.
//!
//! - [`forwarder`] - Queue drain and JSON payloads
//! - [`client`] - rumqttc client, publisher and event loop
//! - [`commands`] - Relay command routing

pub mod client;
pub mod commands;
pub mod forwarder;

pub use client::{create_client, drive_event_loop, qos_from_level, MqttPublisher};
pub use commands::CommandRouter;
pub use forwarder::Forwarder;
