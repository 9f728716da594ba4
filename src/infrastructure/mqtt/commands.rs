//! Relay commands received over MQTT.

use crate::domain::models::RelayCommand;
use crate::infrastructure::bluetooth::RelayController;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Routes `<prefix>/<address>/relay/set` messages to the relay controller
pub struct CommandRouter {
    topic: String,
    relay: RelayController,
}

impl CommandRouter {
    pub fn new(topic_prefix: &str, device_address: &str, relay: RelayController) -> Self {
        Self {
            topic: format!(
                "{}/{}/relay/set",
                topic_prefix.trim_end_matches('/'),
                device_address
            ),
            relay,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn parse(&self, topic: &str, payload: &[u8]) -> Option<RelayCommand> {
        if topic != self.topic {
            return None;
        }
        let command = RelayCommand::parse(payload);
        if command.is_none() {
            warn!(
                "Ignoring relay command '{}'",
                String::from_utf8_lossy(payload)
            );
        }
        command
    }

    /// Execute a command on its own task so the BLE write never stalls
    /// MQTT polling.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> Option<JoinHandle<()>> {
        let command = self.parse(topic, payload)?;
        let relay = self.relay.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = relay.apply(command).await {
                error!("Relay command {:?} failed: {}", command, e);
            }
        }))
    }
}
