//! Relay / fan control over the sensor's auxiliary characteristic.
//!
//! Writes go out on whatever link the sensor currently holds. Without a
//! link they are skipped, not failed.

use crate::domain::models::RelayCommand;
use crate::error::BleError;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::ActiveLink;
use tracing::{debug, info};

#[derive(Clone)]
pub struct RelayController {
    link: ActiveLink,
    secret: Vec<u8>,
}

impl RelayController {
    pub fn new(link: ActiveLink, secret: Vec<u8>) -> Self {
        Self { link, secret }
    }

    /// Set the fan speed. The payload is the shared secret followed by the
    /// speed byte.
    pub async fn set_speed(&self, speed: u8) -> Result<(), BleError> {
        let Some(link) = self.link.get() else {
            debug!("Not connected, skipping fan speed {}", speed);
            return Ok(());
        };
        let payload = protocol::relay_speed_payload(&self.secret, speed);
        link.write_characteristic(
            protocol::RELAY_SERVICE_UUID,
            protocol::RELAY_CHAR_UUID,
            &payload,
        )
        .await?;
        info!("Fan speed set to {}", speed);
        Ok(())
    }

    /// Return the fan to the device's own (manual) control.
    pub async fn set_manual(&self) -> Result<(), BleError> {
        let Some(link) = self.link.get() else {
            debug!("Not connected, skipping manual mode");
            return Ok(());
        };
        link.write_characteristic(
            protocol::RELAY_SERVICE_UUID,
            protocol::RELAY_CHAR_UUID,
            &protocol::RELAY_MANUAL_MODE,
        )
        .await?;
        info!("Fan switched to manual mode");
        Ok(())
    }

    pub async fn apply(&self, command: RelayCommand) -> Result<(), BleError> {
        match command {
            RelayCommand::Speed(speed) => self.set_speed(speed).await,
            RelayCommand::Manual => self.set_manual().await,
        }
    }
}
