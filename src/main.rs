mod domain;
mod error;
mod infrastructure;

use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::{BtleplugTransport, SensorConfig, SensorConnection};
use crate::infrastructure::logging::init_logger;
use crate::infrastructure::mqtt::{
    create_client, drive_event_loop, qos_from_level, CommandRouter, Forwarder, MqttPublisher,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::load(std::env::args().nth(1).map(PathBuf::from))?;
    let settings = settings_service.get().clone();

    let _log_guard = init_logger(&settings.log_settings)?;
    info!(
        "Starting environmental sensor bridge (settings: {})",
        settings_service.path().display()
    );
    settings.validate()?;

    let transport = match BtleplugTransport::new().await {
        Ok(transport) => transport,
        Err(e) => {
            error!("Bluetooth unavailable: {}", e);
            return Err(e.into());
        }
    };

    let (readings_tx, readings_rx) = mpsc::unbounded_channel();
    let sensor = SensorConnection::new(transport, SensorConfig::from(&settings.ble), readings_tx);

    let (client, eventloop) = create_client(&settings.mqtt);
    let router = settings.mqtt.relay_commands_enabled.then(|| {
        CommandRouter::new(
            &settings.mqtt.topic_prefix,
            &settings.ble.device_address,
            sensor.relay_controller(),
        )
    });
    let forwarder = Forwarder::new(
        MqttPublisher::new(client.clone(), qos_from_level(settings.mqtt.qos)),
        settings.mqtt.topic_prefix.clone(),
    );

    let result = tokio::select! {
        result = sensor.run() => match result {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Fatal error: {}", e);
                Err(e.into())
            }
        },
        _ = forwarder.run(readings_rx) => Ok(()),
        _ = drive_event_loop(
            eventloop,
            client.clone(),
            router,
            Duration::from_millis(settings.mqtt.reconnect_delay_ms),
        ) => Ok(()),
        _ = tokio::signal::ctrl_c() => {
            info!("Caught signal, exiting");
            Ok(())
        }
    };

    if let Err(e) = client.try_disconnect() {
        warn!("MQTT disconnect failed: {}", e);
    }
    result
}
