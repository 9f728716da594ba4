//! Broker session: client construction, publishing and the event loop.

use crate::domain::settings::MqttSettings;
use crate::infrastructure::mqtt::commands::CommandRouter;
use crate::infrastructure::mqtt::forwarder::ReadingPublisher;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requests buffered between the client handles and the event loop
const REQUEST_CAPACITY: usize = 64;

pub fn qos_from_level(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// Build the client and its event loop. Nothing touches the network until
/// the event loop is polled.
pub fn create_client(settings: &MqttSettings) -> (AsyncClient, EventLoop) {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    // rumqttc rejects keep-alives under five seconds
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
    info!(
        "MQTT broker {}:{} as '{}'",
        settings.host, settings.port, settings.client_id
    );
    AsyncClient::new(options, REQUEST_CAPACITY)
}

/// Publishes readings through a rumqttc client, never retained.
///
/// Never waits for room in the request queue: while the broker is
/// unreachable the queue fills up and further readings are refused.
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient, qos: QoS) -> Self {
        Self { client, qos }
    }
}

#[async_trait]
impl ReadingPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        match self.client.try_publish(topic, self.qos, false, payload) {
            Ok(()) => Ok(()),
            Err(ClientError::TryRequest(_)) => {
                anyhow::bail!("request queue full, broker unreachable")
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Poll the MQTT event loop forever.
///
/// Connection errors are logged and polling resumes after
/// `reconnect_delay`; rumqttc reconnects on the next poll. Relay command
/// subscriptions are renewed on every ConnAck.
pub async fn drive_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    router: Option<CommandRouter>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to broker");
                if let Some(router) = &router {
                    // try_ variant: awaiting here would block on our own request queue
                    match client.try_subscribe(router.topic(), QoS::AtLeastOnce) {
                        Ok(()) => info!("Listening for relay commands on {}", router.topic()),
                        Err(e) => warn!("Failed to subscribe to {}: {}", router.topic(), e),
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => match &router {
                Some(router) => {
                    router.dispatch(&publish.topic, &publish.payload);
                }
                None => debug!("Ignoring message on {}", publish.topic),
            },
            Ok(_) => {}
            Err(e) => {
                warn!("MQTT connection error: {}", e);
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}
