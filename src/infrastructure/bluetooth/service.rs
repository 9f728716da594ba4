//! Sensor Connection Service
//!
//! Owns the lifecycle of the link to the environmental sensor:
//! scan → connect → describe characteristics → subscribe → (disconnect) → repeat.
//! Every notification becomes a [`Reading`] on the output queue.

use crate::domain::models::{CharacteristicDescriptor, ConnectionState, Reading};
use crate::domain::settings::{BleSettings, SubscribeFailurePolicy};
use crate::error::{BleError, SensorError};
use crate::infrastructure::bluetooth::transport::{
    ActiveLink, BleTransport, CharacteristicHandle, DisconnectCallback, GattCharacteristic,
    GattLink, NotificationHandler,
};
use crate::infrastructure::bluetooth::{codec, protocol, relay::RelayController};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Configuration for the connection state machine
#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub address: String,
    pub scan_timeout: Duration,
    /// Pause after a failed scan; zero retries straight away.
    pub scan_retry_delay: Duration,
    pub subscribe_failure_policy: SubscribeFailurePolicy,
    pub invalidate_cache_on_disconnect: bool,
    pub relay_secret: Vec<u8>,
}

impl From<&BleSettings> for SensorConfig {
    fn from(s: &BleSettings) -> Self {
        Self {
            address: s.device_address.clone(),
            scan_timeout: Duration::from_secs(s.scan_timeout_secs),
            scan_retry_delay: Duration::from_millis(s.scan_retry_delay_ms),
            subscribe_failure_policy: s.subscribe_failure_policy,
            invalidate_cache_on_disconnect: s.invalidate_cache_on_disconnect,
            relay_secret: s.relay_secret.as_bytes().to_vec(),
        }
    }
}

/// Level-triggered "not connected" gate.
///
/// Set initially and by the disconnect callback, cleared only around a
/// connect attempt. Safe to set from any thread.
#[derive(Clone)]
pub struct DisconnectSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl DisconnectSignal {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::channel(true).0),
        }
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot fail
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for DisconnectSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Characteristics and their descriptors, kept across sessions so a
/// reconnect does not have to re-read every descriptor.
#[derive(Default)]
struct SessionCache {
    characteristics: Vec<GattCharacteristic>,
    descriptions: Arc<HashMap<CharacteristicHandle, CharacteristicDescriptor>>,
}

impl SessionCache {
    fn clear(&mut self) {
        self.characteristics.clear();
        self.descriptions = Arc::default();
    }
}

/// Connection state machine for one environmental sensor
pub struct SensorConnection<T: BleTransport> {
    transport: T,
    config: SensorConfig,
    readings: mpsc::UnboundedSender<Reading>,
    disconnected: DisconnectSignal,
    state: Arc<watch::Sender<ConnectionState>>,
    link: ActiveLink,
    /// Bumped on every connect attempt; disconnects from older links are ignored
    session: Arc<AtomicU64>,
}

impl<T: BleTransport> SensorConnection<T> {
    pub fn new(
        transport: T,
        config: SensorConfig,
        readings: mpsc::UnboundedSender<Reading>,
    ) -> Self {
        Self {
            transport,
            config,
            readings,
            disconnected: DisconnectSignal::new(),
            state: Arc::new(watch::channel(ConnectionState::Disconnected).0),
            link: ActiveLink::default(),
            session: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        !self.disconnected.is_set()
    }

    /// Relay control sharing this sensor's link.
    pub fn relay_controller(&self) -> RelayController {
        RelayController::new(self.link.clone(), self.config.relay_secret.clone())
    }

    /// Drive the state machine forever.
    ///
    /// Scan, connect and subscribe failures are logged and retried. Only a
    /// transport failure the loop cannot recover from is returned.
    pub async fn run(&self) -> Result<(), SensorError> {
        let mut cache = SessionCache::default();

        loop {
            self.disconnected.wait().await;
            self.link.clear();

            if self.config.invalidate_cache_on_disconnect {
                cache.clear();
            }

            self.set_state(ConnectionState::Scanning);
            let device = match self
                .transport
                .find_device(&self.config.address, self.config.scan_timeout)
                .await
            {
                Ok(Some(device)) => device,
                Ok(None) => {
                    warn!("{}", SensorError::ScanTimeout(self.config.address.clone()));
                    self.set_state(ConnectionState::Disconnected);
                    self.pause_before_retry().await;
                    continue;
                }
                Err(e) => return Err(SensorError::TransportFatal(e)),
            };

            self.set_state(ConnectionState::Connecting);
            // Cleared before connecting so a disconnect reported during or
            // right after the connect is never overwritten.
            self.disconnected.clear();
            let link = match self
                .transport
                .connect(device, self.disconnect_callback())
                .await
            {
                Ok(link) => link,
                Err(e) => {
                    self.disconnected.set();
                    self.set_state(ConnectionState::Disconnected);
                    error!("{}", SensorError::ConnectFailure(e));
                    continue;
                }
            };
            if !self.link.set_if(link.clone(), || self.is_connected()) {
                warn!("Lost {} while connecting", self.config.address);
                self.set_state(ConnectionState::Disconnected);
                continue;
            }
            info!("Connected to {}", self.config.address);

            self.set_state(ConnectionState::Subscribing);
            match self.subscribe(link.as_ref(), &mut cache).await {
                Ok(count) => info!("Subscribed to {} characteristics", count),
                Err(e) => {
                    error!("{}", SensorError::SubscribeFailure(e));
                    if self.config.subscribe_failure_policy == SubscribeFailurePolicy::Reconnect {
                        info!("Dropping connection to {} to retry", self.config.address);
                        if let Err(e) = link.disconnect().await {
                            warn!("Disconnect failed: {}", e);
                        }
                        self.disconnected.set();
                        self.link.clear();
                        self.set_state(ConnectionState::Disconnected);
                        continue;
                    }
                }
            }

            // Under the watch lock, so a concurrent disconnect either lands
            // before this check or overwrites Active afterwards
            self.state.send_if_modified(|state| {
                if self.is_connected() && *state != ConnectionState::Active {
                    debug!("Sensor state: {} -> {}", state, ConnectionState::Active);
                    *state = ConnectionState::Active;
                    true
                } else {
                    false
                }
            });
        }
    }

    async fn subscribe(
        &self,
        link: &dyn GattLink,
        cache: &mut SessionCache,
    ) -> Result<usize, BleError> {
        if cache.characteristics.is_empty() {
            cache.characteristics = link
                .service_characteristics(protocol::ENV_SENSING_SERVICE_UUID)
                .await?;
            debug!(
                "Found {} environmental sensing characteristics",
                cache.characteristics.len()
            );
        }

        if cache.descriptions.is_empty() {
            let mut descriptions = HashMap::with_capacity(cache.characteristics.len());
            for c in &cache.characteristics {
                let payload = link
                    .read_descriptor(c, protocol::ENV_SENSING_MEASUREMENT_DESCRIPTOR_UUID)
                    .await?;
                let measurement = protocol::parse_measurement_descriptor(&payload)?;
                let descriptor = CharacteristicDescriptor {
                    measurement_name: protocol::characteristic_name(&c.uuid),
                    application_id: measurement.application,
                    application_name: protocol::application_name(measurement.application),
                };
                debug!("{:?} is {}", c.handle, descriptor.measurement_key());
                descriptions.insert(c.handle, descriptor);
            }
            cache.descriptions = Arc::new(descriptions);
        }

        let handler = self.notification_handler(cache.descriptions.clone());
        for c in &cache.characteristics {
            link.subscribe(c, handler.clone()).await?;
        }
        Ok(cache.characteristics.len())
    }

    fn notification_handler(
        &self,
        descriptions: Arc<HashMap<CharacteristicHandle, CharacteristicDescriptor>>,
    ) -> NotificationHandler {
        let address = self.config.address.clone();
        let readings = self.readings.clone();
        Arc::new(move |handle, data| {
            let Some(descriptor) = descriptions.get(&handle) else {
                warn!("Notification from undescribed characteristic {:?}", handle);
                return;
            };
            let value = codec::decode(&descriptor.measurement_name, data);
            let reading = Reading::new(&address, descriptor.measurement_key(), value);
            if readings.send(reading).is_err() {
                debug!("Reading queue closed, dropping notification");
            }
        })
    }

    fn disconnect_callback(&self) -> DisconnectCallback {
        let address = self.config.address.clone();
        let disconnected = self.disconnected.clone();
        let state = self.state.clone();
        let link = self.link.clone();
        let session = self.session.clone();
        let generation = session.fetch_add(1, Ordering::SeqCst) + 1;
        Arc::new(move || {
            if session.load(Ordering::SeqCst) != generation {
                debug!("Ignoring disconnect from a previous session");
                return;
            }
            info!("Disconnected from {}", address);
            // Gate first: a connect racing this callback checks it under the link lock
            disconnected.set();
            link.clear();
            state.send_replace(ConnectionState::Disconnected);
        })
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Sensor state: {} -> {}", previous, state);
        }
    }

    async fn pause_before_retry(&self) {
        if self.config.scan_retry_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.config.scan_retry_delay).await;
        }
    }
}
