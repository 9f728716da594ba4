//! BLE Connection Module
//!
//! btleplug implementation of the transport traits: connecting, GATT
//! access, notification dispatch and disconnect detection.

use crate::error::BleError;
use crate::infrastructure::bluetooth::scanner::{parse_address, BleScanner};
use crate::infrastructure::bluetooth::transport::{
    BleTransport, CharacteristicHandle, DisconnectCallback, GattCharacteristic, GattLink,
    NotificationHandler,
};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ValueNotification,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// BlueZ can block on Connect forever when the device is out of range
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

type HandlerMap = Arc<Mutex<HashMap<Uuid, (CharacteristicHandle, NotificationHandler)>>>;

/// Transport backed by the host's first Bluetooth adapter
pub struct BtleplugTransport {
    adapter: Adapter,
    scanner: BleScanner,
}

impl BtleplugTransport {
    pub async fn new() -> Result<Self, BleError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BleError::AdapterUnavailable)?;

        match adapter.adapter_info().await {
            Ok(name) => info!("Using Bluetooth adapter: {}", name),
            Err(e) => warn!("Could not query adapter info: {}", e),
        }

        Ok(Self {
            scanner: BleScanner::new(adapter.clone()),
            adapter,
        })
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    type Device = Peripheral;

    async fn find_device(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Option<Peripheral>, BleError> {
        let address = parse_address(address)?;
        self.scanner.find_by_address(address, timeout).await
    }

    async fn connect(
        &self,
        device: Peripheral,
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn GattLink>, BleError> {
        let link = BtleplugLink::open(&self.adapter, device, on_disconnect).await?;
        Ok(Arc::new(link))
    }
}

/// An open connection to one peripheral
pub struct BtleplugLink {
    peripheral: Peripheral,
    handlers: HandlerMap,
    tasks: Vec<JoinHandle<()>>,
}

impl BtleplugLink {
    async fn open(
        adapter: &Adapter,
        peripheral: Peripheral,
        on_disconnect: DisconnectCallback,
    ) -> Result<Self, BleError> {
        // Listen before connecting so an immediate drop is not missed
        let events = adapter.events().await?;

        tokio::time::timeout(CONNECT_TIMEOUT, peripheral.connect())
            .await
            .map_err(|_| BleError::Connect(format!("timed out after {:?}", CONNECT_TIMEOUT)))??;

        let discovered = tokio::time::timeout(DISCOVERY_TIMEOUT, peripheral.discover_services())
            .await
            .map_err(|_| {
                BleError::Connect(format!("service discovery timed out after {:?}", DISCOVERY_TIMEOUT))
            })
            .and_then(|r| r.map_err(BleError::from));
        if let Err(e) = discovered {
            if let Err(disconnect_err) = peripheral.disconnect().await {
                debug!("Disconnect after failed discovery: {}", disconnect_err);
            }
            return Err(e);
        }

        let handlers: HandlerMap = Arc::new(Mutex::new(HashMap::new()));
        let notifications = peripheral.notifications().await?;

        let tasks = vec![
            tokio::spawn(watch_disconnect(events, peripheral.id(), on_disconnect)),
            tokio::spawn(pump_notifications(notifications, handlers.clone())),
        ];

        Ok(Self {
            peripheral,
            handlers,
            tasks,
        })
    }

    fn find_characteristic(
        &self,
        uuid: Uuid,
        service_uuid: Uuid,
    ) -> Result<Characteristic, BleError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == service_uuid)
            .ok_or(BleError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl GattLink for BtleplugLink {
    async fn service_characteristics(
        &self,
        service_uuid: Uuid,
    ) -> Result<Vec<GattCharacteristic>, BleError> {
        let service = self
            .peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service_uuid)
            .ok_or(BleError::ServiceNotFound(service_uuid))?;

        // Ordinal in the sorted set; stable for an unchanged GATT table
        Ok(service
            .characteristics
            .iter()
            .enumerate()
            .map(|(index, c)| GattCharacteristic {
                handle: CharacteristicHandle(index as u16),
                uuid: c.uuid,
                service_uuid: c.service_uuid,
                descriptors: c.descriptors.iter().map(|d| d.uuid).collect(),
            })
            .collect())
    }

    async fn read_descriptor(
        &self,
        characteristic: &GattCharacteristic,
        descriptor_uuid: Uuid,
    ) -> Result<Vec<u8>, BleError> {
        let c = self.find_characteristic(characteristic.uuid, characteristic.service_uuid)?;
        let descriptor = c
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor_uuid)
            .cloned()
            .ok_or(BleError::DescriptorNotFound {
                characteristic: characteristic.uuid,
                descriptor: descriptor_uuid,
            })?;
        Ok(self.peripheral.read_descriptor(&descriptor).await?)
    }

    async fn subscribe(
        &self,
        characteristic: &GattCharacteristic,
        handler: NotificationHandler,
    ) -> Result<(), BleError> {
        let c = self.find_characteristic(characteristic.uuid, characteristic.service_uuid)?;
        // Notifications only carry the UUID, so same-UUID characteristics share one slot
        if let Some((existing, _)) = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(characteristic.uuid, (characteristic.handle, handler))
        {
            if existing != characteristic.handle {
                warn!(
                    "Characteristic {} is exposed more than once; notifications for {:?} are routed to {:?}",
                    characteristic.uuid, existing, characteristic.handle
                );
            }
        }
        self.peripheral.subscribe(&c).await?;
        debug!("Subscribed to {}", characteristic.uuid);
        Ok(())
    }

    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), BleError> {
        if !self.peripheral.is_connected().await? {
            return Err(BleError::NotConnected);
        }
        let c = self.find_characteristic(characteristic, service)?;
        self.peripheral
            .write(&c, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn watch_disconnect(
    mut events: BoxStream<'static, CentralEvent>,
    id: PeripheralId,
    on_disconnect: DisconnectCallback,
) {
    while let Some(event) = events.next().await {
        if let CentralEvent::DeviceDisconnected(disconnected) = event {
            if disconnected == id {
                on_disconnect();
                return;
            }
        }
    }
    warn!("Adapter event stream ended, treating link as lost");
    on_disconnect();
}

async fn pump_notifications(
    mut notifications: BoxStream<'static, ValueNotification>,
    handlers: HandlerMap,
) {
    while let Some(notification) = notifications.next().await {
        let entry = handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&notification.uuid)
            .cloned();
        match entry {
            Some((handle, handler)) => handler(handle, &notification.value),
            None => debug!("Unsolicited notification from {}", notification.uuid),
        }
    }
    debug!("Notification stream closed");
}
