//! BLE Transport Abstraction
//!
//! The connection state machine only needs a handful of capabilities from
//! the Bluetooth stack. They are expressed here as traits so the stack can be
//! swapped (btleplug on the host, a scripted mock in tests).

use crate::error::BleError;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Opaque, per-device identifier of a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacteristicHandle(pub u16);

/// A characteristic as enumerated from a GATT service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub handle: CharacteristicHandle,
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

/// Called for every value notification. Runs on the transport's delivery
/// path and must not block.
pub type NotificationHandler = Arc<dyn Fn(CharacteristicHandle, &[u8]) + Send + Sync>;

/// Called once when the link drops, from whatever context the transport
/// observes the disconnect on.
pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;

#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Whatever the scan hands to `connect`.
    type Device: Send;

    /// Look for `address` for at most `timeout`. `Ok(None)` means not found.
    async fn find_device(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Option<Self::Device>, BleError>;

    async fn connect(
        &self,
        device: Self::Device,
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn GattLink>, BleError>;
}

/// An open GATT connection.
#[async_trait]
pub trait GattLink: Send + Sync {
    async fn service_characteristics(
        &self,
        service: Uuid,
    ) -> Result<Vec<GattCharacteristic>, BleError>;

    async fn read_descriptor(
        &self,
        characteristic: &GattCharacteristic,
        descriptor: Uuid,
    ) -> Result<Vec<u8>, BleError>;

    async fn subscribe(
        &self,
        characteristic: &GattCharacteristic,
        handler: NotificationHandler,
    ) -> Result<(), BleError>;

    /// Write without waiting for an acknowledgement.
    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), BleError>;

    async fn disconnect(&self) -> Result<(), BleError>;
}

/// The currently open link, if any. Shared between the state machine, the
/// disconnect callback and the relay controller.
#[derive(Clone, Default)]
pub struct ActiveLink {
    inner: Arc<Mutex<Option<Arc<dyn GattLink>>>>,
}

impl ActiveLink {
    pub fn get(&self) -> Option<Arc<dyn GattLink>> {
        self.lock().clone()
    }

    pub fn set(&self, link: Arc<dyn GattLink>) {
        *self.lock() = Some(link);
    }

    /// Store `link` only if `still_open` holds, checked under the slot lock.
    ///
    /// A disconnect that marks the session closed before clearing the slot
    /// can then never be followed by a stale link being put back.
    pub fn set_if(&self, link: Arc<dyn GattLink>, still_open: impl FnOnce() -> bool) -> bool {
        let mut slot = self.lock();
        if !still_open() {
            return false;
        }
        *slot = Some(link);
        true
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn GattLink>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
