//! Scripted in-memory transport for exercising the connection state machine.

use crate::error::BleError;
use crate::infrastructure::bluetooth::protocol::{
    bluetooth_uuid, ENV_SENSING_MEASUREMENT_DESCRIPTOR_UUID, ENV_SENSING_SERVICE_UUID,
};
use crate::infrastructure::bluetooth::transport::{
    BleTransport, CharacteristicHandle, DisconnectCallback, GattCharacteristic, GattLink,
    NotificationHandler,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// GATT table of a fake sensor
#[derive(Clone)]
pub struct MockPeripheral {
    characteristics: Vec<(GattCharacteristic, Vec<u8>)>,
    has_env_sensing_service: bool,
}

impl MockPeripheral {
    /// Temperature/Outdoor, Pressure/Barometric, Humidity/Indoor, UV Index/Solar
    /// on handles 0 to 3.
    pub fn weather_station() -> Self {
        let entries = [(0x2A6E, 0x13), (0x2A6D, 0x03), (0x2A6F, 0x14), (0x2A76, 0x21)];
        let characteristics = entries
            .iter()
            .enumerate()
            .map(|(index, (short, application))| {
                (
                    GattCharacteristic {
                        handle: CharacteristicHandle(index as u16),
                        uuid: bluetooth_uuid(*short),
                        service_uuid: ENV_SENSING_SERVICE_UUID,
                        descriptors: vec![ENV_SENSING_MEASUREMENT_DESCRIPTOR_UUID],
                    },
                    descriptor_payload(*application),
                )
            })
            .collect();
        Self {
            characteristics,
            has_env_sensing_service: true,
        }
    }

    pub fn set_application(&mut self, handle: CharacteristicHandle, application: u8) {
        self.set_descriptor_payload(handle, descriptor_payload(application));
    }

    pub fn set_descriptor_payload(&mut self, handle: CharacteristicHandle, payload: Vec<u8>) {
        if let Some((_, existing)) = self
            .characteristics
            .iter_mut()
            .find(|(c, _)| c.handle == handle)
        {
            *existing = payload;
        }
    }

    pub fn remove_env_sensing_service(&mut self) {
        self.has_env_sensing_service = false;
    }
}

fn descriptor_payload(application: u8) -> Vec<u8> {
    vec![0x00, 0x00, 0x00, 0x3C, 0x00, 0x00, 0x0A, 0x00, 0x00, application, 0x00]
}

struct ProbeState {
    scans: usize,
    connects: usize,
    enumerations: usize,
    descriptor_reads: usize,
    subscriptions: usize,
    disconnects: usize,
    writes: Vec<(Uuid, Vec<u8>)>,
    handlers: HashMap<CharacteristicHandle, NotificationHandler>,
    on_disconnect: Option<DisconnectCallback>,
    issued_callbacks: Vec<DisconnectCallback>,
    discoverable: bool,
    failing_connects: usize,
    vanish_on_connect: bool,
    failing_scans: bool,
}

impl Default for ProbeState {
    fn default() -> Self {
        Self {
            scans: 0,
            connects: 0,
            enumerations: 0,
            descriptor_reads: 0,
            subscriptions: 0,
            disconnects: 0,
            writes: Vec::new(),
            handlers: HashMap::new(),
            on_disconnect: None,
            issued_callbacks: Vec::new(),
            discoverable: true,
            failing_connects: 0,
            vanish_on_connect: false,
            failing_scans: false,
        }
    }
}

/// Test-side view of the mock: counters, fault injection and the radio
/// events a real stack would deliver.
#[derive(Clone, Default)]
pub struct Probe {
    state: Arc<Mutex<ProbeState>>,
}

impl Probe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap()
    }

    pub fn scans(&self) -> usize {
        self.lock().scans
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn enumerations(&self) -> usize {
        self.lock().enumerations
    }

    pub fn descriptor_reads(&self) -> usize {
        self.lock().descriptor_reads
    }

    pub fn subscriptions(&self) -> usize {
        self.lock().subscriptions
    }

    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.lock().writes.clone()
    }

    pub fn set_discoverable(&self, discoverable: bool) {
        self.lock().discoverable = discoverable;
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.lock().failing_connects = count;
    }

    /// On the next successful connect the device drops the link before
    /// `connect` returns, then goes out of range.
    pub fn vanish_during_next_connect(&self) {
        self.lock().vanish_on_connect = true;
    }

    /// The disconnect callback handed to the `index`-th successful connect.
    pub fn issued_callback(&self, index: usize) -> DisconnectCallback {
        self.lock().issued_callbacks[index].clone()
    }

    pub fn fail_scans(&self) {
        self.lock().failing_scans = true;
    }

    /// Deliver a notification as the transport would.
    pub fn notify(&self, handle: CharacteristicHandle, data: &[u8]) {
        let handler = self
            .lock()
            .handlers
            .get(&handle)
            .cloned()
            .expect("characteristic not subscribed");
        handler(handle, data);
    }

    /// Simulate the peripheral dropping the link.
    pub fn drop_link(&self) {
        let callback = {
            let mut state = self.lock();
            state.handlers.clear();
            state.on_disconnect.take()
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}

pub struct MockTransport {
    peripheral: MockPeripheral,
    probe: Probe,
}

impl MockTransport {
    pub fn new(peripheral: MockPeripheral) -> Self {
        Self {
            peripheral,
            probe: Probe::default(),
        }
    }

    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    type Device = ();

    async fn find_device(
        &self,
        _address: &str,
        _timeout: Duration,
    ) -> Result<Option<()>, BleError> {
        // A real scan always suspends
        tokio::task::yield_now().await;
        let mut state = self.probe.lock();
        state.scans += 1;
        if state.failing_scans {
            return Err(BleError::Scan("adapter powered off".to_string()));
        }
        Ok(state.discoverable.then_some(()))
    }

    async fn connect(
        &self,
        _device: (),
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn GattLink>, BleError> {
        let vanished = {
            let mut state = self.probe.lock();
            state.connects += 1;
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(BleError::Connect("connection refused".to_string()));
            }
            state.handlers.clear();
            state.issued_callbacks.push(on_disconnect.clone());
            if state.vanish_on_connect {
                state.vanish_on_connect = false;
                state.discoverable = false;
                state.on_disconnect = None;
                true
            } else {
                state.on_disconnect = Some(on_disconnect.clone());
                false
            }
        };
        if vanished {
            on_disconnect();
        }
        Ok(Arc::new(MockLink::new(
            self.peripheral.clone(),
            self.probe.clone(),
        )))
    }
}

pub struct MockLink {
    peripheral: MockPeripheral,
    probe: Probe,
}

impl MockLink {
    pub fn new(peripheral: MockPeripheral, probe: Probe) -> Self {
        Self { peripheral, probe }
    }
}

#[async_trait]
impl GattLink for MockLink {
    async fn service_characteristics(
        &self,
        service: Uuid,
    ) -> Result<Vec<GattCharacteristic>, BleError> {
        self.probe.lock().enumerations += 1;
        if service != ENV_SENSING_SERVICE_UUID || !self.peripheral.has_env_sensing_service {
            return Err(BleError::ServiceNotFound(service));
        }
        Ok(self
            .peripheral
            .characteristics
            .iter()
            .map(|(c, _)| c.clone())
            .collect())
    }

    async fn read_descriptor(
        &self,
        characteristic: &GattCharacteristic,
        descriptor: Uuid,
    ) -> Result<Vec<u8>, BleError> {
        self.probe.lock().descriptor_reads += 1;
        self.peripheral
            .characteristics
            .iter()
            .find(|(c, _)| c.handle == characteristic.handle && c.descriptors.contains(&descriptor))
            .map(|(_, payload)| payload.clone())
            .ok_or(BleError::DescriptorNotFound {
                characteristic: characteristic.uuid,
                descriptor,
            })
    }

    async fn subscribe(
        &self,
        characteristic: &GattCharacteristic,
        handler: NotificationHandler,
    ) -> Result<(), BleError> {
        let mut state = self.probe.lock();
        state.subscriptions += 1;
        state.handlers.insert(characteristic.handle, handler);
        Ok(())
    }

    async fn write_characteristic(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), BleError> {
        self.probe.lock().writes.push((characteristic, data.to_vec()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BleError> {
        self.probe.lock().disconnects += 1;
        Ok(())
    }
}
