//! BLE Scanner Module
//!
//! Finds a single peripheral by hardware address.

use crate::error::BleError;
use btleplug::api::{BDAddr, Central, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// BLE scanner bound to one adapter
pub struct BleScanner {
    adapter: Adapter,
}

impl BleScanner {
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Scan until `address` is seen or `timeout` elapses.
    ///
    /// Returns `Ok(None)` on timeout. The scan is stopped either way.
    pub async fn find_by_address(
        &self,
        address: BDAddr,
        timeout: Duration,
    ) -> Result<Option<Peripheral>, BleError> {
        info!("Scanning for {} (timeout: {:?})", address, timeout);
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| BleError::Scan(e.to_string()))?;

        let result = tokio::time::timeout(timeout, self.watch_for(address)).await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        match result {
            Ok(found) => found.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn watch_for(&self, address: BDAddr) -> Result<Peripheral, BleError> {
        // Subscribe before looking at the known list so nothing slips between the two
        let mut events = self.adapter.events().await?;

        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address() == address {
                debug!("{} already known to the adapter", address);
                return Ok(peripheral);
            }
        }

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };
            match self.adapter.peripheral(&id).await {
                Ok(peripheral) if peripheral.address() == address => {
                    info!("Found device {}", address);
                    return Ok(peripheral);
                }
                Ok(_) => {}
                Err(e) => debug!("Discovered peripheral vanished: {}", e),
            }
        }

        Err(BleError::Scan("adapter event stream ended".to_string()))
    }
}

/// Parse `AA:BB:CC:DD:EE:FF` into a btleplug address.
pub fn parse_address(address: &str) -> Result<BDAddr, BleError> {
    address
        .parse::<BDAddr>()
        .map_err(|_| BleError::InvalidAddress(address.to_string()))
}
