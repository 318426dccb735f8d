//! btleplug transport for the host's Bluetooth adapter

use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

use bledom_proto::ble::{WRITE_CHAR_UUID, WRITE_CHAR_UUID_U128};

use crate::error::TransportError;
use crate::transport::{DisconnectNotifier, Transport};

const SCAN_POLL: Duration = Duration::from_millis(500);

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, btleplug::Error> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| btleplug::Error::Other("No Bluetooth adapter found".into()))
}

pub struct BtleTransport {
    adapter: Adapter,
    scan_window: Duration,
    peripheral: Option<Peripheral>,
    watcher: Option<JoinHandle<()>>,
}

impl BtleTransport {
    pub async fn new() -> Result<Self, btleplug::Error> {
        Ok(Self::with_adapter(get_adapter().await?))
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            scan_window: Duration::from_secs(10),
            peripheral: None,
            watcher: None,
        }
    }

    /// How long to scan for the device when the stack does not know it yet
    pub fn scan_window(mut self, window: Duration) -> Self {
        self.scan_window = window;
        self
    }

    async fn known_peripheral(&self, address: &str) -> Result<Option<Peripheral>, btleplug::Error> {
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals
            .into_iter()
            .find(|p| p.address().to_string().eq_ignore_ascii_case(address)))
    }

    async fn find_peripheral(&mut self, address: &str) -> Result<Peripheral, TransportError> {
        if let Some(peripheral) = &self.peripheral {
            return Ok(peripheral.clone());
        }
        if let Some(peripheral) = self.known_peripheral(address).await.map_err(connect_failed)? {
            self.peripheral = Some(peripheral.clone());
            return Ok(peripheral);
        }

        debug!("scanning for {address}");
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(connect_failed)?;
        let deadline = tokio::time::Instant::now() + self.scan_window;
        let found = loop {
            match self.known_peripheral(address).await {
                Ok(Some(peripheral)) => break Some(peripheral),
                Ok(None) => {}
                Err(e) => warn!("listing peripherals failed: {e}"),
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(SCAN_POLL).await;
        };
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("stop_scan failed: {e}");
        }

        let peripheral = found.ok_or_else(|| {
            TransportError::ConnectFailed(format!("{address} not seen during scan"))
        })?;
        self.peripheral = Some(peripheral.clone());
        Ok(peripheral)
    }

    async fn watch_disconnects(
        &mut self,
        id: PeripheralId,
        notifier: DisconnectNotifier,
    ) -> Result<(), TransportError> {
        self.stop_watching();
        let mut events = self.adapter.events().await.map_err(connect_failed)?;
        self.watcher = Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        notifier.notify();
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop_watching(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

impl Drop for BtleTransport {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

fn connect_failed(e: btleplug::Error) -> TransportError {
    TransportError::ConnectFailed(e.to_string())
}

#[async_trait::async_trait]
impl Transport for BtleTransport {
    type Handle = Peripheral;
    type Characteristic = Characteristic;

    async fn connect(
        &mut self,
        address: &str,
        on_disconnect: DisconnectNotifier,
    ) -> Result<Peripheral, TransportError> {
        let peripheral = self.find_peripheral(address).await?;
        // subscribe before connecting so an immediate drop is not missed
        self.watch_disconnects(peripheral.id(), on_disconnect).await?;

        if peripheral.is_connected().await.unwrap_or(false) {
            debug!("{address} already connected at the stack level");
        } else if let Err(e) = peripheral.connect().await {
            self.stop_watching();
            return Err(connect_failed(e));
        }
        info!("connected to {address}");
        Ok(peripheral)
    }

    async fn discover_write_characteristic(
        &mut self,
        peripheral: &Peripheral,
    ) -> Result<Characteristic, TransportError> {
        peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::CharacteristicNotFound(e.to_string()))?;

        let uuid = Uuid::from_u128(WRITE_CHAR_UUID_U128);
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| TransportError::CharacteristicNotFound(WRITE_CHAR_UUID.to_string()))
    }

    async fn write_characteristic(
        &mut self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
        frame: &[u8],
    ) -> Result<(), TransportError> {
        peripheral
            .write(characteristic, frame, WriteType::WithoutResponse)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn disconnect(&mut self, peripheral: Peripheral) {
        self.stop_watching();
        if let Err(e) = peripheral.disconnect().await {
            debug!("disconnect failed: {e}");
        }
    }

    async fn purge(&mut self, address: &str) {
        self.stop_watching();
        let cached = self.peripheral.take();
        let known = self.known_peripheral(address).await.ok().flatten();
        for peripheral in cached.into_iter().chain(known) {
            if peripheral.is_connected().await.unwrap_or(false) {
                info!("forcing stack-level disconnect of {address}");
                if let Err(e) = peripheral.disconnect().await {
                    warn!("forced disconnect of {address} failed: {e}");
                }
            }
        }
    }
}
