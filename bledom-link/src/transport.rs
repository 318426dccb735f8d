//! The BLE operations the device link needs from a stack

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Handed to [`Transport::connect`]; the transport calls [`notify`](Self::notify)
/// when the stack reports that this connection went away.
#[derive(Debug, Clone)]
pub struct DisconnectNotifier {
    generation: u64,
    tx: mpsc::UnboundedSender<u64>,
}

impl DisconnectNotifier {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<u64>) -> Self {
        Self { generation, tx }
    }

    /// Which connection this notifier belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn notify(&self) {
        // the link may already be gone during shutdown
        let _ = self.tx.send(self.generation);
    }
}

/// A BLE stack able to reach one write-only characteristic
///
/// Implementations do one thing per call and never retry; retry policy
/// belongs to the [`DeviceLink`](crate::DeviceLink).
#[async_trait]
pub trait Transport: Send + 'static {
    type Handle: Send + Sync + 'static;
    type Characteristic: Clone + Send + Sync + 'static;

    async fn connect(
        &mut self,
        address: &str,
        on_disconnect: DisconnectNotifier,
    ) -> Result<Self::Handle, TransportError>;

    async fn discover_write_characteristic(
        &mut self,
        handle: &Self::Handle,
    ) -> Result<Self::Characteristic, TransportError>;

    async fn write_characteristic(
        &mut self,
        handle: &Self::Handle,
        characteristic: &Self::Characteristic,
        frame: &[u8],
    ) -> Result<(), TransportError>;

    async fn disconnect(&mut self, handle: Self::Handle);

    /// Forget every cached object for `address` and make the OS stack drop
    /// any connection it still believes is alive.
    async fn purge(&mut self, _address: &str) {}
}
