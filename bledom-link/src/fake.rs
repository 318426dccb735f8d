//! Scripted in-memory transport
//!
//! Records every operation and fails on demand. Clones share one script,
//! so a test keeps a clone to steer the transport it handed to the link.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::transport::{DisconnectNotifier, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeOp {
    Connect,
    Discover,
    /// Only successful writes are recorded
    Write(Vec<u8>),
    Disconnect,
    Purge,
}

#[derive(Default)]
struct Shared {
    ops: Vec<FakeOp>,
    connect_failures: u32,
    discover_failures: u32,
    write_failures: u32,
    write_hangs: u32,
    connect_delay: Duration,
    notifier: Option<DisconnectNotifier>,
    handles: u64,
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    shared: Arc<Mutex<Shared>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // a panicking test thread poisons the lock; the data is still usable
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fail_connects(&self, count: u32) {
        self.lock().connect_failures = count;
    }

    /// Every connect takes `delay` before it resolves.
    pub fn delay_connects(&self, delay: Duration) {
        self.lock().connect_delay = delay;
    }

    pub fn fail_discoveries(&self, count: u32) {
        self.lock().discover_failures = count;
    }

    pub fn fail_writes(&self, count: u32) {
        self.lock().write_failures = count;
    }

    /// The next `count` writes never complete.
    pub fn hang_writes(&self, count: u32) {
        self.lock().write_hangs = count;
    }

    /// Behave like the stack noticing the peer went away.
    pub fn drop_link(&self) {
        if let Some(notifier) = self.lock().notifier.take() {
            notifier.notify();
        }
    }

    pub fn ops(&self) -> Vec<FakeOp> {
        self.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    pub fn count(&self, matches: impl Fn(&FakeOp) -> bool) -> usize {
        self.lock().ops.iter().filter(|op| matches(op)).count()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                FakeOp::Write(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }
}

fn take_one(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl Transport for FakeTransport {
    type Handle = u64;
    type Characteristic = u16;

    async fn connect(
        &mut self,
        _address: &str,
        on_disconnect: DisconnectNotifier,
    ) -> Result<u64, TransportError> {
        let delay = {
            let mut shared = self.lock();
            shared.ops.push(FakeOp::Connect);
            shared.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut shared = self.lock();
        if take_one(&mut shared.connect_failures) {
            return Err(TransportError::ConnectFailed("scripted failure".to_string()));
        }
        shared.handles += 1;
        shared.notifier = Some(on_disconnect);
        Ok(shared.handles)
    }

    async fn discover_write_characteristic(&mut self, _handle: &u64) -> Result<u16, TransportError> {
        let mut shared = self.lock();
        shared.ops.push(FakeOp::Discover);
        if take_one(&mut shared.discover_failures) {
            return Err(TransportError::CharacteristicNotFound("scripted failure".to_string()));
        }
        Ok(0x0009)
    }

    async fn write_characteristic(
        &mut self,
        _handle: &u64,
        _characteristic: &u16,
        frame: &[u8],
    ) -> Result<(), TransportError> {
        let hang = {
            let mut shared = self.lock();
            if take_one(&mut shared.write_failures) {
                return Err(TransportError::WriteFailed("scripted failure".to_string()));
            }
            let hang = take_one(&mut shared.write_hangs);
            if !hang {
                shared.ops.push(FakeOp::Write(frame.to_vec()));
            }
            hang
        };
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn disconnect(&mut self, _handle: u64) {
        let notifier = {
            let mut shared = self.lock();
            shared.ops.push(FakeOp::Disconnect);
            shared.notifier.take()
        };
        // real stacks report deliberate disconnects as well
        if let Some(notifier) = notifier {
            notifier.notify();
        }
    }

    async fn purge(&mut self, _address: &str) {
        self.lock().ops.push(FakeOp::Purge);
    }
}
