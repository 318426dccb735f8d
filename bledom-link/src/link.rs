//! Device link - the one task that talks BLE to the light
//!
//! The link owns the transport and the [`ConnectionState`]. Everyone else
//! sends it requests through a [`LinkHandle`] and follows its
//! [`LinkEvent`] stream. Requests are served one at a time, so at most one
//! BLE operation is ever outstanding.
//!
//! Two ways back to `Connected` exist:
//!
//! - plain reconnect, after the stack reports a drop or a write fails:
//!   connect again with backoff, reusing the cached characteristic;
//! - aggressive reconnect, on request only: tear everything down (even a
//!   link the stack thinks is fine), purge the transport, wait the settle
//!   delay and connect from scratch with fresh discovery. This is what gets
//!   the firmware out of its deep sleep after it was switched off.

use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use bledom_proto::to_hex;

use crate::backoff::{Backoff, BackoffPolicy};
use crate::error::{LinkError, TransportError};
use crate::transport::{DisconnectNotifier, Transport};

const REQUEST_QUEUE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    StateChanged(ConnectionState),
    /// An aggressive reconnect has been taken on. The next
    /// `StateChanged(Connected)` is its outcome.
    WakeStarted,
}

/// Link settings, fixed for the lifetime of the link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub address: String,
    pub backoff: BackoffPolicy,
    /// Bound on a connect attempt and on characteristic discovery
    pub connect_timeout: Duration,
    /// A write that takes longer than this counts as a lost link
    pub write_timeout: Duration,
    /// Pause between teardown and reconnect on the aggressive path
    pub settle_delay: Duration,
    /// Pause after every frame; the firmware handles one frame at a time
    pub frame_gap: Duration,
}

impl LinkConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(20),
            write_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_secs(1),
            frame_gap: Duration::from_millis(100),
        }
    }
}

enum Request {
    Write {
        frame: Vec<u8>,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Wake,
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Cloneable front door of a running [`DeviceLink`]
#[derive(Debug, Clone)]
pub struct LinkHandle {
    requests: mpsc::Sender<Request>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Write { frame, .. } => write!(f, "Write({})", to_hex(frame)),
            Request::Wake => f.write_str("Wake"),
            Request::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl LinkHandle {
    /// Write one frame. Fails right away unless the link is connected.
    pub async fn write(&self, frame: Vec<u8>) -> Result<(), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request::Write { frame, reply })
            .await
            .map_err(|_| LinkError::Closed)?;
        rx.await.map_err(|_| LinkError::Closed)?
    }

    /// Queue an aggressive reconnect. Returns once it is queued; progress
    /// shows up on the event stream.
    pub async fn aggressive_reconnect(&self) -> Result<(), LinkError> {
        self.requests
            .send(Request::Wake)
            .await
            .map_err(|_| LinkError::Closed)
    }

    /// Disconnect and stop the link task. An in-flight connection attempt
    /// is allowed to finish first.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.requests.send(Request::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

/// Start a link task that begins connecting immediately.
pub fn spawn<T: Transport>(transport: T, config: LinkConfig) -> (LinkHandle, LinkEvents, JoinHandle<()>) {
    let (link, handle, events) = DeviceLink::new(transport, config);
    let task = tokio::spawn(link.run());
    (handle, events, task)
}

struct Session<T: Transport> {
    handle: T::Handle,
    characteristic: T::Characteristic,
}

/// Connection-side half of the link, kept apart from the request queue so
/// a connection attempt can stay in flight while requests are answered.
struct Connector<T: Transport> {
    transport: T,
    config: LinkConfig,
    session: Option<Session<T>>,
    cached_characteristic: Option<T::Characteristic>,
    generation: u64,
    disconnect_tx: mpsc::UnboundedSender<u64>,
}

impl<T: Transport> Connector<T> {
    async fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            // the stack reports our own disconnect too; make it stale
            self.generation += 1;
            self.transport.disconnect(session.handle).await;
        }
    }

    async fn establish(&mut self, fresh: bool) -> Result<(), TransportError> {
        self.teardown().await;
        if fresh {
            self.cached_characteristic = None;
            self.transport.purge(&self.config.address).await;
            tokio::time::sleep(self.config.settle_delay).await;
        }

        self.generation += 1;
        let notifier = DisconnectNotifier::new(self.generation, self.disconnect_tx.clone());
        let handle = tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.connect(&self.config.address, notifier),
        )
        .await
        .map_err(|_| TransportError::ConnectFailed("connect timed out".to_string()))??;

        let characteristic = match self.cached_characteristic.clone() {
            Some(characteristic) => characteristic,
            None => {
                let discovered = tokio::time::timeout(
                    self.config.connect_timeout,
                    self.transport.discover_write_characteristic(&handle),
                )
                .await
                .unwrap_or(Err(TransportError::Timeout));
                match discovered {
                    Ok(characteristic) => characteristic,
                    Err(e) => {
                        self.generation += 1;
                        self.transport.disconnect(handle).await;
                        return Err(e);
                    }
                }
            }
        };

        self.cached_characteristic = Some(characteristic.clone());
        self.session = Some(Session { handle, characteristic });
        Ok(())
    }

    async fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let Some(session) = &self.session else {
            return Err(TransportError::WriteFailed("no session".to_string()));
        };
        tokio::time::timeout(
            self.config.write_timeout,
            self.transport
                .write_characteristic(&session.handle, &session.characteristic, frame),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout))
    }
}

enum Flow {
    Continue,
    Stop(Option<oneshot::Sender<()>>),
}

/// Requests that arrived while a connection was being (re)established
#[derive(Default)]
struct Deferred {
    wake: bool,
    stop: Option<Option<oneshot::Sender<()>>>,
}

/// The link task. Build with [`DeviceLink::new`] or [`spawn`], then drive
/// [`run`](Self::run).
pub struct DeviceLink<T: Transport> {
    connector: Connector<T>,
    state: ConnectionState,
    requests: mpsc::Receiver<Request>,
    events: mpsc::UnboundedSender<LinkEvent>,
    disconnects: mpsc::UnboundedReceiver<u64>,
}

impl<T: Transport> DeviceLink<T> {
    pub fn new(transport: T, config: LinkConfig) -> (Self, LinkHandle, LinkEvents) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();

        let link = Self {
            connector: Connector {
                transport,
                config,
                session: None,
                cached_characteristic: None,
                generation: 0,
                disconnect_tx,
            },
            state: ConnectionState::Disconnected,
            requests: request_rx,
            events: event_tx,
            disconnects: disconnect_rx,
        };
        (link, LinkHandle { requests: request_tx }, event_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn address(&self) -> &str {
        &self.connector.config.address
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!("link {}: {} -> {}", self.address(), self.state, state);
        self.state = state;
        let _ = self.events.send(LinkEvent::StateChanged(state));
    }

    /// Connect, then serve requests and watch for drops until shut down.
    pub async fn run(mut self) {
        let mut flow = self.connect().await;
        let done = loop {
            match flow {
                Flow::Stop(done) => break done,
                Flow::Continue => {}
            }
            flow = tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle(request).await,
                    None => Flow::Stop(None),
                },
                Some(generation) = self.disconnects.recv() => self.on_disconnect(generation).await,
            };
        };

        info!("link {}: shutting down", self.address());
        self.connector.teardown().await;
        self.set_state(ConnectionState::Disconnected);
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    async fn handle(&mut self, request: Request) -> Flow {
        match request {
            Request::Write { frame, reply } => {
                let result = self.write(&frame).await;
                let lost = result == Err(LinkError::LinkLost);
                let _ = reply.send(result);
                if lost {
                    self.establish_with_retry(false).await
                } else {
                    Flow::Continue
                }
            }
            Request::Wake => self.aggressive_reconnect().await,
            Request::Shutdown { done } => Flow::Stop(Some(done)),
        }
    }

    /// First connection: Disconnected -> Connecting -> Connected, retrying
    /// forever with backoff.
    async fn connect(&mut self) -> Flow {
        self.set_state(ConnectionState::Connecting);
        self.establish_with_retry(false).await
    }

    /// Write one frame. Writes are never retried here: on failure the link
    /// drops to `Reconnecting` and the caller gets [`LinkError::LinkLost`].
    async fn write(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        if !self.state.is_connected() {
            return Err(LinkError::NotConnected);
        }
        match self.connector.write(frame).await {
            Ok(()) => {
                debug!("sent {}", to_hex(frame));
                tokio::time::sleep(self.connector.config.frame_gap).await;
                Ok(())
            }
            Err(e) => {
                warn!("write of {} failed: {e}", to_hex(frame));
                // rediscover on the way back in case the handle went stale
                self.connector.cached_characteristic = None;
                self.set_state(ConnectionState::Reconnecting);
                Err(LinkError::LinkLost)
            }
        }
    }

    async fn aggressive_reconnect(&mut self) -> Flow {
        info!("link {}: aggressive reconnect, tearing down", self.address());
        let _ = self.events.send(LinkEvent::WakeStarted);
        self.set_state(ConnectionState::Reconnecting);
        self.establish_with_retry(true).await
    }

    async fn on_disconnect(&mut self, generation: u64) -> Flow {
        if generation != self.connector.generation || !self.state.is_connected() {
            debug!("ignoring stale disconnect notification (generation {generation})");
            return Flow::Continue;
        }
        warn!("link {}: device disconnected", self.address());
        self.set_state(ConnectionState::Reconnecting);
        self.establish_with_retry(false).await
    }

    /// Keep trying until connected. Requests are answered meanwhile; none
    /// of them cancels an attempt in flight.
    async fn establish_with_retry(&mut self, mut fresh: bool) -> Flow {
        if self.state.is_connected() {
            self.set_state(ConnectionState::Reconnecting);
        }
        let mut backoff = Backoff::new(self.connector.config.backoff);
        let mut deferred = Deferred::default();

        loop {
            let result = {
                let attempt = self.connector.establish(fresh);
                tokio::pin!(attempt);
                loop {
                    tokio::select! {
                        result = &mut attempt => break result,
                        request = self.requests.recv(), if deferred.stop.is_none() => {
                            answer_while_connecting(request, &self.events, &mut deferred)
                        }
                    }
                }
            };

            if let Some(done) = deferred.stop.take() {
                return Flow::Stop(done);
            }

            match result {
                Ok(()) if deferred.wake => {
                    info!("link {}: connected, running the requested wake", self.address());
                    deferred.wake = false;
                    fresh = true;
                    backoff.reset();
                }
                Ok(()) => {
                    self.set_state(ConnectionState::Connected);
                    return Flow::Continue;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        "link {}: attempt {} failed ({e}), retrying in {:.1}s",
                        self.address(),
                        backoff.attempts(),
                        delay.as_secs_f64()
                    );

                    // a pause is not an attempt; shutdown and wake cut it short
                    let pause = tokio::time::sleep(delay);
                    tokio::pin!(pause);
                    loop {
                        tokio::select! {
                            _ = &mut pause => break,
                            request = self.requests.recv() => {
                                answer_while_connecting(request, &self.events, &mut deferred);
                                if deferred.stop.is_some() || deferred.wake {
                                    break;
                                }
                            }
                        }
                    }

                    if let Some(done) = deferred.stop.take() {
                        return Flow::Stop(done);
                    }
                    if deferred.wake {
                        deferred.wake = false;
                        fresh = true;
                        backoff.reset();
                    }
                }
            }
        }
    }
}

fn answer_while_connecting(
    request: Option<Request>,
    events: &mpsc::UnboundedSender<LinkEvent>,
    deferred: &mut Deferred,
) {
    match request {
        Some(Request::Write { reply, .. }) => {
            let _ = reply.send(Err(LinkError::NotConnected));
        }
        Some(Request::Wake) => {
            info!("wake requested while connecting, next attempt runs the full teardown");
            deferred.wake = true;
            let _ = events.send(LinkEvent::WakeStarted);
        }
        Some(Request::Shutdown { done }) => deferred.stop = Some(Some(done)),
        None => deferred.stop = Some(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeOp, FakeTransport};

    fn config() -> LinkConfig {
        let mut config = LinkConfig::new("BE:67:00:5B:04:4A");
        config.backoff = BackoffPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: 0.0,
        };
        config
    }

    async fn next_event(events: &mut LinkEvents) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(3600), events.recv())
            .await
            .expect("no link event within an hour")
            .expect("link event stream closed")
    }

    async fn wait_connected(events: &mut LinkEvents) {
        while next_event(events).await != LinkEvent::StateChanged(ConnectionState::Connected) {}
    }

    #[tokio::test(start_paused = true)]
    async fn connects_on_start() {
        let transport = FakeTransport::new();
        let (_handle, mut events, _task) = spawn(transport.clone(), config());

        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Connecting));
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Connected));
        assert_eq!(transport.ops(), vec![FakeOp::Connect, FakeOp::Discover]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_backoff_until_connected() {
        let transport = FakeTransport::new();
        transport.fail_connects(4);
        let started = tokio::time::Instant::now();
        let (_handle, mut events, _task) = spawn(transport.clone(), config());

        wait_connected(&mut events).await;
        assert_eq!(transport.count(|op| *op == FakeOp::Connect), 5);
        // 1 + 2 + 4 + 8 seconds of backoff
        assert_eq!(started.elapsed().as_secs(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_characteristic_is_retried() {
        let transport = FakeTransport::new();
        transport.fail_discoveries(2);
        let (_handle, mut events, _task) = spawn(transport.clone(), config());

        wait_connected(&mut events).await;
        assert_eq!(transport.count(|op| *op == FakeOp::Discover), 3);
        // the half-open connections were closed again
        assert_eq!(transport.count(|op| *op == FakeOp::Disconnect), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_reach_the_transport_in_order() {
        let transport = FakeTransport::new();
        let (handle, mut events, _task) = spawn(transport.clone(), config());
        wait_connected(&mut events).await;

        handle.write(vec![1, 2, 3]).await.unwrap();
        handle.write(vec![4]).await.unwrap();
        assert_eq!(transport.writes(), vec![vec![1, 2, 3], vec![4]]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_reports_link_lost_and_reconnects_plainly() {
        let transport = FakeTransport::new();
        let (handle, mut events, _task) = spawn(transport.clone(), config());
        wait_connected(&mut events).await;
        transport.clear_ops();

        transport.fail_writes(1);
        assert_eq!(handle.write(vec![9]).await, Err(LinkError::LinkLost));
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Reconnecting));
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Connected));

        assert_eq!(transport.count(|op| *op == FakeOp::Purge), 0);
        // characteristic is looked up again after a failed write
        assert_eq!(transport.count(|op| *op == FakeOp::Discover), 1);
        assert!(transport.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_write_times_out_as_link_lost() {
        let transport = FakeTransport::new();
        let (handle, mut events, _task) = spawn(transport.clone(), config());
        wait_connected(&mut events).await;

        transport.hang_writes(1);
        let started = tokio::time::Instant::now();
        assert_eq!(handle.write(vec![9]).await, Err(LinkError::LinkLost));
        let waited = started.elapsed();
        assert!(waited >= config().write_timeout && waited < config().write_timeout * 2);
        wait_connected(&mut events).await;
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_drop_takes_the_plain_path() {
        let transport = FakeTransport::new();
        let (_handle, mut events, _task) = spawn(transport.clone(), config());
        wait_connected(&mut events).await;
        transport.clear_ops();

        transport.drop_link();
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Reconnecting));
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Connected));

        // cached characteristic reused, nothing purged
        assert_eq!(transport.ops(), vec![FakeOp::Disconnect, FakeOp::Connect]);
    }

    #[tokio::test(start_paused = true)]
    async fn aggressive_reconnect_tears_down_a_healthy_link() {
        let transport = FakeTransport::new();
        let mut config = config();
        config.settle_delay = Duration::from_secs(2);
        let (handle, mut events, _task) = spawn(transport.clone(), config);
        wait_connected(&mut events).await;
        transport.clear_ops();

        let started = tokio::time::Instant::now();
        handle.aggressive_reconnect().await.unwrap();
        assert_eq!(next_event(&mut events).await, LinkEvent::WakeStarted);
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Reconnecting));
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Connected));

        assert_eq!(
            transport.ops(),
            vec![FakeOp::Disconnect, FakeOp::Purge, FakeOp::Connect, FakeOp::Discover]
        );
        assert!(started.elapsed() >= Duration::from_secs(2));

        // our own teardown must not start another reconnect
        handle.write(vec![7]).await.unwrap();
        assert_eq!(transport.writes(), vec![vec![7]]);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_are_refused_while_reconnecting() {
        let transport = FakeTransport::new();
        transport.fail_connects(u32::MAX);
        let (handle, mut events, _task) = spawn(transport.clone(), config());
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Connecting));

        let started = tokio::time::Instant::now();
        assert_eq!(handle.write(vec![1]).await, Err(LinkError::NotConnected));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn wake_during_failing_connect_upgrades_next_attempt() {
        let transport = FakeTransport::new();
        transport.fail_connects(2);
        let (handle, mut events, _task) = spawn(transport.clone(), config());
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Connecting));

        handle.aggressive_reconnect().await.unwrap();
        assert_eq!(next_event(&mut events).await, LinkEvent::WakeStarted);
        wait_connected(&mut events).await;

        assert!(transport.count(|op| *op == FakeOp::Purge) >= 1);
        assert_eq!(transport.ops().last(), Some(&FakeOp::Discover));
    }

    #[tokio::test(start_paused = true)]
    async fn wake_during_slow_connect_follows_it_with_a_full_teardown() {
        let transport = FakeTransport::new();
        transport.delay_connects(Duration::from_secs(3));
        let (handle, mut events, _task) = spawn(transport.clone(), config());
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Connecting));

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.aggressive_reconnect().await.unwrap();
        assert_eq!(next_event(&mut events).await, LinkEvent::WakeStarted);
        // the plain attempt finishes but is not reported as Connected
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Connected));
        assert!(events.try_recv().is_err());

        assert_eq!(
            transport.ops(),
            vec![
                FakeOp::Connect,
                FakeOp::Discover,
                FakeOp::Disconnect,
                FakeOp::Purge,
                FakeOp::Connect,
                FakeOp::Discover,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_does_not_wait_out_the_backoff_pause() {
        let transport = FakeTransport::new();
        transport.fail_connects(u32::MAX);
        let mut config = config();
        config.backoff = BackoffPolicy {
            base: Duration::from_secs(60),
            max: Duration::from_secs(60),
            jitter: 0.0,
        };
        let (handle, mut events, task) = spawn(transport.clone(), config);
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Connecting));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let started = tokio::time::Instant::now();
        handle.shutdown().await;
        task.await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(transport.count(|op| *op == FakeOp::Connect), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wake_cuts_the_backoff_pause_short() {
        let transport = FakeTransport::new();
        transport.fail_connects(1);
        let mut config = config();
        config.backoff = BackoffPolicy {
            base: Duration::from_secs(60),
            max: Duration::from_secs(60),
            jitter: 0.0,
        };
        let settle = config.settle_delay;
        let (handle, mut events, _task) = spawn(transport.clone(), config);
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Connecting));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let started = tokio::time::Instant::now();
        handle.aggressive_reconnect().await.unwrap();
        assert_eq!(next_event(&mut events).await, LinkEvent::WakeStarted);
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Connected));

        assert!(started.elapsed() < settle + Duration::from_secs(1));
        assert_eq!(transport.count(|op| *op == FakeOp::Purge), 1);
        assert_eq!(transport.count(|op| *op == FakeOp::Connect), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_disconnects() {
        let transport = FakeTransport::new();
        let (handle, mut events, task) = spawn(transport.clone(), config());
        wait_connected(&mut events).await;

        handle.shutdown().await;
        assert_eq!(next_event(&mut events).await, LinkEvent::StateChanged(ConnectionState::Disconnected));
        task.await.unwrap();
        assert_eq!(transport.ops().last(), Some(&FakeOp::Disconnect));
        assert_eq!(handle.write(vec![1]).await, Err(LinkError::Closed));
    }
}
