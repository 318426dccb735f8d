//! Bridge controller - drives the link from bus commands and reports back
//!
//! Runs as one task. Bus commands and link events are handled one at a time
//! in arrival order. A command only ever touches the desired state and the
//! link queue; it never interrupts a connection attempt. Whatever could not
//! be written is caught up by the full replay that follows every
//! `Connected`.

use std::future::Future;

use bledom_link::{ConnectionState, LinkError, LinkEvent, LinkEvents, LinkHandle};
use bledom_proto::DeviceCommand;
use log::{debug, error, info, warn};

use crate::bus::{Availability, Bus, BusEvent};
use crate::command::{LightCommand, StatePayload};
use crate::state::{LightState, Reconciler};

pub struct Bridge<B: Bus> {
    bus: B,
    link: LinkHandle,
    link_events: LinkEvents,
    reconciler: Reconciler,
    connection: ConnectionState,
    /// Wake requests not yet acknowledged with `WakeStarted`
    wakes_pending: u32,
    availability: Option<Availability>,
    last_state: Option<String>,
}

impl<B: Bus> Bridge<B> {
    pub fn new(bus: B, link: LinkHandle, link_events: LinkEvents, initial: LightState) -> Self {
        Self {
            bus,
            link,
            link_events,
            reconciler: Reconciler::new(initial),
            connection: ConnectionState::Disconnected,
            wakes_pending: 0,
            availability: None,
            last_state: None,
        }
    }

    /// Serve until `shutdown` resolves, then go offline and stop the link.
    /// Hands the bus back so the caller can close it.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> B {
        self.publish_availability(Availability::Offline).await;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
                event = self.link_events.recv() => match event {
                    Some(event) => self.handle_link_event(event).await,
                    None => {
                        error!("device link stopped unexpectedly");
                        break;
                    }
                },
                event = self.bus.next_event() => match event {
                    Some(BusEvent::Command(payload)) => self.handle_command(&payload).await,
                    Some(BusEvent::Reconnected) => self.republish().await,
                    None => {
                        error!("message bus closed");
                        break;
                    }
                },
            }
        }

        self.publish_availability(Availability::Offline).await;
        self.link.shutdown().await;
        self.bus
    }

    /// Connected and not waiting on a requested wake
    fn ready(&self) -> bool {
        self.connection.is_connected() && self.wakes_pending == 0
    }

    async fn handle_command(&mut self, payload: &[u8]) {
        let command = match LightCommand::parse(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    "dropping command {:?}: {e}",
                    String::from_utf8_lossy(payload)
                );
                return;
            }
        };

        let decision = self.reconciler.apply_command(&command);
        debug!("desired state now {:?}", decision.desired);

        if decision.needs_aggressive_wake {
            info!("light switched on from off, waking it up");
            self.wakes_pending += 1;
            if let Err(e) = self.link.aggressive_reconnect().await {
                error!("could not request wake: {e}");
                self.wakes_pending -= 1;
            }
            return;
        }

        if !self.ready() {
            info!("link {}, command deferred until connected", self.connection);
            return;
        }
        let frames = self.reconciler.command_frames(&command);
        self.write_frames(frames).await;
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::WakeStarted => {
                self.wakes_pending = self.wakes_pending.saturating_sub(1);
            }
            LinkEvent::StateChanged(state) => {
                self.connection = state;
                if state.is_connected() {
                    self.publish_availability(Availability::Online).await;
                    if self.wakes_pending == 0 {
                        self.replay().await;
                    }
                } else {
                    self.publish_availability(Availability::Offline).await;
                }
            }
        }
    }

    async fn replay(&mut self) {
        let frames = self.reconciler.replay_frames();
        info!("replaying {:?}", self.reconciler.desired());
        self.write_frames(frames).await;
    }

    /// Write in order, stopping at the first failure. A lost link is
    /// followed by a reconnect, whose replay covers the rest.
    async fn write_frames(&mut self, frames: Vec<DeviceCommand>) {
        let mut written = 0;
        for frame in frames {
            match self.link.write(frame.to_bytes()).await {
                Ok(()) => {
                    debug!("applied {frame}");
                    self.reconciler.mark_applied(frame);
                    written += 1;
                }
                Err(LinkError::Closed) => {
                    error!("device link is gone, {frame} not sent");
                    break;
                }
                Err(e) => {
                    warn!("{frame} not sent ({e}), will replay after reconnect");
                    break;
                }
            }
        }
        if written > 0 {
            self.publish_state().await;
        }
    }

    async fn publish_state(&mut self) {
        let payload = StatePayload::from(self.reconciler.applied()).to_json();
        if let Err(e) = self.bus.publish_state(&payload).await {
            warn!("failed to publish state: {e}");
        }
        self.last_state = Some(payload);
    }

    async fn publish_availability(&mut self, availability: Availability) {
        if self.availability == Some(availability) {
            return;
        }
        info!("availability: {availability}");
        if let Err(e) = self.bus.publish_availability(availability).await {
            warn!("failed to publish availability: {e}");
        }
        self.availability = Some(availability);
    }

    /// The bus session came back; refresh what it shows.
    async fn republish(&mut self) {
        let availability = if self.connection.is_connected() {
            Availability::Online
        } else {
            Availability::Offline
        };
        self.availability = None;
        self.publish_availability(availability).await;
        if let Some(payload) = self.last_state.clone() {
            if let Err(e) = self.bus.publish_state(&payload).await {
                warn!("failed to republish state: {e}");
            }
        }
    }
}

/// Apply one command straight to the light, without a bus: wait for the
/// link (waking the light if the command turns it on), replay the
/// resulting state and return what was applied.
pub async fn apply_once(
    link: &LinkHandle,
    events: &mut LinkEvents,
    initial: LightState,
    command: &LightCommand,
) -> Result<LightState, LinkError> {
    let mut reconciler = Reconciler::new(initial);
    let decision = reconciler.apply_command(command);
    let mut wakes_pending = 0u32;
    if decision.needs_aggressive_wake {
        link.aggressive_reconnect().await?;
        wakes_pending = 1;
    }

    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::WakeStarted => wakes_pending = wakes_pending.saturating_sub(1),
            LinkEvent::StateChanged(state) if state.is_connected() && wakes_pending == 0 => {
                let mut complete = true;
                for frame in reconciler.replay_frames() {
                    match link.write(frame.to_bytes()).await {
                        Ok(()) => reconciler.mark_applied(frame),
                        Err(LinkError::Closed) => return Err(LinkError::Closed),
                        Err(e) => {
                            warn!("{frame} not sent ({e}), waiting for the link");
                            complete = false;
                            break;
                        }
                    }
                }
                if complete {
                    return Ok(*reconciler.applied());
                }
            }
            LinkEvent::StateChanged(state) => debug!("link {state}"),
        }
    }
    Err(LinkError::Closed)
}
