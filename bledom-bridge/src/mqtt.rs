//! MQTT bus on top of rumqttc
//!
//! A background task polls the rumqttc event loop, which is also what keeps
//! the session alive and reconnects it. Commands and session events are
//! forwarded to [`MqttBus::next_event`] over an unbounded channel, so a
//! busy controller never stalls the event loop it publishes through.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::{Availability, Bus, BusError, BusEvent};

const REQUEST_CAPACITY: usize = 10;
const RETRY_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub command: String,
    pub state: String,
    pub availability: String,
}

impl Topics {
    pub fn new(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            command: format!("{base}/set"),
            state: format!("{base}/state"),
            availability: format!("{base}/availability"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub topics: Topics,
}

impl MqttSettings {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.broker, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(user) = &self.username {
            options.set_credentials(user, self.password.clone().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            &self.topics.availability,
            Availability::Offline.as_str(),
            QoS::AtLeastOnce,
            true,
        ));
        options
    }
}

pub struct MqttBus {
    client: AsyncClient,
    topics: Topics,
    events: mpsc::UnboundedReceiver<BusEvent>,
    driver: JoinHandle<()>,
}

impl MqttBus {
    /// Start the client. Connecting happens in the background and is
    /// retried forever; watch for [`BusEvent::Reconnected`].
    pub fn start(settings: &MqttSettings) -> Self {
        let (client, eventloop) = AsyncClient::new(settings.options(), REQUEST_CAPACITY);
        let (tx, events) = mpsc::unbounded_channel();
        info!(
            "mqtt: connecting to {}:{} as {}",
            settings.broker, settings.port, settings.client_id
        );
        let driver = tokio::spawn(drive(
            eventloop,
            client.clone(),
            settings.topics.command.clone(),
            tx,
        ));
        Self {
            client,
            topics: settings.topics.clone(),
            events,
            driver,
        }
    }

    /// Queue a retained publish without waiting. While the broker is away
    /// the request queue fills up and further publishes fail instead of
    /// blocking the caller.
    fn publish(&self, topic: &str, payload: &str) -> Result<(), BusError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, true, payload.as_bytes().to_vec())?;
        Ok(())
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Flush a final disconnect to the broker and stop the driver task.
    pub async fn close(self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("mqtt: disconnect failed: {e}");
        }
        // give the event loop a moment to send what is queued
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.driver.abort();
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    command_topic: String,
    tx: mpsc::UnboundedSender<BusEvent>,
) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt: connected, subscribing to {command_topic}");
                // the request queue is drained by this very loop, so never await here
                if let Err(e) = client.try_subscribe(&command_topic, QoS::AtLeastOnce) {
                    warn!("mqtt: subscribe to {command_topic} failed: {e}");
                }
                BusEvent::Reconnected
            }
            Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == command_topic => {
                debug!("mqtt: {} bytes on {}", publish.payload.len(), publish.topic);
                BusEvent::Command(publish.payload.to_vec())
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    "mqtt: connection error: {e}, retrying in {}s",
                    RETRY_PAUSE.as_secs()
                );
                tokio::time::sleep(RETRY_PAUSE).await;
                continue;
            }
        };
        if tx.send(event).is_err() {
            debug!("mqtt: event receiver dropped, stopping");
            break;
        }
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn next_event(&mut self) -> Option<BusEvent> {
        self.events.recv().await
    }

    async fn publish_state(&mut self, payload: &str) -> Result<(), BusError> {
        self.publish(&self.topics.state, payload)
    }

    async fn publish_availability(&mut self, availability: Availability) -> Result<(), BusError> {
        self.publish(&self.topics.availability, availability.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> MqttSettings {
        MqttSettings {
            broker: "192.168.12.124".to_string(),
            port: 1883,
            client_id: "bledom-bridge".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            topics: Topics::new("bedframe/light"),
        }
    }

    #[test]
    fn topics_hang_off_the_base() {
        let topics = Topics::new("bedframe/light/");
        assert_eq!(topics.command, "bedframe/light/set");
        assert_eq!(topics.state, "bedframe/light/state");
        assert_eq!(topics.availability, "bedframe/light/availability");
    }

    #[test]
    fn options_carry_a_retained_offline_will() {
        let options = settings().options();
        assert_eq!(options.broker_address(), ("192.168.12.124".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));

        let will = options.last_will().expect("last will is set");
        assert_eq!(will.topic, "bedframe/light/availability");
        assert_eq!(&will.message[..], b"offline");
        assert!(will.retain);
    }

    #[tokio::test]
    async fn publishing_never_blocks_while_the_broker_is_down() {
        let mut unreachable = settings();
        unreachable.broker = "127.0.0.1".to_string();
        unreachable.port = 1;
        let mut bus = MqttBus::start(&unreachable);

        let mut refused = 0;
        for _ in 0..(REQUEST_CAPACITY * 3) {
            let published = tokio::time::timeout(
                Duration::from_secs(1),
                bus.publish_availability(Availability::Offline),
            )
            .await
            .expect("publish blocked");
            if published.is_err() {
                refused += 1;
            }
        }
        assert!(refused > 0);
        bus.close().await;
    }
}
