//! What the controller needs from the message bus

use std::fmt;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// Raw payload from the command topic
    Command(Vec<u8>),
    /// The bus session was (re)established; retained topics may need a refresh
    Reconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Online,
    Offline,
}

impl Availability {
    pub fn as_str(self) -> &'static str {
        match self {
            Availability::Online => "online",
            Availability::Offline => "offline",
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("bus is closed")]
    Closed,
}

#[async_trait]
pub trait Bus: Send {
    /// `None` once the bus is gone for good
    async fn next_event(&mut self) -> Option<BusEvent>;

    /// Publish a state payload, retained
    async fn publish_state(&mut self, payload: &str) -> Result<(), BusError>;

    /// Publish availability, retained
    async fn publish_availability(&mut self, availability: Availability) -> Result<(), BusError>;
}
