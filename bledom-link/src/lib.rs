//! BLEDOM Link
//!
//! Keeps one BLE connection to an ELK-BLEDOM light alive and knows how to
//! shake the firmware awake after it has been switched off.
//!
//! # Example
//!
//! ```ignore
//! use bledom_link::{btle::BtleTransport, LinkConfig, LinkEvent};
//! use bledom_proto::DeviceCommand;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = BtleTransport::new().await?;
//!     let (link, mut events, _task) =
//!         bledom_link::spawn(transport, LinkConfig::new("BE:67:00:5B:04:4A"));
//!
//!     while let Some(event) = events.recv().await {
//!         if event == LinkEvent::StateChanged(bledom_link::ConnectionState::Connected) {
//!             link.write(DeviceCommand::Power(true).to_bytes()).await?;
//!             break;
//!         }
//!     }
//!
//!     link.shutdown().await;
//!     Ok(())
//! }
//! ```

mod backoff;
mod error;
mod link;
mod transport;

pub mod btle;
#[cfg(any(test, feature = "testing"))]
pub mod fake;

pub use backoff::{Backoff, BackoffPolicy};
pub use error::{LinkError, TransportError};
pub use link::{spawn, ConnectionState, DeviceLink, LinkConfig, LinkEvent, LinkEvents, LinkHandle};
pub use transport::{DisconnectNotifier, Transport};
