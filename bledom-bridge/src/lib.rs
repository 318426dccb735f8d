pub mod bus;
mod command;
pub mod config;
mod controller;
pub mod mqtt;
mod state;

pub use bus::{Availability, Bus, BusError, BusEvent};
pub use command::{ColorChange, CommandError, LightCommand, StatePayload};
pub use config::{Config, ConfigError};
pub use controller::{Bridge, apply_once};
pub use state::{Decision, LightState, Reconciler, needs_aggressive_wake, replay_frames};
