//! Desired vs applied light state
//!
//! The light never reports back, so what it shows is whatever was last
//! written successfully. [`Reconciler`] keeps that (`applied`) next to what
//! the bus asked for (`desired`) and turns the difference into frames.

use bledom_proto::{Brightness, DeviceCommand, Rgb};

use crate::command::LightCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightState {
    pub power: bool,
    /// Kept while off so it can be replayed
    pub color: Rgb,
    pub brightness: Brightness,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            power: false,
            color: Rgb::WHITE,
            brightness: Brightness::MAX,
        }
    }
}

impl LightState {
    pub fn apply(&self, command: &LightCommand) -> LightState {
        LightState {
            power: command.power.unwrap_or(self.power),
            color: command.color.apply_to(self.color),
            brightness: command.brightness.unwrap_or(self.brightness),
        }
    }

    fn record(&mut self, command: DeviceCommand) {
        match command {
            DeviceCommand::Power(on) => self.power = on,
            DeviceCommand::Color(color) => self.color = color,
            DeviceCommand::Brightness(level) => self.brightness = level,
        }
    }
}

/// The firmware falls into a sleep a plain reconnect cannot wake after it
/// was switched off, so any OFF -> ON request takes the aggressive path.
pub fn needs_aggressive_wake(previous_power: bool, requested: Option<bool>) -> bool {
    !previous_power && requested == Some(true)
}

/// The whole state, power last
pub fn replay_frames(state: &LightState) -> Vec<DeviceCommand> {
    vec![
        DeviceCommand::Color(state.color),
        DeviceCommand::Brightness(state.brightness),
        DeviceCommand::Power(state.power),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub desired: LightState,
    pub needs_aggressive_wake: bool,
}

/// Which parts of the light a confirmed write has set since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Confirmed {
    power: bool,
    color: bool,
    brightness: bool,
}

impl Confirmed {
    fn all(&self) -> bool {
        self.power && self.color && self.brightness
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    desired: LightState,
    /// Parts not yet in `confirmed` hold the initial value, not device truth
    applied: LightState,
    confirmed: Confirmed,
}

impl Reconciler {
    pub fn new(initial: LightState) -> Self {
        Self {
            desired: initial,
            applied: initial,
            confirmed: Confirmed::default(),
        }
    }

    pub fn desired(&self) -> &LightState {
        &self.desired
    }

    pub fn applied(&self) -> &LightState {
        &self.applied
    }

    /// True once every part of the light was confirmed written and
    /// matches the desired state
    pub fn in_sync(&self) -> bool {
        self.confirmed.all() && self.desired == self.applied
    }

    /// Whether any write has been confirmed yet
    pub fn has_applied(&self) -> bool {
        self.confirmed != Confirmed::default()
    }

    /// Fold `command` into the desired state. The wake decision looks at
    /// the desired state from before the command.
    pub fn apply_command(&mut self, command: &LightCommand) -> Decision {
        let wake = needs_aggressive_wake(self.desired.power, command.power);
        self.desired = self.desired.apply(command);
        Decision {
            desired: self.desired,
            needs_aggressive_wake: wake,
        }
    }

    /// Frames for the parts of the desired state `command` touched, in
    /// color, brightness, power order. Call after [`apply_command`](Self::apply_command).
    pub fn command_frames(&self, command: &LightCommand) -> Vec<DeviceCommand> {
        let mut frames = Vec::with_capacity(3);
        if !command.color.is_empty() {
            frames.push(DeviceCommand::Color(self.desired.color));
        }
        if command.brightness.is_some() {
            frames.push(DeviceCommand::Brightness(self.desired.brightness));
        }
        match command.power {
            Some(on) => frames.push(DeviceCommand::Power(on)),
            // some firmware lights up on any color frame
            None if !self.desired.power && !frames.is_empty() => {
                frames.push(DeviceCommand::Power(false))
            }
            None => {}
        }
        frames
    }

    pub fn replay_frames(&self) -> Vec<DeviceCommand> {
        replay_frames(&self.desired)
    }

    /// Record a frame the link confirmed as sent
    pub fn mark_applied(&mut self, command: DeviceCommand) {
        self.applied.record(command);
        match command {
            DeviceCommand::Power(_) => self.confirmed.power = true,
            DeviceCommand::Color(_) => self.confirmed.color = true,
            DeviceCommand::Brightness(_) => self.confirmed.brightness = true,
        }
    }
}
