//! ELK-BLEDOM wire protocol - command frames for the light controller
//!
//! The controller exposes one write-only characteristic (see [`ble`]) and
//! never reports its state back, so this crate only encodes. Every frame
//! starts with [`FRAME_START`] and ends with [`FRAME_END`]; everything in
//! between is fixed per command except the argument bytes.

pub mod ble;

use std::fmt;

pub const FRAME_START: u8 = 0x7e;
pub const FRAME_END: u8 = 0xef;

// Opcodes (bytes 1..=3 of each frame)
pub const OP_POWER: [u8; 3] = [FRAME_START, 0x04, 0x04];
pub const OP_COLOR: [u8; 4] = [FRAME_START, 0x07, 0x05, 0x03];
pub const OP_BRIGHTNESS: [u8; 3] = [FRAME_START, 0x05, 0x01];

pub const POWER_ON: u8 = 0x01;
pub const POWER_OFF: u8 = 0x00;

/// Lowest level the firmware accepts; it ignores a brightness of 0.
pub const MIN_DEVICE_BRIGHTNESS: u8 = 1;

/// An RGB color, one byte per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Brightness in percent, always within 0..=100
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Brightness(u8);

impl Brightness {
    pub const MAX: Brightness = Brightness(100);

    /// Returns `None` when `percent` is above 100.
    pub const fn new(percent: u8) -> Option<Self> {
        if percent <= 100 {
            Some(Self(percent))
        } else {
            None
        }
    }

    /// Clamps any upstream value into 0..=100.
    pub fn clamped(percent: i64) -> Self {
        Self(percent.clamp(0, 100) as u8)
    }

    pub const fn percent(self) -> u8 {
        self.0
    }

    /// The byte the firmware expects for this level.
    pub fn device_level(self) -> u8 {
        self.0.max(MIN_DEVICE_BRIGHTNESS)
    }
}

impl Default for Brightness {
    fn default() -> Self {
        Self::MAX
    }
}

impl fmt::Display for Brightness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// A single command for the light controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Power(bool),
    Color(Rgb),
    Brightness(Brightness),
}

impl DeviceCommand {
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            DeviceCommand::Power(on) => encode_power(on),
            DeviceCommand::Color(color) => encode_color(color),
            DeviceCommand::Brightness(level) => encode_brightness(level),
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::Power(true) => f.write_str("power on"),
            DeviceCommand::Power(false) => f.write_str("power off"),
            DeviceCommand::Color(color) => write!(f, "color {color}"),
            DeviceCommand::Brightness(level) => write!(f, "brightness {level}"),
        }
    }
}

/// `7e 04 04 0X 00 00 ff 00 ef`
pub fn encode_power(on: bool) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9);
    buf.extend_from_slice(&OP_POWER);
    buf.push(if on { POWER_ON } else { POWER_OFF });
    buf.extend_from_slice(&[0x00, 0x00, 0xff, 0x00]);
    buf.push(FRAME_END);
    buf
}

/// `7e 07 05 03 RR GG BB 00 ef`
pub fn encode_color(color: Rgb) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9);
    buf.extend_from_slice(&OP_COLOR);
    buf.extend_from_slice(&[color.r, color.g, color.b]);
    buf.push(0x00);
    buf.push(FRAME_END);
    buf
}

/// `7e 05 01 LL 00 00 00 ef` - this one is 8 bytes on the wire
pub fn encode_brightness(level: Brightness) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.extend_from_slice(&OP_BRIGHTNESS);
    buf.push(level.device_level());
    buf.extend_from_slice(&[0x00, 0x00, 0x00]);
    buf.push(FRAME_END);
    buf
}

/// Lowercase hex, the way frames show up in sniffer logs.
pub fn to_hex(frame: &[u8]) -> String {
    frame.iter().map(|b| format!("{b:02x}")).collect()
}
