//! JSON light schema shared by the command and state topics
//!
//! `{"state": "ON"|"OFF", "color": {"r": 0-255, "g": 0-255, "b": 0-255}, "brightness": 0-100}`
//!
//! Every field is optional on the way in; unknown fields are ignored.
//! Numbers outside their range are clamped, not rejected.

use bledom_proto::{Brightness, Rgb};
use serde::{Deserialize, Serialize};

use crate::state::LightState;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("command must be a JSON object")]
    NotAnObject,
    #[error("invalid state {0:?}, expected \"ON\" or \"OFF\"")]
    BadState(String),
}

/// Color channels a command asks to change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorChange {
    pub r: Option<u8>,
    pub g: Option<u8>,
    pub b: Option<u8>,
}

impl ColorChange {
    pub fn is_empty(&self) -> bool {
        self.r.is_none() && self.g.is_none() && self.b.is_none()
    }

    /// `base` with the requested channels replaced
    pub fn apply_to(&self, base: Rgb) -> Rgb {
        Rgb::new(
            self.r.unwrap_or(base.r),
            self.g.unwrap_or(base.g),
            self.b.unwrap_or(base.b),
        )
    }
}

/// One parsed bus command. `None` leaves that part of the light alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightCommand {
    pub power: Option<bool>,
    pub color: ColorChange,
    pub brightness: Option<Brightness>,
}

impl LightCommand {
    pub fn parse(payload: &[u8]) -> Result<Self, CommandError> {
        Self::from_value(serde_json::from_slice(payload)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, CommandError> {
        if !value.is_object() {
            return Err(CommandError::NotAnObject);
        }
        let raw: RawCommand = serde_json::from_value(value)?;

        let power = match raw.state.as_deref() {
            None => None,
            Some(s) if s.eq_ignore_ascii_case("on") => Some(true),
            Some(s) if s.eq_ignore_ascii_case("off") => Some(false),
            Some(s) => return Err(CommandError::BadState(s.to_string())),
        };
        let color = raw.color.map_or_else(ColorChange::default, |c| ColorChange {
            r: c.r.map(channel),
            g: c.g.map(channel),
            b: c.b.map(channel),
        });
        let brightness = raw.brightness.map(|v| Brightness::clamped(v.round() as i64));

        Ok(Self {
            power,
            color,
            brightness,
        })
    }
}

#[derive(Deserialize)]
struct RawCommand {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    color: Option<RawColor>,
    #[serde(default)]
    brightness: Option<f64>,
}

#[derive(Deserialize)]
struct RawColor {
    #[serde(default)]
    r: Option<f64>,
    #[serde(default)]
    g: Option<f64>,
    #[serde(default)]
    b: Option<f64>,
}

fn channel(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// What goes out on the state topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatePayload {
    pub state: &'static str,
    pub color: ColorPayload,
    pub brightness: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColorPayload {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl From<&LightState> for StatePayload {
    fn from(state: &LightState) -> Self {
        Self {
            state: if state.power { "ON" } else { "OFF" },
            color: ColorPayload {
                r: state.color.r,
                g: state.color.g,
                b: state.color.b,
            },
            brightness: state.brightness.percent(),
        }
    }
}

impl StatePayload {
    pub fn to_json(&self) -> String {
        // only strings and integers inside, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_command() {
        let cmd = LightCommand::parse(
            br#"{"state":"ON","color":{"r":255,"g":0,"b":0},"brightness":80}"#,
        )
        .unwrap();
        assert_eq!(cmd.power, Some(true));
        assert_eq!(cmd.color.apply_to(Rgb::WHITE), Rgb::new(255, 0, 0));
        assert_eq!(cmd.brightness, Brightness::new(80));
    }

    #[test]
    fn missing_fields_stay_unset() {
        let cmd = LightCommand::parse(br#"{"brightness":10,"transition":2}"#).unwrap();
        assert_eq!(cmd.power, None);
        assert!(cmd.color.is_empty());
        assert_eq!(cmd.brightness, Brightness::new(10));
    }

    #[test]
    fn state_is_case_insensitive() {
        assert_eq!(LightCommand::parse(br#"{"state":"on"}"#).unwrap().power, Some(true));
        assert_eq!(LightCommand::parse(br#"{"state":"Off"}"#).unwrap().power, Some(false));
    }

    #[test]
    fn unknown_state_is_rejected() {
        assert!(matches!(
            LightCommand::parse(br#"{"state":"TOGGLE"}"#),
            Err(CommandError::BadState(s)) if s == "TOGGLE"
        ));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(LightCommand::parse(br#"{"state":}"#), Err(CommandError::Json(_))));
        assert!(matches!(LightCommand::parse(b"[1,2]"), Err(CommandError::NotAnObject)));
        assert!(LightCommand::parse(br#"{"brightness":"high"}"#).is_err());
        assert!(LightCommand::parse(br#"{"color":"red"}"#).is_err());
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let cmd = LightCommand::parse(
            br#"{"color":{"r":300,"g":-5,"b":127.6},"brightness":250}"#,
        )
        .unwrap();
        assert_eq!(cmd.color.apply_to(Rgb::WHITE), Rgb::new(255, 0, 128));
        assert_eq!(cmd.brightness, Some(Brightness::MAX));
    }

    #[test]
    fn partial_color_keeps_other_channels() {
        let cmd = LightCommand::parse(br#"{"color":{"g":10}}"#).unwrap();
        assert_eq!(cmd.color.apply_to(Rgb::new(1, 2, 3)), Rgb::new(1, 10, 3));
    }

    #[test]
    fn state_payload_mirrors_the_command_schema() {
        let state = LightState {
            power: true,
            color: Rgb::new(255, 0, 0),
            brightness: Brightness::new(80).unwrap(),
        };
        assert_eq!(
            StatePayload::from(&state).to_json(),
            r#"{"state":"ON","color":{"r":255,"g":0,"b":0},"brightness":80}"#
        );
    }
}
