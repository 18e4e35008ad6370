//! JSON command protocol shared by bridge and bulbs.
//!
//! A command is a JSON object. Every field is optional and an absent field
//! means "leave this alone". When a command is re-encoded for the mesh, each
//! recognized key that is absent is written as an explicit `null` so that the
//! receivers can tell "untouched" apart from "present but zero".
//!
//! The `fx` field is a positional array and its order is part of the
//! protocol:
//!
//! ```text
//! [duration, recall, start, startVariation, durationVariation, uid,
//!  updateUID, repetitions, mode, width, loop, inverse...]
//! ```
//!
//! with three inverse values on RGB devices and four on RGBW devices.

use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::layout::{ChannelLayout, EFFECT_FIXED_FIELDS};

/// Keys that are forwarded to the mesh, in wire order.
pub const RECOGNIZED_KEYS: [&str; 8] = [
    "rgbw", "fx", "test", "status", "clear", "save", "recall", "restart",
];

/// Accepted spellings of the channel target, first match wins.
const CHANNEL_KEYS: [&str; 3] = ["rgbw", "rgb", "channels"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not valid JSON, or valid JSON of the wrong shape
    #[error("malformed command: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Malformed(err.to_string())
    }
}

fn malformed(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::Malformed(reason.into())
}

/// Decoded `fx` array.
#[derive(Clone, Debug, PartialEq)]
pub struct EffectSpec {
    /// Nominal segment duration in seconds
    pub duration: f64,
    /// Take the target from the recall slots instead of the command
    pub recall: bool,
    /// Relative seconds when sent to the bridge, absolute mesh microseconds
    /// once the bridge has rewritten it. Zero at a bulb means "now".
    pub start: f64,
    pub start_variation: f64,
    pub duration_variation: f64,
    pub uid: u32,
    /// Replace a live segment that has the same uid
    pub update_uid: bool,
    /// Forward/inverse cycles, zero is treated as one
    pub repetitions: u32,
    /// 0 = linear fade, 1 = square pulse
    pub mode: i32,
    /// Hold after each segment in seconds, zero derives it from the duration
    pub width: f64,
    /// 0 = play once, >0 = extra cycles, <0 = forever
    pub loop_count: i32,
    /// Target for the odd legs of a repeated effect
    pub inverse: Vec<u16>,
}

impl EffectSpec {
    /// Device layout implied by the inverse target length.
    pub fn layout(&self) -> Option<ChannelLayout> {
        ChannelLayout::from_effect_arity(EFFECT_FIXED_FIELDS + self.inverse.len())
    }

    fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let fields = value
            .as_array()
            .ok_or_else(|| malformed("fx must be an array"))?;
        if ChannelLayout::from_effect_arity(fields.len()).is_none() {
            return Err(malformed(format!(
                "fx must have 14 or 15 fields, got {}",
                fields.len()
            )));
        }

        let inverse = fields[EFFECT_FIXED_FIELDS..]
            .iter()
            .map(|v| channel_value(v, "fx.inverse"))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            duration: number(&fields[0], "fx.duration")?,
            recall: truthy(&fields[1], "fx.recall")?,
            start: number(&fields[2], "fx.start")?,
            start_variation: number(&fields[3], "fx.startVariation")?,
            duration_variation: number(&fields[4], "fx.durationVariation")?,
            uid: unsigned(&fields[5], "fx.uid")?,
            update_uid: truthy(&fields[6], "fx.updateUID")?,
            repetitions: unsigned(&fields[7], "fx.repetitions")?,
            mode: signed(&fields[8], "fx.mode")?,
            width: number(&fields[9], "fx.width")?,
            loop_count: signed(&fields[10], "fx.loop")?,
            inverse,
        })
    }

    fn to_value(&self) -> Value {
        let mut fields = vec![
            float(self.duration),
            Value::Bool(self.recall),
            start_value(self.start),
            float(self.start_variation),
            float(self.duration_variation),
            Value::from(self.uid),
            Value::Bool(self.update_uid),
            Value::from(self.repetitions),
            Value::from(self.mode),
            float(self.width),
            Value::from(self.loop_count),
        ];
        fields.extend(self.inverse.iter().map(|&v| Value::from(v)));
        Value::Array(fields)
    }
}

/// A decoded command message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Command {
    pub channels: Option<Vec<u16>>,
    pub effect: Option<EffectSpec>,
    pub test: Option<bool>,
    pub status: Option<bool>,
    pub clear: Option<bool>,
    pub save: Option<bool>,
    pub recall: Option<bool>,
    pub restart: Option<bool>,
    /// Bridge only: reply with the bare mesh time
    pub time: Option<bool>,
    /// Bridge only: restart the bridge itself
    pub restart_bridge: Option<bool>,
}

impl Command {
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let Value::Object(map) = value else {
            return Err(malformed("command must be a JSON object"));
        };

        let channels = CHANNEL_KEYS
            .iter()
            .find_map(|key| present(&map, key))
            .map(|v| {
                v.as_array()
                    .ok_or_else(|| malformed("channels must be an array"))?
                    .iter()
                    .map(|c| channel_value(c, "channels"))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        let effect = present(&map, "fx")
            .map(EffectSpec::from_value)
            .transpose()?;

        Ok(Self {
            channels,
            effect,
            test: flag(&map, "test")?,
            status: flag(&map, "status")?,
            clear: flag(&map, "clear")?,
            save: flag(&map, "save")?,
            recall: flag(&map, "recall")?,
            restart: flag(&map, "restart")?,
            time: flag(&map, "time")?,
            restart_bridge: flag(&map, "restartBridge")?,
        })
    }

    /// JSON object with every recognized key, absent ones as `null`.
    pub fn to_value(&self) -> Value {
        let flag = |f: Option<bool>| f.map(Value::Bool).unwrap_or(Value::Null);

        let mut map = Map::new();
        map.insert(
            "rgbw".into(),
            self.channels
                .as_ref()
                .map(|c| Value::Array(c.iter().map(|&v| Value::from(v)).collect()))
                .unwrap_or(Value::Null),
        );
        map.insert(
            "fx".into(),
            self.effect
                .as_ref()
                .map(EffectSpec::to_value)
                .unwrap_or(Value::Null),
        );
        map.insert("test".into(), flag(self.test));
        map.insert("status".into(), flag(self.status));
        map.insert("clear".into(), flag(self.clear));
        map.insert("save".into(), flag(self.save));
        map.insert("recall".into(), flag(self.recall));
        map.insert("restart".into(), flag(self.restart));
        Value::Object(map)
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_value().to_string().into_bytes()
    }

    /// True when every recognized key is absent, so the encoding is all nulls.
    pub fn is_empty(&self) -> bool {
        self.channels.is_none()
            && self.effect.is_none()
            && self.test.is_none()
            && self.status.is_none()
            && self.clear.is_none()
            && self.save.is_none()
            && self.recall.is_none()
            && self.restart.is_none()
    }

    pub fn is_test(&self) -> bool {
        self.test.unwrap_or(false)
    }

    pub fn is_status(&self) -> bool {
        self.status.unwrap_or(false)
    }

    pub fn is_clear(&self) -> bool {
        self.clear.unwrap_or(false)
    }

    pub fn is_save(&self) -> bool {
        self.save.unwrap_or(false)
    }

    pub fn is_recall(&self) -> bool {
        self.recall.unwrap_or(false)
    }

    pub fn is_restart(&self) -> bool {
        self.restart.unwrap_or(false)
    }
}

/// True when an encoded payload carries nothing but nulls for the
/// recognized keys. Payloads that are not JSON objects are never empty.
pub fn is_empty_payload(bytes: &[u8]) -> bool {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => RECOGNIZED_KEYS.iter().all(|key| present(&map, key).is_none()),
        _ => false,
    }
}

fn present<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).filter(|v| !v.is_null())
}

fn flag(map: &Map<String, Value>, key: &str) -> Result<Option<bool>, ProtocolError> {
    present(map, key).map(|v| truthy(v, key)).transpose()
}

fn truthy(value: &Value, field: &str) -> Result<bool, ProtocolError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        _ => Err(malformed(format!("{field} must be a boolean"))),
    }
}

fn number(value: &Value, field: &str) -> Result<f64, ProtocolError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| malformed(format!("{field} is not representable"))),
        Value::Bool(b) => Ok(f64::from(u8::from(*b))),
        _ => Err(malformed(format!("{field} must be a number"))),
    }
}

fn unsigned(value: &Value, field: &str) -> Result<u32, ProtocolError> {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).map_err(|_| malformed(format!("{field} out of range")));
    }
    let n = number(value, field)?;
    if !(0.0..=f64::from(u32::MAX)).contains(&n) {
        return Err(malformed(format!("{field} out of range")));
    }
    Ok(n as u32)
}

fn signed(value: &Value, field: &str) -> Result<i32, ProtocolError> {
    if let Some(n) = value.as_i64() {
        return i32::try_from(n).map_err(|_| malformed(format!("{field} out of range")));
    }
    let n = number(value, field)?;
    if !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&n) {
        return Err(malformed(format!("{field} out of range")));
    }
    Ok(n as i32)
}

fn channel_value(value: &Value, field: &str) -> Result<u16, ProtocolError> {
    let n = unsigned(value, field)?;
    u16::try_from(n).map_err(|_| malformed(format!("{field} value {n} out of range")))
}

fn float(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Absolute starts are whole microseconds and go out as integers.
fn start_value(start: f64) -> Value {
    if start.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&start) {
        Value::from(start as u32)
    } else {
        float(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blink() -> EffectSpec {
        EffectSpec {
            duration: 1.0,
            recall: false,
            start: 0.0,
            start_variation: 0.0,
            duration_variation: 0.0,
            uid: 5,
            update_uid: true,
            repetitions: 3,
            mode: 0,
            width: 0.0,
            loop_count: 0,
            inverse: vec![0, 0, 0],
        }
    }

    #[test]
    fn test_decode_rgb_effect() {
        let command =
            Command::decode(br#"{"fx":[1.0,false,0,0,0,5,true,3,0,0,0,0,0,0]}"#).unwrap();
        let effect = command.effect.unwrap();
        assert_eq!(effect, blink());
        assert_eq!(effect.layout(), Some(ChannelLayout::Rgb));
        assert_eq!(command.channels, None);
        assert_eq!(command.test, None);
    }

    #[test]
    fn test_decode_rgbw_effect_with_numeric_booleans() {
        let command =
            Command::decode(br#"{"fx":[0.5,1,2.5,0.1,0.2,7,0,2,1,0.25,-1,1,2,3,4]}"#).unwrap();
        let effect = command.effect.unwrap();
        assert!(effect.recall);
        assert!(!effect.update_uid);
        assert_eq!(effect.start, 2.5);
        assert_eq!(effect.mode, 1);
        assert_eq!(effect.loop_count, -1);
        assert_eq!(effect.inverse, vec![1, 2, 3, 4]);
        assert_eq!(effect.layout(), Some(ChannelLayout::Rgbw));
    }

    #[test]
    fn test_decode_channel_aliases() {
        let rgbw = Command::decode(br#"{"rgbw":[1,2,3,4]}"#).unwrap();
        assert_eq!(rgbw.channels, Some(vec![1, 2, 3, 4]));
        let rgb = Command::decode(br#"{"rgb":[1,2,3]}"#).unwrap();
        assert_eq!(rgb.channels, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_null_decodes_as_absent() {
        let command = Command::decode(br#"{"rgbw":null,"test":null,"clear":false}"#).unwrap();
        assert_eq!(command.channels, None);
        assert_eq!(command.test, None);
        assert_eq!(command.clear, Some(false));
    }

    #[test]
    fn test_flags_are_truthy() {
        let command = Command::decode(br#"{"test":1,"status":0,"save":true}"#).unwrap();
        assert!(command.is_test());
        assert!(!command.is_status());
        assert_eq!(command.status, Some(false));
        assert!(command.is_save());
        assert!(!command.is_recall());
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            Command::decode(b"{not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(Command::decode(b"[1,2,3]").is_err());
        assert!(Command::decode(br#"{"fx":[1,2,3]}"#).is_err());
        assert!(Command::decode(br#"{"fx":"fast"}"#).is_err());
        assert!(Command::decode(br#"{"rgbw":[70000,0,0,0]}"#).is_err());
        assert!(Command::decode(br#"{"test":"yes"}"#).is_err());
    }

    #[test]
    fn test_round_trip_keeps_present_and_absent_keys() {
        let command = Command {
            channels: Some(vec![10, 20, 30, 40]),
            effect: Some(blink()),
            clear: Some(false),
            ..Default::default()
        };

        let decoded = Command::decode(&command.encode()).unwrap();
        assert_eq!(decoded, command);
        assert_eq!(decoded.save, None);
        assert_eq!(decoded.restart, None);
    }

    #[test]
    fn test_encode_writes_explicit_nulls() {
        let command = Command {
            test: Some(true),
            ..Default::default()
        };
        let value: Value = serde_json::from_slice(&command.encode()).unwrap();
        let map = value.as_object().unwrap();
        assert_eq!(map.len(), RECOGNIZED_KEYS.len());
        assert_eq!(map["test"], Value::Bool(true));
        assert_eq!(map["rgbw"], Value::Null);
        assert_eq!(map["fx"], Value::Null);
    }

    #[test]
    fn test_empty_command() {
        let command = Command {
            time: Some(true),
            ..Default::default()
        };
        assert!(command.is_empty());
        assert!(is_empty_payload(&command.encode()));

        let command = Command {
            save: Some(false),
            ..Default::default()
        };
        assert!(!command.is_empty());
        assert!(!is_empty_payload(&command.encode()));
        assert!(!is_empty_payload(b"{not json"));
    }

    #[test]
    fn test_absolute_start_encodes_as_integer() {
        let mut effect = blink();
        effect.start = 4_000_123.0;
        let command = Command {
            effect: Some(effect),
            ..Default::default()
        };
        let value: Value = serde_json::from_slice(&command.encode()).unwrap();
        assert_eq!(value["fx"][2], Value::from(4_000_123u32));
    }
}
