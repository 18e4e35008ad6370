//! Bridge-side routing between MQTT and the mesh.
//!
//! The router is pure: every inbound message turns into a list of
//! [`BridgeAction`]s that the server carries out against the broker and the
//! mesh, so it can be driven from tests without either.

use common::{absolute, Command};
use log::{debug, info, warn};

use crate::config::{BridgeConfig, MalformedPolicy, MeshConfig};

/// Recipient that makes the bridge forward a command to the whole mesh.
pub const BROADCAST_RECIPIENT: &str = "broadcast";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeAction {
    /// Broadcast these bytes on the mesh
    Broadcast(Vec<u8>),
    Publish { topic: String, payload: Vec<u8> },
    /// Restart the bridge process
    Restart,
}

#[derive(Debug, Clone)]
pub struct BridgeRouter {
    prefix: String,
    subgroup: String,
    hostname: String,
    deference_buffer: u32,
    malformed: MalformedPolicy,
}

impl BridgeRouter {
    pub fn new(mesh: &MeshConfig, bridge: &BridgeConfig) -> Self {
        Self {
            prefix: mesh.prefix.clone(),
            subgroup: mesh.subgroup.clone(),
            hostname: bridge.hostname.clone(),
            deference_buffer: bridge.deference_buffer,
            malformed: bridge.malformed,
        }
    }

    /// Filter to subscribe to on the broker.
    pub fn subscription(&self) -> String {
        format!("{}/to/#", self.prefix)
    }

    /// Topic the bridge publishes its own replies on.
    pub fn reply_topic(&self) -> String {
        self.from_topic(&self.hostname)
    }

    fn from_topic(&self, sender: &str) -> String {
        format!("{}/from/{}", self.prefix, sender)
    }

    fn reply(&self, message: impl Into<String>) -> BridgeAction {
        BridgeAction::Publish {
            topic: self.reply_topic(),
            payload: message.into().into_bytes(),
        }
    }

    /// Announce the bridge after the broker (re)connects.
    pub fn on_connect(&self) -> Vec<BridgeAction> {
        info!("Connected to broker, subscribing to {}", self.subscription());
        vec![self.reply("Initialized")]
    }

    /// Split `<prefix>/to/<subgroup>/<recipient>` by fixed offsets.
    ///
    /// Returns None when the topic is too short to hold a subgroup.
    pub fn parse_topic<'a>(&self, topic: &'a str) -> Option<(&'a str, &'a str)> {
        let group_start = self.prefix.len() + "/to/".len();
        let group_end = group_start + self.subgroup.len();
        let group = topic.get(group_start..group_end)?;
        let recipient = topic.get(group_end + 1..).unwrap_or("");
        Some((group, recipient))
    }

    /// Handle a message from the broker. `now` is the current mesh time.
    pub fn handle_mqtt(&self, topic: &str, payload: &[u8], now: u32) -> Vec<BridgeAction> {
        let Some((group, recipient)) = self.parse_topic(topic) else {
            debug!("Dropping message on short topic {}", topic);
            return Vec::new();
        };
        debug!("Subgroup: {}\tTarget: {}", group, recipient);
        if group != self.subgroup {
            debug!("Group mismatch");
            return Vec::new();
        }

        let mut command = match Command::decode(payload) {
            Ok(command) => command,
            Err(e) => {
                return match self.malformed {
                    MalformedPolicy::Passthrough => {
                        warn!("Message parsing failed, passing through: {}", e);
                        vec![BridgeAction::Broadcast(payload.to_vec())]
                    }
                    MalformedPolicy::Drop => {
                        warn!("Message parsing failed: {}", e);
                        Vec::new()
                    }
                };
            }
        };

        let mut actions = Vec::new();
        if command.is_test() {
            actions.push(self.reply("Remote bridge node test successful"));
        }
        if command.restart_bridge.unwrap_or(false) {
            info!("Bridge restart requested");
            actions.push(BridgeAction::Restart);
            return actions;
        }

        if let Some(effect) = command.effect.as_mut() {
            let start = absolute(now, effect.start, effect.duration, self.deference_buffer);
            debug!("Relative start {}s becomes {}", effect.start, start);
            effect.start = f64::from(start);
        }

        if command.status.is_some() {
            actions.push(self.reply(format!(
                "Status request received; absolute mesh time: {}",
                now
            )));
        } else if command.time.is_some() {
            actions.push(self.reply(now.to_string()));
        }
        // Answered here, never forwarded
        command.status = None;
        command.time = None;

        if !command.is_empty() && recipient == BROADCAST_RECIPIENT {
            let encoded = command.encode();
            debug!("Broadcasting {}", String::from_utf8_lossy(&encoded));
            actions.push(BridgeAction::Broadcast(encoded));
        }
        actions
    }

    /// Relay a mesh message to `<prefix>/from/<sender>`.
    pub fn handle_mesh(&self, from: u32, payload: &[u8]) -> Vec<BridgeAction> {
        debug!("Received from {}: {}", from, String::from_utf8_lossy(payload));
        vec![BridgeAction::Publish {
            topic: self.from_topic(&from.to_string()),
            payload: payload.to_vec(),
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn router() -> BridgeRouter {
        BridgeRouter::new(&MeshConfig::default(), &BridgeConfig::default())
    }

    fn broadcast_value(actions: &[BridgeAction]) -> Value {
        let bytes = actions
            .iter()
            .find_map(|a| match a {
                BridgeAction::Broadcast(bytes) => Some(bytes),
                _ => None,
            })
            .unwrap();
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_parse_topic() {
        let router = router();
        assert_eq!(
            router.parse_topic("reactor/to/0x0000/broadcast"),
            Some(("0x0000", "broadcast"))
        );
        assert_eq!(router.parse_topic("reactor/to/0x00"), None);
        assert_eq!(router.parse_topic("reactor/to/0x0000"), Some(("0x0000", "")));
    }

    #[test]
    fn test_subgroup_mismatch_dropped() {
        let actions = router().handle_mqtt("reactor/to/0x0001/broadcast", br#"{"test":true}"#, 0);
        assert!(actions.is_empty());
        assert!(router().handle_mqtt("reactor/to/", b"{}", 0).is_empty());
    }

    #[test]
    fn test_malformed_passthrough() {
        let actions = router().handle_mqtt("reactor/to/0x0000/broadcast", b"{oops", 0);
        assert_eq!(actions, vec![BridgeAction::Broadcast(b"{oops".to_vec())]);
    }

    #[test]
    fn test_empty_not_forwarded() {
        let actions = router().handle_mqtt("reactor/to/0x0000/broadcast", br#"{"unknown":1}"#, 0);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_only_broadcast_recipient_forwards() {
        let actions = router().handle_mqtt("reactor/to/0x0000/lamp-3", br#"{"rgbw":[1,2,3,4]}"#, 0);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_effect_start_rewritten() {
        let actions = router().handle_mqtt(
            "reactor/to/0x0000/broadcast",
            br#"{"fx":[1.0,false,2,0,0,5,true,3,0,0,0,0,0,0]}"#,
            1_000,
        );
        let value = broadcast_value(&actions);
        assert_eq!(value["fx"][2], Value::from(2_001_000u32));
        assert_eq!(value["rgbw"], Value::Null);
    }

    #[test]
    fn test_effect_start_collapses_near_rollover() {
        let now = u32::MAX - 3_000_000;
        let actions = router().handle_mqtt(
            "reactor/to/0x0000/broadcast",
            br#"{"fx":[1.0,false,0,0,0,5,true,1,0,0,0,0,0,0]}"#,
            now,
        );
        assert_eq!(broadcast_value(&actions)["fx"][2], Value::from(1u32));
    }

    #[test]
    fn test_status_answered_not_forwarded() {
        let router = router();
        let actions = router.handle_mqtt("reactor/to/0x0000/broadcast", br#"{"status":true}"#, 77);
        assert_eq!(
            actions,
            vec![BridgeAction::Publish {
                topic: "reactor/from/reactorBridge".into(),
                payload: b"Status request received; absolute mesh time: 77".to_vec(),
            }]
        );

        let actions = router.handle_mqtt(
            "reactor/to/0x0000/broadcast",
            br#"{"time":true,"rgbw":[1,1,1,1]}"#,
            78,
        );
        assert_eq!(actions.len(), 2);
        assert_eq!(
            actions[0],
            BridgeAction::Publish {
                topic: "reactor/from/reactorBridge".into(),
                payload: b"78".to_vec(),
            }
        );
        let value = broadcast_value(&actions);
        assert_eq!(value["status"], Value::Null);
        assert!(value.get("time").is_none());
    }

    #[test]
    fn test_test_flag_replies_and_forwards() {
        let actions = router().handle_mqtt("reactor/to/0x0000/broadcast", br#"{"test":true}"#, 0);
        assert_eq!(actions.len(), 2);
        assert_eq!(
            actions[0],
            BridgeAction::Publish {
                topic: "reactor/from/reactorBridge".into(),
                payload: b"Remote bridge node test successful".to_vec(),
            }
        );
        assert_eq!(broadcast_value(&actions)["test"], Value::Bool(true));
    }

    #[test]
    fn test_restart_bridge() {
        let actions = router().handle_mqtt(
            "reactor/to/0x0000/broadcast",
            br#"{"restartBridge":true,"rgbw":[1,1,1,1]}"#,
            0,
        );
        assert_eq!(actions, vec![BridgeAction::Restart]);
    }

    #[test]
    fn test_mesh_relay() {
        assert_eq!(
            router().handle_mesh(42, b"hello"),
            vec![BridgeAction::Publish {
                topic: "reactor/from/42".into(),
                payload: b"hello".to_vec(),
            }]
        );
    }

    #[test]
    fn test_on_connect() {
        let router = router();
        assert_eq!(router.subscription(), "reactor/to/#");
        assert_eq!(
            router.on_connect(),
            vec![BridgeAction::Publish {
                topic: "reactor/from/reactorBridge".into(),
                payload: b"Initialized".to_vec(),
            }]
        );
    }
}
