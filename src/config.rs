use std::{net::Ipv4Addr, path::Path};

use anyhow::Error;
use common::{ChannelLayout, DEFAULT_DEFERENCE_BUFFER_US};
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "REACTOR_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.ron";

#[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub mesh: MeshConfig,
    pub bridge: BridgeConfig,
}

/// What a receiver does with a payload it cannot decode.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum MalformedPolicy {
    /// Rebroadcast the raw bytes unchanged
    Passthrough,
    /// Log and discard
    #[default]
    Drop,
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub layout: ChannelLayout,
    /// PWM bit depth; channel values are clamped to `2^bits - 1`
    pub resolution_bits: u8,
    pub verbose: bool,
    /// Ticks between periodic status lines while verbose
    pub status_interval: u32,
    /// Restart when the node list empties after having been connected
    pub reset_on_disconnect: bool,
    pub malformed: MalformedPolicy,
    pub max_segments: usize,
    /// Recall slots kept before the oldest is forgotten
    pub recall_slots: usize,
    /// Fade used by a plain channel set, in seconds
    pub set_fade: f64,
    /// Length of the boot cycle, zero disables it
    pub boot_cycle: f64,
    pub initial_target: Vec<u16>,
    /// Seed for start/duration variation, random when absent
    pub seed: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            layout: ChannelLayout::Rgbw,
            resolution_bits: 10,
            verbose: false,
            status_interval: 1_000_000,
            reset_on_disconnect: false,
            malformed: MalformedPolicy::Drop,
            max_segments: 64,
            recall_slots: 64,
            set_fade: 0.0,
            boot_cycle: 2.5,
            // Dimmed white, full power runs too hot
            initial_target: vec![0, 0, 0, 255],
            seed: None,
        }
    }
}

impl NodeConfig {
    pub fn max_value(&self) -> u16 {
        match self.resolution_bits {
            0 => 0,
            bits if bits >= 16 => u16::MAX,
            bits => (1u16 << bits) - 1,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MeshConfig {
    pub prefix: String,
    pub subgroup: String,
    pub port: u16,
    pub group: Ipv4Addr,
    /// Seconds without traffic before a peer leaves the node list
    pub peer_expiry: u64,
    /// Fixed node id, random when absent
    pub node_id: Option<u32>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            prefix: "reactor".into(),
            subgroup: "0x0000".into(),
            port: 20002,
            group: Ipv4Addr::new(239, 16, 72, 1),
            peer_expiry: 30,
            node_id: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub hostname: String,
    pub broker: String,
    pub broker_port: u16,
    pub deference_buffer: u32,
    pub malformed: MalformedPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hostname: "reactorBridge".into(),
            broker: "172.24.1.1".into(),
            broker_port: 1883,
            deference_buffer: DEFAULT_DEFERENCE_BUFFER_US,
            malformed: MalformedPolicy::Passthrough,
        }
    }
}

impl Config {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Config, Error> {
        let config = std::fs::read_to_string(path)?;
        let config: Config = ron::from_str(&config)?;
        Ok(config)
    }

    /// Load from `$REACTOR_CONFIG` or `config.ron`, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Config, Error> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        if !Path::new(&path).exists() {
            log::info!("No config at {}, using defaults", path);
            return Ok(Config::default());
        }
        Self::load_from(path)
    }
}
