//! Bulb-side command dispatch.

use common::{Command, EffectSpec};
use log::{debug, info, warn};

use crate::{
    config::{MalformedPolicy, NodeConfig},
    engine::EffectEngine,
    expander,
    output::ChannelDriver,
};

/// Side effects the controller asks its owner to carry out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeAction {
    /// Rebroadcast these bytes on the mesh
    Broadcast(Vec<u8>),
    /// Hard restart, effects are already cleared
    Restart,
}

#[derive(Debug)]
pub struct NodeController {
    verbose: bool,
    status_interval: u32,
    status_index: u32,
    reset_on_disconnect: bool,
    connected: bool,
    malformed: MalformedPolicy,
    last_status: Option<String>,
}

impl NodeController {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            verbose: config.verbose,
            status_interval: config.status_interval.max(1),
            status_index: 0,
            reset_on_disconnect: config.reset_on_disconnect,
            connected: false,
            malformed: config.malformed,
            last_status: None,
        }
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Most recent status line emitted.
    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    /// Decode and apply a payload received from the mesh.
    pub fn handle_payload<D: ChannelDriver>(
        &mut self,
        engine: &mut EffectEngine<D>,
        payload: &[u8],
    ) -> Option<NodeAction> {
        match Command::decode(payload) {
            Ok(command) => self.dispatch(engine, &command),
            Err(e) => match self.malformed {
                MalformedPolicy::Passthrough => {
                    debug!("Passing through undecodable message: {}", e);
                    Some(NodeAction::Broadcast(payload.to_vec()))
                }
                MalformedPolicy::Drop => {
                    warn!("Message parsing failed: {}", e);
                    None
                }
            },
        }
    }

    /// Apply a decoded command.
    pub fn dispatch<D: ChannelDriver>(
        &mut self,
        engine: &mut EffectEngine<D>,
        command: &Command,
    ) -> Option<NodeAction> {
        if command.is_test() {
            info!("Test message received");
            engine.test();
            self.status(engine);
        }
        if command.is_restart() {
            engine.clear_effects(false);
            info!("Resetting");
            return Some(NodeAction::Restart);
        }
        if command.is_clear() {
            engine.clear_effects(true);
        }
        if command.is_status() {
            let last = self.verbose;
            self.verbose = true;
            self.status(engine);
            self.verbose = last;
        }
        if command.is_save() {
            engine.save();
        }
        if command.is_recall() {
            engine.recall();
        }

        let channels = match command.channels.as_deref() {
            Some(channels) => self.channels(engine, channels),
            None => None,
        };

        if let Some(effect) = &command.effect {
            let target = channels.unwrap_or_else(|| engine.output().to_vec());
            self.apply_effect(engine, effect, &target);
        } else if let Some(target) = channels {
            if engine.looping() == -1 {
                debug!("Updating looping effect targets");
                if let Err(e) = engine.update_effects(&target) {
                    warn!("Could not update looping effects: {}", e);
                }
            } else if let Err(e) = engine.set(&target, false) {
                warn!("Could not set channels: {}", e);
            } else {
                debug!("Set received values {:?}", target);
            }
        }
        None
    }

    /// Device-sized target, or None when too few channels were sent.
    fn channels<D: ChannelDriver>(
        &self,
        engine: &EffectEngine<D>,
        channels: &[u16],
    ) -> Option<Vec<u16>> {
        let count = engine.channels();
        if channels.len() < count {
            warn!(
                "Ignoring {} channel values, device has {}",
                channels.len(),
                count
            );
            return None;
        }
        Some(channels[..count].to_vec())
    }

    fn apply_effect<D: ChannelDriver>(
        &self,
        engine: &mut EffectEngine<D>,
        effect: &EffectSpec,
        target: &[u16],
    ) {
        if effect.inverse.len() != engine.channels() {
            warn!(
                "Effect has {} inverse channels, device has {}",
                effect.inverse.len(),
                engine.channels()
            );
            return;
        }
        // Zero means now, anything else is absolute mesh time
        let start = if effect.start > 0.0 {
            effect.start.round() as u32
        } else {
            engine.clock().now()
        };
        let created = expander::expand(engine, effect, target, start);
        debug!("Set effect with {} segments", created.len());
    }

    /// Log a status line if verbose.
    pub fn status<D: ChannelDriver>(&mut self, engine: &EffectEngine<D>) {
        if !self.verbose {
            return;
        }
        let line = format!("{}\tMesh Time: {}", engine.status(), engine.clock().now());
        info!("{}", line);
        self.last_status = Some(line);
    }

    /// Called once per tick for the periodic status line.
    pub fn tick_status<D: ChannelDriver>(&mut self, engine: &EffectEngine<D>) {
        if !self.verbose {
            return;
        }
        self.status_index = self.status_index.wrapping_add(1);
        if self.status_index % self.status_interval == 0 {
            self.status(engine);
        }
    }

    /// Track the node list after a connection change.
    pub fn monitor(&mut self, nodes: &[u32]) -> Option<NodeAction> {
        if !nodes.is_empty() {
            if !self.connected {
                info!("Connected to {} nodes", nodes.len());
            }
            self.connected = true;
        } else if self.connected && self.reset_on_disconnect {
            warn!("Lost every mesh connection");
            return Some(NodeAction::Restart);
        }
        None
    }
}
