use log::{debug, info, warn};

use crate::{
    config::NodeConfig,
    engine::EffectEngine,
    mesh::{Mesh, MeshEvent},
    node::{NodeAction, NodeController},
    output::{ChannelDriver, Platform},
};

/// Outcome of one cooperative tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Restart,
}

/// Everything a bulb owns, built once at startup.
pub struct DeviceContext<M: Mesh, D: ChannelDriver, P: Platform> {
    mesh: M,
    engine: EffectEngine<D>,
    controller: NodeController,
    platform: P,
}

impl<M: Mesh, D: ChannelDriver, P: Platform> DeviceContext<M, D, P> {
    pub fn new(config: &NodeConfig, mesh: M, driver: D, platform: P) -> Self {
        info!("Initializing node {:#010x}", mesh.node_id());
        let mut engine = EffectEngine::new(driver, config);
        engine.update_clock(mesh.node_time());
        Self {
            mesh,
            engine,
            controller: NodeController::new(config),
            platform,
        }
    }

    pub fn mesh(&self) -> &M {
        &self.mesh
    }

    pub fn mesh_mut(&mut self) -> &mut M {
        &mut self.mesh
    }

    pub fn engine(&self) -> &EffectEngine<D> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut EffectEngine<D> {
        &mut self.engine
    }

    pub fn controller(&self) -> &NodeController {
        &self.controller
    }

    /// Show the default target, then run the boot cycle on top of it.
    pub fn boot(&mut self, cycle_seconds: f64) {
        let target = self.engine.default_target().to_vec();
        if let Err(e) = self.engine.set(&target, true) {
            warn!("Could not set initial target: {}", e);
        }
        if let Err(e) = self.engine.cycle(cycle_seconds) {
            warn!("Could not schedule boot cycle: {}", e);
        }
    }

    /// Service the mesh, apply whatever arrived, then advance the engine.
    pub fn step(&mut self) -> Tick {
        self.engine.update_clock(self.mesh.node_time());

        while let Some(event) = self.mesh.poll() {
            let action = match event {
                MeshEvent::Received { from, payload } => {
                    debug!("Receiving {} bytes from {}", payload.len(), from);
                    self.controller.handle_payload(&mut self.engine, &payload)
                }
                MeshEvent::ConnectionsChanged => self.controller.monitor(&self.mesh.node_list()),
            };
            match action {
                Some(NodeAction::Broadcast(bytes)) => {
                    self.mesh.send_broadcast(&bytes);
                }
                Some(NodeAction::Restart) => return Tick::Restart,
                None => {}
            }
        }

        self.engine.tick();
        self.controller.tick_status(&self.engine);
        Tick::Continue
    }

    /// [`step`](Self::step), restarting the device when asked to.
    pub fn tick(&mut self) {
        if self.step() == Tick::Restart {
            self.engine.clear_effects(false);
            self.platform.restart();
        }
    }
}
