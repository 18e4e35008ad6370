use std::time::Duration;

use anyhow::Error;
use led_reactor::prelude::*;
use log::info;

/// Host stand-in for the firmware main loop
const TICK_PERIOD: Duration = Duration::from_millis(1);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting config...");
    let config = Config::load()?;

    let node_id = config.mesh.node_id.unwrap_or_else(rand::random);
    let mesh = UdpMesh::bind(&config.mesh, node_id)?;

    let mut device = DeviceContext::new(&config.node, mesh, LogDriver::new(), HostPlatform);

    // Cycle once to signal a boot
    device.boot(config.node.boot_cycle);

    let mut interval = tokio::time::interval(TICK_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => device.tick(),
            _ = &mut ctrl_c => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
