use std::time::Duration;

use anyhow::Result;
use led_reactor::prelude::*;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, error, info, warn};

/// How often queued mesh traffic is drained
const MESH_POLL_PERIOD: Duration = Duration::from_millis(5);

/// Pause after a broker error before polling again
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bridge_server=debug,led_reactor=info".into()),
        )
        .init();

    let config = Config::load()?;
    let router = BridgeRouter::new(&config.mesh, &config.bridge);

    let node_id = config.mesh.node_id.unwrap_or_else(rand::random);
    let mut mesh = UdpMesh::bind(&config.mesh, node_id)?;

    let mut options = MqttOptions::new(
        config.bridge.hostname.clone(),
        config.bridge.broker.clone(),
        config.bridge.broker_port,
    );
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 20);

    info!(
        "Bridge {} relaying {} to {}:{}",
        config.bridge.hostname,
        router.subscription(),
        config.bridge.broker,
        config.bridge.broker_port
    );

    let mut mesh_poll = tokio::time::interval(MESH_POLL_PERIOD);
    mesh_poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        let actions = router.handle_mqtt(&p.topic, &p.payload, mesh.node_time());
                        perform(&client, &mut mesh, actions);
                    }

                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Subscriptions do not survive a reconnect
                        if let Err(e) = client.try_subscribe(router.subscription(), QoS::AtMostOnce) {
                            error!("Subscribe failed: {e}");
                        }
                        perform(&client, &mut mesh, router.on_connect());
                    }

                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("Broker disconnected");
                    }

                    Ok(_) => {}

                    Err(e) => {
                        error!("MQTT error: {e}");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }

            _ = mesh_poll.tick() => {
                while let Some(event) = mesh.poll() {
                    match event {
                        MeshEvent::Received { from, payload } => {
                            perform(&client, &mut mesh, router.handle_mesh(from, &payload));
                        }
                        MeshEvent::ConnectionsChanged => {
                            info!("Mesh connections changed, {} peers", mesh.node_list().len());
                        }
                    }
                }
            }

            _ = &mut ctrl_c => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Carry out the router's decisions. Never blocks on the broker, the event
/// loop runs on this same task.
fn perform(client: &AsyncClient, mesh: &mut UdpMesh, actions: Vec<BridgeAction>) {
    for action in actions {
        match action {
            BridgeAction::Broadcast(payload) => {
                debug!("Broadcast message sent ({} bytes)", payload.len());
                mesh.send_broadcast(&payload);
            }
            BridgeAction::Publish { topic, payload } => {
                debug!("Publishing to {topic}");
                if let Err(e) = client.try_publish(topic, QoS::AtMostOnce, false, payload) {
                    warn!("Publish failed: {e}");
                }
            }
            BridgeAction::Restart => HostPlatform.restart(),
        }
    }
}
