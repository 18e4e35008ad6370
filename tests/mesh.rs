//! Bridge and bulbs wired together over an in-process mesh.

use common::ChannelLayout;
use led_reactor::prelude::*;

const BRIDGE_ID: u32 = 1;

type Bulb = DeviceContext<MemoryMesh, RecordingDriver, HostPlatform>;

struct Harness {
    hub: MemoryHub,
    router: BridgeRouter,
    bridge: MemoryMesh,
}

impl Harness {
    fn new() -> Self {
        let hub = MemoryHub::new();
        let bridge = hub.join(BRIDGE_ID);
        Self {
            router: BridgeRouter::new(&MeshConfig::default(), &BridgeConfig::default()),
            hub,
            bridge,
        }
    }

    fn bulb(&self, id: u32, config: &NodeConfig) -> Bulb {
        DeviceContext::new(config, self.hub.join(id), RecordingDriver::default(), HostPlatform)
    }

    /// Route an MQTT message and carry out the mesh side of the result.
    fn mqtt(&mut self, topic: &str, payload: &[u8]) -> Vec<BridgeAction> {
        let actions = self
            .router
            .handle_mqtt(topic, payload, self.bridge.node_time());
        for action in &actions {
            if let BridgeAction::Broadcast(bytes) = action {
                self.bridge.send_broadcast(bytes);
            }
        }
        actions
    }

    /// Relay everything the bridge heard on the mesh.
    fn relay(&mut self) -> Vec<BridgeAction> {
        let mut actions = Vec::new();
        while let Some(event) = self.bridge.poll() {
            if let MeshEvent::Received { from, payload } = event {
                actions.extend(self.router.handle_mesh(from, &payload));
            }
        }
        actions
    }
}

fn rgb() -> NodeConfig {
    NodeConfig {
        layout: ChannelLayout::Rgb,
        seed: Some(11),
        ..Default::default()
    }
}

#[test]
fn test_blink_reaches_bulb_as_five_segments() {
    let mut harness = Harness::new();
    harness.hub.set_time(10_000_000);
    let mut bulb = harness.bulb(2, &rgb());
    assert_eq!(bulb.engine().output(), &[0, 0, 0]);

    harness.mqtt(
        "reactor/to/0x0000/broadcast",
        br#"{"fx":[1.0,false,0,0,0,5,true,3,0,0,0,0,0,0]}"#,
    );
    assert_eq!(bulb.step(), Tick::Continue);

    let segments = bulb.engine().segments();
    let uids: Vec<_> = segments.iter().map(|s| s.uid).collect();
    assert_eq!(uids, vec![5, 6, 7, 8, 9]);
    let starts: Vec<_> = segments.iter().map(|s| s.start_absolute).collect();
    assert_eq!(
        starts,
        vec![10_000_000, 11_000_000, 12_000_000, 13_000_000, 14_000_000]
    );
}

#[test]
fn test_blink_plays_out() {
    let mut harness = Harness::new();
    let mut bulb = harness.bulb(2, &rgb());
    harness.mqtt(
        "reactor/to/0x0000/broadcast",
        br#"{"rgbw":[100,100,100,0],"fx":[1.0,false,0,0,0,5,true,2,0,0,0,0,0,0]}"#,
    );
    bulb.step();

    harness.hub.set_time(500_000);
    bulb.step();
    assert_eq!(bulb.engine().output(), &[50, 50, 50]);

    // Inverse leg is a zero-length fade to the inverse target
    harness.hub.set_time(1_000_000);
    bulb.step();
    assert_eq!(bulb.engine().output(), &[0, 0, 0]);

    harness.hub.set_time(2_500_000);
    bulb.step();
    assert_eq!(bulb.engine().output(), &[50, 50, 50]);

    // Last leg holds for the carried width, then everything is done
    harness.hub.set_time(3_500_000);
    bulb.step();
    assert_eq!(bulb.engine().segments().len(), 1);
    harness.hub.set_time(4_000_001);
    bulb.step();
    assert!(bulb.engine().segments().is_empty());
    assert_eq!(bulb.engine().output(), &[100, 100, 100]);
}

#[test]
fn test_other_subgroup_never_reaches_mesh() {
    let mut harness = Harness::new();
    let mut bulb = harness.bulb(2, &rgb());
    let actions = harness.mqtt("reactor/to/0x0001/broadcast", br#"{"rgb":[5,5,5]}"#);
    assert!(actions.is_empty());
    bulb.step();
    assert_eq!(bulb.engine().output(), &[0, 0, 0]);

    harness.mqtt("reactor/to/0x0000/broadcast", br#"{"rgb":[5,5,5]}"#);
    bulb.step();
    assert_eq!(bulb.engine().output(), &[5, 5, 5]);
}

#[test]
fn test_malformed_bytes_forwarded_unmodified() {
    let mut harness = Harness::new();
    let mut listener = harness.hub.join(9);
    harness.mqtt("reactor/to/0x0000/broadcast", b"{not json");
    assert_eq!(
        listener.poll(),
        Some(MeshEvent::Received {
            from: BRIDGE_ID,
            payload: b"{not json".to_vec(),
        })
    );
}

#[test]
fn test_bulb_drops_malformed_by_default() {
    let mut harness = Harness::new();
    let mut bulb = harness.bulb(2, &rgb());
    harness.mqtt("reactor/to/0x0000/broadcast", b"{not json");
    assert_eq!(bulb.step(), Tick::Continue);
    // Nothing echoed back to the bridge
    assert!(harness.relay().is_empty());
}

#[test]
fn test_empty_command_not_forwarded() {
    let mut harness = Harness::new();
    let mut listener = harness.hub.join(9);
    let actions = harness.mqtt(
        "reactor/to/0x0000/broadcast",
        br#"{"rgbw":null,"fx":null,"time":true}"#,
    );
    assert_eq!(actions.len(), 1);
    assert!(matches!(actions[0], BridgeAction::Publish { .. }));
    assert_eq!(listener.poll(), None);
}

#[test]
fn test_restart_command_stops_bulb() {
    let mut harness = Harness::new();
    let mut bulb = harness.bulb(2, &rgb());
    harness.mqtt(
        "reactor/to/0x0000/broadcast",
        br#"{"fx":[1.0,false,30,0,0,5,false,1,0,0,0,0,0,0]}"#,
    );
    bulb.step();
    assert_eq!(bulb.engine().segments().len(), 1);

    harness.mqtt("reactor/to/0x0000/broadcast", br#"{"restart":true}"#);
    assert_eq!(bulb.step(), Tick::Restart);
    assert!(bulb.engine().segments().is_empty());
}

#[test]
fn test_passthrough_bulb_echoes_to_bridge() {
    let mut harness = Harness::new();
    let config = NodeConfig {
        malformed: MalformedPolicy::Passthrough,
        ..rgb()
    };
    let mut bulb = harness.bulb(2, &config);
    harness.mqtt("reactor/to/0x0000/broadcast", b"{not json");
    bulb.step();

    assert_eq!(
        harness.relay(),
        vec![BridgeAction::Publish {
            topic: "reactor/from/2".into(),
            payload: b"{not json".to_vec(),
        }]
    );
}

#[test]
fn test_bulb_resets_after_losing_mesh() {
    let harness = Harness::new();
    let config = NodeConfig {
        reset_on_disconnect: true,
        ..rgb()
    };
    let mut bulb = harness.bulb(2, &config);
    assert_eq!(bulb.step(), Tick::Continue);

    // A peer joining marks the bulb connected
    let _peer = harness.hub.join(3);
    assert_eq!(bulb.step(), Tick::Continue);
    assert!(bulb.controller().connected());

    harness.hub.leave(3);
    assert_eq!(bulb.step(), Tick::Continue);
    harness.hub.leave(BRIDGE_ID);
    assert_eq!(bulb.step(), Tick::Restart);
}

#[test]
fn test_boot_cycle_returns_to_default() {
    let harness = Harness::new();
    let config = NodeConfig {
        initial_target: vec![0, 0, 40],
        ..rgb()
    };
    let mut bulb = harness.bulb(2, &config);
    bulb.boot(2.0);
    assert_eq!(bulb.engine().output(), &[0, 0, 40]);

    harness.hub.set_time(500_000);
    bulb.step();
    assert_eq!(bulb.engine().output(), &[1023, 0, 0]);

    harness.hub.set_time(2_000_000);
    bulb.step();
    assert_eq!(bulb.engine().output(), &[0, 0, 40]);
    assert!(bulb.engine().segments().is_empty());
}
