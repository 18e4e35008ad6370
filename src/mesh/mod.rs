//! Mesh transport seam.
//!
//! The core only needs a node id, a shared microsecond clock, broadcast, and
//! a queue of inbound events. Real firmware plugs its mesh stack in here; the
//! host gets [`UdpMesh`] and tests get [`MemoryMesh`].

mod memory;
mod udp;

pub use memory::{MemoryHub, MemoryMesh};
pub use udp::UdpMesh;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MeshEvent {
    Received { from: u32, payload: Vec<u8> },
    /// A peer joined or left
    ConnectionsChanged,
}

pub trait Mesh {
    fn node_id(&self) -> u32;

    /// Mesh-synchronized microseconds, wrapping at `u32::MAX`.
    fn node_time(&self) -> u32;

    /// Send to every other node. Returns false if the payload was not sent.
    fn send_broadcast(&mut self, payload: &[u8]) -> bool;

    /// Next pending event, if any. Never blocks.
    fn poll(&mut self) -> Option<MeshEvent>;

    /// Peers currently reachable, excluding this node.
    fn node_list(&self) -> Vec<u32>;
}
