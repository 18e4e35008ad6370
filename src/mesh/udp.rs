use std::{
    collections::{HashMap, VecDeque},
    io::{self, ErrorKind},
    net::{Ipv4Addr, SocketAddrV4, UdpSocket},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use log::{debug, info, warn};

use super::{Mesh, MeshEvent};
use crate::config::MeshConfig;

/// Sender id prefix on every datagram
const HEADER_LEN: usize = 4;

/// Largest datagram accepted
const MAX_FRAME: usize = 2048;

/// UDP multicast stand-in for the mesh on hosts.
///
/// Every frame is a big-endian sender id followed by the payload. Node time is
/// the wall clock in microseconds wrapped to 32 bits, so hosts with synced
/// clocks share a timeline. A peer is known from its traffic and forgotten
/// after `peer_expiry` of silence.
pub struct UdpMesh {
    socket: UdpSocket,
    node_id: u32,
    group: SocketAddrV4,
    peers: HashMap<u32, Instant>,
    peer_expiry: Duration,
    pending: VecDeque<MeshEvent>,
}

impl UdpMesh {
    pub fn bind(config: &MeshConfig, node_id: u32) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port))?;
        socket.join_multicast_v4(&config.group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_nonblocking(true)?;

        info!(
            "Mesh node {:#010x} on {}:{}",
            node_id, config.group, config.port
        );

        Ok(Self {
            socket,
            node_id,
            group: SocketAddrV4::new(config.group, config.port),
            peers: HashMap::new(),
            peer_expiry: Duration::from_secs(config.peer_expiry),
            pending: VecDeque::new(),
        })
    }

    fn try_recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket.recv_from(buf) {
            Ok((n, _)) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Move everything waiting on the socket into the event queue.
    fn drain_socket(&mut self) {
        let mut buf = [0u8; MAX_FRAME];
        loop {
            let n = match self.try_recv(&mut buf) {
                Ok(Some(n)) => n,
                Ok(None) => break,
                Err(e) => {
                    warn!("Mesh receive failed: {}", e);
                    break;
                }
            };
            let Some((from, payload)) = decode_frame(&buf[..n]) else {
                debug!("Dropping short frame of {} bytes", n);
                continue;
            };
            if from == self.node_id {
                continue;
            }

            if self.peers.insert(from, Instant::now()).is_none() {
                info!("New peer: {:#010x}", from);
                self.pending.push_back(MeshEvent::ConnectionsChanged);
            }
            self.pending.push_back(MeshEvent::Received {
                from,
                payload: payload.to_vec(),
            });
        }
    }

    fn remove_expired_peers(&mut self) {
        let now = Instant::now();
        let expiry = self.peer_expiry;
        let before = self.peers.len();
        self.peers.retain(|id, last_seen| {
            let alive = now.duration_since(*last_seen) <= expiry;
            if !alive {
                info!("Removed expired peer: {:#010x}", id);
            }
            alive
        });
        if self.peers.len() != before {
            self.pending.push_back(MeshEvent::ConnectionsChanged);
        }
    }
}

fn encode_frame(node_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&node_id.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

fn decode_frame(frame: &[u8]) -> Option<(u32, &[u8])> {
    if frame.len() < HEADER_LEN {
        return None;
    }
    let (header, payload) = frame.split_at(HEADER_LEN);
    let id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    Some((id, payload))
}

impl Mesh for UdpMesh {
    fn node_id(&self) -> u32 {
        self.node_id
    }

    fn node_time(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u32)
            .unwrap_or(0)
    }

    fn send_broadcast(&mut self, payload: &[u8]) -> bool {
        match self
            .socket
            .send_to(&encode_frame(self.node_id, payload), self.group)
        {
            Ok(_) => true,
            Err(e) => {
                warn!("Mesh broadcast failed: {}", e);
                false
            }
        }
    }

    fn poll(&mut self) -> Option<MeshEvent> {
        if self.pending.is_empty() {
            self.drain_socket();
            self.remove_expired_peers();
        }
        self.pending.pop_front()
    }

    fn node_list(&self) -> Vec<u32> {
        let mut peers: Vec<u32> = self.peers.keys().copied().collect();
        peers.sort_unstable();
        peers
    }
}
