use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    rc::Rc,
};

use super::{Mesh, MeshEvent};

#[derive(Debug, Default)]
struct HubState {
    time: u32,
    inboxes: BTreeMap<u32, VecDeque<MeshEvent>>,
}

impl HubState {
    fn deliver(&mut self, from: u32, event: &MeshEvent) {
        for (_, inbox) in self.inboxes.iter_mut().filter(|(id, _)| **id != from) {
            inbox.push_back(event.clone());
        }
    }
}

/// In-process mesh shared by every [`MemoryMesh`] joined to it.
///
/// Time only moves when the hub is told to, which makes schedules
/// reproducible in tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryHub {
    state: Rc<RefCell<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node. Existing members see a connection change.
    pub fn join(&self, node_id: u32) -> MemoryMesh {
        let mut state = self.state.borrow_mut();
        state.deliver(node_id, &MeshEvent::ConnectionsChanged);
        state.inboxes.insert(node_id, VecDeque::new());
        MemoryMesh {
            node_id,
            hub: self.clone(),
        }
    }

    pub fn leave(&self, node_id: u32) {
        let mut state = self.state.borrow_mut();
        if state.inboxes.remove(&node_id).is_some() {
            state.deliver(node_id, &MeshEvent::ConnectionsChanged);
        }
    }

    /// Broadcast on behalf of a node that is not joined, such as a test
    /// harness posing as a bridge.
    pub fn inject(&self, from: u32, payload: &[u8]) {
        let event = MeshEvent::Received {
            from,
            payload: payload.to_vec(),
        };
        self.state.borrow_mut().deliver(from, &event);
    }

    pub fn time(&self) -> u32 {
        self.state.borrow().time
    }

    pub fn set_time(&self, time: u32) {
        self.state.borrow_mut().time = time;
    }

    pub fn advance(&self, micros: u32) {
        let mut state = self.state.borrow_mut();
        state.time = state.time.wrapping_add(micros);
    }
}

/// One node's handle on a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryMesh {
    node_id: u32,
    hub: MemoryHub,
}

impl Mesh for MemoryMesh {
    fn node_id(&self) -> u32 {
        self.node_id
    }

    fn node_time(&self) -> u32 {
        self.hub.time()
    }

    fn send_broadcast(&mut self, payload: &[u8]) -> bool {
        let mut state = self.hub.state.borrow_mut();
        if !state.inboxes.contains_key(&self.node_id) {
            return false;
        }
        let event = MeshEvent::Received {
            from: self.node_id,
            payload: payload.to_vec(),
        };
        state.deliver(self.node_id, &event);
        true
    }

    fn poll(&mut self) -> Option<MeshEvent> {
        self.hub
            .state
            .borrow_mut()
            .inboxes
            .get_mut(&self.node_id)
            .and_then(VecDeque::pop_front)
    }

    fn node_list(&self) -> Vec<u32> {
        self.hub
            .state
            .borrow()
            .inboxes
            .keys()
            .copied()
            .filter(|&id| id != self.node_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_others_only() {
        let hub = MemoryHub::new();
        let mut a = hub.join(1);
        let mut b = hub.join(2);
        assert_eq!(a.poll(), Some(MeshEvent::ConnectionsChanged));

        assert!(a.send_broadcast(b"hi"));
        assert_eq!(a.poll(), None);
        assert_eq!(
            b.poll(),
            Some(MeshEvent::Received {
                from: 1,
                payload: b"hi".to_vec()
            })
        );
        assert_eq!(a.node_list(), vec![2]);
    }

    #[test]
    fn test_shared_time() {
        let hub = MemoryHub::new();
        let a = hub.join(1);
        hub.set_time(u32::MAX);
        hub.advance(2);
        assert_eq!(a.node_time(), 1);
    }

    #[test]
    fn test_leave() {
        let hub = MemoryHub::new();
        let mut a = hub.join(1);
        let mut b = hub.join(2);
        a.poll();
        hub.leave(2);
        assert_eq!(a.poll(), Some(MeshEvent::ConnectionsChanged));
        assert!(a.node_list().is_empty());
        assert!(!b.send_broadcast(b"gone"));
    }
}
