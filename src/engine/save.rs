use std::collections::{HashMap, VecDeque};

use log::debug;

/// Slots kept before the least recently recorded uid is forgotten.
pub const DEFAULT_SLOT_CAPACITY: usize = 64;

/// Recall slots plus the default saved state.
#[derive(Debug, Clone)]
pub struct SaveStore {
    slots: HashMap<u32, Vec<u16>>,
    /// Recorded uids, oldest first
    order: VecDeque<u32>,
    capacity: usize,
    default_state: Option<Vec<u16>>,
    /// Inclusive uid range whose new segments resolve their target from the slots
    enabled: Option<(u32, u32)>,
}

impl Default for SaveStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SLOT_CAPACITY)
    }
}

impl SaveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            default_state: None,
            enabled: None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Remember the output a segment with `uid` left behind.
    pub fn record(&mut self, uid: u32, values: &[u16]) {
        if self.slots.insert(uid, values.to_vec()).is_some() {
            self.order.retain(|&u| u != uid);
        }
        self.order.push_back(uid);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                debug!("Forgetting slot {}", oldest);
                self.slots.remove(&oldest);
            }
        }
    }

    pub fn slot(&self, uid: u32) -> Option<&[u16]> {
        self.slots.get(&uid).map(Vec::as_slice)
    }

    pub fn save_default(&mut self, values: &[u16]) {
        self.default_state = Some(values.to_vec());
    }

    pub fn default_state(&self) -> Option<&[u16]> {
        self.default_state.as_deref()
    }

    /// Make every uid in `lo..=hi` recall from the slots.
    pub fn enable(&mut self, lo: u32, hi: u32) {
        debug!("Recall enabled for uids {}..={}", lo, hi);
        self.enabled = Some((lo.min(hi), lo.max(hi)));
    }

    pub fn disable(&mut self) {
        if let Some((lo, hi)) = self.enabled.take() {
            debug!("Recall disabled for uids {}..={}", lo, hi);
        }
    }

    pub fn enabled_range(&self) -> Option<(u32, u32)> {
        self.enabled
    }

    pub fn is_enabled(&self, uid: u32) -> bool {
        self.enabled
            .map(|(lo, hi)| (lo..=hi).contains(&uid))
            .unwrap_or(false)
    }

    /// Target for a recalling segment: its slot, else the default saved state,
    /// else the segment's own target.
    pub fn resolve(&self, uid: u32, fallback: &[u16]) -> Vec<u16> {
        self.slot(uid)
            .or(self.default_state())
            .filter(|values| values.len() == fallback.len())
            .unwrap_or(fallback)
            .to_vec()
    }
}
