//! Mesh virtual clock.
//!
//! Node time is a 32-bit microsecond counter that every node in the mesh
//! shares approximately. It wraps roughly every 71 minutes, so schedules are
//! computed with wrapping arithmetic and compared circularly: `b - a`
//! interpreted as a signed 32-bit value decides which of two instants comes
//! first.

use core::cmp::Ordering;

use log::debug;

/// Margin before the wrap point inside which a schedule is considered unsafe.
pub const DEFAULT_DEFERENCE_BUFFER_US: u32 = 4_000_000;

/// Start value used when a schedule would straddle the wrap point.
///
/// This is a coarse heuristic: it means "right after the counter wraps", which
/// keeps the effect alive but gives up precise timing near the boundary.
pub const ROLLOVER_SENTINEL: u32 = 1;

/// Convert seconds to whole microseconds, rounding to nearest.
///
/// Negative and NaN inputs become zero, values past `u32::MAX` saturate.
pub fn seconds_to_micros(seconds: f64) -> u32 {
    (seconds * 1_000_000.0 + 0.5) as u32
}

/// Absolute mesh time for something starting `offset_s` seconds after `now`
/// and lasting `duration_s` seconds.
///
/// The start is allowed to wrap. If the end lands within `deference_buffer`
/// of `u32::MAX`, the start collapses to [`ROLLOVER_SENTINEL`].
pub fn absolute(now: u32, offset_s: f64, duration_s: f64, deference_buffer: u32) -> u32 {
    let start = now.wrapping_add(seconds_to_micros(offset_s));
    let end = start.wrapping_add(seconds_to_micros(duration_s));
    if end > u32::MAX - deference_buffer {
        debug!(
            "schedule {}..{} too close to clock rollover, starting at sentinel",
            start, end
        );
        return ROLLOVER_SENTINEL;
    }
    start
}

/// Circular ordering of two instants on the wrapping clock.
pub fn circular_cmp(a: u32, b: u32) -> Ordering {
    (a.wrapping_sub(b) as i32).cmp(&0)
}

/// Read-only view of mesh node time, refreshed once per tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VirtualClock {
    now: u32,
    deference_buffer: u32,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new(DEFAULT_DEFERENCE_BUFFER_US)
    }
}

impl VirtualClock {
    pub const fn new(deference_buffer: u32) -> Self {
        Self {
            now: 0,
            deference_buffer,
        }
    }

    pub const fn now(&self) -> u32 {
        self.now
    }

    pub const fn deference_buffer(&self) -> u32 {
        self.deference_buffer
    }

    /// Take the latest node time from the mesh.
    pub fn update(&mut self, now: u32) {
        self.now = now;
    }

    /// See [`absolute`].
    pub fn absolute(&self, offset_s: f64, duration_s: f64) -> u32 {
        absolute(self.now, offset_s, duration_s, self.deference_buffer)
    }

    /// True once `now` is at or circularly past `instant`.
    pub fn has_reached(&self, instant: u32) -> bool {
        circular_cmp(self.now, instant) != Ordering::Less
    }

    /// Microseconds since `instant`, wrapping.
    pub fn elapsed_since(&self, instant: u32) -> u32 {
        self.now.wrapping_sub(instant)
    }
}
