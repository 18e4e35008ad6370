use common::{clock::seconds_to_micros, VirtualClock};

/// Handle to a live segment, stable for the lifetime of the segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub(crate) u64);

/// Which target of a repeated effect a segment drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Leg {
    Forward,
    Inverse,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Phase {
    /// Waiting for the clock to reach the start
    Pending,
    /// Fading from `source` toward the target
    Active { source: Vec<u16> },
    /// Target reached, pinned for the hold width
    Holding,
    Complete,
}

/// One scheduled fade/pulse/hold unit.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledSegment {
    pub id: SegmentId,
    pub target: Vec<u16>,
    pub start_absolute: u32,
    /// Seconds
    pub duration: f64,
    /// Seconds
    pub hold_width: f64,
    pub uid: u32,
    pub update_uid: bool,
    pub loop_count: i32,
    pub recall: bool,
    pub leg: Leg,
    /// Microseconds between consecutive runs of a looping segment
    pub cycle: u32,
    pub phase: Phase,
}

/// Result of advancing one segment.
#[derive(Debug, PartialEq)]
pub(crate) enum Step {
    /// Nothing to write yet
    Idle,
    Write(Vec<u16>),
    /// Just became active, the caller resolves recall and supplies the source
    Activate,
    Finished,
}

impl ScheduledSegment {
    pub fn duration_us(&self) -> u32 {
        seconds_to_micros(self.duration)
    }

    pub fn hold_us(&self) -> u32 {
        seconds_to_micros(self.hold_width)
    }

    /// Total time from start to completion.
    pub fn span_us(&self) -> u32 {
        self.duration_us().saturating_add(self.hold_us())
    }

    pub fn is_pending(&self) -> bool {
        self.phase == Phase::Pending
    }

    /// Advance through as many phases as `clock` allows.
    pub(crate) fn step(&mut self, clock: &VirtualClock) -> Step {
        loop {
            match &self.phase {
                Phase::Pending => {
                    if !clock.has_reached(self.start_absolute) {
                        return Step::Idle;
                    }
                    return Step::Activate;
                }
                Phase::Active { source } => {
                    let elapsed = clock.elapsed_since(self.start_absolute);
                    let duration = self.duration_us();
                    if elapsed < duration {
                        return Step::Write(interpolate(source, &self.target, elapsed, duration));
                    }
                    self.phase = Phase::Holding;
                }
                Phase::Holding => {
                    if clock.elapsed_since(self.start_absolute) < self.span_us() {
                        return Step::Write(self.target.clone());
                    }
                    self.phase = Phase::Complete;
                    return Step::Write(self.target.clone());
                }
                Phase::Complete => return Step::Finished,
            }
        }
    }

    /// Enter the active phase from the given output.
    pub(crate) fn activate(&mut self, source: Vec<u16>) {
        self.phase = Phase::Active { source };
    }

    /// Schedule the next run of a looping segment.
    ///
    /// Returns false when the segment has no runs left.
    pub(crate) fn rearm(&mut self) -> bool {
        match self.loop_count {
            0 => return false,
            n if n > 0 => self.loop_count -= 1,
            _ => {}
        }
        self.start_absolute = self.start_absolute.wrapping_add(self.cycle.max(1));
        self.phase = Phase::Pending;
        true
    }
}

/// Linear blend between `from` and `to`, `elapsed` of `total` microseconds in.
pub fn interpolate(from: &[u16], to: &[u16], elapsed: u32, total: u32) -> Vec<u16> {
    if total == 0 || elapsed >= total {
        return to.to_vec();
    }
    let progress = f64::from(elapsed) / f64::from(total);
    from.iter()
        .zip(to)
        .map(|(&a, &b)| {
            let value = f64::from(a) + (f64::from(b) - f64::from(a)) * progress;
            value.round() as u16
        })
        .collect()
}
