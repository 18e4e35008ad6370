//! Effect engine.
//!
//! Owns every live [`ScheduledSegment`], advances them against the mesh clock
//! once per tick and writes the blended result to a [`ChannelDriver`]. The
//! driver is only written when the output actually changes.

mod save;
mod segment;

use common::{clock::seconds_to_micros, VirtualClock};
use log::{debug, info, warn};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use thiserror::Error;

use crate::{config::NodeConfig, expander::SegmentSink, output::ChannelDriver};

pub use save::SaveStore;
pub use segment::{interpolate, Leg, Phase, ScheduledSegment, SegmentId};
use segment::Step;

/// First uid used by the boot cycle, far above anything a controller sends.
pub const BOOT_CYCLE_UID: u32 = u32::MAX - 0xff;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EffectCreationFailed {
    #[error("no free segment slots, {0} segments live")]
    SlotsExhausted(usize),
    #[error("target has {got} channels but the device has {expected}")]
    ChannelCount { expected: usize, got: usize },
}

/// Everything needed to schedule one segment.
#[derive(Clone, Debug, PartialEq)]
pub struct EffectRequest {
    pub target: Vec<u16>,
    /// Seconds
    pub duration: f64,
    /// Absolute mesh time
    pub start: u32,
    pub start_variation: f64,
    pub duration_variation: f64,
    pub uid: u32,
    pub update_uid: bool,
    pub loop_count: i32,
    pub recall: bool,
    pub leg: Leg,
}

/// Fade started by a plain channel set.
#[derive(Clone, Debug)]
struct DirectFade {
    source: Vec<u16>,
    target: Vec<u16>,
    start: u32,
    duration: u32,
}

pub struct EffectEngine<D: ChannelDriver> {
    driver: D,
    clock: VirtualClock,
    segments: Vec<ScheduledSegment>,
    next_id: u64,
    output: Vec<u16>,
    written: Option<Vec<u16>>,
    default_target: Vec<u16>,
    saves: SaveStore,
    fade: Option<DirectFade>,
    rng: SmallRng,
    channels: usize,
    max_value: u16,
    max_segments: usize,
    set_fade: f64,
}

impl<D: ChannelDriver> EffectEngine<D> {
    pub fn new(driver: D, config: &NodeConfig) -> Self {
        let channels = config.layout.channels();
        let max_value = config.max_value();

        let mut default_target = config.initial_target.clone();
        default_target.resize(channels, 0);
        for value in default_target.iter_mut() {
            *value = (*value).min(max_value);
        }

        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        Self {
            driver,
            clock: VirtualClock::default(),
            segments: Vec::new(),
            next_id: 0,
            output: vec![0; channels],
            written: None,
            default_target,
            saves: SaveStore::with_capacity(config.recall_slots),
            fade: None,
            rng,
            channels,
            max_value,
            max_segments: config.max_segments,
            set_fade: config.set_fade,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn output(&self) -> &[u16] {
        &self.output
    }

    pub fn default_target(&self) -> &[u16] {
        &self.default_target
    }

    pub fn segments(&self) -> &[ScheduledSegment] {
        &self.segments
    }

    pub fn segment(&self, id: SegmentId) -> Option<&ScheduledSegment> {
        self.segments.iter().find(|s| s.id == id)
    }

    pub fn saves(&self) -> &SaveStore {
        &self.saves
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Take the latest mesh node time.
    pub fn update_clock(&mut self, now: u32) {
        self.clock.update(now);
    }

    fn clamp(&self, values: &[u16]) -> Vec<u16> {
        values.iter().map(|&v| v.min(self.max_value)).collect()
    }

    fn check_channels(&self, values: &[u16]) -> Result<(), EffectCreationFailed> {
        if values.len() != self.channels {
            return Err(EffectCreationFailed::ChannelCount {
                expected: self.channels,
                got: values.len(),
            });
        }
        Ok(())
    }

    /// Schedule a segment at an absolute mesh time.
    ///
    /// With `update_uid` set, the first live segment carrying the same uid is
    /// replaced in place, any others with that uid are dropped, and no new
    /// slot is used. A uid inside the enabled recall range makes the segment
    /// recall.
    pub fn create_effect_absolute(
        &mut self,
        request: EffectRequest,
    ) -> Result<SegmentId, EffectCreationFailed> {
        self.check_channels(&request.target)?;

        let replace = if request.update_uid {
            self.segments.iter().position(|s| s.uid == request.uid)
        } else {
            None
        };
        if replace.is_none() && self.segments.len() >= self.max_segments {
            return Err(EffectCreationFailed::SlotsExhausted(self.segments.len()));
        }
        if let Some(index) = replace {
            let keep = self.segments[index].id;
            self.segments.retain(|s| s.uid != request.uid || s.id == keep);
        }

        let mut start = request.start;
        if request.start_variation > 0.0 && request.start_variation.is_finite() {
            let jitter = self.rng.gen_range(0.0..=request.start_variation);
            start = start.wrapping_add(seconds_to_micros(jitter));
        }
        let mut duration = request.duration.max(0.0);
        if request.duration_variation > 0.0 && request.duration_variation.is_finite() {
            duration += self.rng.gen_range(0.0..=request.duration_variation);
        }

        let id = SegmentId(self.next_id);
        self.next_id += 1;

        let segment = ScheduledSegment {
            id,
            target: self.clamp(&request.target),
            start_absolute: start,
            duration,
            hold_width: 0.0,
            uid: request.uid,
            update_uid: request.update_uid,
            loop_count: request.loop_count,
            recall: request.recall || self.saves.is_enabled(request.uid),
            leg: request.leg,
            cycle: 0,
            phase: Phase::Pending,
        };
        debug!(
            "Segment {} uid {} at {} for {}s -> {:?}",
            id.0, segment.uid, start, duration, segment.target
        );

        match replace {
            Some(index) => {
                debug!("Replacing live segment with uid {}", request.uid);
                self.segments[index] = segment;
            }
            None => self.segments.push(segment),
        }
        Ok(id)
    }

    fn segment_mut(&mut self, id: SegmentId) -> Option<&mut ScheduledSegment> {
        self.segments.iter_mut().find(|s| s.id == id)
    }

    /// Pin the target for `width` seconds once the fade completes.
    pub fn hold(&mut self, id: SegmentId, width: f64) {
        match self.segment_mut(id) {
            Some(segment) => segment.hold_width = width.max(0.0),
            None => warn!("Hold on missing segment {}", id.0),
        }
    }

    /// Re-run the segment every `cycle` microseconds while its loop count allows.
    pub fn arm_loop(&mut self, id: SegmentId, cycle: u32) {
        match self.segment_mut(id) {
            Some(segment) => segment.cycle = cycle,
            None => warn!("Loop on missing segment {}", id.0),
        }
    }

    pub fn enable_recall_range(&mut self, lo: u32, hi: u32) {
        self.saves.enable(lo, hi);
    }

    /// Advance the fade and every live segment, then write the output.
    pub fn tick(&mut self) {
        self.advance_fade();

        let mut index = 0;
        while index < self.segments.len() {
            if self.advance_segment(index) {
                index += 1;
            } else {
                self.segments.remove(index);
            }
        }

        // The range lives as long as the segments it was opened for
        let ranged = |s: &ScheduledSegment| s.recall && self.saves.is_enabled(s.uid);
        if self.saves.enabled_range().is_some() && !self.segments.iter().any(ranged) {
            self.saves.disable();
        }

        self.flush();
    }

    /// Returns false once the segment at `index` should be dropped.
    fn advance_segment(&mut self, index: usize) -> bool {
        loop {
            match self.segments[index].step(&self.clock) {
                Step::Idle => return true,
                Step::Activate => {
                    let segment = &self.segments[index];
                    let target = if segment.recall {
                        self.saves.resolve(segment.uid, &segment.target)
                    } else {
                        segment.target.clone()
                    };
                    // A segment takes over from any direct fade
                    self.fade = None;
                    let source = self.output.clone();
                    let segment = &mut self.segments[index];
                    segment.target = target;
                    segment.activate(source);
                }
                Step::Write(values) => {
                    self.output = values;
                    if self.segments[index].phase != Phase::Complete {
                        return true;
                    }
                }
                Step::Finished => {
                    let segment = &self.segments[index];
                    if !segment.recall {
                        self.saves.record(segment.uid, &segment.target);
                    }
                    let segment = &mut self.segments[index];
                    if segment.rearm() {
                        debug!(
                            "Segment uid {} re-armed at {}",
                            segment.uid, segment.start_absolute
                        );
                        return true;
                    }
                    debug!("Segment uid {} complete", segment.uid);
                    return false;
                }
            }
        }
    }

    fn advance_fade(&mut self) {
        let Some(fade) = &self.fade else {
            return;
        };
        let elapsed = self.clock.elapsed_since(fade.start);
        self.output = interpolate(&fade.source, &fade.target, elapsed, fade.duration);
        if elapsed >= fade.duration {
            self.fade = None;
        }
    }

    fn flush(&mut self) {
        if self.written.as_deref() == Some(self.output.as_slice()) {
            return;
        }
        let values = self.clamp(&self.output);
        self.driver.write(&values);
        self.output = values.clone();
        self.written = Some(values);
    }

    /// Set the channels directly. Unless `immediate`, the output fades over
    /// the configured set fade.
    pub fn set(&mut self, target: &[u16], immediate: bool) -> Result<(), EffectCreationFailed> {
        self.check_channels(target)?;
        let target = self.clamp(target);

        if immediate || self.set_fade <= 0.0 {
            self.fade = None;
            self.output = target;
            self.flush();
        } else {
            self.fade = Some(DirectFade {
                source: self.output.clone(),
                target,
                start: self.clock.now(),
                duration: seconds_to_micros(self.set_fade),
            });
        }
        Ok(())
    }

    /// Retarget the forward legs of every looping segment.
    pub fn update_effects(&mut self, target: &[u16]) -> Result<(), EffectCreationFailed> {
        self.check_channels(target)?;
        let target = self.clamp(target);
        for segment in self
            .segments
            .iter_mut()
            .filter(|s| s.loop_count != 0 && s.leg == Leg::Forward)
        {
            segment.target = target.clone();
        }
        Ok(())
    }

    /// -1 if anything loops forever, otherwise the largest remaining loop
    /// count, otherwise 0.
    pub fn looping(&self) -> i32 {
        let mut longest = 0;
        for segment in &self.segments {
            if segment.loop_count < 0 {
                return -1;
            }
            longest = longest.max(segment.loop_count);
        }
        longest
    }

    /// Drop every live segment, optionally returning to the default target.
    pub fn clear_effects(&mut self, reset_to_default: bool) {
        info!("Clearing {} segments", self.segments.len());
        self.segments.clear();
        self.saves.disable();
        self.fade = None;
        if reset_to_default {
            let target = self
                .saves
                .default_state()
                .map(<[u16]>::to_vec)
                .unwrap_or_else(|| self.default_target.clone());
            self.output = target;
            self.flush();
        }
    }

    /// Snapshot the current output as the default saved state.
    pub fn save(&mut self) {
        info!("Saving state {:?}", self.output);
        self.saves.save_default(&self.output);
    }

    /// Return to the default saved state, if one exists.
    pub fn recall(&mut self) {
        match self.saves.default_state().map(<[u16]>::to_vec) {
            Some(state) => {
                info!("Recalling state {:?}", state);
                self.fade = None;
                self.output = state;
                self.flush();
            }
            None => warn!("Recall requested with nothing saved"),
        }
    }

    pub fn status(&self) -> String {
        format!(
            "Output: {:?}\tSegments: {}\tLooping: {}\tClock: {}",
            self.output,
            self.segments.len(),
            self.looping(),
            self.clock.now()
        )
    }

    /// Drive each channel alone at full scale, then restore the output.
    pub fn test(&mut self) {
        info!("Testing {} channels", self.channels);
        for channel in 0..self.channels {
            let mut values = vec![0; self.channels];
            values[channel] = self.max_value;
            debug!("Testing channel {}", channel);
            self.driver.write(&values);
        }
        self.written = None;
        self.flush();
    }

    /// Fade through each channel in turn over `seconds`, ending back at the
    /// current output. Used to signal a boot.
    pub fn cycle(&mut self, seconds: f64) -> Result<(), EffectCreationFailed> {
        if seconds <= 0.0 || self.channels == 0 {
            return Ok(());
        }
        let step = seconds / (self.channels + 1) as f64;
        let restore = self.output.clone();
        let mut start = self.clock.now();

        let mut targets: Vec<Vec<u16>> = (0..self.channels)
            .map(|channel| {
                let mut values = vec![0; self.channels];
                values[channel] = self.max_value;
                values
            })
            .collect();
        targets.push(restore);

        for (uid, target) in (BOOT_CYCLE_UID..).zip(targets) {
            self.create_effect_absolute(EffectRequest {
                target,
                duration: step,
                start,
                start_variation: 0.0,
                duration_variation: 0.0,
                uid,
                update_uid: true,
                loop_count: 0,
                recall: false,
                leg: Leg::Forward,
            })?;
            start = start.wrapping_add(seconds_to_micros(step));
        }
        Ok(())
    }
}

impl<D: ChannelDriver> SegmentSink for EffectEngine<D> {
    fn create(&mut self, request: EffectRequest) -> Result<SegmentId, EffectCreationFailed> {
        self.create_effect_absolute(request)
    }

    fn hold(&mut self, id: SegmentId, width: f64) {
        EffectEngine::hold(self, id, width)
    }

    fn arm_loop(&mut self, id: SegmentId, cycle: u32) {
        EffectEngine::arm_loop(self, id, cycle)
    }

    fn enable_recall_range(&mut self, lo: u32, hi: u32) {
        EffectEngine::enable_recall_range(self, lo, hi)
    }
}
