//! Expansion of one `fx` command into scheduled segments.
//!
//! A command with `repetitions = R` alternates between the command target and
//! the inverse target, producing `2R - 1` segments: forward, inverse, forward,
//! ... ending on a forward leg. Segment uids count up from the command uid.

use common::{clock::seconds_to_micros, EffectSpec};
use log::{debug, warn};

use crate::engine::{EffectCreationFailed, EffectRequest, Leg, SegmentId};

/// Square pulses use this duration in place of a fade.
pub const PULSE_DURATION: f64 = 1e-6;

/// Where expanded segments go. Implemented by the effect engine.
pub trait SegmentSink {
    fn create(&mut self, request: EffectRequest) -> Result<SegmentId, EffectCreationFailed>;
    fn hold(&mut self, id: SegmentId, width: f64);
    fn arm_loop(&mut self, id: SegmentId, cycle: u32);
    fn enable_recall_range(&mut self, lo: u32, hi: u32);
}

fn select_mode(mode: i32, duration: f64) -> f64 {
    match mode {
        1 => PULSE_DURATION,
        _ => duration,
    }
}

enum Created {
    Segment(SegmentId),
    Skipped,
    /// The sink has no room for anything further
    Full,
}

fn create<S: SegmentSink>(sink: &mut S, request: EffectRequest) -> Created {
    let uid = request.uid;
    match sink.create(request) {
        Ok(id) => Created::Segment(id),
        Err(err @ EffectCreationFailed::SlotsExhausted(_)) => {
            warn!("Could not create segment uid {}: {}, dropping the rest", uid, err);
            Created::Full
        }
        Err(err) => {
            warn!("Could not create segment uid {}: {}", uid, err);
            Created::Skipped
        }
    }
}

/// Expand `effect` starting at the absolute mesh time `start`.
///
/// `target` is the forward target. Segments that fail to be created are
/// skipped along with their hold, and expansion stops once the sink is full.
/// Returns the created segments in order.
pub fn expand<S: SegmentSink>(
    sink: &mut S,
    effect: &EffectSpec,
    target: &[u16],
    start: u32,
) -> Vec<SegmentId> {
    let duration = select_mode(effect.mode, effect.duration);
    let inverse_width = select_mode(effect.mode, effect.width);
    let repetitions = effect.repetitions.max(1);
    let pulsed = effect.mode > 0;

    let mut recall = effect.recall;
    if recall && repetitions > 1 {
        recall = false;
        let last = effect.uid.wrapping_add((repetitions - 1).wrapping_mul(2));
        sink.enable_recall_range(effect.uid, last);
    }

    // A zero width carries the duration into every repetition after the first
    let width = if repetitions > 1 && effect.width == 0.0 {
        duration
    } else {
        effect.width
    };
    let forward_us = seconds_to_micros(duration);
    let period = forward_us.wrapping_add(seconds_to_micros(width));

    let request = |target: &[u16], duration: f64, start: u32, uid: u32, leg: Leg| EffectRequest {
        target: target.to_vec(),
        duration,
        start,
        start_variation: effect.start_variation,
        duration_variation: effect.duration_variation,
        uid,
        update_uid: effect.update_uid,
        loop_count: effect.loop_count,
        recall,
        leg,
    };

    let mut created = Vec::new();

    for i in 0..repetitions {
        let start = start.wrapping_add(period.wrapping_mul(i));
        let uid = effect.uid.wrapping_add(i.wrapping_mul(2));
        let last = i == repetitions - 1;

        let forward = match create(sink, request(target, duration, start, uid, Leg::Forward)) {
            Created::Segment(id) => {
                created.push(id);
                if width != 0.0 && (pulsed || last) {
                    sink.hold(id, width);
                }
                true
            }
            Created::Skipped => true,
            Created::Full => false,
        };
        if !forward || last {
            break;
        }

        let inverse_start = start.wrapping_add(forward_us);
        let inverse = request(
            &effect.inverse,
            inverse_width,
            inverse_start,
            uid.wrapping_add(1),
            Leg::Inverse,
        );
        match create(sink, inverse) {
            Created::Segment(id) => {
                created.push(id);
                if pulsed {
                    sink.hold(id, width);
                }
            }
            Created::Skipped => {}
            Created::Full => break,
        }
    }

    if effect.loop_count != 0 {
        let cycle = period.wrapping_mul(repetitions).max(1);
        debug!("Looping {} segments every {}us", created.len(), cycle);
        for &id in &created {
            sink.arm_loop(id, cycle);
        }
    }

    created
}
