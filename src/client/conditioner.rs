//! Per-frame dynamic-range conditioning with a voice-activity gate.
//!
//! The same pipeline runs on both directions: captured frames before
//! encoding, and decoded frames before playback (where it mostly serves
//! normalization). Order matters: energy first, then the gate decision,
//! and only voiced frames continue into filtering, compression, and
//! normalization.

use crate::constants::{
    COMPRESSION_THRESHOLD, HIGH_PASS_CUTOFF_HZ, MAX_BOOST, SAMPLE_RATE_RAW, SILENCE_FLOOR,
    SOFT_GATE_FACTOR, TARGET_MAX_PEAK, TARGET_MIN_PEAK, VAD_HANGOVER_FRAMES, VAD_THRESHOLD,
};

/// Carries the hangover counter between frames.
#[derive(Default)]
pub struct FrameConditioner {
    frames_since_voice: u32,
}

impl FrameConditioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conditions one frame in place.
    pub fn process(&mut self, frame: &mut [f32]) {
        let energy = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
        if energy > VAD_THRESHOLD {
            self.frames_since_voice = 0;
        } else {
            self.frames_since_voice += 1;
        }

        // Past the hangover the frame is attenuated, not silenced: syllable
        // tails survive, and the stream keeps flowing for the decoder.
        if self.frames_since_voice > VAD_HANGOVER_FRAMES {
            for sample in frame.iter_mut() {
                *sample *= SOFT_GATE_FACTOR;
            }
            return;
        }

        high_pass(frame);
        compress(frame);
        normalize(frame);
    }
}

fn peak(frame: &[f32]) -> f32 {
    frame.iter().fold(0.0f32, |max, s| max.max(s.abs()))
}

/// One-pole high-pass at 100 Hz: `y[i] = alpha * (y[i-1] + x[i] - x[i-1])`.
/// History starts at zero on every frame.
fn high_pass(frame: &mut [f32]) {
    let rc = 1.0 / (2.0 * std::f32::consts::PI * HIGH_PASS_CUTOFF_HZ);
    let dt = 1.0 / SAMPLE_RATE_RAW as f32;
    let alpha = rc / (rc + dt);

    let mut prev_input = 0.0f32;
    let mut prev_output = 0.0f32;
    for sample in frame.iter_mut() {
        let input = *sample;
        let output = alpha * (prev_output + input - prev_input);
        prev_input = input;
        prev_output = output;
        *sample = output;
    }
}

/// Scales the whole frame down when its peak exceeds the threshold.
fn compress(frame: &mut [f32]) {
    let p = peak(frame);
    if p > COMPRESSION_THRESHOLD {
        let ratio = COMPRESSION_THRESHOLD / p;
        for sample in frame.iter_mut() {
            *sample *= ratio;
        }
    }
}

/// Nudges the frame's peak into the target band, boosting quiet frames by
/// at most `MAX_BOOST` and never touching near-silence.
fn normalize(frame: &mut [f32]) {
    let p = peak(frame);
    if p < SILENCE_FLOOR {
        return;
    }
    let scale = if p < TARGET_MIN_PEAK {
        (TARGET_MIN_PEAK / p).min(MAX_BOOST)
    } else if p > TARGET_MAX_PEAK {
        TARGET_MAX_PEAK / p
    } else {
        return;
    };
    for sample in frame.iter_mut() {
        *sample *= scale;
    }
}
