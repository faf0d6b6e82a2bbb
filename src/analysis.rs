// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Offline analysis of a loaded clip.
//!
//! [`analyze`] runs the full pass: silence trim, pitch detection, loop search
//! and level measurement. The result is a single immutable [`Analysis`].

pub mod crossfade;
pub mod loop_finder;
pub mod peaks;
pub mod pitch;
pub mod trim;

use serde::Serialize;
use tracing::{info, span, Level};

use crate::audio::AudioSample;

/// MIDI note assumed when no pitch can be detected (middle C).
pub const DEFAULT_ROOT: u8 = 60;

/// The result of analyzing a clip. Times are seconds from the start of the
/// untrimmed buffer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub root_frequency_hz: Option<f32>,
    pub root_pitch_midi: u8,
    pub pitch_confidence: f32,
    pub loop_start_sec: f64,
    pub loop_end_sec: f64,
    pub trim_start_sec: f64,
    pub trim_end_sec: f64,
    pub rms: f32,
}

impl Analysis {
    pub fn loop_duration(&self) -> f64 {
        self.loop_end_sec - self.loop_start_sec
    }
}

/// Root mean square level of a signal.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| s as f64 * s as f64).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Analyzes a clip. Never fails: an undetectable pitch yields
/// [`DEFAULT_ROOT`] with zero confidence.
pub fn analyze(sample: &AudioSample, threshold: f32) -> Analysis {
    let span = span!(Level::INFO, "analyze");
    let _enter = span.enter();

    let sample_rate = sample.sample_rate();
    let mono = sample.mono();
    let trimmed = trim::trim(&mono, sample_rate, threshold);
    let pitch = pitch::detect(trimmed.samples, sample_rate);
    let region = loop_finder::find_loop(trimmed.samples, sample_rate, pitch.map(|p| p.period));

    let sr = sample_rate as f64;
    let trim_start_sec = trimmed.start_seconds();
    let analysis = Analysis {
        root_frequency_hz: pitch.map(|p| p.hz),
        root_pitch_midi: pitch.map(|p| p.midi).unwrap_or(DEFAULT_ROOT),
        pitch_confidence: pitch.map(|p| p.confidence).unwrap_or(0.0),
        loop_start_sec: trim_start_sec + region.start as f64 / sr,
        loop_end_sec: trim_start_sec + region.end as f64 / sr,
        trim_start_sec,
        trim_end_sec: trimmed.end_seconds(),
        rms: rms(trimmed.samples),
    };

    info!(
        root = analysis.root_pitch_midi,
        confidence = analysis.pitch_confidence,
        loop_start = analysis.loop_start_sec,
        loop_end = analysis.loop_end_sec,
        "Analyzed sample"
    );
    analysis
}
