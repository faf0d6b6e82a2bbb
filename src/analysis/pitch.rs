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
//! YIN fundamental frequency estimation.
//!
//! The estimator works on the opening of the signal, where a recorded note is
//! usually at its most stable pitch. Lags are searched between the periods of
//! [`MAX_FREQUENCY`] and [`MIN_FREQUENCY`], and the winning lag is refined with
//! parabolic interpolation so the result is not quantized to whole samples.

use tracing::debug;

/// Lowest detectable fundamental in Hz.
pub const MIN_FREQUENCY: f64 = 70.0;
/// Highest detectable fundamental in Hz.
pub const MAX_FREQUENCY: f64 = 900.0;
/// Normalized difference below which a lag is accepted.
pub const THRESHOLD: f64 = 0.15;
/// Seconds of signal analyzed.
const ANALYSIS_DURATION: f64 = 0.05;
/// Fewer samples than this are not analyzed at all.
const MIN_SAMPLES: usize = 512;

/// A detected pitch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pitch {
    /// Fundamental frequency.
    pub hz: f32,
    /// Nearest MIDI note.
    pub midi: u8,
    /// How periodic the signal is, from 0 to 1.
    pub confidence: f32,
    /// Refined period in samples.
    pub period: f32,
}

/// Converts a frequency to the nearest MIDI note, clamped to 0..=127.
pub fn frequency_to_midi(hz: f64) -> u8 {
    (69.0 + 12.0 * (hz / 440.0).log2()).round().clamp(0.0, 127.0) as u8
}

/// Converts a MIDI note to its frequency.
pub fn midi_to_frequency(note: u8) -> f64 {
    440.0 * 2f64.powf((note as f64 - 69.0) / 12.0)
}

/// Estimates the pitch of `samples`. Returns `None` if there is too little
/// signal or nothing periodic in it.
pub fn detect(samples: &[f32], sample_rate: u32) -> Option<Pitch> {
    let window = ((ANALYSIS_DURATION * sample_rate as f64).round() as usize).min(samples.len());
    if window < MIN_SAMPLES {
        debug!(available = window, "Not enough signal for pitch detection");
        return None;
    }
    let signal = &samples[..window];
    let half = window / 2;

    // Difference function.
    let mut difference = vec![0.0f64; half];
    for (tau, d) in difference.iter_mut().enumerate().skip(1) {
        *d = (0..half)
            .map(|j| {
                let delta = signal[j] as f64 - signal[j + tau] as f64;
                delta * delta
            })
            .sum();
    }

    // Cumulative mean normalized difference.
    let mut normalized = vec![1.0f64; half];
    let mut running = 0.0;
    for tau in 1..half {
        running += difference[tau];
        normalized[tau] = if running > 0.0 {
            difference[tau] * tau as f64 / running
        } else {
            1.0
        };
    }

    let min_period = ((sample_rate as f64 / MAX_FREQUENCY).floor() as usize).max(2);
    let max_period = ((sample_rate as f64 / MIN_FREQUENCY).ceil() as usize).min(half - 2);
    if min_period >= max_period {
        return None;
    }

    let tau = first_dip(&normalized, min_period, max_period).or_else(|| {
        (min_period..=max_period).min_by(|&a, &b| normalized[a].total_cmp(&normalized[b]))
    })?;

    let (period, refined_value) = refine(&normalized, tau);
    let confidence = (1.0 - refined_value).clamp(0.0, 1.0);
    if confidence <= 0.0 || period <= 0.0 {
        return None;
    }

    let hz = sample_rate as f64 / period;
    let pitch = Pitch {
        hz: hz as f32,
        midi: frequency_to_midi(hz),
        confidence: confidence as f32,
        period: period as f32,
    };
    debug!(
        hz = pitch.hz,
        midi = pitch.midi,
        confidence = pitch.confidence,
        "Detected pitch"
    );
    Some(pitch)
}

/// The first lag under the threshold, walked down to its local minimum.
fn first_dip(normalized: &[f64], min_period: usize, max_period: usize) -> Option<usize> {
    let mut tau = (min_period..=max_period).find(|&tau| normalized[tau] < THRESHOLD)?;
    while tau < max_period && normalized[tau + 1] < normalized[tau] {
        tau += 1;
    }
    Some(tau)
}

/// Fits a parabola through the lag and its neighbours and returns the
/// position and value of its vertex.
fn refine(normalized: &[f64], tau: usize) -> (f64, f64) {
    if tau == 0 || tau + 1 >= normalized.len() {
        return (tau as f64, normalized[tau]);
    }
    let (s0, s1, s2) = (normalized[tau - 1], normalized[tau], normalized[tau + 1]);
    let denominator = s0 + s2 - 2.0 * s1;
    if denominator.abs() < f64::EPSILON {
        return (tau as f64, s1);
    }
    let shift = ((s0 - s2) / (2.0 * denominator)).clamp(-1.0, 1.0);
    let value = s1 - 0.25 * (s0 - s2) * shift;
    (tau as f64 + shift, value)
}
