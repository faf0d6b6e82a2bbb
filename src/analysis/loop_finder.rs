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
use tracing::debug;

use super::rms;

/// Shortest loop searched for, in seconds.
pub const MIN_LOOP: f64 = 0.15;
/// Longest loop searched for, in seconds.
pub const MAX_LOOP: f64 = 0.6;
/// Loop length used when the pitch is unknown.
const DEFAULT_LOOP: f64 = (MIN_LOOP + MAX_LOOP) / 2.0;
/// Preferred number of pitch periods in a loop.
const TARGET_PERIODS: f64 = 8.0;
/// Distance between candidate loop starts.
const SEARCH_STEP: f64 = 0.02;
/// Sub-window over which RMS stability is measured.
const RMS_WINDOW: f64 = 0.02;
/// How far from a candidate edge to look for a zero crossing.
pub const ZERO_CROSSING_SEARCH: f64 = 0.02;

/// A loop region as sample indices into the analyzed signal, `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopRegion {
    pub start: usize,
    pub end: usize,
}

impl LoopRegion {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Finds the most amplitude-stable region of the signal to loop and snaps its
/// edges to zero crossings. Signals shorter than the target loop loop in full.
pub fn find_loop(samples: &[f32], sample_rate: u32, period: Option<f32>) -> LoopRegion {
    let len = samples.len();
    let sr = sample_rate as f64;
    let loop_len = target_length(sr, period);
    if loop_len == 0 || len <= loop_len {
        return LoopRegion { start: 0, end: len };
    }

    let step = ((SEARCH_STEP * sr).round() as usize).max(1);
    let window = ((RMS_WINDOW * sr).round() as usize).clamp(1, loop_len);
    let latest = len - loop_len;
    let first = (len / 4).min(latest);
    let last = (len * 3 / 4).min(latest);

    let mut best = first;
    let mut best_variance = f64::INFINITY;
    let mut candidate = first;
    while candidate <= last {
        let variance = rms_variance(&samples[candidate..candidate + loop_len], window);
        if variance < best_variance {
            best_variance = variance;
            best = candidate;
        }
        candidate += step;
    }

    let search = ((ZERO_CROSSING_SEARCH * sr).round() as usize).max(1);
    let min_len = (MIN_LOOP * sr).ceil() as usize;
    let max_len = (MAX_LOOP * sr).floor() as usize;
    let start = next_zero_crossing(samples, best, search.min(latest - best)).unwrap_or(best);

    let nominal_end = start + loop_len;
    let forward = search
        .min(len - nominal_end)
        .min(max_len.saturating_sub(loop_len));
    let end = next_zero_crossing(samples, nominal_end, forward)
        .or_else(|| {
            previous_zero_crossing(samples, nominal_end, search, start + min_len.min(loop_len))
        })
        .unwrap_or(nominal_end);

    debug!(
        start,
        end,
        target = loop_len,
        variance = best_variance,
        "Found loop region"
    );
    LoopRegion { start, end }
}

/// The loop length in samples for the given pitch period.
fn target_length(sr: f64, period: Option<f32>) -> usize {
    let min = MIN_LOOP * sr;
    let max = MAX_LOOP * sr;
    match period {
        Some(period) if period > 0.0 => {
            let period = period as f64;
            let mut periods = TARGET_PERIODS;
            if periods * period < min {
                periods = (min / period).ceil();
            }
            if periods * period > max {
                periods = (max / period).floor().max(1.0);
            }
            (periods * period).round() as usize
        }
        _ => (DEFAULT_LOOP * sr).round() as usize,
    }
}

/// Variance of the RMS levels of consecutive sub-windows.
fn rms_variance(region: &[f32], window: usize) -> f64 {
    let levels: Vec<f64> = region
        .chunks_exact(window)
        .map(|chunk| rms(chunk) as f64)
        .collect();
    if levels.is_empty() {
        return 0.0;
    }
    let mean = levels.iter().sum::<f64>() / levels.len() as f64;
    levels.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / levels.len() as f64
}

fn is_crossing(samples: &[f32], i: usize) -> bool {
    i > 0 && i < samples.len() && (samples[i - 1] < 0.0) != (samples[i] < 0.0)
}

/// The first index in `[from, from + limit]` where the waveform changes sign.
pub fn next_zero_crossing(samples: &[f32], from: usize, limit: usize) -> Option<usize> {
    (from..=from.saturating_add(limit)).find(|&i| is_crossing(samples, i))
}

/// The last index in `[from - limit, from)`, and no lower than `floor`, where
/// the waveform changes sign.
fn previous_zero_crossing(
    samples: &[f32],
    from: usize,
    limit: usize,
    floor: usize,
) -> Option<usize> {
    (from.saturating_sub(limit).max(floor)..from)
        .rev()
        .find(|&i| is_crossing(samples, i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{generate_multi_frequency_signal, noise, sine};

    fn assert_near_crossing(samples: &[f32], index: usize, sample_rate: u32) {
        let limit = (ZERO_CROSSING_SEARCH * sample_rate as f64) as usize;
        let lo = index.saturating_sub(limit);
        let hi = (index + limit).min(samples.len() - 1);
        assert!(
            (lo..=hi).any(|i| is_crossing(samples, i)),
            "no zero crossing near {}",
            index
        );
    }

    #[test]
    fn test_pitched_loop_length() {
        let sample_rate = 44100;
        let signal = sine(220.0, sample_rate, 2.0, 0.5);
        let period = sample_rate as f32 / 220.0;

        let region = find_loop(&signal, sample_rate, Some(period));
        let seconds = region.len() as f64 / sample_rate as f64;
        assert!((MIN_LOOP..=MAX_LOOP).contains(&seconds), "{} s", seconds);
        assert!(is_crossing(&signal, region.start));
        assert!(is_crossing(&signal, region.end));
        assert!(region.start >= signal.len() / 4 - 1);
    }

    #[test]
    fn test_unpitched_loop_length() {
        let sample_rate = 48000;
        let signal = noise(sample_rate, 2.0, 0.3);

        let region = find_loop(&signal, sample_rate, None);
        let seconds = region.len() as f64 / sample_rate as f64;
        assert!((MIN_LOOP..=MAX_LOOP).contains(&seconds), "{} s", seconds);
        assert_near_crossing(&signal, region.start, sample_rate);
        assert_near_crossing(&signal, region.end, sample_rate);
    }

    #[test]
    fn test_low_pitch_stays_within_bounds() {
        let sample_rate = 44100;
        for frequency in [70.0f32, 90.0, 130.0, 600.0, 900.0] {
            let signal = sine(frequency, sample_rate, 3.0, 0.5);
            let region = find_loop(&signal, sample_rate, Some(sample_rate as f32 / frequency));
            let seconds = region.len() as f64 / sample_rate as f64;
            assert!(
                (MIN_LOOP..=MAX_LOOP).contains(&seconds),
                "{} Hz gave {} s",
                frequency,
                seconds
            );
        }
    }

    #[test]
    fn test_prefers_stable_region() {
        let sample_rate = 44100;
        // A tone that swells over the first half and then holds steady. 350 Hz
        // puts a whole number of periods in every RMS window.
        let tone = sine(350.0, sample_rate, 2.0, 1.0);
        let half = tone.len() / 2;
        let signal: Vec<f32> = tone
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let gain = if i < half { 0.1 + 0.9 * i as f32 / half as f32 } else { 1.0 };
                s * gain * 0.5
            })
            .collect();

        let region = find_loop(&signal, sample_rate, Some(sample_rate as f32 / 350.0));
        assert!(region.start >= half - (0.02 * sample_rate as f64) as usize);
    }

    #[test]
    fn test_short_signal_loops_in_full() {
        let signal = generate_multi_frequency_signal(&[440.0], &[0.5], 44100, 0.1);
        let region = find_loop(&signal, 44100, None);
        assert_eq!(region, LoopRegion { start: 0, end: signal.len() });
    }

    #[test]
    fn test_target_length() {
        // 8 periods of 100 Hz is 80ms, so the loop grows to 15 periods.
        assert_eq!(target_length(44100.0, Some(441.0)), 15 * 441);
        // 8 periods of 20ms already fit.
        assert_eq!(target_length(48000.0, Some(960.0)), 8 * 960);
        assert_eq!(target_length(48000.0, None), 18000);
    }
}
