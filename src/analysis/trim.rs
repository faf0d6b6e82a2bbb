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
use super::rms;

/// Default RMS level below which a window counts as silence.
pub const DEFAULT_THRESHOLD: f32 = 0.015;

/// Analysis window length in seconds.
const WINDOW: f64 = 0.01;

/// Trims shorter than this fall back to the untrimmed signal.
const MIN_SPAN: f64 = 0.1;

/// A trimmed view of a mono signal.
#[derive(Debug)]
pub struct Trimmed<'a> {
    /// The retained samples.
    pub samples: &'a [f32],
    /// First retained sample index in the original signal.
    pub start: usize,
    /// One past the last retained sample index in the original signal.
    pub end: usize,
    sample_rate: u32,
}

impl Trimmed<'_> {
    pub fn start_seconds(&self) -> f64 {
        self.start as f64 / self.sample_rate as f64
    }

    pub fn end_seconds(&self) -> f64 {
        self.end as f64 / self.sample_rate as f64
    }
}

/// Strips leading and trailing windows whose RMS stays below `threshold`,
/// keeping one extra window on each side so attacks and tails survive.
pub fn trim(samples: &[f32], sample_rate: u32, threshold: f32) -> Trimmed<'_> {
    let len = samples.len();
    let window = ((WINDOW * sample_rate as f64).round() as usize).max(1);

    let mut start = 0;
    while start + window <= len && rms(&samples[start..start + window]) < threshold {
        start += window;
    }
    let start = start.saturating_sub(window);

    let mut end = len;
    while end >= window && rms(&samples[end - window..end]) < threshold {
        end -= window;
    }
    let end = (end + window).min(len);

    let min_span = (MIN_SPAN * sample_rate as f64).round() as usize;
    let (start, end) = if end <= start || end - start < min_span {
        (0, len)
    } else {
        (start, end)
    };

    Trimmed {
        samples: &samples[start..end],
        start,
        end,
        sample_rate,
    }
}
