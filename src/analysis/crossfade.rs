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

use crate::audio::AudioSample;

/// Default length of the loop seam crossfade in seconds.
pub const DEFAULT_CROSSFADE: f64 = 0.015;

/// Builds a copy of `sample` whose loop tail blends into the loop head, so
/// that wrapping from `loop_end` back to `loop_start` is seamless. Loop bounds
/// are frame indices into `sample`.
///
/// Returns `None` when the crossfade is empty, the bounds are out of range, or
/// the loop is shorter than twice the crossfade. Callers loop the raw buffer in
/// that case.
pub fn build(
    sample: &AudioSample,
    loop_start: usize,
    loop_end: usize,
    crossfade: f64,
) -> Option<AudioSample> {
    let fade = (crossfade.max(0.0) * sample.sample_rate() as f64).round() as usize;
    if fade == 0 || loop_end > sample.frames() || loop_end <= loop_start {
        return None;
    }
    if loop_end - loop_start < 2 * fade {
        debug!(
            loop_len = loop_end - loop_start,
            fade, "Loop too short to crossfade"
        );
        return None;
    }

    let tail = loop_end - fade;
    let channels = sample
        .channels()
        .iter()
        .map(|original| {
            let mut blended = original.clone();
            for i in 0..fade {
                let mix = i as f32 / fade as f32;
                blended[tail + i] = original[tail + i] * (1.0 - mix) + original[loop_start + i] * mix;
            }
            blended
        })
        .collect();

    Some(AudioSample::new(channels, sample.sample_rate()))
}
