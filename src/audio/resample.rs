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
//! Offline sample rate conversion for loaded clips.
//!
//! Clips are converted to the output rate once at load time so every voice
//! plays at a purely musical rate.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use super::buffer::AudioSample;
use super::decode::DecodeError;

/// Frames fed to the resampler per call.
const CHUNK_FRAMES: usize = 1024;

/// Converts `sample` to `target_rate`. Returns a cheap clone if the rates
/// already match.
pub fn resample(sample: &AudioSample, target_rate: u32) -> Result<AudioSample, DecodeError> {
    if sample.sample_rate() == target_rate || sample.is_empty() || target_rate == 0 {
        return Ok(sample.clone());
    }

    let ratio = target_rate as f64 / sample.sample_rate() as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let channel_count = sample.channel_count();
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_FRAMES, channel_count)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let frames = sample.frames();
    let expected =
        (frames as u64 * target_rate as u64).div_ceil(sample.sample_rate() as u64) as usize;
    let delay = resampler.output_delay();
    let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channel_count];

    let mut position = 0;
    while frames - position >= resampler.input_frames_next() {
        let next = resampler.input_frames_next();
        let chunk: Vec<&[f32]> = sample
            .channels()
            .iter()
            .map(|c| &c[position..position + next])
            .collect();
        let processed = resampler
            .process(chunk.as_slice(), None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        append(&mut output, processed);
        position += next;
    }

    let remainder: Vec<&[f32]> = sample
        .channels()
        .iter()
        .map(|c| &c[position..frames])
        .collect();
    let processed = resampler
        .process_partial(Some(remainder.as_slice()), None)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;
    append(&mut output, processed);

    // Flush the filter tail until the delayed output has fully emerged.
    while output[0].len() < expected + delay {
        let processed = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        if processed.first().map(Vec::is_empty).unwrap_or(true) {
            break;
        }
        append(&mut output, processed);
    }

    for channel in output.iter_mut() {
        channel.drain(..delay.min(channel.len()));
        channel.truncate(expected);
    }

    debug!(
        from = sample.sample_rate(),
        to = target_rate,
        frames_in = frames,
        frames_out = output[0].len(),
        "Resampled clip"
    );
    Ok(AudioSample::new(output, target_rate))
}

fn append(output: &mut [Vec<f32>], processed: Vec<Vec<f32>>) {
    for (out, chunk) in output.iter_mut().zip(processed) {
        out.extend_from_slice(&chunk);
    }
}
