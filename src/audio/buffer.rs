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
//! Immutable decoded PCM.
//!
//! Samples are stored planar and shared through an `Arc`, so handing a buffer
//! to the mixer thread or keeping it around after a reload never copies audio.

use std::sync::Arc;

/// An immutable multichannel PCM buffer.
#[derive(Clone, Debug)]
pub struct AudioSample {
    /// Planar channel data. Every channel has the same length.
    channels: Arc<[Vec<f32>]>,
    /// Sample rate in Hz.
    sample_rate: u32,
}

impl AudioSample {
    /// Creates a sample from planar channel data. Channels longer than the
    /// shortest one are truncated.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: u32) -> AudioSample {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for channel in channels.iter_mut() {
            channel.truncate(frames);
        }
        AudioSample {
            channels: channels.into(),
            sample_rate,
        }
    }

    /// Creates a sample from interleaved data.
    pub fn from_interleaved(samples: &[f32], channel_count: usize, sample_rate: u32) -> AudioSample {
        let channel_count = channel_count.max(1);
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        AudioSample::new(channels, sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Averages all channels into one.
    pub fn mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            count => (0..self.frames())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / count as f32)
                .collect(),
        }
    }

    /// Interleaves all channels frame by frame.
    pub fn interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.frames() * self.channel_count());
        for i in 0..self.frames() {
            for channel in self.channels.iter() {
                out.push(channel[i]);
            }
        }
        out
    }

    /// Copies the frames in `[start, end)` into a new sample. Out of range
    /// bounds are clamped.
    pub fn slice_frames(&self, start: usize, end: usize) -> AudioSample {
        let end = end.min(self.frames());
        let start = start.min(end);
        AudioSample::new(
            self.channels
                .iter()
                .map(|c| c[start..end].to_vec())
                .collect(),
            self.sample_rate,
        )
    }

    /// The largest absolute sample value across all channels.
    pub fn peak(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|c| c.iter())
            .fold(0.0f32, |peak, s| peak.max(s.abs()))
    }

    /// Scales the sample so its peak sits at `target`. Silent samples are
    /// returned unchanged.
    pub fn normalized(&self, target: f32) -> AudioSample {
        let peak = self.peak();
        if peak <= f32::EPSILON {
            return self.clone();
        }
        let gain = target / peak;
        AudioSample::new(
            self.channels
                .iter()
                .map(|c| c.iter().map(|s| s * gain).collect())
                .collect(),
            self.sample_rate,
        )
    }
}
