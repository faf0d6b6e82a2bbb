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

//! Sample loading for the instrument.
//!
//! A recording goes through decode, conversion to the output rate, optional
//! normalization, analysis and crossfade synthesis before it can be played.
//! Everything here is synchronous and free of engine state, so it can run on a
//! blocking worker.

use tracing::{debug, info, span, Level};

use crate::analysis::{self, crossfade, Analysis};
use crate::audio::{decode, resample, AudioSample};
use crate::config::EngineConfig;
use crate::error::EngineError;

/// Peak level a normalized sample is scaled to.
pub const NORMALIZE_PEAK: f32 = 0.95;

/// Shortest loop accepted by [`LoadedSample::set_loop_points`], in seconds.
pub const MIN_LOOP_LENGTH: f64 = 0.05;

/// A decoded and analyzed sample ready for playback.
/// Buffers are shared, so cloning is cheap.
#[derive(Clone, Debug)]
pub struct LoadedSample {
    /// The sample at the output rate.
    sample: AudioSample,
    analysis: Analysis,
    /// The sample with its loop seam crossfaded, if the loop is long enough.
    crossfaded: Option<AudioSample>,
}

impl LoadedSample {
    pub fn sample(&self) -> &AudioSample {
        &self.sample
    }

    pub fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    pub fn crossfaded(&self) -> Option<&AudioSample> {
        self.crossfaded.as_ref()
    }

    /// Converts render seconds within the sample to a frame index.
    pub fn frame_of(&self, seconds: f64) -> usize {
        ((seconds.max(0.0) * self.sample.sample_rate() as f64).round() as usize)
            .min(self.sample.frames())
    }

    /// The analyzed loop as frame indices `[start, end)`.
    pub fn loop_frames(&self) -> (usize, usize) {
        (
            self.frame_of(self.analysis.loop_start_sec),
            self.frame_of(self.analysis.loop_end_sec),
        )
    }

    /// Frame bounds for a voice looping between `start` and `end` seconds.
    /// The loop is always at least one frame long so the voice sustains.
    pub fn loop_bounds(&self, start: f64, end: f64) -> (f64, f64) {
        let last = self.sample.frames().saturating_sub(1);
        let start = self.frame_of(start).min(last);
        let end = self.frame_of(end).max(start + 1);
        (start as f64, end as f64)
    }

    /// Copies the loop region into its own sample.
    pub fn loop_region(&self) -> AudioSample {
        let (start, end) = self.loop_frames();
        self.sample.slice_frames(start, end)
    }

    /// Overrides the loop, clamping it into the sample and to at least
    /// [`MIN_LOOP_LENGTH`], and rebuilds the crossfade for the new bounds.
    /// Returns the bounds actually applied.
    pub fn set_loop_points(&mut self, start: f64, end: f64, crossfade_duration: f64) -> (f64, f64) {
        let duration = self.sample.duration();
        let (start, end) = if duration <= MIN_LOOP_LENGTH {
            (0.0, duration)
        } else {
            let start = if start.is_finite() { start } else { 0.0 };
            let end = if end.is_finite() { end } else { duration };
            let start = start.clamp(0.0, duration - MIN_LOOP_LENGTH);
            (start, end.max(start + MIN_LOOP_LENGTH).min(duration))
        };

        self.analysis.loop_start_sec = start;
        self.analysis.loop_end_sec = end;
        self.rebuild_crossfade(crossfade_duration);
        debug!(
            start,
            end,
            crossfaded = self.crossfaded.is_some(),
            "Loop points set"
        );
        (start, end)
    }

    /// Rebuilds the crossfaded buffer for the current loop.
    pub fn rebuild_crossfade(&mut self, crossfade_duration: f64) {
        let (start, end) = self.loop_frames();
        self.crossfaded = crossfade::build(&self.sample, start, end, crossfade_duration);
    }

    /// Overrides the detected root note.
    pub fn set_root_note(&mut self, note: u8) {
        self.analysis.root_pitch_midi = note.min(127);
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        let buffers = 1 + usize::from(self.crossfaded.is_some());
        buffers * self.sample.frames() * self.sample.channel_count() * std::mem::size_of::<f32>()
    }
}

/// Turns recordings into [`LoadedSample`]s.
#[derive(Clone, Debug)]
pub struct SampleLoader {
    /// Target sample rate for transcoding (matches audio output).
    target_sample_rate: u32,
    normalize: bool,
    trim_threshold: f32,
    crossfade_duration: f64,
}

impl SampleLoader {
    /// Creates a new sample loader.
    pub fn new(target_sample_rate: u32, config: &EngineConfig) -> SampleLoader {
        SampleLoader {
            target_sample_rate,
            normalize: config.normalize(),
            trim_threshold: config.trim_threshold(),
            crossfade_duration: config.crossfade_duration(),
        }
    }

    /// Decodes and analyzes a recording.
    pub fn prepare(&self, bytes: &[u8]) -> Result<LoadedSample, EngineError> {
        let span = span!(Level::INFO, "prepare sample");
        let _enter = span.enter();

        if bytes.is_empty() {
            return Err(EngineError::EmptyRecording);
        }

        let decoded = decode::decode(bytes)?;
        let source_rate = decoded.sample_rate();
        let sample = resample::resample(&decoded, self.target_sample_rate)?;
        if source_rate != sample.sample_rate() {
            info!(
                source_rate,
                target_rate = sample.sample_rate(),
                "Transcoded sample"
            );
        }
        let sample = if self.normalize {
            sample.normalized(NORMALIZE_PEAK)
        } else {
            sample
        };

        let analysis = analysis::analyze(&sample, self.trim_threshold);
        let mut loaded = LoadedSample {
            sample,
            analysis,
            crossfaded: None,
        };
        loaded.rebuild_crossfade(self.crossfade_duration);

        info!(
            frames = loaded.sample.frames(),
            channels = loaded.sample.channel_count(),
            duration = loaded.sample.duration(),
            memory = loaded.memory_size(),
            "Loaded sample"
        );
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigureOptions;
    use crate::testutil::{sine, wav_bytes};

    fn loader(sample_rate: u32) -> SampleLoader {
        SampleLoader::new(sample_rate, &EngineConfig::default())
    }

    #[test]
    fn test_prepare_tone() {
        let bytes = wav_bytes(&[sine(220.0, 44100, 1.0, 0.4)], 44100);
        let loaded = loader(44100).prepare(&bytes).unwrap();

        assert_eq!(loaded.sample().sample_rate(), 44100);
        assert!((loaded.sample().peak() - NORMALIZE_PEAK).abs() < 1e-3);
        assert!((loaded.analysis().root_pitch_midi as i32 - 57).abs() <= 1);
        assert!(loaded.crossfaded().is_some());

        let (start, end) = loaded.loop_frames();
        assert!(end > start);
        assert_eq!(loaded.loop_region().frames(), end - start);
    }

    #[test]
    fn test_prepare_resamples_to_output_rate() {
        let bytes = wav_bytes(&[sine(440.0, 44100, 0.5, 0.5)], 44100);
        let loaded = loader(48000).prepare(&bytes).unwrap();
        assert_eq!(loaded.sample().sample_rate(), 48000);
        assert_eq!(loaded.sample().frames(), 24000);
    }

    #[test]
    fn test_prepare_without_normalize() {
        let config = EngineConfig::default()
            .configure(ConfigureOptions {
                normalize: Some(false),
                ..Default::default()
            })
            .unwrap();
        let bytes = wav_bytes(&[sine(440.0, 44100, 0.5, 0.25)], 44100);
        let loaded = SampleLoader::new(44100, &config).prepare(&bytes).unwrap();
        assert!((loaded.sample().peak() - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_prepare_errors() {
        assert!(matches!(
            loader(44100).prepare(&[]),
            Err(EngineError::EmptyRecording)
        ));
        assert!(matches!(
            loader(44100).prepare(b"definitely not audio"),
            Err(EngineError::Decode(_))
        ));
    }

    #[test]
    fn test_set_loop_points_clamps() {
        let bytes = wav_bytes(&[sine(330.0, 48000, 1.0, 0.5)], 48000);
        let mut loaded = loader(48000).prepare(&bytes).unwrap();

        assert_eq!(loaded.set_loop_points(0.2, 0.6, 0.015), (0.2, 0.6));
        assert_eq!(loaded.loop_frames(), (9600, 28800));
        assert!(loaded.crossfaded().is_some());

        let (start, end) = loaded.set_loop_points(-1.0, 5.0, 0.015);
        assert_eq!((start, end), (0.0, 1.0));

        let (start, end) = loaded.set_loop_points(0.99, 0.1, 0.015);
        assert!((start - 0.95).abs() < 1e-9);
        assert!((end - 1.0).abs() < 1e-9);

        // Too short for a 15ms crossfade on both sides.
        let (start, end) = loaded.set_loop_points(0.5, 0.52, 0.015);
        assert!((end - start - MIN_LOOP_LENGTH).abs() < 1e-9);
        assert!(loaded.crossfaded().is_some());
        loaded.set_loop_points(0.5, 0.52, 0.03);
        assert!(loaded.crossfaded().is_none());
    }

    #[test]
    fn test_loop_bounds_never_collapse() {
        let bytes = wav_bytes(&[sine(330.0, 48000, 1.0, 0.5)], 48000);
        let loaded = loader(48000).prepare(&bytes).unwrap();

        assert_eq!(loaded.loop_bounds(0.25, 0.5), (12000.0, 24000.0));
        assert_eq!(loaded.loop_bounds(0.5, 0.5), (24000.0, 24001.0));
        assert_eq!(loaded.loop_bounds(0.5, 0.2), (24000.0, 24001.0));

        let frames = loaded.sample().frames() as f64;
        assert_eq!(loaded.loop_bounds(5.0, 6.0), (frames - 1.0, frames));
    }

    #[test]
    fn test_set_root_note() {
        let bytes = wav_bytes(&[sine(330.0, 48000, 0.5, 0.5)], 48000);
        let mut loaded = loader(48000).prepare(&bytes).unwrap();
        loaded.set_root_note(72);
        assert_eq!(loaded.analysis().root_pitch_midi, 72);
        loaded.set_root_note(200);
        assert_eq!(loaded.analysis().root_pitch_midi, 127);
    }
}
