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
//! Performance capture and sample export.
//!
//! Capture taps the instrument bus of the mixer, ahead of the metronome, and
//! streams every rendered block into an [`Encoder`]. Exports either serialize
//! PCM directly as a canonical 16-bit WAV or play the audio through an offline
//! mixer into an encoder, the same path a live capture takes.

use std::fmt;
use std::str::FromStr;

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::audio::encoder::{Encoder, EncoderFactory};
use crate::audio::mixer::{self, MixerCommand, MixerHandle, VoiceSource};
use crate::audio::{wav, AudioSample};
use crate::error::EngineError;

/// Frames rendered per block on the offline export path.
const RENDER_BLOCK: usize = 1024;

/// How exported audio is serialized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// Canonical 16-bit PCM WAV, bit exact.
    #[default]
    Wav,
    /// Rendered through the configured encoder.
    Encoded,
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wav" => Ok(ExportFormat::Wav),
            "encoded" => Ok(ExportFormat::Encoded),
            other => Err(format!("unknown export format: {}", other)),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Wav => write!(f, "wav"),
            ExportFormat::Encoded => write!(f, "encoded"),
        }
    }
}

struct Session {
    encoder: Box<dyn Encoder>,
    receiver: Receiver<Vec<f32>>,
    samples: usize,
}

impl Session {
    fn drain(&mut self) -> Result<(), EngineError> {
        for chunk in self.receiver.try_iter() {
            self.samples += chunk.len();
            self.encoder.push(&chunk)?;
        }
        Ok(())
    }
}

/// Records the instrument's output while a session is open.
#[derive(Default)]
pub struct PerformanceCapture {
    session: Option<Session>,
}

impl PerformanceCapture {
    pub fn new() -> PerformanceCapture {
        PerformanceCapture::default()
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Opens a session and starts tapping the mixer. Starting while a session
    /// is already open keeps the existing session.
    pub fn start(&mut self, mixer: &MixerHandle, encoder: Box<dyn Encoder>) -> bool {
        if self.session.is_some() {
            warn!("Performance capture already running");
            return false;
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        mixer.send(MixerCommand::Capture(Some(tx)));
        info!(mime_type = encoder.mime_type(), "Performance capture started");
        self.session = Some(Session {
            encoder,
            receiver: rx,
            samples: 0,
        });
        true
    }

    /// Moves captured blocks into the encoder. Called periodically so the
    /// channel does not grow for the length of a performance.
    pub fn drain(&mut self) -> Result<(), EngineError> {
        match self.session.as_mut() {
            Some(session) => session.drain(),
            None => Ok(()),
        }
    }

    /// Stops tapping the mixer and returns the encoded performance. A session
    /// that captured nothing fails with [`EngineError::EmptyRecording`].
    pub fn stop(&mut self, mixer: &MixerHandle) -> Result<Vec<u8>, EngineError> {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| EngineError::NotAvailable("no performance is being recorded".into()))?;
        mixer.send(MixerCommand::Capture(None));
        session.drain()?;

        let samples = session.samples;
        if samples == 0 {
            warn!("Performance capture stopped without any audio");
            return Err(EngineError::EmptyRecording);
        }
        let bytes = session.encoder.finish()?;
        info!(samples, bytes = bytes.len(), "Performance capture stopped");
        Ok(bytes)
    }
}

/// Serializes `sample` in the requested format.
pub fn export(
    sample: &AudioSample,
    format: ExportFormat,
    encoders: &dyn EncoderFactory,
) -> Result<Vec<u8>, EngineError> {
    let bytes = match format {
        ExportFormat::Wav => wav::encode_pcm16(sample),
        ExportFormat::Encoded => render_encoded(sample, encoders)?,
    };
    debug!(
        %format,
        frames = sample.frames(),
        bytes = bytes.len(),
        "Exported sample"
    );
    Ok(bytes)
}

/// Plays `sample` through a silent offline mixer and captures the result.
fn render_encoded(sample: &AudioSample, encoders: &dyn EncoderFactory) -> Result<Vec<u8>, EngineError> {
    let channels = sample.channel_count().max(1) as u16;
    let (mut mixer, handle) = mixer::mixer(sample.sample_rate(), channels);
    let (tx, rx) = crossbeam_channel::unbounded();
    handle.send(MixerCommand::Capture(Some(tx)));
    handle.send(MixerCommand::Start(Box::new(VoiceSource::one_shot(
        0,
        sample.clone(),
        0,
    ))));

    let mut encoder = encoders.create(channels, sample.sample_rate());
    let mut remaining = sample.frames() * channels as usize;
    let mut rendered = 0;
    while rendered < sample.frames() {
        mixer.process_frames(RENDER_BLOCK);
        rendered += RENDER_BLOCK;
        for chunk in rx.try_iter() {
            let take = chunk.len().min(remaining);
            encoder.push(&chunk[..take])?;
            remaining -= take;
        }
    }
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::audio::encoder::FloatWavEncoder;
    use crate::testutil::sine;

    fn read_floats(bytes: Vec<u8>) -> Vec<f32> {
        hound::WavReader::new(Cursor::new(bytes))
            .unwrap()
            .samples::<f32>()
            .map(|s| s.unwrap())
            .collect()
    }

    #[test]
    fn test_capture_session() {
        let (mut mixer, handle) = mixer::mixer(48000, 1);
        let mut capture = PerformanceCapture::new();
        assert!(matches!(
            capture.stop(&handle),
            Err(EngineError::NotAvailable(_))
        ));

        assert!(capture.start(&handle, Box::new(FloatWavEncoder::new(1, 48000))));
        assert!(capture.is_recording());
        assert!(!capture.start(&handle, Box::new(FloatWavEncoder::new(1, 48000))));

        let tone = AudioSample::new(vec![sine(440.0, 48000, 0.05, 0.5)], 48000);
        handle.send(MixerCommand::Start(Box::new(VoiceSource::one_shot(
            1,
            tone.clone(),
            0,
        ))));
        mixer.process_frames(1200);
        capture.drain().unwrap();
        mixer.process_frames(1200);

        let samples = read_floats(capture.stop(&handle).unwrap());
        assert!(!capture.is_recording());
        assert_eq!(samples.len(), 2400);
        assert_eq!(&samples[..2400], tone.channel(0));

        // The tap is gone once the mixer sees the stop.
        mixer.process_frames(256);
    }

    #[test]
    fn test_empty_capture_is_rejected() {
        let (_mixer, handle) = mixer::mixer(48000, 1);
        let mut capture = PerformanceCapture::new();

        assert!(capture.start(&handle, Box::new(FloatWavEncoder::new(1, 48000))));
        assert!(matches!(
            capture.stop(&handle),
            Err(EngineError::EmptyRecording)
        ));
        assert!(!capture.is_recording());
        assert!(matches!(
            capture.stop(&handle),
            Err(EngineError::NotAvailable(_))
        ));
    }

    #[test]
    fn test_export_wav_is_canonical() {
        let sample = AudioSample::new(vec![vec![0.5, -0.5], vec![1.0, -1.0]], 22050);
        let bytes = export(&sample, ExportFormat::Wav, FloatWavEncoder::factory().as_ref()).unwrap();
        assert_eq!(bytes, wav::encode_pcm16(&sample));
    }

    #[test]
    fn test_export_encoded_renders_whole_sample() {
        let left = sine(330.0, 44100, 0.1, 0.5);
        let right: Vec<f32> = left.iter().map(|s| s * 0.5).collect();
        let sample = AudioSample::new(vec![left, right], 44100);

        let bytes = export(&sample, ExportFormat::Encoded, FloatWavEncoder::factory().as_ref()).unwrap();
        let samples = read_floats(bytes);
        assert_eq!(samples, sample.interleaved());
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("WAV".parse::<ExportFormat>(), Ok(ExportFormat::Wav));
        assert_eq!(" encoded".parse::<ExportFormat>(), Ok(ExportFormat::Encoded));
        assert!("mp3".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Encoded.to_string(), "encoded");
    }
}
