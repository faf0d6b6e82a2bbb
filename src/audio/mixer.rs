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
// Core audio rendering that can be driven by both cpal and offline callers.
//
// The control thread never touches voices directly. It sends commands over a
// channel and reads the frame clock; the render side applies commands at the
// start of each block and advances the clock once the block is written.
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use super::buffer::AudioSample;
use crate::samples::envelope::{Envelope, Stage};

/// Length of a metronome click in seconds.
const CLICK_DURATION: f32 = 0.03;
/// Pitch of the metronome click.
const CLICK_FREQUENCY: f32 = 1000.0;
/// Exponential decay rate of the click.
const CLICK_DECAY: f32 = 150.0;

/// A voice ready to be rendered.
#[derive(Clone, Debug)]
pub struct VoiceSource {
    /// Identifier shared with the control side.
    pub id: u64,
    /// The audio to read from.
    pub buffer: AudioSample,
    /// Source frames advanced per output frame.
    pub rate: f64,
    /// Render-clock frame at which playback begins.
    pub start_at: u64,
    /// Source frame playback begins from.
    pub offset: f64,
    /// Loop region in source frames. Playback wraps from the end back to the
    /// start instead of running off the buffer.
    pub loop_region: Option<(f64, f64)>,
    /// Gain over time.
    pub envelope: Envelope,
    /// Render-clock frame at which the voice is cut regardless of envelope.
    pub stop_at: Option<u64>,
}

impl VoiceSource {
    /// Plays `buffer` once at its own rate starting at frame `start_at`.
    pub fn one_shot(id: u64, buffer: AudioSample, start_at: u64) -> VoiceSource {
        VoiceSource {
            id,
            buffer,
            rate: 1.0,
            start_at,
            offset: 0.0,
            loop_region: None,
            envelope: Envelope::constant(0.0, 1.0),
            stop_at: None,
        }
    }
}

/// Commands sent from the control thread to the render side.
#[derive(Debug)]
pub enum MixerCommand {
    /// Adds a voice.
    Start(Box<VoiceSource>),
    /// Replaces a voice's envelope and stop point.
    UpdateEnvelope {
        id: u64,
        envelope: Envelope,
        stop_at: Option<u64>,
    },
    /// Removes a voice immediately.
    Stop { id: u64 },
    /// Removes every voice immediately.
    StopAll,
    /// Schedules a metronome click at the given frame.
    Click { at: u64 },
    /// Drops all scheduled and sounding clicks.
    ClearClicks,
    /// Sets the click bus gain. Applies to clicks already scheduled.
    SetClickGain(f32),
    /// Starts or stops tapping the instrument bus.
    Capture(Option<Sender<Vec<f32>>>),
}

struct PlayingVoice {
    source: VoiceSource,
    position: f64,
}

impl PlayingVoice {
    /// Reads one source channel at the current fractional position.
    fn read(&self, channel: usize) -> f32 {
        let data = self.source.buffer.channel(channel);
        let index = self.position.floor();
        let frac = (self.position - index) as f32;
        let index = index as usize;
        let Some(&current) = data.get(index) else {
            return 0.0;
        };
        let next_index = match self.source.loop_region {
            Some((start, end)) if (index + 1) as f64 >= end => start as usize,
            _ => index + 1,
        };
        let next = data.get(next_index).copied().unwrap_or(0.0);
        current + (next - current) * frac
    }

    /// Advances the read position. Returns false once a non-looping voice has
    /// run off the end of its buffer.
    fn advance(&mut self) -> bool {
        self.position += self.source.rate;
        if let Some((start, end)) = self.source.loop_region {
            let length = end - start;
            if length > 0.0 && self.position >= end {
                self.position = start + (self.position - end) % length;
            }
            return true;
        }
        self.position < self.source.buffer.frames() as f64
    }
}

/// The render side. Owned by whichever thread produces audio.
pub struct AudioMixer {
    commands: Receiver<MixerCommand>,
    clock: Arc<AtomicU64>,
    frame: u64,
    sample_rate: u32,
    channels: u16,
    voices: Vec<PlayingVoice>,
    click_wave: Vec<f32>,
    clicks: Vec<u64>,
    click_gain: f32,
    capture: Option<Sender<Vec<f32>>>,
}

/// The control side of the mixer.
#[derive(Clone)]
pub struct MixerHandle {
    commands: Sender<MixerCommand>,
    clock: Arc<AtomicU64>,
    sample_rate: u32,
    channels: u16,
}

/// Creates a connected mixer and handle.
pub fn mixer(sample_rate: u32, channels: u16) -> (AudioMixer, MixerHandle) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let clock = Arc::new(AtomicU64::new(0));
    let channels = channels.max(1);

    let click_frames = (CLICK_DURATION * sample_rate as f32) as usize;
    let click_wave = (0..click_frames)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (TAU * CLICK_FREQUENCY * t).sin() * (-t * CLICK_DECAY).exp()
        })
        .collect();

    (
        AudioMixer {
            commands: rx,
            clock: clock.clone(),
            frame: 0,
            sample_rate,
            channels,
            voices: Vec::new(),
            click_wave,
            clicks: Vec::new(),
            click_gain: 0.0,
            capture: None,
        },
        MixerHandle {
            commands: tx,
            clock,
            sample_rate,
            channels,
        },
    )
}

impl AudioMixer {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of voices currently held by the renderer.
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                MixerCommand::Start(source) => {
                    let position = source.offset;
                    self.voices.push(PlayingVoice {
                        source: *source,
                        position,
                    });
                }
                MixerCommand::UpdateEnvelope {
                    id,
                    envelope,
                    stop_at,
                } => {
                    if let Some(voice) = self.voices.iter_mut().find(|v| v.source.id == id) {
                        voice.source.envelope = envelope;
                        voice.source.stop_at = stop_at;
                    }
                }
                MixerCommand::Stop { id } => self.voices.retain(|v| v.source.id != id),
                MixerCommand::StopAll => self.voices.clear(),
                MixerCommand::Click { at } => self.clicks.push(at),
                MixerCommand::ClearClicks => self.clicks.clear(),
                MixerCommand::SetClickGain(gain) => self.click_gain = gain,
                MixerCommand::Capture(sender) => self.capture = sender,
            }
        }
    }

    /// Renders interleaved frames into `out`, which must hold a whole number
    /// of frames for the mixer's channel count.
    pub fn process(&mut self, out: &mut [f32]) {
        self.apply_commands();

        let channels = self.channels as usize;
        let frames = out.len() / channels;
        out.fill(0.0);

        let sample_rate = self.sample_rate as f64;
        let block_start = self.frame;
        self.voices.retain_mut(|voice| {
            let source_channels = voice.source.buffer.channel_count();
            if source_channels == 0 {
                return false;
            }
            for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
                let now = block_start + i as u64;
                if now < voice.source.start_at {
                    continue;
                }
                if voice.source.stop_at.is_some_and(|stop| now >= stop) {
                    return false;
                }
                let t = now as f64 / sample_rate;
                if voice.source.envelope.stage_at(t) == Stage::Done {
                    return false;
                }
                let gain = voice.source.envelope.level_at(t);
                for (channel, sample) in frame.iter_mut().enumerate() {
                    *sample += voice.read(channel % source_channels) * gain;
                }
                if !voice.advance() {
                    return false;
                }
            }
            true
        });

        if let Some(capture) = &self.capture {
            if capture.send(out[..frames * channels].to_vec()).is_err() {
                debug!("Capture receiver dropped, stopping tap");
                self.capture = None;
            }
        }

        if !self.clicks.is_empty() {
            let click_len = self.click_wave.len() as u64;
            for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
                let now = block_start + i as u64;
                for &at in self.clicks.iter() {
                    if now >= at && now - at < click_len {
                        let sample = self.click_wave[(now - at) as usize] * self.click_gain;
                        for output in frame.iter_mut() {
                            *output += sample;
                        }
                    }
                }
            }
            let block_end = block_start + frames as u64;
            self.clicks.retain(|&at| at + click_len > block_end);
        }

        self.frame += frames as u64;
        self.clock.store(self.frame, Ordering::Release);
    }

    /// Renders `num_frames` frames into a new buffer.
    pub fn process_frames(&mut self, num_frames: usize) -> Vec<f32> {
        let mut frames = vec![0.0; num_frames * self.channels as usize];
        self.process(&mut frames);
        frames
    }
}

impl MixerHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Frames rendered so far.
    pub fn frame(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// The render clock in seconds.
    pub fn now(&self) -> f64 {
        self.frame() as f64 / self.sample_rate as f64
    }

    /// Converts render-clock seconds to the nearest frame.
    pub fn frame_at(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }

    pub fn send(&self, command: MixerCommand) {
        if self.commands.send(command).is_err() {
            warn!("Mixer is gone, dropping command");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvelopeConfig;

    fn ramp(frames: usize) -> AudioSample {
        AudioSample::new(vec![(0..frames).map(|i| i as f32 / 100.0).collect()], 100)
    }

    #[test]
    fn test_one_shot_plays_exactly() {
        let (mut mixer, handle) = mixer(100, 1);
        handle.send(MixerCommand::Start(Box::new(VoiceSource::one_shot(
            1,
            ramp(10),
            0,
        ))));

        let out = mixer.process_frames(12);
        let expected: Vec<f32> = (0..10).map(|i| i as f32 / 100.0).collect();
        assert_eq!(&out[..10], expected.as_slice());
        assert_eq!(&out[10..], &[0.0, 0.0]);
        assert_eq!(mixer.active_voices(), 0);
        assert_eq!(handle.frame(), 12);
        assert!((handle.now() - 0.12).abs() < 1e-12);
    }

    #[test]
    fn test_mono_source_fills_all_channels() {
        let (mut mixer, handle) = mixer(100, 2);
        handle.send(MixerCommand::Start(Box::new(VoiceSource::one_shot(
            1,
            ramp(4),
            0,
        ))));

        let out = mixer.process_frames(4);
        assert_eq!(out, vec![0.0, 0.0, 0.01, 0.01, 0.02, 0.02, 0.03, 0.03]);
    }

    #[test]
    fn test_sample_accurate_start_and_stop() {
        let (mut mixer, handle) = mixer(100, 1);
        let mut source = VoiceSource::one_shot(1, AudioSample::new(vec![vec![1.0; 50]], 100), 5);
        source.stop_at = Some(8);
        handle.send(MixerCommand::Start(Box::new(source)));

        let out = mixer.process_frames(10);
        assert_eq!(
            out,
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0]
        );
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_rate_interpolates() {
        let (mut mixer, handle) = mixer(100, 1);
        let mut source = VoiceSource::one_shot(1, ramp(10), 0);
        source.rate = 0.5;
        handle.send(MixerCommand::Start(Box::new(source)));

        let out = mixer.process_frames(4);
        for (actual, expected) in out.iter().zip([0.0, 0.005, 0.01, 0.015]) {
            assert!((actual - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_loop_wraps() {
        let (mut mixer, handle) = mixer(100, 1);
        let mut source = VoiceSource::one_shot(1, ramp(10), 0);
        source.offset = 2.0;
        source.loop_region = Some((4.0, 7.0));
        handle.send(MixerCommand::Start(Box::new(source)));

        let out = mixer.process_frames(9);
        let expected = [2, 3, 4, 5, 6, 4, 5, 6, 4];
        for (actual, index) in out.iter().zip(expected) {
            assert!((actual - index as f32 / 100.0).abs() < 1e-6);
        }
        assert_eq!(mixer.active_voices(), 1);
    }

    #[test]
    fn test_envelope_update_and_stop_all() {
        let (mut mixer, handle) = mixer(100, 1);
        let mut source = VoiceSource::one_shot(7, AudioSample::new(vec![vec![1.0; 500]], 100), 0);
        source.loop_region = Some((0.0, 500.0));
        source.envelope = Envelope::trigger(0.0, 1.0, &EnvelopeConfig::new(0.0, 0.0, 1.0, 0.1));
        handle.send(MixerCommand::Start(Box::new(source.clone())));
        mixer.process_frames(10);

        let released = source.envelope.release_at(0.1, 0.1);
        handle.send(MixerCommand::UpdateEnvelope {
            id: 7,
            envelope: released,
            stop_at: None,
        });
        let out = mixer.process_frames(20);
        assert!((out[0] - 1.0).abs() < 1e-6);
        assert!((out[5] - 0.5).abs() < 1e-6);
        assert_eq!(mixer.active_voices(), 0);

        handle.send(MixerCommand::Start(Box::new(source)));
        mixer.process_frames(1);
        assert_eq!(mixer.active_voices(), 1);
        handle.send(MixerCommand::StopAll);
        mixer.process_frames(1);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_clicks_bypass_capture() {
        let (mut mixer, handle) = mixer(48000, 1);
        let (tx, rx) = crossbeam_channel::unbounded();
        handle.send(MixerCommand::Capture(Some(tx)));
        handle.send(MixerCommand::SetClickGain(1.0));
        handle.send(MixerCommand::Click { at: 2 });

        // 30ms at 48kHz is 1440 frames.
        let out = mixer.process_frames(1500);
        let captured = rx.try_recv().unwrap();
        assert_eq!(captured.len(), 1500);
        assert!(captured.iter().all(|s| *s == 0.0));
        assert!(out[..2].iter().all(|s| *s == 0.0));
        assert!(out[2..1442].iter().any(|s| s.abs() > 0.1));
        assert!(out[1442..].iter().all(|s| *s == 0.0));

        // The click is fully played, so nothing remains scheduled.
        let out = mixer.process_frames(10);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_click_gain_and_clear() {
        let (mut mixer, handle) = mixer(48000, 1);
        handle.send(MixerCommand::Click { at: 0 });
        let out = mixer.process_frames(100);
        assert!(out.iter().all(|s| *s == 0.0));

        handle.send(MixerCommand::SetClickGain(0.5));
        let out = mixer.process_frames(100);
        assert!(out.iter().any(|s| s.abs() > 0.05));
        assert!(out.iter().all(|s| s.abs() <= 0.5));

        handle.send(MixerCommand::Click { at: 400 });
        handle.send(MixerCommand::ClearClicks);
        let out = mixer.process_frames(2000);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_frame_at() {
        let (_mixer, handle) = mixer(48000, 2);
        assert_eq!(handle.frame_at(0.5), 24000);
        assert_eq!(handle.frame_at(-1.0), 0);
        assert_eq!(handle.channels(), 2);
    }
}
