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

//! The instrument engine.
//!
//! The engine is driven from a single control thread. It decides what should
//! happen and when, in render-clock seconds, and hands the result to the mixer
//! as commands; the mixer does all of the rendering. Every rescheduling of a
//! voice replaces the mixer's copy of its envelope wholesale, so a stale ramp
//! can never outlive a newer one.

use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};

use crate::analysis::{peaks, Analysis};
use crate::audio::encoder::{EncoderFactory, FloatWavEncoder};
use crate::audio::mixer::{MixerCommand, MixerHandle, VoiceSource};
use crate::capture::{self, ExportFormat, PerformanceCapture};
use crate::config::{ConfigureOptions, EngineConfig, EnvelopeConfig, EnvelopeUpdate, TempoConfig};
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::metronome::Metronome;
use crate::samples::{Envelope, LoadedSample, SampleLoader, Voice, VoicePool};
use crate::tempo::TempoEngine;


/// Fade applied to a voice that is stolen or replaced.
pub const STEAL_FADE: f64 = 0.01;

/// Time after a release ramp ends before the mixer cuts the voice.
const STOP_MARGIN: f64 = 0.05;

/// Time after a release ramp ends before the pool forgets the voice.
pub const RECLAIM_MARGIN: f64 = 0.1;

/// A single-sample polyphonic instrument.
pub struct Engine {
    config: EngineConfig,
    mixer: MixerHandle,
    /// The active sample. Replaced only by a successful load.
    loaded: Option<LoadedSample>,
    voices: VoicePool,
    metronome: Metronome,
    capture: PerformanceCapture,
    events: EventBus,
    encoders: Box<dyn EncoderFactory>,
}

impl Engine {
    /// Creates an engine that plays through the given mixer.
    pub fn new(config: EngineConfig, mixer: MixerHandle) -> Engine {
        info!(
            max_polyphony = config.max_polyphony(),
            steal_mode = %config.steal_mode(),
            sample_rate = mixer.sample_rate(),
            channels = mixer.channels(),
            "Creating engine"
        );
        Engine {
            voices: VoicePool::new(config.max_polyphony(), config.steal_mode()),
            metronome: Metronome::new(config.tempo().seconds_per_beat()),
            capture: PerformanceCapture::new(),
            events: EventBus::new(),
            encoders: FloatWavEncoder::factory(),
            loaded: None,
            config,
            mixer,
        }
    }

    /// Replaces the encoder used for captures and encoded exports.
    pub fn with_encoder_factory(mut self, encoders: Box<dyn EncoderFactory>) -> Engine {
        self.encoders = encoders;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Applies new engine options. The current config is only replaced if the
    /// result is valid. Voices beyond a lowered polyphony limit are faded out.
    pub fn configure(&mut self, options: ConfigureOptions) -> Result<&EngineConfig, EngineError> {
        let config = self.config.configure(options)?;

        let at = self.schedule_time();
        for voice in self
            .voices
            .set_limits(config.max_polyphony(), config.steal_mode())
        {
            self.fade_out(&voice, at, STEAL_FADE);
        }

        let crossfade = config.crossfade_duration();
        if crossfade != self.config.crossfade_duration() {
            if let Some(loaded) = self.loaded.as_mut() {
                loaded.rebuild_crossfade(crossfade);
            }
        }

        self.config = config;
        info!(
            max_polyphony = self.config.max_polyphony(),
            steal_mode = %self.config.steal_mode(),
            crossfade,
            normalize = self.config.normalize(),
            "Engine configured"
        );
        Ok(&self.config)
    }

    /// A loader matching the engine's output rate and current config. Loaders
    /// carry no engine state, so one can prepare a sample on another thread.
    pub fn loader(&self) -> SampleLoader {
        SampleLoader::new(self.mixer.sample_rate(), &self.config)
    }

    /// Decodes, analyzes and activates a recording. On failure the previous
    /// sample stays active.
    pub fn load(&mut self, bytes: &[u8]) -> Result<Analysis, EngineError> {
        let prepared = self.loader().prepare(bytes);
        self.commit_load(prepared)
    }

    /// Like [`Engine::load`], with decoding and analysis on a blocking worker.
    pub async fn load_async(&mut self, bytes: Vec<u8>) -> Result<Analysis, EngineError> {
        let loader = self.loader();
        let prepared = tokio::task::spawn_blocking(move || loader.prepare(&bytes))
            .await
            .map_err(EngineError::from)
            .and_then(|prepared| prepared);
        self.commit_load(prepared)
    }

    /// Activates a prepared sample, or reports why preparing it failed.
    pub fn commit_load(
        &mut self,
        prepared: Result<LoadedSample, EngineError>,
    ) -> Result<Analysis, EngineError> {
        match prepared {
            Ok(loaded) => {
                self.silence_voices();
                let analysis = *loaded.analysis();
                self.loaded = Some(loaded);
                self.events.emit(EngineEvent::LoadComplete(analysis));
                Ok(analysis)
            }
            Err(e) => {
                error!(err = %e, "Failed to load sample");
                self.events.emit(EngineEvent::LoadError {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn loaded(&self) -> Option<&LoadedSample> {
        self.loaded.as_ref()
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        self.loaded.as_ref().map(LoadedSample::analysis)
    }

    /// Starts a voice for `note`. Returns the voice ID, or `None` if no sample
    /// is loaded or the pool is full and stealing is disabled.
    pub fn note_on(&mut self, note: u8, velocity: f32) -> Option<u64> {
        let Some(loaded) = self.loaded.as_ref() else {
            debug!(note, "Note on without a sample, ignoring");
            return None;
        };
        let note = note.min(127);
        let velocity = if velocity.is_nan() {
            0.0
        } else {
            velocity.clamp(0.0, 1.0)
        };

        let now = self.mixer.now();
        let start = now + self.config.latency();
        for voice in self.voices.make_room(note, now)? {
            self.fade_out(&voice, start, STEAL_FADE);
        }

        let analysis = loaded.analysis();
        let plan = self.tempo_engine().plan(
            note,
            analysis.root_pitch_midi,
            analysis.loop_start_sec,
            analysis.loop_end_sec,
            loaded.sample().duration(),
        );

        // The crossfaded buffer is only seamless at the analyzed loop end.
        let buffer = match loaded.crossfaded() {
            Some(crossfaded) if plan.loop_end == analysis.loop_end_sec => crossfaded.clone(),
            _ => loaded.sample().clone(),
        };
        let loop_region = loaded.loop_bounds(plan.loop_start, plan.loop_end);
        let offset = loaded.frame_of(analysis.trim_start_sec.min(analysis.loop_start_sec));

        let envelope = Envelope::trigger(start, velocity, self.config.envelope());
        let voice = Voice::new(note, velocity, envelope);
        let id = voice.id();
        self.mixer.send(MixerCommand::Start(Box::new(VoiceSource {
            id,
            buffer,
            rate: plan.rate,
            start_at: self.mixer.frame_at(start),
            offset: offset as f64,
            loop_region: Some(loop_region),
            envelope,
            stop_at: None,
        })));
        self.voices.insert(voice);

        debug!(
            note,
            velocity,
            id,
            rate = plan.rate,
            active = self.voices.active_count(),
            "Note on"
        );
        self.events.emit(EngineEvent::NoteOn {
            note,
            velocity,
            voice_id: id,
        });
        Some(id)
    }

    /// Releases the voice on `note`. The voice ramps to silence from its
    /// current level and is reclaimed once the ramp and a margin have passed.
    pub fn note_off(&mut self, note: u8) {
        let at = self.schedule_time();
        let release = self.config.envelope().release();
        let Some(voice) = self.voices.release(note, at, release, RECLAIM_MARGIN) else {
            return;
        };
        self.mixer.send(MixerCommand::UpdateEnvelope {
            id: voice.id(),
            envelope: *voice.envelope(),
            stop_at: Some(self.mixer.frame_at(at + release + STOP_MARGIN)),
        });
        debug!(note, id = voice.id(), release, "Note off");
        self.events.emit(EngineEvent::NoteOff { note });
    }

    /// Silences every voice immediately and empties the pool.
    pub fn panic(&mut self) {
        let cleared = self.voices.clear();
        self.mixer.send(MixerCommand::StopAll);
        warn!(voices = cleared.len(), "Panic");
        self.events.emit(EngineEvent::Panic);
    }

    /// Merges an envelope change. Applies to voices triggered afterwards.
    pub fn set_envelope(&mut self, update: EnvelopeUpdate) -> &EnvelopeConfig {
        let envelope = self.config.envelope().merge(update);
        self.config = self.config.with_envelope(envelope);
        debug!(?envelope, "Envelope set");
        self.config.envelope()
    }

    /// Overrides the loop, clamped into the sample. Returns the applied bounds,
    /// or `None` if nothing is loaded.
    pub fn set_loop_points(&mut self, start: f64, end: f64) -> Option<(f64, f64)> {
        let crossfade = self.config.crossfade_duration();
        let loaded = self.loaded.as_mut()?;
        Some(loaded.set_loop_points(start, end, crossfade))
    }

    /// Overrides the root note, clamped to 0..=127. Returns the applied note,
    /// or `None` if nothing is loaded.
    pub fn set_root_note(&mut self, note: i32) -> Option<u8> {
        let loaded = self.loaded.as_mut()?;
        let note = note.clamp(0, 127) as u8;
        loaded.set_root_note(note);
        debug!(note, "Root note set");
        Some(note)
    }

    pub fn set_tempo(&mut self, bpm: u32) -> TempoConfig {
        let mut tempo = self.tempo_engine();
        tempo.set_tempo(bpm);
        self.tempo_changed(*tempo.config())
    }

    pub fn set_tempo_sync(&mut self, enabled: bool) -> TempoConfig {
        let mut tempo = self.tempo_engine();
        tempo.set_sync(enabled);
        self.tempo_changed(*tempo.config())
    }

    pub fn set_note_division(&mut self, note_division: f64) -> TempoConfig {
        let mut tempo = self.tempo_engine();
        tempo.set_note_division(note_division);
        self.tempo_changed(*tempo.config())
    }

    pub fn tempo(&self) -> &TempoConfig {
        self.config.tempo()
    }

    /// A planner over the current tempo. The engine config is the only place
    /// tempo settings are kept.
    fn tempo_engine(&self) -> TempoEngine {
        TempoEngine::new(*self.config.tempo())
    }

    fn tempo_changed(&mut self, tempo: TempoConfig) -> TempoConfig {
        self.config = self.config.with_tempo(tempo);
        self.metronome.set_seconds_per_beat(tempo.seconds_per_beat());
        self.events.emit(EngineEvent::TempoChange {
            bpm: tempo.bpm(),
            note_division: tempo.note_division(),
            sync: tempo.enabled(),
            target_loop_duration: tempo.target_loop_duration(),
        });
        tempo
    }

    /// Starts the click at the current tempo. Restarting re-aligns the beat.
    pub fn start_metronome(&mut self, volume: f32) {
        let at = self.schedule_time();
        self.mixer.send(MixerCommand::ClearClicks);
        self.metronome.start(at, volume);
        let volume = self.metronome.volume();
        self.mixer.send(MixerCommand::SetClickGain(volume));
        self.events.emit(EngineEvent::MetronomeStart { volume });
        self.schedule_clicks();
    }

    pub fn stop_metronome(&mut self) {
        if !self.metronome.is_running() {
            return;
        }
        self.metronome.stop();
        self.mixer.send(MixerCommand::ClearClicks);
        self.mixer.send(MixerCommand::SetClickGain(0.0));
        self.events.emit(EngineEvent::MetronomeStop);
    }

    /// Changes the click volume without restarting. Returns the applied volume.
    pub fn set_metronome_volume(&mut self, volume: f32) -> f32 {
        let volume = self.metronome.set_volume(volume);
        if self.metronome.is_running() {
            self.mixer.send(MixerCommand::SetClickGain(volume));
        }
        volume
    }

    pub fn metronome_running(&self) -> bool {
        self.metronome.is_running()
    }

    /// Starts capturing the instrument output. Returns false if a capture is
    /// already running.
    pub fn start_performance_recording(&mut self) -> bool {
        let encoder = self
            .encoders
            .create(self.mixer.channels(), self.mixer.sample_rate());
        let started = self.capture.start(&self.mixer, encoder);
        if started {
            self.events.emit(EngineEvent::RecordingStart);
        }
        started
    }

    /// Stops capturing and returns the encoded performance.
    pub fn stop_performance_recording(&mut self) -> Result<Vec<u8>, EngineError> {
        let bytes = self.capture.stop(&self.mixer)?;
        self.events.emit(EngineEvent::RecordingStop { bytes: bytes.len() });
        Ok(bytes)
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_recording()
    }

    /// Exports the whole loaded sample.
    pub fn export_original_sample(&self, format: ExportFormat) -> Result<Vec<u8>, EngineError> {
        let loaded = self.require_sample()?;
        capture::export(loaded.sample(), format, self.encoders.as_ref())
    }

    /// Exports the loop region of the loaded sample.
    pub fn export_loop_region(&self, format: ExportFormat) -> Result<Vec<u8>, EngineError> {
        let loaded = self.require_sample()?;
        capture::export(&loaded.loop_region(), format, self.encoders.as_ref())
    }

    /// Peak levels of the loaded sample in `bins` bins. All zero if nothing
    /// is loaded.
    pub fn waveform_peaks(&self, bins: usize) -> Vec<f32> {
        match self.loaded.as_ref() {
            Some(loaded) => peaks::waveform_peaks(loaded.sample(), bins),
            None => vec![0.0; bins],
        }
    }

    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Number of voices held by the pool, including releasing ones.
    pub fn active_voices(&self) -> usize {
        self.voices.active_count()
    }

    pub fn voice(&self, note: u8) -> Option<&Voice> {
        self.voices.get(note)
    }

    /// Periodic housekeeping. Call this every
    /// [`CONTROL_TICK`](crate::metronome::CONTROL_TICK): it reclaims released
    /// voices, schedules upcoming clicks and moves captured audio into the
    /// encoder.
    pub fn update(&mut self) -> Result<(), EngineError> {
        let now = self.mixer.now();
        for voice in self.voices.reap(now) {
            debug!(note = voice.note(), id = voice.id(), "Reclaimed voice");
            self.mixer.send(MixerCommand::Stop { id: voice.id() });
        }
        self.schedule_clicks();
        self.capture.drain()
    }

    fn schedule_clicks(&mut self) {
        for at in self.metronome.schedule(self.mixer.now()) {
            self.mixer.send(MixerCommand::Click {
                at: self.mixer.frame_at(at),
            });
            self.events.emit(EngineEvent::MetronomeTick { at });
        }
    }

    /// The earliest time a change sent now is guaranteed to reach the mixer.
    fn schedule_time(&self) -> f64 {
        self.mixer.now() + self.config.latency()
    }

    /// Ramps a voice that has left the pool to silence and then cuts it.
    fn fade_out(&self, voice: &Voice, at: f64, duration: f64) {
        self.mixer.send(MixerCommand::UpdateEnvelope {
            id: voice.id(),
            envelope: voice.envelope().release_at(at, duration),
            stop_at: Some(self.mixer.frame_at(at + duration)),
        });
    }

    /// Fades out every voice, used when the sample changes underneath them.
    fn silence_voices(&mut self) {
        let at = self.schedule_time();
        for voice in self.voices.clear() {
            self.fade_out(&voice, at, STEAL_FADE);
        }
    }

    fn require_sample(&self) -> Result<&LoadedSample, EngineError> {
        self.loaded
            .as_ref()
            .ok_or_else(|| EngineError::NotAvailable("no sample is loaded".into()))
    }
}
