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

//! Voice management for polyphonic sample playback.
//!
//! Handles voice allocation, stealing, release and reclamation. Voices are
//! keyed by the MIDI note that triggered them, so a key only ever sounds once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::config::StealMode;

use super::envelope::Envelope;

/// Global voice ID counter.
static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

/// Represents an active voice playing the sample.
#[derive(Clone, Debug)]
pub struct Voice {
    /// Unique ID for this voice. Also identifies it in the mixer.
    id: u64,
    /// The MIDI note that triggered this voice.
    note: u8,
    velocity: f32,
    /// Render-clock time at which playback starts.
    start_time: f64,
    envelope: Envelope,
    /// Render-clock time after which the voice may be dropped.
    reclaim_at: Option<f64>,
}

impl Voice {
    /// Creates a new voice with a fresh ID.
    pub fn new(note: u8, velocity: f32, envelope: Envelope) -> Voice {
        Voice {
            id: NEXT_VOICE_ID.fetch_add(1, Ordering::SeqCst),
            note,
            velocity,
            start_time: envelope.start(),
            envelope,
            reclaim_at: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn is_released(&self) -> bool {
        self.envelope.is_released()
    }

    pub fn reclaim_at(&self) -> Option<f64> {
        self.reclaim_at
    }

    /// Replaces the envelope with a ramp to silence from the current level.
    /// The voice becomes reclaimable `margin` seconds after the ramp ends.
    fn fade(&mut self, now: f64, duration: f64, margin: f64) {
        self.envelope = self.envelope.release_at(now, duration);
        self.reclaim_at = Some(now + duration.max(0.0) + margin);
    }
}

/// Manages active voices for sample playback.
pub struct VoicePool {
    /// Active voices by trigger note.
    voices: HashMap<u8, Voice>,
    max_polyphony: usize,
    steal_mode: StealMode,
}

impl VoicePool {
    /// Creates a new voice pool.
    pub fn new(max_polyphony: usize, steal_mode: StealMode) -> VoicePool {
        VoicePool {
            voices: HashMap::new(),
            max_polyphony: max_polyphony.max(1),
            steal_mode,
        }
    }

    /// Updates the polyphony limit and steal mode. Voices over the new limit
    /// are removed, oldest first, and returned so the caller can silence them.
    pub fn set_limits(&mut self, max_polyphony: usize, steal_mode: StealMode) -> Vec<Voice> {
        self.max_polyphony = max_polyphony.max(1);
        self.steal_mode = steal_mode;

        let mut evicted = Vec::new();
        while self.voices.len() > self.max_polyphony {
            let Some(note) = self.oldest() else {
                break;
            };
            if let Some(voice) = self.voices.remove(&note) {
                evicted.push(voice);
            }
        }
        evicted
    }

    /// Frees a slot for a voice on `note`. Returns the voices that were removed
    /// to make room, or `None` if the pool is full and the steal mode forbids
    /// eviction. A rejection leaves the pool untouched.
    pub fn make_room(&mut self, note: u8, now: f64) -> Option<Vec<Voice>> {
        if let Some(existing) = self.voices.remove(&note) {
            debug!(note, id = existing.id, "Replacing voice on the same note");
            return Some(vec![existing]);
        }
        if self.voices.len() < self.max_polyphony {
            return Some(Vec::new());
        }

        let victim = match self.steal_mode {
            StealMode::None => {
                debug!(
                    max_polyphony = self.max_polyphony,
                    "Voice pool full, rejecting note"
                );
                return None;
            }
            StealMode::Oldest => self.oldest(),
            StealMode::Quietest => self.quietest(now),
        }?;

        let stolen = self.voices.remove(&victim)?;
        warn!(
            max_polyphony = self.max_polyphony,
            steal_mode = %self.steal_mode,
            note = stolen.note,
            "Voice limit reached, stealing"
        );
        Some(vec![stolen])
    }

    /// Registers a voice under its note.
    pub fn insert(&mut self, voice: Voice) {
        self.voices.insert(voice.note, voice);
    }

    /// Starts the release of the voice on `note`. Returns the voice if it was
    /// held; a voice that is already releasing is left alone.
    pub fn release(&mut self, note: u8, now: f64, duration: f64, margin: f64) -> Option<&Voice> {
        let voice = self.voices.get_mut(&note)?;
        if voice.is_released() {
            return None;
        }
        voice.fade(now, duration, margin);
        Some(voice)
    }

    /// Removes and returns every voice whose release tail has elapsed.
    pub fn reap(&mut self, now: f64) -> Vec<Voice> {
        let expired: Vec<u8> = self
            .voices
            .values()
            .filter(|v| v.reclaim_at.is_some_and(|at| at <= now))
            .map(|v| v.note)
            .collect();
        expired
            .into_iter()
            .filter_map(|note| self.voices.remove(&note))
            .collect()
    }

    /// Clears all voices.
    /// Returns the voices that should be stopped.
    pub fn clear(&mut self) -> Vec<Voice> {
        self.voices.drain().map(|(_, voice)| voice).collect()
    }

    pub fn get(&self, note: u8) -> Option<&Voice> {
        self.voices.get(&note)
    }

    /// Returns the current number of active voices.
    pub fn active_count(&self) -> usize {
        self.voices.len()
    }

    pub fn max_polyphony(&self) -> usize {
        self.max_polyphony
    }

    pub fn steal_mode(&self) -> StealMode {
        self.steal_mode
    }

    fn oldest(&self) -> Option<u8> {
        self.voices
            .values()
            .min_by(|a, b| a.start_time.total_cmp(&b.start_time).then(a.id.cmp(&b.id)))
            .map(|v| v.note)
    }

    fn quietest(&self, now: f64) -> Option<u8> {
        self.voices
            .values()
            .min_by(|a, b| {
                a.envelope
                    .prominence_at(now)
                    .total_cmp(&b.envelope.prominence_at(now))
                    .then(a.id.cmp(&b.id))
            })
            .map(|v| v.note)
    }
}

impl std::fmt::Debug for VoicePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePool")
            .field("active_voices", &self.voices.len())
            .field("max_polyphony", &self.max_polyphony)
            .field("steal_mode", &self.steal_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvelopeConfig;

    fn make_voice(note: u8, velocity: f32, start: f64) -> Voice {
        let envelope = Envelope::trigger(start, velocity, &EnvelopeConfig::new(0.01, 0.1, 0.8, 0.3));
        Voice::new(note, velocity, envelope)
    }

    fn play(pool: &mut VoicePool, note: u8, velocity: f32, now: f64) -> Option<Vec<Voice>> {
        let evicted = pool.make_room(note, now)?;
        pool.insert(make_voice(note, velocity, now));
        Some(evicted)
    }

    #[test]
    fn test_voice_ids_are_unique() {
        let a = make_voice(60, 1.0, 0.0);
        let b = make_voice(60, 1.0, 0.0);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.start_time(), 0.0);
    }

    #[test]
    fn test_same_note_replaces() {
        let mut pool = VoicePool::new(4, StealMode::Oldest);
        assert!(play(&mut pool, 60, 1.0, 0.0).unwrap().is_empty());
        let first = pool.get(60).unwrap().id();

        let replaced = play(&mut pool, 60, 0.5, 1.0).unwrap();
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0].id(), first);
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.get(60).unwrap().velocity(), 0.5);
    }

    #[test]
    fn test_steal_none_rejects_without_side_effects() {
        let mut pool = VoicePool::new(2, StealMode::None);
        play(&mut pool, 60, 1.0, 0.0).unwrap();
        play(&mut pool, 62, 1.0, 0.1).unwrap();

        assert!(pool.make_room(64, 0.2).is_none());
        assert_eq!(pool.active_count(), 2);
        assert!(pool.get(60).is_some());
        assert!(pool.get(62).is_some());

        // Retriggering a held key is still allowed.
        assert_eq!(pool.make_room(60, 0.2).unwrap().len(), 1);
    }

    #[test]
    fn test_steal_oldest() {
        let mut pool = VoicePool::new(3, StealMode::Oldest);
        play(&mut pool, 64, 1.0, 0.2).unwrap();
        play(&mut pool, 60, 1.0, 0.0).unwrap();
        play(&mut pool, 67, 1.0, 0.4).unwrap();

        let stolen = play(&mut pool, 72, 1.0, 0.6).unwrap();
        assert_eq!(stolen.len(), 1);
        assert_eq!(stolen[0].note(), 60);
        assert_eq!(pool.active_count(), 3);
        assert!(pool.get(60).is_none());
    }

    #[test]
    fn test_steal_quietest() {
        let mut pool = VoicePool::new(3, StealMode::Quietest);
        play(&mut pool, 60, 0.9, 0.0).unwrap();
        play(&mut pool, 62, 0.2, 0.1).unwrap();
        play(&mut pool, 64, 0.6, 0.2).unwrap();

        let stolen = play(&mut pool, 65, 1.0, 1.0).unwrap();
        assert_eq!(stolen[0].note(), 62);

        // A released voice is quieter than any held one.
        pool.release(60, 1.0, 0.3, 0.1);
        let stolen = play(&mut pool, 67, 1.0, 1.2).unwrap();
        assert_eq!(stolen[0].note(), 60);
    }

    #[test]
    fn test_steal_quietest_spares_pending_voices() {
        let mut pool = VoicePool::new(2, StealMode::Quietest);
        // Sustaining at 0.9 * 0.8.
        play(&mut pool, 60, 0.9, 0.0).unwrap();
        // Scheduled just ahead of the clock and still silent.
        pool.make_room(64, 1.0).unwrap();
        pool.insert(make_voice(64, 0.8, 1.005));

        let stolen = play(&mut pool, 67, 1.0, 1.0).unwrap();
        assert_eq!(stolen[0].note(), 60);
        assert!(pool.get(64).is_some());
    }

    #[test]
    fn test_never_exceeds_polyphony() {
        for mode in [StealMode::None, StealMode::Oldest, StealMode::Quietest] {
            let mut pool = VoicePool::new(4, mode);
            for i in 0..40u32 {
                let note = 30 + (i * 7 % 50) as u8;
                let _ = play(&mut pool, note, 0.5, i as f64 * 0.01);
                assert!(pool.active_count() <= 4, "{} voices under {}", pool.active_count(), mode);
            }
        }
    }

    #[test]
    fn test_release_and_reap() {
        let mut pool = VoicePool::new(4, StealMode::Oldest);
        play(&mut pool, 60, 1.0, 0.0).unwrap();

        let released = pool.release(60, 0.5, 0.3, 0.1).unwrap();
        assert!(released.is_released());
        assert!((released.reclaim_at().unwrap() - 0.9).abs() < 1e-9);
        // A second release does not reschedule.
        assert!(pool.release(60, 0.6, 0.3, 0.1).is_none());
        assert!(pool.release(61, 0.6, 0.3, 0.1).is_none());

        assert!(pool.reap(0.85).is_empty());
        let reaped = pool.reap(0.95);
        assert_eq!(reaped.len(), 1);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn test_shrinking_limits_evicts() {
        let mut pool = VoicePool::new(4, StealMode::None);
        for (i, note) in [60, 62, 64, 65].into_iter().enumerate() {
            play(&mut pool, note, 1.0, i as f64).unwrap();
        }
        let evicted = pool.set_limits(2, StealMode::Quietest);
        let notes: Vec<u8> = evicted.iter().map(Voice::note).collect();
        assert_eq!(notes, vec![60, 62]);
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.steal_mode(), StealMode::Quietest);
    }

    #[test]
    fn test_clear() {
        let mut pool = VoicePool::new(4, StealMode::Oldest);
        play(&mut pool, 60, 1.0, 0.0).unwrap();
        play(&mut pool, 61, 1.0, 0.0).unwrap();
        assert_eq!(pool.clear().len(), 2);
        assert_eq!(pool.active_count(), 0);
    }
}
