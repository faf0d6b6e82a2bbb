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
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

pub const MIN_BPM: u32 = 20;
pub const MAX_BPM: u32 = 300;

/// Note divisions outside of this range are clamped.
const MIN_NOTE_DIVISION: f64 = 1.0 / 64.0;
const MAX_NOTE_DIVISION: f64 = 64.0;

/// Tempo synchronization settings.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct TempoConfig {
    /// Beats per minute.
    bpm: u32,

    /// The loop length in beats when tempo sync is enabled.
    note_division: f64,

    /// Whether playback rate is stretched to fit the tempo.
    enabled: bool,
}

impl Default for TempoConfig {
    fn default() -> Self {
        TempoConfig {
            bpm: 120,
            note_division: 1.0,
            enabled: false,
        }
    }
}

impl TempoConfig {
    /// Creates a tempo config, clamping values into range.
    pub fn new(bpm: u32, note_division: f64, enabled: bool) -> TempoConfig {
        TempoConfig {
            bpm: clamp_bpm(bpm),
            note_division: clamp_note_division(note_division),
            enabled,
        }
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn note_division(&self) -> f64 {
        self.note_division
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Seconds in a single beat.
    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm as f64
    }

    /// The wall-clock length a synced loop is stretched to.
    pub fn target_loop_duration(&self) -> f64 {
        self.seconds_per_beat() * self.note_division
    }

    pub fn with_bpm(self, bpm: u32) -> TempoConfig {
        TempoConfig {
            bpm: clamp_bpm(bpm),
            ..self
        }
    }

    pub fn with_note_division(self, note_division: f64) -> TempoConfig {
        TempoConfig {
            note_division: clamp_note_division(note_division),
            ..self
        }
    }

    pub fn with_enabled(self, enabled: bool) -> TempoConfig {
        TempoConfig { enabled, ..self }
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_BPM..=MAX_BPM).contains(&self.bpm) {
            return Err(ConfigError::Invalid(format!(
                "bpm must be between {} and {}, got {}",
                MIN_BPM, MAX_BPM, self.bpm
            )));
        }
        if !self.note_division.is_finite() || self.note_division <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "note_division must be positive, got {}",
                self.note_division
            )));
        }
        Ok(())
    }
}

fn clamp_bpm(bpm: u32) -> u32 {
    bpm.clamp(MIN_BPM, MAX_BPM)
}

fn clamp_note_division(note_division: f64) -> f64 {
    if note_division.is_nan() {
        return 1.0;
    }
    note_division.clamp(MIN_NOTE_DIVISION, MAX_NOTE_DIVISION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_loop_duration() {
        let tempo = TempoConfig::new(120, 1.0, false);
        assert!((tempo.target_loop_duration() - 0.5).abs() < 1e-12);

        let tempo = tempo.with_bpm(60).with_note_division(2.0);
        assert!((tempo.target_loop_duration() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_clamping() {
        assert_eq!(TempoConfig::new(5, 1.0, false).bpm(), MIN_BPM);
        assert_eq!(TempoConfig::new(1000, 1.0, false).bpm(), MAX_BPM);
        assert_eq!(
            TempoConfig::default().with_note_division(-1.0).note_division(),
            MIN_NOTE_DIVISION
        );
        assert_eq!(
            TempoConfig::default()
                .with_note_division(f64::NAN)
                .note_division(),
            1.0
        );
    }
}
