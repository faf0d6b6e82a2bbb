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

/// ADSR settings applied to voices at the moment they are triggered.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Attack time in seconds.
    attack: f64,

    /// Decay time in seconds.
    decay: f64,

    /// Sustain level relative to the note velocity.
    sustain: f32,

    /// Release time in seconds.
    release: f64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        EnvelopeConfig {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.8,
            release: 0.3,
        }
    }
}

/// A partial envelope change. Unset fields keep their current value.
#[derive(Default, Clone, Copy, Debug)]
pub struct EnvelopeUpdate {
    pub attack: Option<f64>,
    pub decay: Option<f64>,
    pub sustain: Option<f32>,
    pub release: Option<f64>,
}

impl EnvelopeConfig {
    /// Creates an envelope config, clamping values into range.
    pub fn new(attack: f64, decay: f64, sustain: f32, release: f64) -> EnvelopeConfig {
        EnvelopeConfig {
            attack: clamp_time(attack),
            decay: clamp_time(decay),
            sustain: clamp_level(sustain),
            release: clamp_time(release),
        }
    }

    pub fn attack(&self) -> f64 {
        self.attack
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    pub fn sustain(&self) -> f32 {
        self.sustain
    }

    pub fn release(&self) -> f64 {
        self.release
    }

    /// Applies a partial update and returns the resulting envelope.
    pub fn merge(&self, update: EnvelopeUpdate) -> EnvelopeConfig {
        EnvelopeConfig::new(
            update.attack.unwrap_or(self.attack),
            update.decay.unwrap_or(self.decay),
            update.sustain.unwrap_or(self.sustain),
            update.release.unwrap_or(self.release),
        )
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("attack", self.attack),
            ("decay", self.decay),
            ("release", self.release),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "envelope {} must be a non-negative number of seconds, got {}",
                    name, value
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.sustain) {
            return Err(ConfigError::Invalid(format!(
                "envelope sustain must be between 0 and 1, got {}",
                self.sustain
            )));
        }
        Ok(())
    }
}

fn clamp_time(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

fn clamp_level(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
