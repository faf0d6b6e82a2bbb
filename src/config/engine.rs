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
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use config::{Config, File};
use serde::{Deserialize, Serialize};

use super::envelope::EnvelopeConfig;
use super::error::ConfigError;
use super::tempo::TempoConfig;

/// Default maximum number of concurrent voices.
pub const DEFAULT_MAX_POLYPHONY: usize = 16;

/// What to do when a note arrives and every voice is in use.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StealMode {
    /// Drop the new note.
    None,
    /// Evict the voice that started first.
    #[default]
    Oldest,
    /// Evict the voice with the lowest envelope level.
    Quietest,
}

impl FromStr for StealMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(StealMode::None),
            "oldest" => Ok(StealMode::Oldest),
            "quietest" => Ok(StealMode::Quietest),
            other => Err(ConfigError::Invalid(format!(
                "unknown steal mode '{}', expected none, oldest or quietest",
                other
            ))),
        }
    }
}

impl fmt::Display for StealMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StealMode::None => "none",
            StealMode::Oldest => "oldest",
            StealMode::Quietest => "quietest",
        })
    }
}

/// A YAML representation of the engine configuration.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of simultaneously sounding voices.
    max_polyphony: usize,

    /// Voice stealing policy once the pool is full.
    steal_mode: StealMode,

    /// Length of the loop seam crossfade in seconds. Zero disables it.
    crossfade_duration: f64,

    /// Peak-normalize the sample on load.
    normalize: bool,

    /// Envelope applied to newly triggered voices.
    envelope: EnvelopeConfig,

    /// Tempo sync settings.
    tempo: TempoConfig,

    /// How far ahead of the render clock new events are scheduled, in seconds.
    latency: f64,

    /// RMS level below which leading and trailing audio is trimmed.
    trim_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_polyphony: DEFAULT_MAX_POLYPHONY,
            steal_mode: StealMode::default(),
            crossfade_duration: 0.015,
            normalize: true,
            envelope: EnvelopeConfig::default(),
            tempo: TempoConfig::default(),
            latency: 0.005,
            trim_threshold: 0.015,
        }
    }
}

/// Overrides accepted by [`EngineConfig::configure`]. Unset fields are left as
/// they are.
#[derive(Default, Clone, Debug)]
pub struct ConfigureOptions {
    pub max_polyphony: Option<usize>,
    pub steal_mode: Option<StealMode>,
    pub crossfade_duration: Option<f64>,
    pub normalize: Option<bool>,
}

impl EngineConfig {
    /// Parse an engine config from a YAML file.
    pub fn load(path: &Path) -> Result<EngineConfig, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<EngineConfig>()?;
        config.validate()?;
        Ok(config)
    }

    /// Returns a new config with the given options applied, or an error if the
    /// result would be invalid. `self` is never modified.
    pub fn configure(&self, options: ConfigureOptions) -> Result<EngineConfig, ConfigError> {
        let mut config = self.clone();
        if let Some(max_polyphony) = options.max_polyphony {
            config.max_polyphony = max_polyphony;
        }
        if let Some(steal_mode) = options.steal_mode {
            config.steal_mode = steal_mode;
        }
        if let Some(crossfade_duration) = options.crossfade_duration {
            config.crossfade_duration = crossfade_duration;
        }
        if let Some(normalize) = options.normalize {
            config.normalize = normalize;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn max_polyphony(&self) -> usize {
        self.max_polyphony
    }

    pub fn steal_mode(&self) -> StealMode {
        self.steal_mode
    }

    pub fn crossfade_duration(&self) -> f64 {
        self.crossfade_duration
    }

    pub fn normalize(&self) -> bool {
        self.normalize
    }

    pub fn envelope(&self) -> &EnvelopeConfig {
        &self.envelope
    }

    pub fn tempo(&self) -> &TempoConfig {
        &self.tempo
    }

    pub fn latency(&self) -> f64 {
        self.latency
    }

    pub fn trim_threshold(&self) -> f32 {
        self.trim_threshold
    }

    pub(crate) fn with_envelope(&self, envelope: EnvelopeConfig) -> EngineConfig {
        EngineConfig {
            envelope,
            ..self.clone()
        }
    }

    pub(crate) fn with_tempo(&self, tempo: TempoConfig) -> EngineConfig {
        EngineConfig {
            tempo,
            ..self.clone()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_polyphony == 0 {
            return Err(ConfigError::Invalid(
                "max_polyphony must be at least 1".to_string(),
            ));
        }
        if !self.crossfade_duration.is_finite() || self.crossfade_duration < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "crossfade_duration must be a non-negative number of seconds, got {}",
                self.crossfade_duration
            )));
        }
        if !self.latency.is_finite() || self.latency < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "latency must be a non-negative number of seconds, got {}",
                self.latency
            )));
        }
        if !self.trim_threshold.is_finite() || self.trim_threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "trim_threshold must be non-negative, got {}",
                self.trim_threshold
            )));
        }
        self.envelope.validate()?;
        self.tempo.validate()
    }
}
