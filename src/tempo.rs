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
//! Maps notes to playback rates and loop bounds.
//!
//! Pitch is shifted by resampling, so the rate of a voice is the equal
//! tempered ratio between the played note and the sample's root. Without tempo
//! sync the loop end is pushed out by the same ratio to keep the loop's wall
//! clock length constant. With tempo sync the loop stays where it is and the
//! rate is additionally scaled so one pass of the loop lasts a whole note
//! division at the current tempo.

use tracing::info;

use crate::config::TempoConfig;

/// How a voice should read the sample. Loop bounds are in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackPlan {
    /// Source seconds advanced per output second.
    pub rate: f64,
    /// The pitch component of the rate.
    pub pitch_ratio: f64,
    pub loop_start: f64,
    pub loop_end: f64,
}

/// Tempo state shared by every voice triggered after it changes.
#[derive(Clone, Debug, Default)]
pub struct TempoEngine {
    config: TempoConfig,
}

/// The equal tempered frequency ratio from `root` to `note`.
pub fn pitch_ratio(note: u8, root: u8) -> f64 {
    2f64.powf((note as f64 - root as f64) / 12.0)
}

impl TempoEngine {
    pub fn new(config: TempoConfig) -> TempoEngine {
        TempoEngine { config }
    }

    pub fn config(&self) -> &TempoConfig {
        &self.config
    }

    /// The length a synced loop is stretched to, in seconds.
    pub fn target_loop_duration(&self) -> f64 {
        self.config.target_loop_duration()
    }

    /// The factor that makes a loop of `loop_duration` seconds last exactly
    /// [`Self::target_loop_duration`].
    pub fn stretch_factor(&self, loop_duration: f64) -> f64 {
        let target = self.target_loop_duration();
        if loop_duration <= 0.0 || target <= 0.0 {
            return 1.0;
        }
        loop_duration / target
    }

    pub fn set_tempo(&mut self, bpm: u32) -> &TempoConfig {
        self.update(self.config.with_bpm(bpm))
    }

    pub fn set_note_division(&mut self, note_division: f64) -> &TempoConfig {
        self.update(self.config.with_note_division(note_division))
    }

    pub fn set_sync(&mut self, enabled: bool) -> &TempoConfig {
        self.update(self.config.with_enabled(enabled))
    }

    fn update(&mut self, config: TempoConfig) -> &TempoConfig {
        self.config = config;
        info!(
            bpm = config.bpm(),
            note_division = config.note_division(),
            sync = config.enabled(),
            target_loop_duration = config.target_loop_duration(),
            "Tempo changed"
        );
        &self.config
    }

    /// Plans playback of `note` for a sample rooted at `root` with the given
    /// loop, in seconds within a sample of `duration` seconds.
    pub fn plan(
        &self,
        note: u8,
        root: u8,
        loop_start: f64,
        loop_end: f64,
        duration: f64,
    ) -> PlaybackPlan {
        let ratio = pitch_ratio(note, root);
        if self.config.enabled() {
            PlaybackPlan {
                rate: ratio * self.stretch_factor(loop_end - loop_start),
                pitch_ratio: ratio,
                loop_start,
                loop_end,
            }
        } else {
            let extended = loop_start + (loop_end - loop_start) * ratio;
            PlaybackPlan {
                rate: ratio,
                pitch_ratio: ratio,
                loop_start,
                loop_end: extended.min(duration).max(loop_start),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_pitch_ratio() {
        assert!(close(pitch_ratio(69, 57), 2.0));
        assert!(close(pitch_ratio(57, 69), 0.5));
        assert!(close(pitch_ratio(60, 60), 1.0));
        assert!(close(pitch_ratio(67, 60), 1.4983070768766815));
    }

    #[test]
    fn test_target_and_stretch() {
        let engine = TempoEngine::new(TempoConfig::new(120, 1.0, true));
        assert!(close(engine.target_loop_duration(), 0.5));
        assert!(close(engine.stretch_factor(0.25), 0.5));
        assert!(close(engine.stretch_factor(0.0), 1.0));
    }

    #[test]
    fn test_plan_without_sync_extends_loop() {
        let engine = TempoEngine::default();
        let plan = engine.plan(69, 57, 0.5, 0.8, 2.0);
        assert!(close(plan.rate, 2.0));
        assert!(close(plan.loop_start, 0.5));
        assert!(close(plan.loop_end, 1.1));

        // Clamped to the end of the sample.
        let plan = engine.plan(81, 57, 0.5, 0.8, 1.0);
        assert!(close(plan.loop_end, 1.0));

        // Lower notes shrink the loop.
        let plan = engine.plan(45, 57, 0.5, 0.8, 2.0);
        assert!(close(plan.rate, 0.5));
        assert!(close(plan.loop_end, 0.65));
    }

    #[test]
    fn test_plan_with_sync_stretches_rate() {
        let engine = TempoEngine::new(TempoConfig::new(120, 1.0, true));
        let plan = engine.plan(57, 57, 0.5, 0.75, 2.0);
        assert!(close(plan.rate, 0.5));
        assert!(close(plan.loop_end, 0.75));

        let plan = engine.plan(69, 57, 0.5, 0.75, 2.0);
        assert!(close(plan.rate, 1.0));
        assert!(close(plan.pitch_ratio, 2.0));
    }

    #[test]
    fn test_setters_clamp_and_report() {
        let mut engine = TempoEngine::default();
        assert_eq!(engine.set_tempo(1000).bpm(), 300);
        assert_eq!(engine.set_tempo(90).bpm(), 90);
        assert!(close(engine.set_note_division(2.0).target_loop_duration(), 4.0 / 3.0));
        assert!(engine.set_sync(true).enabled());
        // Existing settings survive unrelated changes.
        assert_eq!(engine.config().bpm(), 90);
    }
}
