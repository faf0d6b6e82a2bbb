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
//! Software ADSR envelope.
//!
//! An envelope is a pure function of render-clock time. Triggering fixes the
//! attack/decay/sustain shape, and releasing replaces any previous release with
//! a single linear ramp that starts from the level at the moment of release.
//! A voice therefore only ever has one pending ramp, and a later release always
//! supersedes an earlier one.

use crate::config::EnvelopeConfig;

/// The envelope stage at a point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Ramp {
    at: f64,
    from: f32,
    duration: f64,
}

/// Amplitude envelope for a single voice. Times are in render-clock seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    start: f64,
    peak: f32,
    attack: f64,
    decay: f64,
    sustain: f32,
    release: Option<Ramp>,
}

impl Envelope {
    /// Starts an envelope at `start` that rises to `velocity` and settles at
    /// `velocity * sustain`.
    pub fn trigger(start: f64, velocity: f32, config: &EnvelopeConfig) -> Envelope {
        let peak = velocity.clamp(0.0, 1.0);
        Envelope {
            start,
            peak,
            attack: config.attack(),
            decay: config.decay(),
            sustain: peak * config.sustain(),
            release: None,
        }
    }

    /// An envelope that holds `level` from `start` until released.
    pub fn constant(start: f64, level: f32) -> Envelope {
        Envelope {
            start,
            peak: level,
            attack: 0.0,
            decay: 0.0,
            sustain: level,
            release: None,
        }
    }

    /// Returns a copy of this envelope ramping to silence over `duration`
    /// seconds from time `at`. Any release scheduled earlier is discarded and
    /// the ramp starts from the level the envelope has at `at`.
    pub fn release_at(&self, at: f64, duration: f64) -> Envelope {
        let from = self.level_at(at);
        Envelope {
            release: Some(Ramp {
                at,
                from,
                duration: duration.max(0.0),
            }),
            ..*self
        }
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn is_released(&self) -> bool {
        self.release.is_some()
    }

    /// The time at which a released envelope reaches silence.
    pub fn end(&self) -> Option<f64> {
        self.release.map(|r| r.at + r.duration)
    }

    pub fn stage_at(&self, t: f64) -> Stage {
        if let Some(ramp) = self.release {
            if t >= ramp.at + ramp.duration {
                return Stage::Done;
            }
            if t >= ramp.at {
                return Stage::Release;
            }
        }
        if t < self.start {
            Stage::Idle
        } else if t < self.start + self.attack {
            Stage::Attack
        } else if t < self.start + self.attack + self.decay {
            Stage::Decay
        } else {
            Stage::Sustain
        }
    }

    /// The level a voice is judged by when choosing what to steal. A held
    /// voice that has not finished its attack counts at its peak, so a note
    /// that was just played is not mistaken for a silent one.
    pub fn prominence_at(&self, t: f64) -> f32 {
        match self.stage_at(t) {
            Stage::Idle | Stage::Attack if !self.is_released() => self.peak,
            _ => self.level_at(t),
        }
    }

    pub fn level_at(&self, t: f64) -> f32 {
        if let Some(ramp) = self.release {
            if t >= ramp.at {
                if ramp.duration <= 0.0 {
                    return 0.0;
                }
                let progress = (t - ramp.at) / ramp.duration;
                if progress >= 1.0 {
                    return 0.0;
                }
                return ramp.from * (1.0 - progress) as f32;
            }
        }
        self.held_level(t)
    }

    fn held_level(&self, t: f64) -> f32 {
        let elapsed = t - self.start;
        if elapsed < 0.0 {
            return 0.0;
        }
        if elapsed < self.attack {
            return self.peak * (elapsed / self.attack) as f32;
        }
        let elapsed = elapsed - self.attack;
        if elapsed < self.decay {
            let progress = (elapsed / self.decay) as f32;
            return self.peak + (self.sustain - self.peak) * progress;
        }
        self.sustain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EnvelopeConfig {
        EnvelopeConfig::new(0.1, 0.2, 0.5, 0.4)
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_adsr_shape() {
        let envelope = Envelope::trigger(1.0, 0.8, &config());

        assert_eq!(envelope.stage_at(0.5), Stage::Idle);
        assert_eq!(envelope.level_at(0.5), 0.0);

        assert_eq!(envelope.stage_at(1.05), Stage::Attack);
        assert!(close(envelope.level_at(1.05), 0.4));

        assert_eq!(envelope.stage_at(1.2), Stage::Decay);
        assert!(close(envelope.level_at(1.1), 0.8));
        assert!(close(envelope.level_at(1.2), 0.6));

        assert_eq!(envelope.stage_at(2.0), Stage::Sustain);
        assert!(close(envelope.level_at(2.0), 0.4));
        assert!(!envelope.is_released());
        assert_eq!(envelope.end(), None);
    }

    #[test]
    fn test_release_starts_from_current_level() {
        let envelope = Envelope::trigger(0.0, 1.0, &config());

        // Released halfway through the attack.
        let released = envelope.release_at(0.05, 0.4);
        assert!(released.is_released());
        assert!(close(released.level_at(0.05), 0.5));
        assert!(close(released.level_at(0.25), 0.25));
        assert_eq!(released.stage_at(0.25), Stage::Release);
        assert_eq!(released.level_at(0.46), 0.0);
        assert_eq!(released.stage_at(0.46), Stage::Done);
        assert!((released.end().unwrap() - 0.45).abs() < 1e-9);

        // Before the release point the held shape is untouched.
        assert!(close(released.level_at(0.02), 0.2));
    }

    #[test]
    fn test_rerelease_replaces_pending_ramp() {
        let envelope = Envelope::trigger(0.0, 1.0, &config());
        let released = envelope.release_at(1.0, 1.0);
        assert!(close(released.level_at(1.5), 0.25));

        // A short fade scheduled mid-release supersedes the long ramp.
        let faded = released.release_at(1.5, 0.01);
        assert!(close(faded.level_at(1.5), 0.25));
        assert_eq!(faded.level_at(1.52), 0.0);
        assert_eq!(faded.stage_at(1.6), Stage::Done);
        assert!((faded.end().unwrap() - 1.51).abs() < 1e-9);
    }

    #[test]
    fn test_zero_length_stages() {
        let envelope = Envelope::trigger(0.0, 0.6, &EnvelopeConfig::new(0.0, 0.0, 1.0, 0.0));
        assert!(close(envelope.level_at(0.0), 0.6));
        assert_eq!(envelope.stage_at(0.0), Stage::Sustain);

        let released = envelope.release_at(1.0, 0.0);
        assert_eq!(released.level_at(1.0), 0.0);
        assert_eq!(released.stage_at(1.0), Stage::Done);
    }

    #[test]
    fn test_prominence() {
        let envelope = Envelope::trigger(1.0, 0.8, &config());
        assert_eq!(envelope.prominence_at(0.5), 0.8);
        assert_eq!(envelope.prominence_at(1.05), 0.8);
        assert!(close(envelope.prominence_at(2.0), 0.4));

        // A released voice is judged by where its ramp actually is.
        let released = envelope.release_at(1.05, 0.4);
        assert!(close(released.prominence_at(1.05), 0.4));
        assert!(close(released.prominence_at(0.5), 0.0));
    }

    #[test]
    fn test_constant() {
        let envelope = Envelope::constant(0.0, 1.0);
        assert_eq!(envelope.level_at(0.0), 1.0);
        assert_eq!(envelope.level_at(100.0), 1.0);
    }
}
