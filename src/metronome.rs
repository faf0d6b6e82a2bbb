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
use std::time::Duration;

use tracing::{debug, info};

/// How far ahead of the render clock clicks are scheduled, in seconds.
pub const LOOKAHEAD: f64 = 0.1;

/// How often the control loop should call [`Metronome::schedule`].
pub const CONTROL_TICK: Duration = Duration::from_millis(25);

/// A look-ahead click scheduler.
///
/// The scheduler only decides when clicks happen. Each call to
/// [`Metronome::schedule`] returns the render-clock times of every click that
/// falls inside the look-ahead window and has not been returned before, so a
/// coarse or jittery control loop still yields sample-accurate clicks.
#[derive(Debug)]
pub struct Metronome {
    running: bool,
    volume: f32,
    next_tick: f64,
    seconds_per_beat: f64,
}

impl Metronome {
    pub fn new(seconds_per_beat: f64) -> Metronome {
        Metronome {
            running: false,
            volume: 0.0,
            next_tick: 0.0,
            seconds_per_beat,
        }
    }

    /// Starts clicking, with the first click at `at`.
    pub fn start(&mut self, at: f64, volume: f32) {
        self.running = true;
        self.next_tick = at;
        self.set_volume(volume);
        info!(volume = self.volume, bpm = 60.0 / self.seconds_per_beat, "Metronome started");
    }

    pub fn stop(&mut self) {
        if self.running {
            info!("Metronome stopped");
        }
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Sets the click volume, clamped to `[0, 1]`. Returns the applied volume.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.volume
    }

    /// Changes the beat length. Clicks already scheduled are kept and the new
    /// spacing applies from the next one.
    pub fn set_seconds_per_beat(&mut self, seconds_per_beat: f64) {
        if seconds_per_beat > 0.0 && seconds_per_beat.is_finite() {
            self.seconds_per_beat = seconds_per_beat;
        }
    }

    pub fn seconds_per_beat(&self) -> f64 {
        self.seconds_per_beat
    }

    /// Returns the clicks due before `now + LOOKAHEAD`. Clicks that are
    /// already in the past are dropped, keeping the rest on the beat grid.
    pub fn schedule(&mut self, now: f64) -> Vec<f64> {
        if !self.running {
            return Vec::new();
        }

        if self.next_tick < now {
            let missed = ((now - self.next_tick) / self.seconds_per_beat).ceil();
            debug!(missed, "Metronome fell behind, skipping clicks");
            self.next_tick += missed * self.seconds_per_beat;
        }

        let mut ticks = Vec::new();
        while self.next_tick < now + LOOKAHEAD {
            ticks.push(self.next_tick);
            self.next_tick += self.seconds_per_beat;
        }
        ticks
    }
}
