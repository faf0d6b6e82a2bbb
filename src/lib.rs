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
//! looptone turns a single recorded clip into a pitched, loop-sustained,
//! polyphonic instrument.
//!
//! The [`engine::Engine`] is the entry point. It owns the loaded sample and its
//! [`analysis::Analysis`], schedules voices against a render clock owned by the
//! [`audio::mixer::AudioMixer`], and reports what happens through
//! [`events::EngineEvent`]s.

pub mod analysis;
pub mod audio;
pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod metronome;
pub mod midi;
pub mod samples;
pub mod tempo;

#[cfg(test)]
mod testutil;

pub use engine::Engine;
pub use error::EngineError;
