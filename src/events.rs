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
//! Notifications emitted by the engine.
//!
//! Subscribers get their own channel. Events are delivered once to every
//! subscriber in the order they were emitted; a subscriber that drops its
//! receiver is forgotten on the next emit.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use crate::analysis::Analysis;

/// Something observable happened in the engine.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    LoadComplete(Analysis),
    LoadError {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    NoteOn {
        note: u8,
        velocity: f32,
        voice_id: u64,
    },
    NoteOff {
        note: u8,
    },
    #[serde(rename_all = "camelCase")]
    TempoChange {
        bpm: u32,
        note_division: f64,
        sync: bool,
        target_loop_duration: f64,
    },
    MetronomeStart {
        volume: f32,
    },
    MetronomeStop,
    /// A click was scheduled at the given render-clock time.
    MetronomeTick {
        at: f64,
    },
    RecordingStart,
    RecordingStop {
        bytes: usize,
    },
    Panic,
}

/// Fans events out to subscribers.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus::default()
    }

    /// Registers a new subscriber. Events emitted before this call are not
    /// replayed.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: EngineEvent) {
        trace!(?event, "Emitting event");
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
