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
//! MIDI keyboard input through midir.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use crossbeam_channel::Sender;
use midir::{MidiInput, MidiInputConnection, MidiInputPort};
use midly::live::LiveEvent;
use midly::MidiMessage;
use tracing::{debug, error, info, span, Level};

/// Controller number for "all sound off".
const ALL_SOUND_OFF: u8 = 120;
/// Controller number for "all notes off".
const ALL_NOTES_OFF: u8 = 123;

/// The subset of MIDI the instrument responds to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NoteEvent {
    On { note: u8, velocity: f32 },
    Off { note: u8 },
    AllNotesOff,
}

/// Parses a raw MIDI message. A note on with zero velocity is a note off.
/// Returns `None` for anything the instrument ignores.
pub fn parse(raw: &[u8]) -> Option<NoteEvent> {
    let LiveEvent::Midi { message, .. } = LiveEvent::parse(raw).ok()? else {
        return None;
    };
    match message {
        MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => Some(NoteEvent::Off {
            note: key.as_int(),
        }),
        MidiMessage::NoteOn { key, vel } => Some(NoteEvent::On {
            note: key.as_int(),
            velocity: vel.as_int() as f32 / 127.0,
        }),
        MidiMessage::NoteOff { key, .. } => Some(NoteEvent::Off { note: key.as_int() }),
        MidiMessage::Controller { controller, .. }
            if matches!(controller.as_int(), ALL_SOUND_OFF | ALL_NOTES_OFF) =>
        {
            Some(NoteEvent::AllNotesOff)
        }
        _ => None,
    }
}

/// A MIDI input port.
pub struct Input {
    name: String,
    port: MidiInputPort,
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Input)", self.name)
    }
}

impl Input {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Forwards note events from this port to `sender` until the returned
    /// connection is dropped.
    pub fn watch(&self, sender: Sender<NoteEvent>) -> Result<MidiInputConnection<()>, Box<dyn Error>> {
        let span = span!(Level::INFO, "watch midi input");
        let _enter = span.enter();

        let input = MidiInput::new("looptone input")?;
        let connection = input.connect(
            &self.port,
            "looptone input watcher",
            move |_, raw_event, _| {
                let Some(event) = parse(raw_event) else {
                    return;
                };
                debug!(?event, "Received MIDI event.");
                if let Err(e) = sender.send(event) {
                    error!(err = %e, "Error sending MIDI event to receiver.");
                }
            },
            (),
        )?;
        info!(device = %self.name, "Watching MIDI events.");
        Ok(connection)
    }
}

/// Lists MIDI input ports.
pub fn list() -> Result<Vec<Input>, Box<dyn Error>> {
    let input = MidiInput::new("looptone input listing")?;
    let mut inputs: HashMap<String, Input> = HashMap::new();
    for port in input.ports() {
        let name = input.port_name(&port)?;
        inputs
            .entry(name.clone())
            .or_insert(Input { name, port });
    }

    let mut sorted = inputs.into_values().collect::<Vec<Input>>();
    sorted.sort_by_key(|input| input.name.clone());
    Ok(sorted)
}

/// Gets the single input whose name contains `name`.
pub fn get(name: &str) -> Result<Input, Box<dyn Error>> {
    let mut matches = list()?
        .into_iter()
        .filter(|input| input.name.contains(name))
        .collect::<Vec<Input>>();

    if matches.is_empty() {
        return Err(format!("no device found with name {}", name).into());
    }
    if matches.len() > 1 {
        return Err(format!(
            "found too many devices that match ({}), use a less ambiguous device name",
            matches
                .iter()
                .map(|input| input.name.clone())
                .collect::<Vec<String>>()
                .join(", ")
        )
        .into());
    }
    Ok(matches.swap_remove(0))
}
