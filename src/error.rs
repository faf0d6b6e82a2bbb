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
use crate::audio::decode::DecodeError;
use crate::config::ConfigError;

/// Errors surfaced by the engine's public operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The recording that should have become the sample contained no bytes.
    #[error("recording is empty")]
    EmptyRecording,

    /// An export or capture operation had nothing to work with.
    #[error("not available: {0}")]
    NotAvailable(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoder error: {0}")]
    Encode(String),

    /// A background load task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<hound::Error> for EngineError {
    fn from(e: hound::Error) -> Self {
        EngineError::Encode(e.to_string())
    }
}
