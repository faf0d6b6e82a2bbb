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
use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::EngineError;

/// A streaming encoder for captured audio. Chunks are interleaved frames at
/// the rate and channel count the encoder was created with.
pub trait Encoder: Send {
    /// Appends a chunk of interleaved frames.
    fn push(&mut self, interleaved: &[f32]) -> Result<(), EngineError>;

    /// Flushes the encoder and returns the finished container.
    fn finish(self: Box<Self>) -> Result<Vec<u8>, EngineError>;

    /// The MIME type of the produced container.
    fn mime_type(&self) -> &'static str;
}

/// Creates encoders for captures and encoded exports.
pub trait EncoderFactory: Send {
    fn create(&self, channels: u16, sample_rate: u32) -> Box<dyn Encoder>;
}

impl<F> EncoderFactory for F
where
    F: Fn(u16, u32) -> Box<dyn Encoder> + Send,
{
    fn create(&self, channels: u16, sample_rate: u32) -> Box<dyn Encoder> {
        self(channels, sample_rate)
    }
}

/// The default encoder: 32-bit float WAV written through hound.
pub struct FloatWavEncoder {
    spec: WavSpec,
    chunks: Vec<Vec<f32>>,
}

impl FloatWavEncoder {
    pub fn new(channels: u16, sample_rate: u32) -> FloatWavEncoder {
        FloatWavEncoder {
            spec: WavSpec {
                channels,
                sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
            chunks: Vec::new(),
        }
    }

    /// A factory producing [`FloatWavEncoder`]s.
    pub fn factory() -> Box<dyn EncoderFactory> {
        Box::new(|channels: u16, sample_rate: u32| -> Box<dyn Encoder> {
            Box::new(FloatWavEncoder::new(channels, sample_rate))
        })
    }
}

impl Encoder for FloatWavEncoder {
    fn push(&mut self, interleaved: &[f32]) -> Result<(), EngineError> {
        if !interleaved.is_empty() {
            self.chunks.push(interleaved.to_vec());
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, EngineError> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, self.spec)?;
            for sample in self.chunks.iter().flatten() {
                writer.write_sample(*sample)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    fn mime_type(&self) -> &'static str {
        "audio/wav"
    }
}
