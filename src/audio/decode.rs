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

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, warn};

use super::buffer::AudioSample;

/// Errors that can occur while turning raw bytes into PCM.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("audio decoding error: {0}")]
    Symphonia(#[from] SymphoniaError),

    #[error("no decodable audio track found")]
    NoTrack,

    #[error("audio track does not declare a sample rate")]
    UnknownSampleRate,

    #[error("audio contained no samples")]
    NoSamples,

    #[error("resampling error: {0}")]
    Resample(String),
}

/// Decodes an in-memory audio file (any container symphonia can probe) into
/// an [`AudioSample`].
pub fn decode(bytes: &[u8]) -> Result<AudioSample, DecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let probed = get_probe().format(
        &Hint::new(),
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let mut decoder = get_codecs().make(&params, &DecoderOptions::default())?;
    let mut sample_rate = params.sample_rate;
    let mut channel_count = params.channels.map(|c| c.count()).unwrap_or(0);
    let mut interleaved: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate.get_or_insert(spec.rate);
                channel_count = spec.channels.count();

                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(err = e, "Skipping undecodable packet");
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let sample_rate = sample_rate.ok_or(DecodeError::UnknownSampleRate)?;
    if interleaved.is_empty() || channel_count == 0 {
        return Err(DecodeError::NoSamples);
    }

    let sample = AudioSample::from_interleaved(&interleaved, channel_count, sample_rate);
    debug!(
        sample_rate,
        channels = channel_count,
        frames = sample.frames(),
        "Decoded audio"
    );
    Ok(sample)
}
