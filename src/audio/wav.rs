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
//! Canonical 16-bit PCM RIFF/WAVE serialization.
//!
//! The layout is written byte for byte rather than through a WAV library so the
//! output is stable: a 44 byte header followed by interleaved little-endian
//! samples, with no extra chunks.

use super::buffer::AudioSample;

/// Size of the RIFF, fmt and data headers combined.
pub const HEADER_SIZE: usize = 44;

const BITS_PER_SAMPLE: u16 = 16;
const PCM_FORMAT: u16 = 1;

/// Converts a float sample to signed 16-bit, clamping to `[-1, 1]` first.
/// Negative values scale by 32768 and positive values by 32767.
pub fn quantize(sample: f32) -> i16 {
    let sample = if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    };
    if sample < 0.0 {
        (sample * 32768.0) as i16
    } else {
        (sample * 32767.0) as i16
    }
}

/// Serializes the whole sample as a canonical PCM16 WAV file.
pub fn encode_pcm16(sample: &AudioSample) -> Vec<u8> {
    let channels = sample.channel_count() as u16;
    let sample_rate = sample.sample_rate();
    let block_align = channels * (BITS_PER_SAMPLE / 8);
    let byte_rate = sample_rate * block_align as u32;
    let data_size = (sample.frames() * block_align as usize) as u32;

    let mut out = Vec::with_capacity(HEADER_SIZE + data_size as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_size).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&PCM_FORMAT.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    for frame in 0..sample.frames() {
        for channel in sample.channels() {
            out.extend_from_slice(&quantize(channel[frame]).to_le_bytes());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), 32767);
        assert_eq!(quantize(-1.0), -32768);
        assert_eq!(quantize(2.0), 32767);
        assert_eq!(quantize(-7.5), -32768);
        assert_eq!(quantize(0.5), 16383);
        assert_eq!(quantize(-0.5), -16384);
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn test_header_fields() {
        let sample = AudioSample::new(vec![vec![0.0; 10], vec![0.0; 10]], 48000);
        let bytes = encode_pcm16(&sample);

        assert_eq!(bytes.len(), HEADER_SIZE + 40);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32_at(&bytes, 4), 36 + 40);
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u32_at(&bytes, 16), 16);
        assert_eq!(u16_at(&bytes, 20), 1);
        assert_eq!(u16_at(&bytes, 22), 2);
        assert_eq!(u32_at(&bytes, 24), 48000);
        assert_eq!(u32_at(&bytes, 28), 48000 * 4);
        assert_eq!(u16_at(&bytes, 32), 4);
        assert_eq!(u16_at(&bytes, 34), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32_at(&bytes, 40), 40);
    }

    #[test]
    fn test_round_trip_through_hound() {
        let left: Vec<f32> = (0..200).map(|i| ((i as f32) * 0.07).sin() * 0.8).collect();
        let right: Vec<f32> = (0..200).map(|i| (i as f32 / 100.0) - 1.0).collect();
        let sample = AudioSample::new(vec![left.clone(), right.clone()], 22050);

        let bytes = encode_pcm16(&sample);
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 22050);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_format, hound::SampleFormat::Int);

        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded.len(), 400);
        for (i, pair) in decoded.chunks_exact(2).enumerate() {
            assert!((pair[0] as i32 - quantize(left[i]) as i32).abs() <= 1);
            assert!((pair[1] as i32 - quantize(right[i]) as i32).abs() <= 1);
        }
    }

    #[test]
    fn test_empty_sample() {
        let sample = AudioSample::new(vec![Vec::new()], 44100);
        let bytes = encode_pcm16(&sample);
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(u32_at(&bytes, 4), 36);
        assert_eq!(u32_at(&bytes, 40), 0);
    }
}
