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

//! Signal generators and helpers shared by tests.

use std::f64::consts::PI;
use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};
use rand::Rng;

/// Generate a sine wave.
pub fn sine(frequency: f32, sample_rate: u32, duration_seconds: f32, amplitude: f32) -> Vec<f32> {
    generate_multi_frequency_signal(&[frequency], &[amplitude], sample_rate, duration_seconds)
}

/// Generate a multi-frequency signal (sum of sine waves).
pub fn generate_multi_frequency_signal(
    frequencies: &[f32],
    amplitudes: &[f32],
    sample_rate: u32,
    duration_seconds: f32,
) -> Vec<f32> {
    assert_eq!(
        frequencies.len(),
        amplitudes.len(),
        "Frequencies and amplitudes must have same length"
    );

    let sample_count = (sample_rate as f32 * duration_seconds) as usize;
    (0..sample_count)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            frequencies
                .iter()
                .zip(amplitudes.iter())
                .map(|(freq, amp)| amp * (2.0 * PI * *freq as f64 * t).sin() as f32)
                .sum()
        })
        .collect()
}

/// Generate uniform white noise in `[-amplitude, amplitude]`.
pub fn noise(sample_rate: u32, duration_seconds: f32, amplitude: f32) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    let sample_count = (sample_rate as f32 * duration_seconds) as usize;
    (0..sample_count)
        .map(|_| rng.gen_range(-amplitude..=amplitude))
        .collect()
}

/// Silence of the given length.
pub fn silence(sample_rate: u32, duration_seconds: f32) -> Vec<f32> {
    vec![0.0; (sample_rate as f32 * duration_seconds) as usize]
}

/// Calculate RMS (Root Mean Square) of a signal.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|&x| x * x).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Encodes planar channels as a 32-bit float WAV file in memory.
pub fn wav_bytes(channels: &[Vec<f32>], sample_rate: u32) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(
            &mut cursor,
            WavSpec {
                channels: channels.len() as u16,
                sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
        )
        .unwrap();

        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for i in 0..frames {
            for channel in channels {
                writer.write_sample(channel[i]).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
