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
use crate::audio::AudioSample;

/// Reduces a sample to `bins` peak levels for waveform display. Each bin holds
/// the largest absolute value of the mono mix over its share of the frames.
/// Bins that cover no frames are zero.
pub fn waveform_peaks(sample: &AudioSample, bins: usize) -> Vec<f32> {
    if bins == 0 {
        return Vec::new();
    }
    let mono = sample.mono();
    let frames = mono.len();
    (0..bins)
        .map(|bin| {
            let start = bin * frames / bins;
            let end = (bin + 1) * frames / bins;
            mono[start..end]
                .iter()
                .fold(0.0f32, |peak, s| peak.max(s.abs()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peaks_per_bin() {
        let sample = AudioSample::new(vec![vec![0.1, -0.5, 0.2, 0.3, -0.9, 0.0, 0.4, 0.05]], 8);
        assert_eq!(waveform_peaks(&sample, 4), vec![0.5, 0.3, 0.9, 0.4]);
        assert_eq!(waveform_peaks(&sample, 1), vec![0.9]);
    }

    #[test]
    fn test_peaks_use_mono_mix() {
        let sample = AudioSample::new(vec![vec![1.0, 0.5], vec![0.0, 0.5]], 2);
        assert_eq!(waveform_peaks(&sample, 2), vec![0.5, 0.5]);
    }

    #[test]
    fn test_more_bins_than_frames() {
        let sample = AudioSample::new(vec![vec![0.25, -0.75]], 2);
        let peaks = waveform_peaks(&sample, 4);
        assert_eq!(peaks.len(), 4);
        assert_eq!(peaks.iter().cloned().fold(0.0f32, f32::max), 0.75);
        assert!(waveform_peaks(&sample, 0).is_empty());
    }
}
