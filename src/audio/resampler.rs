// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Linear-interpolation resampling for PCM16 LE audio.
//!
//! Stateless per-call transform. For output index `i` the source position
//! is `i / ratio` with `ratio = output_rate / input_rate`; the sample is
//! linearly interpolated between the floor and ceiling source samples,
//! rounded to nearest and clamped to the signed 16-bit range. Source
//! indices past either edge clamp to the nearest valid sample - no
//! wraparound, no zero padding. Matching rates pass through untouched.

/// Default inbound transport rate (48 kHz).
pub const TRANSPORT_SAMPLE_RATE: u32 = 48_000;
/// Default STT input rate (16 kHz).
pub const STT_SAMPLE_RATE: u32 = 16_000;

/// Linear-interpolation sample-rate converter.
#[derive(Debug, Clone, Copy)]
pub struct LinearResampler {
    input_rate: u32,
    output_rate: u32,
}

impl LinearResampler {
    /// Create a resampler between the given rates.
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        Self {
            input_rate,
            output_rate,
        }
    }

    /// Input sample rate in Hz.
    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Output sample rate in Hz.
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Resample PCM16 LE `input` from the input rate to the output rate.
    pub fn resample(&self, input: &[u8]) -> Vec<u8> {
        if input.is_empty() {
            return Vec::new();
        }

        if self.input_rate == self.output_rate {
            return input.to_vec();
        }

        const BYTES_PER_SAMPLE: usize = 2;
        let input_samples = input.len() / BYTES_PER_SAMPLE;
        let ratio = self.output_rate as f64 / self.input_rate as f64;
        let output_samples = (input_samples as f64 * ratio).floor() as usize;

        if output_samples == 0 {
            return Vec::new();
        }

        let mut output = Vec::with_capacity(output_samples * BYTES_PER_SAMPLE);

        for i in 0..output_samples {
            let src_pos = i as f64 / ratio;
            let src_index = src_pos.floor() as usize;
            let frac = src_pos - src_index as f64;

            let sample1 = read_sample(input, src_index) as f64;
            let sample2 = read_sample(input, src_index + 1) as f64;

            let interpolated = (sample1 + (sample2 - sample1) * frac).round();
            let clamped = interpolated.clamp(i16::MIN as f64, i16::MAX as f64) as i16;

            output.extend_from_slice(&clamped.to_le_bytes());
        }

        output
    }
}

impl Default for LinearResampler {
    fn default() -> Self {
        Self::new(TRANSPORT_SAMPLE_RATE, STT_SAMPLE_RATE)
    }
}

/// Read sample `index`, clamping out-of-range indices to the nearest edge.
fn read_sample(buffer: &[u8], index: usize) -> i16 {
    let max_index = buffer.len() / 2 - 1;
    let clamped = index.min(max_index);
    let offset = clamped * 2;
    i16::from_le_bytes([buffer[offset], buffer[offset + 1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn samples(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    #[test]
    fn test_downsample_48k_to_16k_sample_count() {
        let resampler = LinearResampler::new(48_000, 16_000);
        let input: Vec<i16> = (0..48).collect();
        let output = resampler.resample(&pcm(&input));
        assert_eq!(samples(&output).len(), 16);
    }

    #[test]
    fn test_same_rate_is_identity() {
        let resampler = LinearResampler::new(16_000, 16_000);
        let input = pcm(&[10, -20, 30]);
        assert_eq!(resampler.resample(&input), input);
    }

    #[test]
    fn test_monotonic_ramp_stays_monotonic() {
        let resampler = LinearResampler::new(48_000, 16_000);
        let input: Vec<i16> = (0..96).map(|i| i * 100).collect();
        let output = samples(&resampler.resample(&pcm(&input)));

        assert!(!output.is_empty());
        for pair in output.windows(2) {
            assert!(pair[1] >= pair[0], "ramp not monotonic: {:?}", output);
        }
    }

    #[test]
    fn test_upsample_interpolates_between_samples() {
        let resampler = LinearResampler::new(8_000, 16_000);
        let output = samples(&resampler.resample(&pcm(&[0, 100])));
        // Positions 0, 0.5, 1.0, 1.5 -> 0, 50, 100, edge-clamped 100.
        assert_eq!(output, vec![0, 50, 100, 100]);
    }

    #[test]
    fn test_edge_indices_clamp_to_last_sample() {
        let resampler = LinearResampler::new(8_000, 16_000);
        let output = samples(&resampler.resample(&pcm(&[500])));
        // Interpolation beyond the end reads the last sample, never zero.
        assert!(output.iter().all(|&s| s == 500));
    }

    #[test]
    fn test_empty_input() {
        let resampler = LinearResampler::default();
        assert!(resampler.resample(&[]).is_empty());
    }

    #[test]
    fn test_tiny_input_that_yields_no_output() {
        let resampler = LinearResampler::new(48_000, 16_000);
        // One input sample * 1/3 ratio floors to zero output samples.
        assert!(resampler.resample(&pcm(&[7])).is_empty());
    }
}
