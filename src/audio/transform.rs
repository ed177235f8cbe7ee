// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Transform pipeline: channel mixing followed by resampling.
//!
//! Converts inbound transport audio (stereo 48 kHz PCM16 by default) into
//! the mono 16 kHz stream the transcription providers expect, tracking
//! packet counts and a running latency average.

use std::time::Instant;

use serde::Serialize;

use crate::audio::mixer::ChannelMixer;
use crate::audio::resampler::LinearResampler;

/// Configuration for the transform pipeline.
#[derive(Debug, Clone, Copy)]
pub struct TransformConfig {
    /// Inbound sample rate in Hz.
    pub input_sample_rate: u32,
    /// Outbound sample rate in Hz.
    pub output_sample_rate: u32,
    /// Inbound channel count.
    pub input_channels: u32,
    /// Outbound channel count.
    pub output_channels: u32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 48_000,
            output_sample_rate: 16_000,
            input_channels: 2,
            output_channels: 1,
        }
    }
}

/// Processing statistics for a [`TransformPipeline`].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TransformStats {
    /// Total packets processed.
    pub packets_processed: u64,
    /// Decode errors encountered (reserved for codec front-ends).
    pub decode_errors: u64,
    /// Running average per-packet processing latency in milliseconds.
    pub average_latency_ms: f64,
}

/// Stereo-to-mono downmix plus resampling over PCM16 LE.
#[derive(Debug)]
pub struct TransformPipeline {
    mixer: ChannelMixer,
    resampler: LinearResampler,
    stats: TransformStats,
}

impl TransformPipeline {
    /// Create a pipeline from `config`.
    pub fn new(config: TransformConfig) -> Self {
        Self {
            mixer: ChannelMixer::new(config.input_channels, config.output_channels),
            resampler: LinearResampler::new(
                config.input_sample_rate,
                config.output_sample_rate,
            ),
            stats: TransformStats::default(),
        }
    }

    /// Transform one packet of PCM16 audio: mix channels, then resample.
    pub fn transform(&mut self, input: &[u8]) -> Vec<u8> {
        if input.is_empty() {
            return Vec::new();
        }

        let started = Instant::now();

        let mono = self.mixer.mix(input);
        let resampled = self.resampler.resample(&mono);

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.packets_processed += 1;
        let n = self.stats.packets_processed as f64;
        self.stats.average_latency_ms =
            (self.stats.average_latency_ms * (n - 1.0) + latency_ms) / n;

        resampled
    }

    /// Snapshot of processing statistics.
    pub fn stats(&self) -> TransformStats {
        self.stats
    }

    /// Reset statistics to zero.
    pub fn reset_stats(&mut self) {
        self.stats = TransformStats::default();
    }
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::new(TransformConfig::default())
    }
}
