// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Audio output subsystem: playback queueing, barge-in detection and
//! per-channel playback management.

pub mod barge_in;
pub mod manager;
pub mod queue;
pub mod tts_bridge;

pub use barge_in::{BargeInConfig, BargeInDetector, BargeInEvent};
pub use manager::{AudioOutputManager, OutputEvent};
pub use queue::{PlaybackQueue, QueueItem};
pub use tts_bridge::TtsOutputBridge;

use serde::Serialize;
use tokio::sync::mpsc;

/// Errors surfaced by the output subsystem.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// Playback was requested on a channel with no attached player. This
    /// is a caller bug, not a runtime condition.
    #[error("no player attached for channel {0}")]
    NoPlayerAttached(String),
    /// The playback device rejected a segment.
    #[error("playback failed on channel {channel_id}: {message}")]
    Playback {
        /// Channel the failure occurred on.
        channel_id: String,
        /// Device failure description.
        message: String,
    },
}

/// Audio payload of a synthesized segment: either a complete buffer or a
/// byte stream that is still being produced.
pub enum AudioData {
    /// Fully-synthesized PCM bytes.
    Buffer(Vec<u8>),
    /// Streaming chunks; closed when synthesis completes.
    Stream(mpsc::UnboundedReceiver<Vec<u8>>),
}

impl std::fmt::Debug for AudioData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioData::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            AudioData::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// A synthesized audio segment handed to the output manager.
#[derive(Debug)]
pub struct AudioSegment {
    /// Audio payload.
    pub data: AudioData,
    /// Whether `data` is streaming (still being produced) or complete.
    pub streaming: bool,
    /// The text that was synthesized, for context tracking.
    pub text: Option<String>,
    /// When the synthesis request was made (epoch ms), for latency
    /// statistics.
    pub requested_at_ms: Option<u64>,
    /// Voice/model used for generation.
    pub voice: Option<String>,
}

impl AudioSegment {
    /// Convenience constructor for a fully-buffered segment.
    pub fn from_buffer(data: Vec<u8>, text: impl Into<String>) -> Self {
        Self {
            data: AudioData::Buffer(data),
            streaming: false,
            text: Some(text.into()),
            requested_at_ms: None,
            voice: None,
        }
    }
}

/// Per-channel playback statistics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PlaybackStats {
    /// Total audio segments played to completion or interruption.
    pub total_played: u64,
    /// Number of barge-in interruptions.
    pub interruption_count: u64,
    /// Running average of synthesis-request-to-playback-start latency in
    /// milliseconds.
    pub average_tts_latency_ms: f64,
}
