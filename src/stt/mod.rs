// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Speech-to-text: capability contract, per-speaker session fan-out and
//! transcript aggregation.
//!
//! The [`SttClient`] trait abstracts a streaming transcription vendor.
//! The [`TranscriptionManager`] opens one session per speaker, attributes
//! raw provider events back to speaker identities and tracks latency
//! metrics. The [`TranscriptAggregator`] merges partial results into
//! complete utterances with timeout-based flushing and cross-speaker
//! overlap detection.

pub mod aggregator;
pub mod deepgram;
pub mod manager;

pub use aggregator::{
    AggregatedUtterance, AggregatorConfig, AggregatorEvent, ConversationTurn,
    TranscriptAggregator,
};
pub use deepgram::{DeepgramConfig, DeepgramStt};
pub use manager::{SttMetrics, TranscriptEvent, TranscriptionManager};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Errors surfaced by a streaming STT client.
#[derive(Debug, thiserror::Error)]
pub enum SttError {
    /// The provider connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The provider did not answer within the configured timeout.
    /// Treated as a benign "server unavailable" condition by callers.
    #[error("provider timed out after {0} ms")]
    Timeout(u64),
    /// A required credential is missing.
    #[error("missing API key")]
    MissingApiKey,
    /// Any other provider-reported failure.
    #[error("provider error: {0}")]
    Provider(String),
}

/// One transcription result from a provider.
///
/// Raw and unattributed at the provider boundary; the transcription
/// manager injects `speaker_id` before re-emitting.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionEvent {
    /// Transcribed text. For non-final events this is the *cumulative*
    /// utterance so far (see [`SttClient`] contract).
    pub text: String,
    /// Whether the provider considers this result final.
    pub is_final: bool,
    /// Provider confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Stable speaker identity, injected by the transcription manager.
    pub speaker_id: Option<String>,
}

/// Events produced by an [`SttClient`] session.
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// A transcription result (partial or final).
    Transcription(TranscriptionEvent),
    /// A session-level error. The session may or may not recover; other
    /// speakers' sessions are unaffected either way.
    Error(String),
}

/// Streaming speech-to-text capability.
///
/// Implementations accept 16-bit PCM little-endian audio at the
/// configured sample rate and channel count.
///
/// # Partial-result contract
///
/// Providers are assumed to emit **cumulative** partials: each non-final
/// [`TranscriptionEvent`] carries the full utterance text so far, not a
/// delta. The aggregator replaces buffered text on every partial under
/// this assumption. A provider emitting true deltas must accumulate
/// internally before emitting.
#[async_trait]
pub trait SttClient: Send + Sync {
    /// Open the streaming session. Idempotent once connected.
    async fn start(&mut self) -> Result<(), SttError>;

    /// Close the streaming session. Safe to call when not started.
    async fn stop(&mut self);

    /// Forward one chunk of PCM16 audio. Dropped silently when the
    /// session is not connected.
    async fn send_audio(&mut self, audio: &[u8]);

    /// Subscribe to the session's event stream.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<SttEvent>;
}

/// Factory for per-speaker STT sessions, injected into the
/// [`TranscriptionManager`] so the concrete vendor stays pluggable.
pub type SttClientFactory = std::sync::Arc<dyn Fn() -> Box<dyn SttClient> + Send + Sync>;
