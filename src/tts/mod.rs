// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Text-to-speech: capability contract, concrete providers and the
//! fallback-aware manager.
//!
//! [`TtsProvider`] abstracts a synthesis vendor. The [`TtsManager`] holds
//! a primary and an optional fallback provider: on primary failure it
//! tries the fallback exactly once (skip-on-disable, never retried
//! further); only a failure of both propagates, as
//! [`TtsError::BothProvidersFailed`].

pub mod cartesia;
pub mod elevenlabs;
pub mod manager;

pub use cartesia::{CartesiaConfig, CartesiaTts};
pub use elevenlabs::{ElevenLabsConfig, ElevenLabsTts};
pub use manager::{TtsManager, TtsManagerConfig, TtsMetrics};

use async_trait::async_trait;

use crate::output::AudioSegment;

/// Errors surfaced by a TTS provider or the manager.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    /// The provider connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// The provider did not answer within the configured timeout.
    #[error("provider timed out after {0} ms")]
    Timeout(u64),
    /// A required credential is missing.
    #[error("missing API key")]
    MissingApiKey,
    /// Any other provider-reported failure.
    #[error("provider error: {0}")]
    Provider(String),
    /// Primary and fallback providers both failed.
    #[error("synthesis failed with both providers; primary ({primary_provider}): {primary}; fallback ({fallback_provider}): {fallback}")]
    BothProvidersFailed {
        /// Primary provider name.
        primary_provider: String,
        /// Primary failure description.
        primary: String,
        /// Fallback provider name.
        fallback_provider: String,
        /// Fallback failure description.
        fallback: String,
    },
}

/// Per-request synthesis options.
#[derive(Debug, Clone, Default)]
pub struct TtsOptions {
    /// Voice ID to use for synthesis.
    pub voice_id: Option<String>,
    /// Model ID to use.
    pub model_id: Option<String>,
    /// Speech rate/speed (provider dependent).
    pub speed: Option<f64>,
}

/// Text-to-speech capability.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Provider name for logging and combined error messages.
    fn name(&self) -> &str;

    /// Synthesize `text` into an [`AudioSegment`].
    async fn synthesize(
        &self,
        text: &str,
        options: &TtsOptions,
    ) -> Result<AudioSegment, TtsError>;
}
