// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Bridge from text to played-back speech.
//!
//! Couples the [`TtsManager`] (synthesis with fallback) to the
//! [`AudioOutputManager`] (per-channel playback): `speak` synthesizes and
//! plays in one call, and playback/barge-in events are re-exported for
//! callers that only hold the bridge.

use std::sync::Arc;

use crate::output::manager::{AudioOutputManager, OutputEvent};
use crate::output::{OutputError, PlaybackStats};
use crate::tts::manager::{TtsManager, TtsMetrics};
use crate::tts::{TtsError, TtsOptions};

/// Errors from the speak path.
#[derive(Debug, thiserror::Error)]
pub enum SpeakError {
    /// Synthesis failed (both providers, when fallback is enabled).
    #[error(transparent)]
    Tts(#[from] TtsError),
    /// Playback could not be started.
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Combined synthesis and playback metrics for one channel.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SpeechMetrics {
    /// Synthesis metrics (shared across channels).
    pub tts: TtsMetrics,
    /// Playback statistics for the queried channel, when attached.
    pub playback: Option<PlaybackStats>,
}

/// Synthesize-then-play front end.
pub struct TtsOutputBridge {
    tts: Arc<TtsManager>,
    output: Arc<AudioOutputManager>,
}

impl TtsOutputBridge {
    /// Create a bridge over the given managers.
    pub fn new(tts: Arc<TtsManager>, output: Arc<AudioOutputManager>) -> Self {
        Self { tts, output }
    }

    /// Synthesize `text` and play it on `channel_id`. Synthesis errors
    /// and playback errors both propagate to the caller.
    pub async fn speak(
        &self,
        channel_id: &str,
        text: &str,
        options: &TtsOptions,
    ) -> Result<(), SpeakError> {
        let segment = self.tts.synthesize(text, options).await?;
        self.output.play(channel_id, segment).await?;
        Ok(())
    }

    /// Stop playback on a channel.
    pub async fn stop(&self, channel_id: &str) {
        self.output.stop(channel_id).await;
    }

    /// True while the channel is playing.
    pub async fn is_speaking(&self, channel_id: &str) -> bool {
        self.output.is_playing(channel_id).await
    }

    /// Subscribe to the underlying playback events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<OutputEvent> {
        self.output.subscribe()
    }

    /// Combined TTS and playback metrics for a channel.
    pub async fn metrics(&self, channel_id: &str) -> SpeechMetrics {
        SpeechMetrics {
            tts: self.tts.metrics(),
            playback: self.output.stats(channel_id).await,
        }
    }
}
