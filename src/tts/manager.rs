// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Unified TTS with automatic provider fallback.
//!
//! Wraps a primary and an optional fallback [`TtsProvider`]. Every
//! synthesis call is bounded by a timeout; on primary failure the
//! fallback is attempted exactly once. Only when both providers fail does
//! an error propagate to the caller, carrying both causes.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::output::AudioSegment;
use crate::tts::{TtsError, TtsOptions, TtsProvider};
use crate::utils::Emitter;

/// TTS manager configuration.
#[derive(Debug, Clone)]
pub struct TtsManagerConfig {
    /// Whether to attempt the fallback provider on primary failure.
    pub enable_fallback: bool,
    /// Default voice applied when a request specifies none.
    pub default_voice: Option<String>,
    /// Default speech speed applied when a request specifies none.
    pub default_speed: Option<f64>,
    /// Per-provider synthesis timeout.
    pub synthesis_timeout: Duration,
}

impl Default for TtsManagerConfig {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            default_voice: None,
            default_speed: None,
            synthesis_timeout: Duration::from_secs(30),
        }
    }
}

/// Synthesis metrics snapshot.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TtsMetrics {
    /// Total synthesis requests that produced audio.
    pub synthesis_count: u64,
    /// How many of those used the fallback provider.
    pub fallback_count: u64,
    /// Average request-to-segment latency in milliseconds.
    pub average_latency_ms: f64,
}

/// Events fanned out by the [`TtsManager`].
#[derive(Debug, Clone)]
pub enum TtsManagerEvent {
    /// Synthesis started against the named provider.
    SynthesisStarted {
        /// Provider name.
        provider: String,
    },
    /// Synthesis completed.
    SynthesisComplete {
        /// Provider that produced the audio.
        provider: String,
        /// Request-to-segment latency in milliseconds.
        latency_ms: f64,
    },
    /// The primary provider failed and the fallback was engaged.
    FallbackTriggered {
        /// Primary failure description.
        primary_error: String,
        /// Fallback provider name.
        fallback_provider: String,
    },
    /// All providers failed.
    Error {
        /// Combined failure description.
        message: String,
    },
}

#[derive(Default)]
struct MetricsInner {
    synthesis_count: u64,
    fallback_count: u64,
    latency_sum_ms: f64,
}

/// Primary-plus-fallback synthesis front end.
pub struct TtsManager {
    primary: Box<dyn TtsProvider>,
    fallback: Option<Box<dyn TtsProvider>>,
    config: TtsManagerConfig,
    metrics: Mutex<MetricsInner>,
    events: Emitter<TtsManagerEvent>,
}

impl TtsManager {
    /// Create a manager over a primary and optional fallback provider.
    pub fn new(
        primary: Box<dyn TtsProvider>,
        fallback: Option<Box<dyn TtsProvider>>,
        config: TtsManagerConfig,
    ) -> Self {
        Self {
            primary,
            fallback,
            config,
            metrics: Mutex::new(MetricsInner::default()),
            events: Emitter::new(),
        }
    }

    /// Subscribe to synthesis lifecycle events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<TtsManagerEvent> {
        self.events.subscribe()
    }

    /// Synthesize `text`, falling back to the secondary provider when the
    /// primary fails.
    pub async fn synthesize(
        &self,
        text: &str,
        options: &TtsOptions,
    ) -> Result<AudioSegment, TtsError> {
        let started = Instant::now();
        let merged = TtsOptions {
            voice_id: options
                .voice_id
                .clone()
                .or_else(|| self.config.default_voice.clone()),
            model_id: options.model_id.clone(),
            speed: options.speed.or(self.config.default_speed),
        };

        self.events.emit(TtsManagerEvent::SynthesisStarted {
            provider: self.primary.name().to_string(),
        });

        let primary_error = match self.run_provider(&*self.primary, text, &merged).await {
            Ok(segment) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.record(latency_ms, false);
                self.events.emit(TtsManagerEvent::SynthesisComplete {
                    provider: self.primary.name().to_string(),
                    latency_ms,
                });
                return Ok(segment);
            }
            Err(e) => e,
        };

        let fallback = match (&self.fallback, self.config.enable_fallback) {
            (Some(fallback), true) => fallback,
            _ => {
                self.events.emit(TtsManagerEvent::Error {
                    message: primary_error.to_string(),
                });
                return Err(primary_error);
            }
        };

        tracing::warn!(
            primary = %self.primary.name(),
            fallback = %fallback.name(),
            error = %primary_error,
            "TtsManager: primary synthesis failed, trying fallback"
        );
        self.events.emit(TtsManagerEvent::FallbackTriggered {
            primary_error: primary_error.to_string(),
            fallback_provider: fallback.name().to_string(),
        });

        match self.run_provider(&**fallback, text, &merged).await {
            Ok(segment) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.record(latency_ms, true);
                self.events.emit(TtsManagerEvent::SynthesisComplete {
                    provider: fallback.name().to_string(),
                    latency_ms,
                });
                Ok(segment)
            }
            Err(fallback_error) => {
                let combined = TtsError::BothProvidersFailed {
                    primary_provider: self.primary.name().to_string(),
                    primary: primary_error.to_string(),
                    fallback_provider: fallback.name().to_string(),
                    fallback: fallback_error.to_string(),
                };
                self.events.emit(TtsManagerEvent::Error {
                    message: combined.to_string(),
                });
                Err(combined)
            }
        }
    }

    async fn run_provider(
        &self,
        provider: &dyn TtsProvider,
        text: &str,
        options: &TtsOptions,
    ) -> Result<AudioSegment, TtsError> {
        match tokio::time::timeout(
            self.config.synthesis_timeout,
            provider.synthesize(text, options),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TtsError::Timeout(
                self.config.synthesis_timeout.as_millis() as u64,
            )),
        }
    }

    fn record(&self, latency_ms: f64, used_fallback: bool) {
        let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
        metrics.synthesis_count += 1;
        if used_fallback {
            metrics.fallback_count += 1;
        }
        metrics.latency_sum_ms += latency_ms;
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> TtsMetrics {
        let metrics = self.metrics.lock().expect("metrics lock poisoned");
        TtsMetrics {
            synthesis_count: metrics.synthesis_count,
            fallback_count: metrics.fallback_count,
            average_latency_ms: if metrics.synthesis_count > 0 {
                metrics.latency_sum_ms / metrics.synthesis_count as f64
            } else {
                0.0
            },
        }
    }

    /// Reset metrics to zero.
    pub fn reset_metrics(&self) {
        *self.metrics.lock().expect("metrics lock poisoned") = MetricsInner::default();
    }
}
