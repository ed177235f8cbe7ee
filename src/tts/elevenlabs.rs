// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! ElevenLabs text-to-speech provider (HTTP streaming).
//!
//! Calls `POST /v1/text-to-speech/{voice_id}/stream` and forwards the
//! response body chunks into the returned [`AudioSegment`]'s stream.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;

use crate::output::{AudioData, AudioSegment};
use crate::tts::{TtsError, TtsOptions, TtsProvider};
use crate::utils::now_ms;

/// JSON body for the ElevenLabs synthesis endpoint.
#[derive(Debug, Serialize)]
struct ElevenLabsRequest {
    text: String,
    model_id: String,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f64,
    similarity_boost: f64,
}

/// ElevenLabs provider configuration.
#[derive(Debug, Clone)]
pub struct ElevenLabsConfig {
    /// ElevenLabs API key.
    pub api_key: String,
    /// Default voice ID when a request does not specify one.
    pub default_voice_id: String,
    /// Default model ID.
    pub model_id: String,
    /// API base URL.
    pub base_url: String,
    /// Request timeout. Timeouts surface as [`TtsError::Timeout`].
    pub request_timeout: Duration,
}

impl ElevenLabsConfig {
    /// Defaults: `eleven_monolingual_v1` with a stock voice.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            default_voice_id: "JBFqnCBsd6RMkjVDRZzb".to_string(),
            model_id: "eleven_monolingual_v1".to_string(),
            base_url: "https://api.elevenlabs.io".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// ElevenLabs HTTP TTS provider.
pub struct ElevenLabsTts {
    config: ElevenLabsConfig,
    client: reqwest::Client,
}

impl ElevenLabsTts {
    /// Create a provider. Fails fast when the API key is empty.
    pub fn new(config: ElevenLabsConfig) -> Result<Self, TtsError> {
        if config.api_key.is_empty() {
            return Err(TtsError::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| TtsError::Provider(format!("HTTP client build: {}", e)))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsTts {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(
        &self,
        text: &str,
        options: &TtsOptions,
    ) -> Result<AudioSegment, TtsError> {
        let requested_at_ms = now_ms();
        let voice_id = options
            .voice_id
            .clone()
            .unwrap_or_else(|| self.config.default_voice_id.clone());
        let model_id = options
            .model_id
            .clone()
            .unwrap_or_else(|| self.config.model_id.clone());

        let url = format!(
            "{}/v1/text-to-speech/{}/stream",
            self.config.base_url, voice_id
        );
        let body = ElevenLabsRequest {
            text: text.to_string(),
            model_id,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
            },
        };

        tracing::debug!(voice = %voice_id, text_len = text.len(), "ElevenLabsTts: synthesis request");

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TtsError::Timeout(self.config.request_timeout.as_millis() as u64)
                } else {
                    TtsError::ConnectionFailed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %error_body, "ElevenLabsTts: API error");
            return Err(TtsError::Provider(format!(
                "HTTP {}: {}",
                status, error_body
            )));
        }

        // Forward response body chunks into the segment's stream.
        let (chunk_tx, chunk_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut byte_stream = response.bytes_stream();
        tokio::spawn(async move {
            while let Some(chunk) = byte_stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        if chunk_tx.send(bytes.to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("ElevenLabsTts: body stream error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(AudioSegment {
            data: AudioData::Stream(chunk_rx),
            streaming: true,
            text: Some(text.to_string()),
            requested_at_ms: Some(requested_at_ms),
            voice: Some(voice_id),
        })
    }
}

impl std::fmt::Debug for ElevenLabsTts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevenLabsTts")
            .field("model_id", &self.config.model_id)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}
