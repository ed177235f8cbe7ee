// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Cartesia text-to-speech provider (WebSocket streaming).
//!
//! Each synthesis request opens a WebSocket to
//! `wss://api.cartesia.ai/tts/websocket`, sends one transcript request and
//! streams base64-encoded PCM chunks back until the server signals
//! `done`. The returned [`AudioSegment`] carries the live chunk stream so
//! playback can begin before synthesis completes.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::output::{AudioData, AudioSegment};
use crate::tts::{TtsError, TtsOptions, TtsProvider};
use crate::utils::{generate_unique_id, now_ms};

// ---------------------------------------------------------------------------
// WebSocket message types (Cartesia protocol)
// ---------------------------------------------------------------------------

/// JSON message sent to the Cartesia WebSocket API.
#[derive(Debug, Serialize)]
struct CartesiaWsRequest {
    transcript: String,
    #[serde(rename = "continue")]
    continue_transcript: bool,
    context_id: String,
    model_id: String,
    voice: CartesiaVoiceConfig,
    output_format: CartesiaOutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f64>,
}

#[derive(Debug, Serialize)]
struct CartesiaVoiceConfig {
    mode: String,
    id: String,
}

#[derive(Debug, Serialize)]
struct CartesiaOutputFormat {
    container: String,
    encoding: String,
    sample_rate: u32,
}

/// JSON message received from the Cartesia WebSocket API.
#[derive(Debug, Deserialize)]
struct CartesiaWsResponse {
    #[serde(rename = "type")]
    msg_type: String,
    /// Base64-encoded audio data (present when msg_type == "chunk").
    data: Option<String>,
    /// Error details (present when msg_type == "error").
    #[serde(default)]
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Cartesia provider configuration.
#[derive(Debug, Clone)]
pub struct CartesiaConfig {
    /// Cartesia API key.
    pub api_key: String,
    /// Model identifier (e.g. `"sonic-2"`).
    pub model_id: String,
    /// Default voice ID when a request does not specify one.
    pub default_voice_id: String,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Cartesia API version string.
    pub cartesia_version: String,
    /// WebSocket endpoint.
    pub ws_url: String,
    /// Connection timeout. Timeouts surface as [`TtsError::Timeout`], a
    /// benign "server unavailable" condition for the fallback policy.
    pub connect_timeout: Duration,
}

impl CartesiaConfig {
    /// Defaults: model `sonic-2`, raw PCM16 at 48 kHz.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model_id: "sonic-2".to_string(),
            default_voice_id: "a0e99841-438c-4a64-b679-ae501e7d6091".to_string(),
            sample_rate: 48_000,
            cartesia_version: "2025-04-16".to_string(),
            ws_url: "wss://api.cartesia.ai/tts/websocket".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// CartesiaTts
// ---------------------------------------------------------------------------

/// Cartesia streaming TTS provider.
pub struct CartesiaTts {
    config: CartesiaConfig,
}

impl CartesiaTts {
    /// Create a provider. Fails fast when the API key is empty.
    pub fn new(config: CartesiaConfig) -> Result<Self, TtsError> {
        if config.api_key.is_empty() {
            return Err(TtsError::MissingApiKey);
        }
        Ok(Self { config })
    }

    fn build_request(&self, text: &str, options: &TtsOptions) -> (String, CartesiaWsRequest) {
        let voice_id = options
            .voice_id
            .clone()
            .unwrap_or_else(|| self.config.default_voice_id.clone());
        let request = CartesiaWsRequest {
            transcript: text.to_string(),
            continue_transcript: false,
            context_id: generate_unique_id("ctx"),
            model_id: options
                .model_id
                .clone()
                .unwrap_or_else(|| self.config.model_id.clone()),
            voice: CartesiaVoiceConfig {
                mode: "id".to_string(),
                id: voice_id.clone(),
            },
            output_format: CartesiaOutputFormat {
                container: "raw".to_string(),
                encoding: "pcm_s16le".to_string(),
                sample_rate: self.config.sample_rate,
            },
            speed: options.speed,
        };
        (voice_id, request)
    }
}

#[async_trait]
impl TtsProvider for CartesiaTts {
    fn name(&self) -> &str {
        "cartesia"
    }

    async fn synthesize(
        &self,
        text: &str,
        options: &TtsOptions,
    ) -> Result<AudioSegment, TtsError> {
        let requested_at_ms = now_ms();
        let url = format!(
            "{}?api_key={}&cartesia_version={}",
            self.config.ws_url, self.config.api_key, self.config.cartesia_version
        );

        tracing::debug!("CartesiaTts: connecting WebSocket");
        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(&url),
        );
        let ws_stream = match connect.await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => return Err(TtsError::ConnectionFailed(e.to_string())),
            Err(_) => {
                return Err(TtsError::Timeout(
                    self.config.connect_timeout.as_millis() as u64
                ))
            }
        };

        let (mut sink, mut stream) = ws_stream.split();

        let (voice_id, request) = self.build_request(text, options);
        let payload = serde_json::to_string(&request)
            .map_err(|e| TtsError::Provider(format!("request serialization: {}", e)))?;
        sink.send(WsMessage::Text(payload))
            .await
            .map_err(|e| TtsError::Provider(format!("request send: {}", e)))?;

        // Stream decoded chunks to the consumer; close on "done"/"error".
        let (chunk_tx, chunk_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg_result) = stream.next().await {
                let msg = match msg_result {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("CartesiaTts: WebSocket read error: {}", e);
                        break;
                    }
                };

                let text = match msg {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(_) => break,
                    _ => continue,
                };

                let response: CartesiaWsResponse = match serde_json::from_str(&text) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("CartesiaTts: unparseable message: {}", e);
                        continue;
                    }
                };

                match response.msg_type.as_str() {
                    "chunk" => {
                        let Some(data) = response.data else { continue };
                        match base64::engine::general_purpose::STANDARD.decode(&data) {
                            Ok(bytes) => {
                                if chunk_tx.send(bytes).is_err() {
                                    // Consumer dropped the segment.
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!("CartesiaTts: bad base64 chunk: {}", e);
                            }
                        }
                    }
                    "done" => break,
                    "error" => {
                        tracing::error!(
                            "CartesiaTts: server error: {}",
                            response.error.as_deref().unwrap_or("unknown")
                        );
                        break;
                    }
                    other => {
                        tracing::trace!("CartesiaTts: unhandled message type: {}", other);
                    }
                }
            }

            let _ = sink.close().await;
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

impl std::fmt::Debug for CartesiaTts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartesiaTts")
            .field("model_id", &self.config.model_id)
            .field("sample_rate", &self.config.sample_rate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_fails_fast() {
        let result = CartesiaTts::new(CartesiaConfig::new(""));
        assert!(matches!(result, Err(TtsError::MissingApiKey)));
    }

    #[test]
    fn test_request_uses_default_voice_when_unset() {
        let tts = CartesiaTts::new(CartesiaConfig::new("key")).unwrap();
        let (voice_id, request) = tts.build_request("hello", &TtsOptions::default());

        assert_eq!(voice_id, tts.config.default_voice_id);
        assert_eq!(request.voice.id, tts.config.default_voice_id);
        assert_eq!(request.transcript, "hello");
        assert_eq!(request.model_id, "sonic-2");
        assert_eq!(request.output_format.encoding, "pcm_s16le");
        assert!(!request.continue_transcript);
    }

    #[test]
    fn test_request_honors_per_call_options() {
        let tts = CartesiaTts::new(CartesiaConfig::new("key")).unwrap();
        let options = TtsOptions {
            voice_id: Some("custom-voice".to_string()),
            model_id: Some("sonic-3".to_string()),
            speed: Some(1.2),
        };
        let (voice_id, request) = tts.build_request("hi", &options);

        assert_eq!(voice_id, "custom-voice");
        assert_eq!(request.model_id, "sonic-3");
        assert_eq!(request.speed, Some(1.2));
    }

    #[test]
    fn test_request_serializes_continue_keyword() {
        let tts = CartesiaTts::new(CartesiaConfig::new("key")).unwrap();
        let (_, request) = tts.build_request("hi", &TtsOptions::default());
        let json = serde_json::to_string(&request).unwrap();
        // The Rust field name must serialize as the reserved word.
        assert!(json.contains("\"continue\":false"));
    }

    #[tokio::test]
    async fn test_unreachable_server_yields_connection_error() {
        let mut config = CartesiaConfig::new("key");
        config.ws_url = "ws://127.0.0.1:1/tts/websocket".to_string();
        config.connect_timeout = Duration::from_millis(500);
        let tts = CartesiaTts::new(config).unwrap();

        let result = tts.synthesize("hello", &TtsOptions::default()).await;
        assert!(matches!(
            result,
            Err(TtsError::ConnectionFailed(_)) | Err(TtsError::Timeout(_))
        ));
    }
}
