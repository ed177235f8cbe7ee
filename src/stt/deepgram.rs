// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Deepgram streaming speech-to-text client.
//!
//! Connects to `wss://api.deepgram.com/v1/listen` and streams PCM16 audio
//! over the WebSocket. Transcription results arrive asynchronously on a
//! background reader task and are fanned out as
//! [`SttEvent::Transcription`] values; server errors become
//! [`SttEvent::Error`] without tearing the session down.
//!
//! Deepgram emits cumulative interim results, satisfying the
//! [`SttClient`](crate::stt::SttClient) partial-result contract directly.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::stt::{SttClient, SttError, SttEvent, TranscriptionEvent};
use crate::utils::Emitter;

// ---------------------------------------------------------------------------
// Deepgram WebSocket JSON response types
// ---------------------------------------------------------------------------

/// Lightweight envelope to extract just the message type without
/// allocating a full serde_json::Value tree.
#[derive(Deserialize)]
struct DgTypeOnly {
    #[serde(rename = "type")]
    msg_type: Option<String>,
}

/// One alternative transcription for a channel.
#[derive(Debug, Deserialize)]
struct DgAlternative {
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

/// A single channel's transcription results.
#[derive(Debug, Deserialize)]
struct DgChannel {
    alternatives: Vec<DgAlternative>,
}

/// Top-level transcription result message from Deepgram.
#[derive(Debug, Deserialize)]
struct DgResult {
    channel: Option<DgChannel>,
    is_final: Option<bool>,
}

/// Deepgram error response.
#[derive(Debug, Deserialize)]
struct DgError {
    description: Option<String>,
    message: Option<String>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Deepgram session configuration.
#[derive(Debug, Clone)]
pub struct DeepgramConfig {
    /// Deepgram API key.
    pub api_key: String,
    /// Model identifier (e.g. `"nova-2"`).
    pub model: String,
    /// Language code (e.g. `"en-US"`).
    pub language: String,
    /// Audio sample rate in Hz.
    pub sample_rate: u32,
    /// Number of audio channels.
    pub channels: u32,
    /// Whether to request interim (partial) results.
    pub interim_results: bool,
    /// Whether to enable smart formatting.
    pub smart_format: bool,
    /// Connection timeout. A timeout is surfaced as [`SttError::Timeout`]
    /// and treated as "server unavailable" by callers.
    pub connect_timeout: Duration,
    /// Custom API base URL (without path); defaults to
    /// `wss://api.deepgram.com`.
    pub base_url: Option<String>,
}

impl DeepgramConfig {
    /// Defaults matching the transform pipeline output: mono 16 kHz
    /// linear16, interim results on.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "nova-2".to_string(),
            language: "en-US".to_string(),
            sample_rate: 16_000,
            channels: 1,
            interim_results: true,
            smart_format: true,
            connect_timeout: Duration::from_secs(10),
            base_url: None,
        }
    }
}

// ---------------------------------------------------------------------------
// DeepgramStt
// ---------------------------------------------------------------------------

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Deepgram real-time speech-to-text session.
pub struct DeepgramStt {
    config: DeepgramConfig,
    events: Arc<Emitter<SttEvent>>,
    ws_sender: Option<Arc<Mutex<WsSink>>>,
    ws_reader_task: Option<JoinHandle<()>>,
}

impl DeepgramStt {
    /// Create a disconnected session with the given configuration.
    pub fn new(config: DeepgramConfig) -> Result<Self, SttError> {
        if config.api_key.is_empty() {
            return Err(SttError::MissingApiKey);
        }
        Ok(Self {
            config,
            events: Arc::new(Emitter::new()),
            ws_sender: None,
            ws_reader_task: None,
        })
    }

    fn is_connected(&self) -> bool {
        self.ws_sender.is_some()
    }

    /// Build the WebSocket URL with query parameters.
    fn build_ws_url(&self) -> String {
        let host = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("wss://api.deepgram.com");
        let host = host.trim_end_matches('/');

        let mut url = format!(
            "{}/v1/listen?model={}&encoding=linear16&sample_rate={}&channels={}&language={}",
            host, self.config.model, self.config.sample_rate, self.config.channels,
            self.config.language,
        );
        if self.config.interim_results {
            let _ = write!(url, "&interim_results=true");
        }
        if self.config.smart_format {
            let _ = write!(url, "&smart_format=true");
        }
        url
    }

    /// Background task reading Deepgram messages into [`SttEvent`]s.
    async fn ws_reader_loop(mut stream: WsStream, events: Arc<Emitter<SttEvent>>) {
        while let Some(msg_result) = stream.next().await {
            let msg = match msg_result {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!("DeepgramStt: WebSocket read error: {}", e);
                    events.emit(SttEvent::Error(format!("WebSocket read error: {}", e)));
                    break;
                }
            };

            match msg {
                Message::Text(text) => Self::handle_text_message(&text, &events),
                Message::Close(close_frame) => {
                    tracing::debug!("DeepgramStt: closed by server: {:?}", close_frame);
                    break;
                }
                // Pings are answered automatically by tungstenite.
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
                Message::Frame(_) => {}
            }
        }

        tracing::debug!("DeepgramStt: reader loop ended");
    }

    fn handle_text_message(text: &str, events: &Emitter<SttEvent>) {
        let envelope: DgTypeOnly = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("DeepgramStt: unparseable message: {}: {}", e, text);
                return;
            }
        };

        match envelope.msg_type.as_deref().unwrap_or("") {
            "Results" => match serde_json::from_str::<DgResult>(text) {
                Ok(result) => Self::handle_result(result, events),
                Err(e) => {
                    tracing::warn!("DeepgramStt: bad Results message: {}: {}", e, text);
                }
            },
            "Error" => {
                let description = serde_json::from_str::<DgError>(text)
                    .ok()
                    .and_then(|e| e.description.or(e.message))
                    .unwrap_or_else(|| "unknown Deepgram error".to_string());
                tracing::error!("DeepgramStt: server error: {}", description);
                events.emit(SttEvent::Error(description));
            }
            "Metadata" => {
                tracing::debug!("DeepgramStt: metadata message");
            }
            other => {
                tracing::trace!("DeepgramStt: unhandled message type: {}", other);
            }
        }
    }

    fn handle_result(result: DgResult, events: &Emitter<SttEvent>) {
        let Some(channel) = result.channel else {
            return;
        };
        let Some(alternative) = channel.alternatives.first() else {
            return;
        };
        if alternative.transcript.is_empty() {
            tracing::trace!("DeepgramStt: empty transcript, skipping");
            return;
        }

        let is_final = result.is_final.unwrap_or(false);
        if is_final {
            tracing::debug!(text = %alternative.transcript, "DeepgramStt: final transcription");
        } else {
            tracing::trace!(text = %alternative.transcript, "DeepgramStt: interim transcription");
        }

        events.emit(SttEvent::Transcription(TranscriptionEvent {
            text: alternative.transcript.clone(),
            is_final,
            confidence: alternative.confidence,
            speaker_id: None,
        }));
    }
}

#[async_trait]
impl SttClient for DeepgramStt {
    async fn start(&mut self) -> Result<(), SttError> {
        if self.is_connected() {
            return Ok(());
        }

        let url = self.build_ws_url();
        tracing::debug!("DeepgramStt: connecting to {}", url);

        let mut request = url
            .into_client_request()
            .map_err(|e| SttError::ConnectionFailed(format!("bad request: {}", e)))?;
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Token {}", self.config.api_key))
                .map_err(|e| SttError::ConnectionFailed(format!("bad API key header: {}", e)))?,
        );

        let connect = tokio::time::timeout(self.config.connect_timeout, connect_async(request));
        let (ws_stream, _response) = match connect.await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) => return Err(SttError::ConnectionFailed(e.to_string())),
            Err(_) => {
                return Err(SttError::Timeout(
                    self.config.connect_timeout.as_millis() as u64
                ))
            }
        };

        tracing::debug!("DeepgramStt: WebSocket connection established");

        let (sink, stream) = ws_stream.split();
        self.ws_sender = Some(Arc::new(Mutex::new(sink)));

        let events = self.events.clone();
        self.ws_reader_task = Some(tokio::spawn(Self::ws_reader_loop(stream, events)));

        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(sender) = self.ws_sender.take() {
            let mut sink = sender.lock().await;
            if let Err(e) = sink
                .send(Message::Text(r#"{"type": "CloseStream"}"#.to_string()))
                .await
            {
                tracing::debug!("DeepgramStt: error sending CloseStream: {}", e);
            }
            if let Err(e) = sink.close().await {
                tracing::debug!("DeepgramStt: error closing WebSocket sink: {}", e);
            }
        }

        if let Some(handle) = self.ws_reader_task.take() {
            let abort_handle = handle.abort_handle();
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {
                    tracing::debug!("DeepgramStt: reader task finished cleanly");
                }
                Ok(Err(e)) => {
                    tracing::warn!("DeepgramStt: reader task panicked: {}", e);
                }
                Err(_) => {
                    tracing::warn!("DeepgramStt: reader task timed out, aborting");
                    abort_handle.abort();
                }
            }
        }
    }

    async fn send_audio(&mut self, audio: &[u8]) {
        let Some(sender) = &self.ws_sender else {
            // Not connected: dropped silently.
            return;
        };

        let mut sink = sender.lock().await;
        if let Err(e) = sink.send(Message::Binary(audio.to_vec())).await {
            tracing::warn!("DeepgramStt: failed to send audio: {}", e);
        }
    }

    fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<SttEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for DeepgramStt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepgramStt")
            .field("model", &self.config.model)
            .field("sample_rate", &self.config.sample_rate)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_fails_fast() {
        let result = DeepgramStt::new(DeepgramConfig::new(""));
        assert!(matches!(result, Err(SttError::MissingApiKey)));
    }

    #[test]
    fn test_ws_url_includes_parameters() {
        let stt = DeepgramStt::new(DeepgramConfig::new("key")).unwrap();
        let url = stt.build_ws_url();
        assert!(url.starts_with("wss://api.deepgram.com/v1/listen?"));
        assert!(url.contains("model=nova-2"));
        assert!(url.contains("encoding=linear16"));
        assert!(url.contains("sample_rate=16000"));
        assert!(url.contains("channels=1"));
        assert!(url.contains("interim_results=true"));
        assert!(url.contains("smart_format=true"));
    }

    #[test]
    fn test_custom_base_url_trailing_slash_stripped() {
        let mut config = DeepgramConfig::new("key");
        config.base_url = Some("ws://localhost:9999/".to_string());
        let stt = DeepgramStt::new(config).unwrap();
        assert!(stt.build_ws_url().starts_with("ws://localhost:9999/v1/listen?"));
    }

    #[tokio::test]
    async fn test_interim_result_parsed_and_emitted() {
        let stt = DeepgramStt::new(DeepgramConfig::new("key")).unwrap();
        let mut events = stt.subscribe();

        let payload = r#"{
            "type": "Results",
            "is_final": false,
            "channel": {"alternatives": [{"transcript": "hello wor", "confidence": 0.91}]}
        }"#;
        DeepgramStt::handle_text_message(payload, &stt.events);

        match events.recv().await {
            Some(SttEvent::Transcription(event)) => {
                assert_eq!(event.text, "hello wor");
                assert!(!event.is_final);
                assert!((event.confidence - 0.91).abs() < 1e-9);
                assert!(event.speaker_id.is_none());
            }
            other => panic!("expected transcription, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_final_result_parsed() {
        let stt = DeepgramStt::new(DeepgramConfig::new("key")).unwrap();
        let mut events = stt.subscribe();

        let payload = r#"{
            "type": "Results",
            "is_final": true,
            "channel": {"alternatives": [{"transcript": "hello world", "confidence": 0.99}]}
        }"#;
        DeepgramStt::handle_text_message(payload, &stt.events);

        assert!(matches!(
            events.recv().await,
            Some(SttEvent::Transcription(event)) if event.is_final && event.text == "hello world"
        ));
    }

    #[tokio::test]
    async fn test_empty_transcript_skipped() {
        let stt = DeepgramStt::new(DeepgramConfig::new("key")).unwrap();
        let mut events = stt.subscribe();

        let payload = r#"{
            "type": "Results",
            "is_final": false,
            "channel": {"alternatives": [{"transcript": "", "confidence": 0.0}]}
        }"#;
        DeepgramStt::handle_text_message(payload, &stt.events);

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_error_becomes_error_event() {
        let stt = DeepgramStt::new(DeepgramConfig::new("key")).unwrap();
        let mut events = stt.subscribe();

        let payload = r#"{"type": "Error", "description": "quota exceeded"}"#;
        DeepgramStt::handle_text_message(payload, &stt.events);

        assert!(matches!(
            events.recv().await,
            Some(SttEvent::Error(message)) if message == "quota exceeded"
        ));
    }

    #[tokio::test]
    async fn test_send_audio_disconnected_is_silent() {
        let mut stt = DeepgramStt::new(DeepgramConfig::new("key")).unwrap();
        // No connection open: must not panic or error.
        stt.send_audio(&[0u8; 64]).await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_safe() {
        let mut stt = DeepgramStt::new(DeepgramConfig::new("key")).unwrap();
        stt.stop().await;
        stt.stop().await;
    }
}
