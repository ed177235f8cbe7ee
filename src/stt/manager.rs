// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Per-speaker transcription session fan-out.
//!
//! The [`TranscriptionManager`] opens one streaming STT session per
//! speaker through an injected [`SttClientFactory`], stamps raw provider
//! events with the owning speaker identity, re-emits them (finals twice:
//! once as `Transcript`, once as `FinalTranscript`) and tracks a rolling
//! provider-latency average measured from the last audio send to the
//! next transcript callback for that speaker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::stt::{SttClient, SttClientFactory, SttError, SttEvent, TranscriptionEvent};
use crate::utils::Emitter;

/// Events fanned out by the [`TranscriptionManager`].
#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    /// Any attributed transcription result, partial or final.
    Transcript(TranscriptionEvent),
    /// An attributed final result. Also delivered as `Transcript`.
    FinalTranscript(TranscriptionEvent),
    /// A session error for one speaker. Other sessions are unaffected.
    Error {
        /// Affected speaker.
        speaker_id: String,
        /// Provider failure description.
        message: String,
    },
    /// A speaker's session was opened.
    SpeakerConnected(String),
    /// A speaker's session was closed.
    SpeakerDisconnected(String),
}

/// Transcription metrics snapshot.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct SttMetrics {
    /// Total transcription callbacks received.
    pub transcript_count: u64,
    /// Rolling average provider latency in milliseconds.
    pub average_latency_ms: f64,
    /// Number of speakers with open sessions.
    pub active_speakers: usize,
}

struct SpeakerSession {
    client: Box<dyn SttClient>,
    forward_task: JoinHandle<()>,
    last_audio_at: Arc<StdMutex<Option<Instant>>>,
}

/// Fan-out of per-speaker streaming transcription sessions.
pub struct TranscriptionManager {
    factory: SttClientFactory,
    sessions: Mutex<HashMap<String, SpeakerSession>>,
    events: Arc<Emitter<TranscriptEvent>>,
    transcript_count: Arc<AtomicU64>,
    active_count: Arc<AtomicUsize>,
    latencies: Arc<StdMutex<LatencyWindow>>,
}

#[derive(Default)]
struct LatencyWindow {
    sum_ms: f64,
    count: u64,
}

impl TranscriptionManager {
    /// Create a manager that builds sessions through `factory`.
    pub fn new(factory: SttClientFactory) -> Self {
        Self {
            factory,
            sessions: Mutex::new(HashMap::new()),
            events: Arc::new(Emitter::new()),
            transcript_count: Arc::new(AtomicU64::new(0)),
            active_count: Arc::new(AtomicUsize::new(0)),
            latencies: Arc::new(StdMutex::new(LatencyWindow::default())),
        }
    }

    /// Subscribe to attributed transcript events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<TranscriptEvent> {
        self.events.subscribe()
    }

    /// Open a streaming session for one speaker. Idempotent: a second
    /// call for an already-started speaker is a no-op.
    pub async fn start_speaker(&self, speaker_id: &str) -> Result<(), SttError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(speaker_id) {
            return Ok(());
        }

        let mut client = (self.factory)();
        let client_events = client.subscribe();
        client.start().await?;

        let last_audio_at: Arc<StdMutex<Option<Instant>>> = Arc::new(StdMutex::new(None));
        let forward_task = tokio::spawn(Self::forward_loop(
            speaker_id.to_string(),
            client_events,
            self.events.clone(),
            self.transcript_count.clone(),
            self.latencies.clone(),
            last_audio_at.clone(),
        ));

        sessions.insert(
            speaker_id.to_string(),
            SpeakerSession {
                client,
                forward_task,
                last_audio_at,
            },
        );
        self.active_count.fetch_add(1, Ordering::SeqCst);
        drop(sessions);

        self.events
            .emit(TranscriptEvent::SpeakerConnected(speaker_id.to_string()));
        Ok(())
    }

    async fn forward_loop(
        speaker_id: String,
        mut client_events: tokio::sync::mpsc::UnboundedReceiver<SttEvent>,
        events: Arc<Emitter<TranscriptEvent>>,
        transcript_count: Arc<AtomicU64>,
        latencies: Arc<StdMutex<LatencyWindow>>,
        last_audio_at: Arc<StdMutex<Option<Instant>>>,
    ) {
        while let Some(event) = client_events.recv().await {
            match event {
                SttEvent::Transcription(raw) => {
                    // Latency: last audio send -> this callback.
                    let sent_at = last_audio_at
                        .lock()
                        .expect("latency lock poisoned")
                        .take();
                    if let Some(sent_at) = sent_at {
                        let latency_ms = sent_at.elapsed().as_secs_f64() * 1000.0;
                        let mut window = latencies.lock().expect("latency lock poisoned");
                        window.sum_ms += latency_ms;
                        window.count += 1;
                    }

                    transcript_count.fetch_add(1, Ordering::SeqCst);

                    let attributed = TranscriptionEvent {
                        speaker_id: Some(speaker_id.clone()),
                        ..raw
                    };
                    events.emit(TranscriptEvent::Transcript(attributed.clone()));
                    if attributed.is_final {
                        events.emit(TranscriptEvent::FinalTranscript(attributed));
                    }
                }
                SttEvent::Error(message) => {
                    events.emit(TranscriptEvent::Error {
                        speaker_id: speaker_id.clone(),
                        message,
                    });
                }
            }
        }
    }

    /// Close one speaker's session. Safe when no session is open.
    pub async fn stop_speaker(&self, speaker_id: &str) {
        let session = self.sessions.lock().await.remove(speaker_id);
        let Some(mut session) = session else {
            return;
        };

        session.client.stop().await;
        session.forward_task.abort();
        self.active_count.fetch_sub(1, Ordering::SeqCst);

        self.events
            .emit(TranscriptEvent::SpeakerDisconnected(speaker_id.to_string()));
    }

    /// Forward transformed audio to one speaker's session. Silently
    /// dropped when no session is open for that speaker.
    pub async fn send_audio(&self, speaker_id: &str, audio: &[u8]) {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(speaker_id) else {
            return;
        };

        *session
            .last_audio_at
            .lock()
            .expect("latency lock poisoned") = Some(Instant::now());
        session.client.send_audio(audio).await;
    }

    /// Speakers with open sessions.
    pub async fn active_speakers(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Metrics snapshot.
    pub fn metrics(&self) -> SttMetrics {
        let window = self.latencies.lock().expect("latency lock poisoned");
        let average_latency_ms = if window.count > 0 {
            window.sum_ms / window.count as f64
        } else {
            0.0
        };

        SttMetrics {
            transcript_count: self.transcript_count.load(Ordering::SeqCst),
            average_latency_ms,
            active_speakers: self.active_count.load(Ordering::SeqCst),
        }
    }

    /// Close every session and the event stream. Idempotent.
    pub async fn destroy(&self) {
        let speakers: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        for speaker_id in speakers {
            self.stop_speaker(&speaker_id).await;
        }
        self.events.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// STT client double driven by an external event sender.
    struct FakeSttClient {
        events: Arc<Emitter<SttEvent>>,
        started: Arc<StdMutex<bool>>,
        sent: Arc<StdMutex<Vec<Vec<u8>>>>,
        fail_start: bool,
    }

    #[async_trait]
    impl SttClient for FakeSttClient {
        async fn start(&mut self) -> Result<(), SttError> {
            if self.fail_start {
                return Err(SttError::ConnectionFailed("refused".to_string()));
            }
            *self.started.lock().unwrap() = true;
            Ok(())
        }

        async fn stop(&mut self) {
            *self.started.lock().unwrap() = false;
        }

        async fn send_audio(&mut self, audio: &[u8]) {
            if *self.started.lock().unwrap() {
                self.sent.lock().unwrap().push(audio.to_vec());
            }
        }

        fn subscribe(&self) -> mpsc::UnboundedReceiver<SttEvent> {
            self.events.subscribe()
        }
    }

    struct Harness {
        emitters: Arc<StdMutex<Vec<Arc<Emitter<SttEvent>>>>>,
        sent: Arc<StdMutex<Vec<Vec<u8>>>>,
        created: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(fail_start: bool) -> (Self, SttClientFactory) {
            let emitters: Arc<StdMutex<Vec<Arc<Emitter<SttEvent>>>>> =
                Arc::new(StdMutex::new(Vec::new()));
            let sent: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
            let created = Arc::new(AtomicUsize::new(0));

            let factory_emitters = emitters.clone();
            let factory_sent = sent.clone();
            let factory_created = created.clone();
            let factory: SttClientFactory = Arc::new(move || {
                factory_created.fetch_add(1, Ordering::SeqCst);
                let emitter = Arc::new(Emitter::new());
                factory_emitters.lock().unwrap().push(emitter.clone());
                Box::new(FakeSttClient {
                    events: emitter,
                    started: Arc::new(StdMutex::new(false)),
                    sent: factory_sent.clone(),
                    fail_start,
                }) as Box<dyn SttClient>
            });

            (
                Self {
                    emitters,
                    sent,
                    created,
                },
                factory,
            )
        }

        fn emit(&self, index: usize, event: SttEvent) {
            self.emitters.lock().unwrap()[index].emit(event);
        }
    }

    fn raw(text: &str, is_final: bool) -> SttEvent {
        SttEvent::Transcription(TranscriptionEvent {
            text: text.to_string(),
            is_final,
            confidence: 0.8,
            speaker_id: None,
        })
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (harness, factory) = Harness::new(false);
        let manager = TranscriptionManager::new(factory);

        manager.start_speaker("alice").await.unwrap();
        manager.start_speaker("alice").await.unwrap();

        assert_eq!(harness.created.load(Ordering::SeqCst), 1);
        assert_eq!(manager.metrics().active_speakers, 1);
    }

    #[tokio::test]
    async fn test_events_are_attributed_and_finals_doubled() {
        let (harness, factory) = Harness::new(false);
        let manager = TranscriptionManager::new(factory);
        let mut events = manager.subscribe();

        manager.start_speaker("alice").await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(TranscriptEvent::SpeakerConnected(id)) if id == "alice"
        ));

        harness.emit(0, raw("hello", false));
        match events.recv().await {
            Some(TranscriptEvent::Transcript(event)) => {
                assert_eq!(event.speaker_id.as_deref(), Some("alice"));
                assert!(!event.is_final);
            }
            other => panic!("expected transcript, got {:?}", other),
        }

        harness.emit(0, raw("hello world", true));
        assert!(matches!(
            events.recv().await,
            Some(TranscriptEvent::Transcript(event)) if event.is_final
        ));
        assert!(matches!(
            events.recv().await,
            Some(TranscriptEvent::FinalTranscript(event))
                if event.speaker_id.as_deref() == Some("alice")
        ));
    }

    #[tokio::test]
    async fn test_send_audio_without_session_is_dropped() {
        let (harness, factory) = Harness::new(false);
        let manager = TranscriptionManager::new(factory);

        manager.send_audio("nobody", &[1, 2, 3]).await;

        assert!(harness.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_audio_reaches_open_session() {
        let (harness, factory) = Harness::new(false);
        let manager = TranscriptionManager::new(factory);

        manager.start_speaker("alice").await.unwrap();
        manager.send_audio("alice", &[4, 5]).await;

        assert_eq!(harness.sent.lock().unwrap().as_slice(), &[vec![4, 5]]);
    }

    #[tokio::test]
    async fn test_start_failure_propagates() {
        let (_harness, factory) = Harness::new(true);
        let manager = TranscriptionManager::new(factory);

        let result = manager.start_speaker("alice").await;
        assert!(matches!(result, Err(SttError::ConnectionFailed(_))));
        assert_eq!(manager.metrics().active_speakers, 0);
    }

    #[tokio::test]
    async fn test_provider_error_is_per_speaker() {
        let (harness, factory) = Harness::new(false);
        let manager = TranscriptionManager::new(factory);
        let mut events = manager.subscribe();

        manager.start_speaker("alice").await.unwrap();
        manager.start_speaker("bob").await.unwrap();
        events.recv().await; // alice connected
        events.recv().await; // bob connected

        harness.emit(0, SttEvent::Error("socket reset".to_string()));

        match events.recv().await {
            Some(TranscriptEvent::Error { speaker_id, .. }) => {
                assert_eq!(speaker_id, "alice");
            }
            other => panic!("expected error event, got {:?}", other),
        }
        // Bob's session is still open.
        assert_eq!(manager.metrics().active_speakers, 2);
    }

    #[tokio::test]
    async fn test_latency_metric_tracks_send_to_callback() {
        let (harness, factory) = Harness::new(false);
        let manager = TranscriptionManager::new(factory);
        let mut events = manager.subscribe();

        manager.start_speaker("alice").await.unwrap();
        events.recv().await;

        manager.send_audio("alice", &[0u8; 32]).await;
        harness.emit(0, raw("hi", false));
        events.recv().await;

        let metrics = manager.metrics();
        assert_eq!(metrics.transcript_count, 1);
        assert!(metrics.average_latency_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_stop_speaker_and_destroy() {
        let (_harness, factory) = Harness::new(false);
        let manager = TranscriptionManager::new(factory);

        manager.start_speaker("alice").await.unwrap();
        manager.stop_speaker("alice").await;
        assert_eq!(manager.metrics().active_speakers, 0);

        // Safe when no session exists.
        manager.stop_speaker("alice").await;

        manager.start_speaker("bob").await.unwrap();
        manager.destroy().await;
        assert!(manager.active_speakers().await.is_empty());
    }
}
