// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Bridge from audio input to streaming transcription.
//!
//! Routes each active speaker's raw frames through the
//! [`TransformPipeline`] (stereo 48 kHz -> mono 16 kHz) into that
//! speaker's transcription session, feeds attributed transcript events
//! into the [`TranscriptAggregator`] and re-exports transcript, utterance,
//! turn, overlap and error events to its own subscribers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::audio::{TransformConfig, TransformPipeline};
use crate::input::manager::{AudioInputManager, InputEvent};
use crate::stt::aggregator::{AggregatedUtterance, AggregatorEvent, ConversationTurn};
use crate::stt::manager::{TranscriptEvent, TranscriptionManager};
use crate::stt::{SttError, TranscriptionEvent};
use crate::stt::TranscriptAggregator;
use crate::utils::Emitter;

/// Events re-exported by the [`SttInputBridge`].
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// An attributed transcript (partial or final).
    Transcript(TranscriptionEvent),
    /// A completed utterance from the aggregator.
    Utterance(AggregatedUtterance),
    /// A conversation turn appended to the history.
    Turn(ConversationTurn),
    /// Overlapping speech across the listed speakers.
    Overlap {
        /// Speakers with live partial buffers.
        speaker_ids: Vec<String>,
    },
    /// A transcription error for one speaker.
    Error {
        /// Affected speaker, when attributable.
        speaker_id: Option<String>,
        /// Failure description.
        message: String,
    },
}

/// Wires audio input, transform, transcription and aggregation together
/// for a set of active speakers.
pub struct SttInputBridge {
    input: Arc<AudioInputManager>,
    transcription: Arc<TranscriptionManager>,
    aggregator: Arc<TranscriptAggregator>,
    active: Arc<Mutex<HashSet<String>>>,
    events: Arc<Emitter<BridgeEvent>>,
    tasks: Vec<JoinHandle<()>>,
    destroyed: AtomicBool,
}

impl SttInputBridge {
    /// Create a bridge over the given managers. `transform_config`
    /// describes the transport-to-STT audio conversion.
    pub fn new(
        input: Arc<AudioInputManager>,
        transcription: Arc<TranscriptionManager>,
        aggregator: Arc<TranscriptAggregator>,
        transform_config: TransformConfig,
    ) -> Self {
        let active: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let events: Arc<Emitter<BridgeEvent>> = Arc::new(Emitter::new());
        let mut tasks = Vec::new();

        // Audio routing: transform frames for active speakers and forward
        // them into that speaker's transcription session.
        {
            let mut input_events = input.subscribe_events();
            let transcription = transcription.clone();
            let active = active.clone();
            let mut pipeline = TransformPipeline::new(transform_config);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = input_events.recv().await {
                    if let InputEvent::Audio {
                        speaker_id,
                        payload,
                        ..
                    } = event
                    {
                        let is_active = active
                            .lock()
                            .expect("active set lock poisoned")
                            .contains(&speaker_id);
                        if !is_active {
                            continue;
                        }
                        let transformed = pipeline.transform(&payload);
                        transcription.send_audio(&speaker_id, &transformed).await;
                    }
                }
            }));
        }

        // Transcript forwarding: re-emit and aggregate.
        {
            let mut transcript_events = transcription.subscribe();
            let aggregator = aggregator.clone();
            let events = events.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = transcript_events.recv().await {
                    match event {
                        TranscriptEvent::Transcript(transcript) => {
                            events.emit(BridgeEvent::Transcript(transcript.clone()));
                            aggregator.process(&transcript);
                        }
                        TranscriptEvent::Error {
                            speaker_id,
                            message,
                        } => {
                            events.emit(BridgeEvent::Error {
                                speaker_id: Some(speaker_id),
                                message,
                            });
                        }
                        // Finals already arrive via `Transcript`;
                        // connect/disconnect notifications are internal.
                        TranscriptEvent::FinalTranscript(_)
                        | TranscriptEvent::SpeakerConnected(_)
                        | TranscriptEvent::SpeakerDisconnected(_) => {}
                    }
                }
            }));
        }

        // Aggregator event forwarding.
        {
            let mut aggregator_events = aggregator.subscribe();
            let events = events.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = aggregator_events.recv().await {
                    let forwarded = match event {
                        AggregatorEvent::Utterance(utterance) => {
                            BridgeEvent::Utterance(utterance)
                        }
                        AggregatorEvent::Turn(turn) => BridgeEvent::Turn(turn),
                        AggregatorEvent::Overlap { speaker_ids } => {
                            BridgeEvent::Overlap { speaker_ids }
                        }
                    };
                    events.emit(forwarded);
                }
            }));
        }

        Self {
            input,
            transcription,
            aggregator,
            active,
            events,
            tasks,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Subscribe to bridge events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<BridgeEvent> {
        self.events.subscribe()
    }

    /// Start routing one speaker's audio into transcription. Idempotent.
    pub async fn start_speaker(&self, speaker_id: &str) -> Result<(), SttError> {
        if self
            .active
            .lock()
            .expect("active set lock poisoned")
            .contains(speaker_id)
        {
            return Ok(());
        }

        self.transcription.start_speaker(speaker_id).await?;
        self.active
            .lock()
            .expect("active set lock poisoned")
            .insert(speaker_id.to_string());
        Ok(())
    }

    /// Stop routing one speaker. Safe when not started.
    pub async fn stop_speaker(&self, speaker_id: &str) {
        let was_active = self
            .active
            .lock()
            .expect("active set lock poisoned")
            .remove(speaker_id);
        if !was_active {
            return;
        }
        self.transcription.stop_speaker(speaker_id).await;
    }

    /// Start every currently-speaking speaker.
    pub async fn start_all(&self) -> Result<(), SttError> {
        for speaker_id in self.input.current_speakers() {
            self.start_speaker(&speaker_id).await?;
        }
        Ok(())
    }

    /// Stop every active speaker.
    pub async fn stop_all(&self) {
        let speakers: Vec<String> = self
            .active
            .lock()
            .expect("active set lock poisoned")
            .iter()
            .cloned()
            .collect();
        for speaker_id in speakers {
            self.stop_speaker(&speaker_id).await;
        }
    }

    /// Speakers currently routed into transcription.
    pub fn active_speakers(&self) -> Vec<String> {
        self.active
            .lock()
            .expect("active set lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Conversation history passthrough from the aggregator.
    pub fn conversation_history(&self, limit: Option<usize>) -> Vec<ConversationTurn> {
        self.aggregator.conversation_history(limit)
    }

    /// Tear down: stop all speakers, destroy the transcription manager
    /// and aggregator, abort forwarding tasks. Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop_all().await;
        self.transcription.destroy().await;
        self.aggregator.destroy();
        for task in &self.tasks {
            task.abort();
        }
        self.events.close();
    }
}
