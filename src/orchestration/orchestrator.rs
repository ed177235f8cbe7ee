// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Top-level voice conversation coordinator.
//!
//! The [`VoiceOrchestrator`] listens for finalized transcripts, gates
//! them through direct-address and rate-limit checks, calls the
//! conversational agent, synthesizes the reply and plays it back,
//! reacting to barge-in and playback-finished signals:
//!
//! ```text
//! idle -> processing -> speaking -> idle      (happy path)
//! processing -> idle                          (agent error / empty reply)
//! speaking -> idle                            (playback finished, barge-in,
//!                                              synthesis failure)
//! any -> stopped                              (explicit stop)
//! ```
//!
//! Conversational failures leave the agent silent; they surface as error
//! events and logs, never as audio in the channel.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentMessage, ConversationalAgent, MessageRole};
use crate::memory::MemoryManager;
use crate::orchestration::turn_manager::{TurnManager, TurnManagerConfig};
use crate::output::manager::{AudioOutputManager, OutputEvent};
use crate::stt::manager::{TranscriptEvent, TranscriptionManager};
use crate::stt::TranscriptionEvent;
use crate::tts::manager::TtsManager;
use crate::tts::TtsOptions;
use crate::utils::{now_ms, Emitter};

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Waiting for an addressed transcript.
    Idle,
    /// Agent call in flight.
    Processing,
    /// Reply synthesized and playing.
    Speaking,
    /// Explicitly stopped; no transcripts are handled.
    Stopped,
}

/// Events fanned out by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// The state machine moved.
    StateChange(OrchestratorState),
    /// The agent produced a reply for a speaker.
    ResponseGenerated {
        /// Speaker whose utterance triggered the reply.
        speaker_id: String,
        /// Reply text.
        text: String,
    },
    /// Playback was cut short by a barge-in.
    Interrupted {
        /// The interrupting speaker.
        speaker_id: String,
    },
    /// A turn-level failure (agent call, synthesis, playback).
    Error {
        /// Failure description.
        message: String,
    },
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Channel this orchestrator speaks on; events for other channels are
    /// ignored.
    pub channel_id: String,
    /// The agent's name; transcripts must mention it (case-insensitive,
    /// optionally as `@name`) to trigger a response.
    pub agent_name: String,
    /// Post-speech cooldown for the embedded turn manager.
    pub cooldown_ms: u64,
    /// Sliding-window response rate limit (per 60 s). `None` = unlimited.
    pub max_responses_per_minute: Option<u32>,
}

impl OrchestratorConfig {
    /// Sensible defaults for one channel and agent name.
    pub fn new(channel_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            agent_name: agent_name.into(),
            cooldown_ms: 1000,
            max_responses_per_minute: None,
        }
    }
}

/// One orchestrator-level conversation entry (bookkeeping only; never
/// sent anywhere by this component).
#[derive(Debug, Clone)]
struct HistoryEntry {
    #[allow(dead_code)]
    role: MessageRole,
    #[allow(dead_code)]
    content: String,
    #[allow(dead_code)]
    timestamp_ms: u64,
}

struct OrchInner {
    config: OrchestratorConfig,
    agent: Arc<dyn ConversationalAgent>,
    tts: Arc<TtsManager>,
    output: Arc<AudioOutputManager>,
    memory: Option<Arc<MemoryManager>>,
    turn_manager: Mutex<TurnManager>,
    state: Mutex<OrchestratorState>,
    history: Mutex<Vec<HistoryEntry>>,
    response_times: Mutex<Vec<Instant>>,
    events: Emitter<OrchestratorEvent>,
}

impl OrchInner {
    fn set_state(&self, new_state: OrchestratorState) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if *state != new_state {
            *state = new_state;
            drop(state);
            self.events.emit(OrchestratorEvent::StateChange(new_state));
        }
    }

    fn state(&self) -> OrchestratorState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn should_respond(&self, text: &str) -> bool {
        let name = self.config.agent_name.to_lowercase();
        if name.is_empty() {
            return false;
        }
        let text = text.to_lowercase();
        text.contains(&name) || text.contains(&format!("@{}", name))
    }

    fn is_rate_limited(&self) -> bool {
        let Some(max) = self.config.max_responses_per_minute else {
            return false;
        };

        let mut times = self.response_times.lock().expect("rate lock poisoned");
        if let Some(cutoff) = Instant::now().checked_sub(Duration::from_secs(60)) {
            times.retain(|t| *t > cutoff);
        }
        times.len() >= max as usize
    }

    fn record_response(&self) {
        self.response_times
            .lock()
            .expect("rate lock poisoned")
            .push(Instant::now());
    }

    async fn handle_final_transcript(&self, transcript: TranscriptionEvent) {
        if self.state() != OrchestratorState::Idle {
            return;
        }
        if !self.should_respond(&transcript.text) {
            return;
        }
        if self.is_rate_limited() {
            tracing::debug!("VoiceOrchestrator: rate limited, ignoring transcript");
            return;
        }

        self.process_and_respond(transcript).await;
    }

    async fn process_and_respond(&self, transcript: TranscriptionEvent) {
        self.set_state(OrchestratorState::Processing);

        let speaker_id = transcript
            .speaker_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let cleaned = strip_agent_name(&transcript.text, &self.config.agent_name);

        self.history.lock().expect("history lock poisoned").push(HistoryEntry {
            role: MessageRole::User,
            content: cleaned.clone(),
            timestamp_ms: now_ms(),
        });

        // Memory is best-effort: failures degrade to "no memory attached".
        let attached_blocks = match &self.memory {
            Some(memory) => memory.attach_user_blocks(&speaker_id).await,
            None => Vec::new(),
        };

        let reply = self
            .agent
            .generate(&[AgentMessage::user(cleaned)])
            .await;

        match reply {
            Err(e) => {
                tracing::error!(error = %e, "VoiceOrchestrator: agent call failed");
                self.events.emit(OrchestratorEvent::Error {
                    message: e.to_string(),
                });
                self.set_state(OrchestratorState::Idle);
            }
            Ok(None) => {
                tracing::debug!("VoiceOrchestrator: agent returned no usable reply");
                self.set_state(OrchestratorState::Idle);
            }
            Ok(Some(response)) => {
                self.record_response();
                self.history
                    .lock()
                    .expect("history lock poisoned")
                    .push(HistoryEntry {
                        role: MessageRole::Assistant,
                        content: response.clone(),
                        timestamp_ms: now_ms(),
                    });
                self.events.emit(OrchestratorEvent::ResponseGenerated {
                    speaker_id,
                    text: response.clone(),
                });
                self.speak_response(&response).await;
            }
        }

        if let (Some(memory), false) = (&self.memory, attached_blocks.is_empty()) {
            memory.detach_user_blocks(&attached_blocks).await;
        }
    }

    async fn speak_response(&self, text: &str) {
        self.set_state(OrchestratorState::Speaking);
        self.turn_manager
            .lock()
            .expect("turn manager lock poisoned")
            .agent_started_speaking();

        let result = async {
            let segment = self.tts.synthesize(text, &TtsOptions::default()).await?;
            self.output
                .play(&self.config.channel_id, segment)
                .await
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?;
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "VoiceOrchestrator: failed to speak response");
            self.turn_manager
                .lock()
                .expect("turn manager lock poisoned")
                .agent_stopped_speaking();
            self.events.emit(OrchestratorEvent::Error {
                message: e.to_string(),
            });
            self.set_state(OrchestratorState::Idle);
        }
    }

    fn handle_playback_finished(&self, channel_id: &str) {
        if channel_id != self.config.channel_id {
            return;
        }
        if self.state() != OrchestratorState::Speaking {
            return;
        }

        self.turn_manager
            .lock()
            .expect("turn manager lock poisoned")
            .agent_stopped_speaking();
        self.set_state(OrchestratorState::Idle);
    }

    async fn handle_barge_in(&self, channel_id: &str, speaker_id: &str) {
        if channel_id != self.config.channel_id {
            return;
        }
        if self.state() != OrchestratorState::Speaking {
            return;
        }

        self.output.stop(&self.config.channel_id).await;
        self.turn_manager
            .lock()
            .expect("turn manager lock poisoned")
            .agent_stopped_speaking();
        self.set_state(OrchestratorState::Idle);
        self.events.emit(OrchestratorEvent::Interrupted {
            speaker_id: speaker_id.to_string(),
        });
    }
}

/// Strip the agent's name (with optional `@` prefix and trailing `,`/`:`
/// plus whitespace) from a transcript before sending it to the agent.
fn strip_agent_name(text: &str, name: &str) -> String {
    if name.is_empty() {
        return text.trim().to_string();
    }

    let lower_text = text.to_lowercase();
    let lower_name = name.to_lowercase();
    // Lowercasing can change byte lengths for some scripts; bail out to
    // the untouched text rather than slicing at misaligned offsets.
    if lower_text.len() != text.len() {
        return text.trim().to_string();
    }

    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while let Some(pos) = lower_text[i..].find(&lower_name) {
        let start = i + pos;
        let mut copy_end = start;
        if start > 0 && bytes[start - 1] == b'@' {
            copy_end = start - 1;
        }
        out.push_str(&text[i..copy_end]);

        let mut end = start + lower_name.len();
        if end < bytes.len() && (bytes[end] == b',' || bytes[end] == b':') {
            end += 1;
        }
        while end < bytes.len() && bytes[end].is_ascii_whitespace() {
            end += 1;
        }
        i = end;
    }
    out.push_str(&text[i..]);
    out.trim().to_string()
}

/// Coordinates transcripts, the agent call, synthesis and playback for
/// one channel.
pub struct VoiceOrchestrator {
    inner: Arc<OrchInner>,
    transcription: Arc<TranscriptionManager>,
    loop_task: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
}

impl VoiceOrchestrator {
    /// Create an orchestrator. Capability clients are injected; nothing
    /// is global.
    pub fn new(
        config: OrchestratorConfig,
        agent: Arc<dyn ConversationalAgent>,
        tts: Arc<TtsManager>,
        output: Arc<AudioOutputManager>,
        transcription: Arc<TranscriptionManager>,
        memory: Option<Arc<MemoryManager>>,
    ) -> Self {
        let turn_manager = TurnManager::new(TurnManagerConfig {
            cooldown_ms: config.cooldown_ms,
        });

        Self {
            inner: Arc::new(OrchInner {
                config,
                agent,
                tts,
                output,
                memory,
                turn_manager: Mutex::new(turn_manager),
                state: Mutex::new(OrchestratorState::Idle),
                history: Mutex::new(Vec::new()),
                response_times: Mutex::new(Vec::new()),
                events: Emitter::new(),
            }),
            transcription,
            loop_task: Mutex::new(None),
        }
    }

    /// Subscribe to orchestrator events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    /// Begin handling transcripts and playback events. Restarts a
    /// stopped orchestrator; calling while running is a no-op.
    pub fn start(&self) {
        let mut guard = self.loop_task.lock().expect("loop task lock poisoned");
        if let Some((task, _)) = guard.as_ref() {
            if !task.is_finished() {
                return;
            }
        }

        if self.inner.state() == OrchestratorState::Stopped {
            self.inner.set_state(OrchestratorState::Idle);
        }

        let inner = self.inner.clone();
        let mut transcripts = self.transcription.subscribe();
        let mut output_events = self.inner.output.subscribe();
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    transcript = transcripts.recv() => {
                        match transcript {
                            Some(TranscriptEvent::FinalTranscript(event)) => {
                                inner.handle_final_transcript(event).await;
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                    output_event = output_events.recv() => {
                        match output_event {
                            Some(OutputEvent::PlaybackFinished { channel_id }) => {
                                inner.handle_playback_finished(&channel_id);
                            }
                            Some(OutputEvent::BargeIn { channel_id, speaker_id }) => {
                                inner.handle_barge_in(&channel_id, &speaker_id).await;
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
            }
        });

        *guard = Some((task, cancel));
    }

    /// Stop handling events and move to `Stopped`. Idempotent; the loop
    /// is torn down synchronously so no handler fires afterwards.
    pub fn stop(&self) {
        self.inner.set_state(OrchestratorState::Stopped);
        if let Some((task, cancel)) = self
            .loop_task
            .lock()
            .expect("loop task lock poisoned")
            .take()
        {
            cancel.cancel();
            task.abort();
        }
    }

    /// Stop and drop all subscribers.
    pub fn destroy(&self) {
        self.stop();
        self.inner.events.close();
    }

    /// Current state.
    pub fn state(&self) -> OrchestratorState {
        self.inner.state()
    }

    /// True while a turn is in flight (processing or speaking).
    pub fn is_processing(&self) -> bool {
        matches!(
            self.state(),
            OrchestratorState::Processing | OrchestratorState::Speaking
        )
    }

    /// Number of entries in the conversation bookkeeping history.
    pub fn conversation_len(&self) -> usize {
        self.inner.history.lock().expect("history lock poisoned").len()
    }

    /// Clear the conversation bookkeeping history.
    pub fn reset_conversation(&self) {
        self.inner
            .history
            .lock()
            .expect("history lock poisoned")
            .clear();
    }

    /// Notify the embedded turn manager that a speaker started.
    pub fn speaker_started(&self, speaker_id: &str) {
        self.inner
            .turn_manager
            .lock()
            .expect("turn manager lock poisoned")
            .speaker_started(speaker_id);
    }

    /// Notify the embedded turn manager that a speaker stopped.
    pub fn speaker_stopped(&self, speaker_id: &str) {
        self.inner
            .turn_manager
            .lock()
            .expect("turn manager lock poisoned")
            .speaker_stopped(speaker_id);
    }

    /// Whether the turn manager would allow the agent to speak now.
    pub fn can_agent_speak(&self) -> bool {
        self.inner
            .turn_manager
            .lock()
            .expect("turn manager lock poisoned")
            .can_agent_speak()
    }
}

impl Drop for VoiceOrchestrator {
    fn drop(&mut self) {
        self.destroy();
    }
}
