// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Transcript aggregation: merges streaming partials into utterances.
//!
//! Per-speaker buffering with replace-not-append semantics (the provider
//! emits cumulative partials), a flush timer that fires when a speaker
//! goes quiet without a final result, a size limit that forces an early
//! flush, and overlap detection whenever more than one speaker holds a
//! live buffer. Flushed utterances are appended to a bounded conversation
//! history.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::stt::TranscriptionEvent;
use crate::utils::{now_ms, Emitter};

/// Speaker identity used when an inbound event carries none. Nothing is
/// ever dropped for lack of attribution.
pub const UNKNOWN_SPEAKER: &str = "unknown";

/// Aggregator tuning.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    /// Quiet time after the last partial before a buffer is flushed.
    pub flush_timeout_ms: u64,
    /// Events below this confidence are dropped entirely.
    pub min_confidence: f64,
    /// Buffered text longer than this forces an immediate flush.
    pub max_buffer_size: usize,
    /// Maximum retained conversation turns; oldest are evicted first.
    pub max_history: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            flush_timeout_ms: 2000,
            min_confidence: 0.0,
            max_buffer_size: 500,
            max_history: 1000,
        }
    }
}

/// A completed, speaker-attributed utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedUtterance {
    /// Speaker the utterance belongs to.
    pub speaker_id: String,
    /// Full utterance text.
    pub text: String,
    /// Confidence of the last contributing event.
    pub confidence: f64,
    /// When the first partial of this utterance arrived (epoch ms).
    pub start_time_ms: u64,
    /// When the utterance was flushed (epoch ms).
    pub end_time_ms: u64,
    /// True when closed by a provider-final event rather than a timeout
    /// or size flush.
    pub is_final: bool,
}

/// One entry in the conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    /// Speaker (or the assistant) who produced the text.
    pub speaker_id: String,
    /// Turn text.
    pub text: String,
    /// Flush time of the underlying utterance (epoch ms).
    pub timestamp_ms: u64,
}

/// Events fanned out by the aggregator.
#[derive(Debug, Clone)]
pub enum AggregatorEvent {
    /// A buffer was flushed into a complete utterance.
    Utterance(AggregatedUtterance),
    /// A conversation turn was appended to the history.
    Turn(ConversationTurn),
    /// More than one speaker holds a live partial buffer. May fire
    /// repeatedly while the overlap persists.
    Overlap {
        /// All speakers with live buffers.
        speaker_ids: Vec<String>,
    },
}

/// Pending partial text for one speaker. `start_time_ms` tracks when the
/// *utterance* began, not the latest partial. `epoch` ties a flush timer
/// to the buffer generation it was armed for, so a superseded timer that
/// was already past its sleep cannot flush newer text.
struct UtteranceBuffer {
    text: String,
    confidence: f64,
    start_time_ms: u64,
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

struct AggShared {
    config: AggregatorConfig,
    state: Mutex<AggState>,
    events: Emitter<AggregatorEvent>,
    destroyed: AtomicBool,
    epoch_counter: std::sync::atomic::AtomicU64,
}

struct AggState {
    buffers: HashMap<String, UtteranceBuffer>,
    history: Vec<ConversationTurn>,
}

impl AggShared {
    /// Flush one speaker's buffer: remove it, emit an utterance and a
    /// turn. No-op when the speaker has no live buffer and no final
    /// event forces one.
    fn flush_speaker(
        &self,
        speaker_id: &str,
        is_final: bool,
        override_event: Option<&TranscriptionEvent>,
    ) -> Option<AggregatedUtterance> {
        let mut state = self.state.lock().expect("aggregator lock poisoned");

        let (text, confidence, start_time_ms) = match state.buffers.remove(speaker_id) {
            Some(buffer) => {
                if let Some(timer) = buffer.timer {
                    timer.abort();
                }
                match override_event {
                    // A final event supplies its own text/confidence.
                    Some(event) => (event.text.clone(), event.confidence, buffer.start_time_ms),
                    None => (buffer.text, buffer.confidence, buffer.start_time_ms),
                }
            }
            None => match override_event {
                // Final with no prior partials: the utterance is the
                // final event itself.
                Some(event) => (event.text.clone(), event.confidence, now_ms()),
                None => return None,
            },
        };

        let end_time_ms = now_ms();
        let utterance = AggregatedUtterance {
            speaker_id: speaker_id.to_string(),
            text,
            confidence,
            start_time_ms,
            end_time_ms,
            is_final,
        };
        let turn = ConversationTurn {
            speaker_id: speaker_id.to_string(),
            text: utterance.text.clone(),
            timestamp_ms: end_time_ms,
        };

        state.history.push(turn.clone());
        let max_history = self.config.max_history;
        if state.history.len() > max_history {
            let excess = state.history.len() - max_history;
            state.history.drain(..excess);
        }
        drop(state);

        self.events.emit(AggregatorEvent::Utterance(utterance.clone()));
        self.events.emit(AggregatorEvent::Turn(turn));
        Some(utterance)
    }

    /// Timer-driven flush: only fires when the buffer is still the
    /// generation the timer was armed for.
    fn flush_if_epoch(&self, speaker_id: &str, epoch: u64) {
        {
            let state = self.state.lock().expect("aggregator lock poisoned");
            match state.buffers.get(speaker_id) {
                Some(buffer) if buffer.epoch == epoch => {}
                _ => return,
            }
        }
        self.flush_speaker(speaker_id, false, None);
    }
}

/// Merges per-speaker streaming transcription events into utterances.
pub struct TranscriptAggregator {
    shared: Arc<AggShared>,
}

impl TranscriptAggregator {
    /// Create an aggregator with the given tuning.
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            shared: Arc::new(AggShared {
                config,
                state: Mutex::new(AggState {
                    buffers: HashMap::new(),
                    history: Vec::new(),
                }),
                events: Emitter::new(),
                destroyed: AtomicBool::new(false),
                epoch_counter: std::sync::atomic::AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to utterance/turn/overlap events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<AggregatorEvent> {
        self.shared.events.subscribe()
    }

    /// Process one attributed transcription event.
    pub fn process(&self, event: &TranscriptionEvent) {
        if self.shared.destroyed.load(Ordering::SeqCst) {
            return;
        }

        if event.confidence < self.shared.config.min_confidence {
            return;
        }

        let speaker_id = event
            .speaker_id
            .clone()
            .unwrap_or_else(|| UNKNOWN_SPEAKER.to_string());

        if event.is_final {
            self.shared.flush_speaker(&speaker_id, true, Some(event));
        } else {
            self.process_partial(&speaker_id, event);
        }
    }

    fn process_partial(&self, speaker_id: &str, event: &TranscriptionEvent) {
        let shared = &self.shared;
        let mut state = shared.state.lock().expect("aggregator lock poisoned");

        // The utterance start survives across partial replacements.
        let start_time_ms = match state.buffers.get_mut(speaker_id) {
            Some(existing) => {
                if let Some(timer) = existing.timer.take() {
                    timer.abort();
                }
                existing.start_time_ms
            }
            None => now_ms(),
        };

        let epoch = shared
            .epoch_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        state.buffers.insert(
            speaker_id.to_string(),
            UtteranceBuffer {
                text: event.text.clone(),
                confidence: event.confidence,
                start_time_ms,
                epoch,
                timer: None,
            },
        );

        if event.text.len() > shared.config.max_buffer_size {
            drop(state);
            shared.flush_speaker(speaker_id, false, None);
            return;
        }

        // Arm the quiet-period flush timer.
        let timer_shared = shared.clone();
        let timer_speaker = speaker_id.to_string();
        let timeout = Duration::from_millis(shared.config.flush_timeout_ms);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !timer_shared.destroyed.load(Ordering::SeqCst) {
                timer_shared.flush_if_epoch(&timer_speaker, epoch);
            }
        });
        if let Some(buffer) = state.buffers.get_mut(speaker_id) {
            buffer.timer = Some(timer);
        }

        let overlapping: Vec<String> = if state.buffers.len() > 1 {
            state.buffers.keys().cloned().collect()
        } else {
            Vec::new()
        };
        drop(state);

        if !overlapping.is_empty() {
            shared.events.emit(AggregatorEvent::Overlap {
                speaker_ids: overlapping,
            });
        }
    }

    /// Pending (unflushed) text for a speaker, empty when none.
    pub fn pending_text(&self, speaker_id: &str) -> String {
        self.shared
            .state
            .lock()
            .expect("aggregator lock poisoned")
            .buffers
            .get(speaker_id)
            .map(|b| b.text.clone())
            .unwrap_or_default()
    }

    /// Force-flush every pending buffer as a non-final utterance (e.g. on
    /// shutdown). Returns the flushed utterances in flush order.
    pub fn flush(&self) -> Vec<AggregatedUtterance> {
        let speakers: Vec<String> = {
            let state = self.shared.state.lock().expect("aggregator lock poisoned");
            state.buffers.keys().cloned().collect()
        };

        let mut flushed = Vec::with_capacity(speakers.len());
        for speaker_id in speakers {
            if let Some(utterance) = self.shared.flush_speaker(&speaker_id, false, None) {
                flushed.push(utterance);
            }
        }
        flushed
    }

    /// The most recent `limit` turns (all when `None`), oldest first.
    pub fn conversation_history(&self, limit: Option<usize>) -> Vec<ConversationTurn> {
        let state = self.shared.state.lock().expect("aggregator lock poisoned");
        match limit {
            Some(limit) => {
                let skip = state.history.len().saturating_sub(limit);
                state.history[skip..].to_vec()
            }
            None => state.history.clone(),
        }
    }

    /// Cancel all timers and drop buffers plus history.
    pub fn clear(&self) {
        let mut state = self.shared.state.lock().expect("aggregator lock poisoned");
        for (_, buffer) in state.buffers.drain() {
            if let Some(timer) = buffer.timer {
                timer.abort();
            }
        }
        state.history.clear();
    }

    /// Tear down: clear state and close the event stream. Idempotent; no
    /// timer fires after this returns.
    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.clear();
        self.shared.events.close();
    }
}

impl Default for TranscriptAggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

impl Drop for TranscriptAggregator {
    fn drop(&mut self) {
        self.destroy();
    }
}
