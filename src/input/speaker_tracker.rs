// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Speaker state tracking and ssrc-to-speaker mapping.
//!
//! Tracks who is currently speaking and for how long, and maintains the
//! many-to-one mapping from transport stream identifiers ([`Ssrc`]) to
//! stable speaker identities. Mapping updates and speaking-start events
//! may arrive in either order; both are tolerated.
//!
//! The floor-open predicate here is tracker-local (no active human
//! speakers); whether the *agent* is speaking is composed on top by the
//! turn manager.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::transport::Ssrc;
use crate::utils::Emitter;

/// Speaking notifications emitted by the tracker.
#[derive(Debug, Clone)]
pub enum SpeakerEvent {
    /// A speaker transitioned from silent to speaking.
    SpeakingStart {
        /// Stable speaker identity.
        speaker_id: String,
    },
    /// A speaker transitioned from speaking to silent.
    SpeakingStop {
        /// Stable speaker identity.
        speaker_id: String,
        /// Length of the just-finished speaking session in milliseconds.
        duration_ms: u64,
    },
}

/// State for one actively-speaking speaker. Ephemeral: exists only while
/// the speaker is in the active set.
#[derive(Debug, Clone)]
struct SpeakerState {
    #[allow(dead_code)]
    ssrc: Option<Ssrc>,
    started_at: Instant,
}

/// Tracks active speakers, cumulative speaking durations and ssrc
/// mappings.
pub struct SpeakerTracker {
    ssrc_to_speaker: HashMap<Ssrc, String>,
    active: HashMap<String, SpeakerState>,
    total_durations_ms: HashMap<String, u64>,
    events: Emitter<SpeakerEvent>,
}

impl SpeakerTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            ssrc_to_speaker: HashMap::new(),
            active: HashMap::new(),
            total_durations_ms: HashMap::new(),
            events: Emitter::new(),
        }
    }

    /// Subscribe to speaking start/stop events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<SpeakerEvent> {
        self.events.subscribe()
    }

    /// Mark a speaker as speaking. Re-entrant while already active: the
    /// session is not reset and no event is re-emitted, but the ssrc
    /// mapping is still refreshed.
    pub fn start_speaking(&mut self, speaker_id: &str, ssrc: Option<Ssrc>) {
        if let Some(ssrc) = ssrc {
            self.ssrc_to_speaker.insert(ssrc, speaker_id.to_string());
        }

        if self.active.contains_key(speaker_id) {
            return;
        }

        self.active.insert(
            speaker_id.to_string(),
            SpeakerState {
                ssrc,
                started_at: Instant::now(),
            },
        );
        self.events.emit(SpeakerEvent::SpeakingStart {
            speaker_id: speaker_id.to_string(),
        });
    }

    /// Mark a speaker as silent. No-op (no event) when the speaker is not
    /// in the active set; otherwise the session duration is folded into
    /// the cumulative total and a stop event is emitted.
    pub fn stop_speaking(&mut self, speaker_id: &str) {
        let Some(state) = self.active.remove(speaker_id) else {
            return;
        };

        let duration_ms = state.started_at.elapsed().as_millis() as u64;
        *self
            .total_durations_ms
            .entry(speaker_id.to_string())
            .or_insert(0) += duration_ms;

        self.events.emit(SpeakerEvent::SpeakingStop {
            speaker_id: speaker_id.to_string(),
            duration_ms,
        });
    }

    /// Record (or refresh) an ssrc -> speaker mapping.
    pub fn set_speaker_for_ssrc(&mut self, ssrc: Ssrc, speaker_id: &str) {
        self.ssrc_to_speaker.insert(ssrc, speaker_id.to_string());
    }

    /// Speaker identity for an ssrc, if known.
    pub fn speaker_for_ssrc(&self, ssrc: Ssrc) -> Option<&str> {
        self.ssrc_to_speaker.get(&ssrc).map(String::as_str)
    }

    /// Forget one ssrc mapping.
    pub fn clear_ssrc(&mut self, ssrc: Ssrc) {
        self.ssrc_to_speaker.remove(&ssrc);
    }

    /// Remove all state for a speaker: stops any active session, drops
    /// every ssrc mapping pointing at them and clears the cumulative
    /// duration.
    pub fn clear_speaker(&mut self, speaker_id: &str) {
        if self.active.contains_key(speaker_id) {
            self.stop_speaking(speaker_id);
        }

        self.ssrc_to_speaker.retain(|_, mapped| mapped != speaker_id);
        self.total_durations_ms.remove(speaker_id);
    }

    /// True when no human speaker is active. Agent speaking state is
    /// composed separately by the turn manager.
    pub fn is_floor_open(&self) -> bool {
        self.active.is_empty()
    }

    /// Identities of all currently-speaking speakers.
    pub fn current_speakers(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    /// True when the speaker is in the active set.
    pub fn is_speaking(&self, speaker_id: &str) -> bool {
        self.active.contains_key(speaker_id)
    }

    /// Cumulative speaking duration in milliseconds, including the
    /// in-progress session when the speaker is currently active.
    pub fn speaking_duration_ms(&self, speaker_id: &str) -> u64 {
        let total = self
            .total_durations_ms
            .get(speaker_id)
            .copied()
            .unwrap_or(0);

        match self.active.get(speaker_id) {
            Some(state) => total + state.started_at.elapsed().as_millis() as u64,
            None => total,
        }
    }

    /// Reset everything: mappings, active set, cumulative durations.
    pub fn clear(&mut self) {
        self.ssrc_to_speaker.clear();
        self.active.clear();
        self.total_durations_ms.clear();
    }

    /// Drop all subscribers so no further events are delivered.
    pub fn close_events(&self) {
        self.events.close();
    }
}

impl Default for SpeakerTracker {
    fn default() -> Self {
        Self::new()
    }
}
