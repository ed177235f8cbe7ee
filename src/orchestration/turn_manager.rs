// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Turn-taking state machine.
//!
//! Pure in-memory state, no I/O: tracks the set of active human
//! speakers, whether the agent is speaking, who spoke last and a
//! post-speech cooldown window. Answers the one question the
//! orchestrator needs: may the agent speak now? There is no terminal
//! state; the machine is reset only by process restart.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

/// Turn manager tuning.
#[derive(Debug, Clone, Copy)]
pub struct TurnManagerConfig {
    /// Cooldown after the agent stops speaking, in milliseconds. Zero
    /// means no effective restriction.
    pub cooldown_ms: u64,
}

impl Default for TurnManagerConfig {
    fn default() -> Self {
        Self { cooldown_ms: 1000 }
    }
}

/// Tracks active speakers, agent-speaking state and the cooldown window.
#[derive(Debug)]
pub struct TurnManager {
    active_speakers: HashSet<String>,
    agent_speaking: bool,
    last_speaker: Option<String>,
    cooldown_end: Option<Instant>,
    cooldown_ms: u64,
}

impl TurnManager {
    /// Create a turn manager with the given configuration.
    pub fn new(config: TurnManagerConfig) -> Self {
        Self {
            active_speakers: HashSet::new(),
            agent_speaking: false,
            last_speaker: None,
            cooldown_end: None,
            cooldown_ms: config.cooldown_ms,
        }
    }

    /// A speaker started speaking. Idempotent.
    pub fn speaker_started(&mut self, speaker_id: &str) {
        self.active_speakers.insert(speaker_id.to_string());
    }

    /// A speaker stopped speaking. Records them as the last speaker; a
    /// no-op for speakers not in the active set (does not overwrite
    /// `last_speaker`).
    pub fn speaker_stopped(&mut self, speaker_id: &str) {
        if self.active_speakers.remove(speaker_id) {
            self.last_speaker = Some(speaker_id.to_string());
        }
    }

    /// The agent began speaking.
    pub fn agent_started_speaking(&mut self) {
        self.agent_speaking = true;
    }

    /// The agent finished speaking; arms the cooldown window.
    pub fn agent_stopped_speaking(&mut self) {
        self.agent_speaking = false;
        self.cooldown_end = Some(Instant::now() + Duration::from_millis(self.cooldown_ms));
    }

    /// Identities of the active speakers.
    pub fn active_speakers(&self) -> Vec<String> {
        self.active_speakers.iter().cloned().collect()
    }

    /// True when the speaker is in the active set.
    pub fn is_speaking(&self, speaker_id: &str) -> bool {
        self.active_speakers.contains(speaker_id)
    }

    /// True while the agent is speaking.
    pub fn is_agent_speaking(&self) -> bool {
        self.agent_speaking
    }

    /// True iff no human speaker is active and the agent is silent.
    pub fn is_floor_open(&self) -> bool {
        self.active_speakers.is_empty() && !self.agent_speaking
    }

    /// True while the post-speech cooldown window is running.
    pub fn in_cooldown(&self) -> bool {
        match self.cooldown_end {
            Some(end) => Instant::now() < end,
            None => false,
        }
    }

    /// True iff the floor is open and the cooldown has elapsed.
    pub fn can_agent_speak(&self) -> bool {
        self.is_floor_open() && !self.in_cooldown()
    }

    /// The most recent speaker to stop, if any.
    pub fn last_speaker(&self) -> Option<&str> {
        self.last_speaker.as_deref()
    }
}

impl Default for TurnManager {
    fn default() -> Self {
        Self::new(TurnManagerConfig::default())
    }
}
