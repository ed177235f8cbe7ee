// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Conversation orchestration: turn-taking state and the top-level
//! voice conversation loop.

pub mod orchestrator;
pub mod turn_manager;

pub use orchestrator::{
    OrchestratorConfig, OrchestratorEvent, OrchestratorState, VoiceOrchestrator,
};
pub use turn_manager::{TurnManager, TurnManagerConfig};
