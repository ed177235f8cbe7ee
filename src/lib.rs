// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Crosstalk - Real-time multi-speaker voice conversation agent.
//!
//! Crosstalk joins a live audio channel, listens to several simultaneous
//! speakers, transcribes their speech, decides when the agent may take the
//! floor, generates a reply through an external conversational agent,
//! synthesizes speech and plays it back - handling barge-in interruption,
//! turn-taking and provider failures along the way.
//!
//! # Architecture
//!
//! Transport audio frames flow into the [`input::AudioInputManager`], which
//! feeds per-speaker ring buffers and the speaker state tracker. The
//! [`input::SttInputBridge`] routes incoming audio through the
//! [`audio::TransformPipeline`] (stereo 48 kHz -> mono 16 kHz) into the
//! [`stt::TranscriptionManager`], whose attributed transcript events are
//! merged into utterances by the [`stt::TranscriptAggregator`]. The
//! [`orchestration::VoiceOrchestrator`] listens for finalized utterances,
//! gates them through direct-address and rate-limit checks plus the
//! [`orchestration::TurnManager`], calls the conversational agent,
//! synthesizes a reply via the [`tts::TtsManager`] (with provider
//! fallback) and plays it through the [`output::AudioOutputManager`],
//! which feeds barge-in and playback-finished signals back into the
//! orchestrator.

pub mod agent;
pub mod audio;
pub mod config;
pub mod input;
pub mod memory;
pub mod orchestration;
pub mod output;
pub mod stt;
pub mod transport;
pub mod tts;
pub mod utils;
