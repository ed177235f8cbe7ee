// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Audio input subsystem: transport subscriptions, speaker tracking and
//! the bridge into streaming transcription.

pub mod manager;
pub mod speaker_tracker;
pub mod stt_bridge;

pub use manager::{AudioInputManager, InputEvent};
pub use speaker_tracker::{SpeakerEvent, SpeakerTracker};
pub use stt_bridge::{BridgeEvent, SttInputBridge};
