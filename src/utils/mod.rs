// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Shared utilities: typed event fan-out and time helpers.

pub mod emitter;
pub mod helpers;

pub use emitter::Emitter;
pub use helpers::{generate_unique_id, now_ms};
