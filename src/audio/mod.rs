// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Audio processing subsystem: per-speaker ring buffering and the PCM16
//! transform pipeline (channel mixing + resampling).

pub mod mixer;
pub mod resampler;
pub mod ring_buffer;
pub mod transform;

pub use mixer::ChannelMixer;
pub use resampler::LinearResampler;
pub use ring_buffer::{AudioPacket, RingBuffer, RingBufferConfig, WindowOptions};
pub use transform::{TransformConfig, TransformPipeline, TransformStats};
