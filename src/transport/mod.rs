// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Real-time media transport capability boundary.
//!
//! The core never talks to a concrete voice backend directly; it consumes
//! the narrow contracts defined here. A transport provides:
//!
//! - per-speaker inbound audio subscriptions ([`MediaTransport::subscribe_speaker`]),
//!   each a stream of [`StreamEvent`]s ending with `End` or `Error`;
//! - speaking-start/speaking-end notifications keyed by a transport-level
//!   stream identifier ([`Ssrc`]) that the input layer maps to a stable
//!   speaker identity;
//! - an outbound playback device ([`Player`]) accepting synthesized
//!   [`AudioSegment`]s and reporting lifecycle [`PlayerEvent`]s.
//!
//! Channel join/leave and reconnection live outside the core, in whatever
//! wraps the concrete transport.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::output::AudioSegment;

/// Transport-level numeric stream identifier. Distinct from and mapped to
/// a stable speaker identity; a speaker may use several over a session.
pub type Ssrc = u32;

/// Errors surfaced by a media transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The transport cannot provide a subscription for this speaker.
    #[error("subscription failed for speaker {speaker_id}: {reason}")]
    SubscriptionFailed {
        /// Speaker whose subscription failed.
        speaker_id: String,
        /// Transport-specific failure description.
        reason: String,
    },
    /// An established stream failed mid-flight.
    #[error("stream error: {0}")]
    Stream(String),
    /// The playback device rejected a segment.
    #[error("playback error: {0}")]
    Playback(String),
}

/// One item on a per-speaker inbound audio stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A raw audio frame (transport-native format, typically stereo 48 kHz
    /// PCM16).
    Audio(Vec<u8>),
    /// The stream ended naturally (silence threshold reached or the
    /// speaker left).
    End,
    /// The stream failed. Terminal for this stream only; other speakers'
    /// subscriptions are unaffected.
    Error(String),
}

/// Speaking notifications from the transport.
#[derive(Debug, Clone)]
pub enum SpeakingEvent {
    /// A speaker's voice activity began.
    Started {
        /// Stable speaker identity.
        speaker_id: String,
        /// Stream identifier carrying this speaker's audio, when known.
        ssrc: Option<Ssrc>,
    },
    /// A speaker's voice activity ended.
    Stopped {
        /// Stable speaker identity.
        speaker_id: String,
    },
    /// The transport learned (or changed) an ssrc -> speaker mapping.
    /// May arrive before or after the corresponding `Started`.
    SsrcMapped {
        /// Stream identifier.
        ssrc: Ssrc,
        /// Stable speaker identity.
        speaker_id: String,
    },
}

/// An inbound per-speaker audio subscription.
#[derive(Debug)]
pub struct InboundStream {
    /// Ordered stream of audio frames terminated by `End`/`Error`.
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
}

/// Media transport capability consumed by the input layer.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Open an inbound audio subscription for one speaker.
    async fn subscribe_speaker(&self, speaker_id: &str)
        -> Result<InboundStream, TransportError>;

    /// Subscribe to speaking-start/stop and ssrc-mapping notifications.
    fn speaking_events(&self) -> mpsc::UnboundedReceiver<SpeakingEvent>;

    /// Current ssrc for a speaker, when the transport knows one.
    fn ssrc_for_speaker(&self, speaker_id: &str) -> Option<Ssrc>;
}

/// Playback lifecycle notifications from a [`Player`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// A segment started playing.
    Started,
    /// The current segment finished naturally.
    Finished,
    /// Playback was halted by [`Player::stop`].
    Stopped,
}

/// Outbound playback device capability, one per channel.
#[async_trait]
pub trait Player: Send + Sync {
    /// Begin playing a segment. The player reports completion through its
    /// event stream rather than by blocking.
    async fn play(&mut self, segment: AudioSegment) -> Result<(), TransportError>;

    /// Halt playback of the current segment, if any.
    fn stop(&mut self);

    /// Pause the current segment. Optional; default is a no-op.
    fn pause(&mut self) {}

    /// Resume a paused segment. Optional; default is a no-op.
    fn resume(&mut self) {}

    /// Subscribe to playback lifecycle events.
    fn events(&mut self) -> mpsc::UnboundedReceiver<PlayerEvent>;
}
