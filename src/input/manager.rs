// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Audio input management: per-speaker transport subscriptions, ring
//! buffering and speaker state.
//!
//! The [`AudioInputManager`] owns one transport subscription plus one
//! [`RingBuffer`] per speaker, feeds arriving frames into the buffer,
//! drives the [`SpeakerTracker`] and fans out audio/speaking/error events.
//! A stream-level failure for one speaker is surfaced as an error event
//! and never affects other speakers' subscriptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::audio::{AudioPacket, RingBuffer, RingBufferConfig, WindowOptions};
use crate::input::speaker_tracker::{SpeakerEvent, SpeakerTracker};
use crate::transport::{MediaTransport, SpeakingEvent, Ssrc, StreamEvent};
use crate::utils::{now_ms, Emitter};

/// Events fanned out by the [`AudioInputManager`].
#[derive(Debug, Clone)]
pub enum InputEvent {
    /// A raw audio frame arrived for a subscribed speaker.
    Audio {
        /// Speaker the frame belongs to.
        speaker_id: String,
        /// Raw transport-format audio bytes.
        payload: Vec<u8>,
        /// Arrival time in milliseconds since the Unix epoch.
        timestamp_ms: u64,
    },
    /// A speaker started speaking.
    SpeakingStart {
        /// Speaker identity.
        speaker_id: String,
    },
    /// A speaker stopped speaking.
    SpeakingStop {
        /// Speaker identity.
        speaker_id: String,
        /// Session length in milliseconds.
        duration_ms: u64,
    },
    /// A per-speaker stream error. Isolated to that speaker.
    Error {
        /// Affected speaker, when attributable.
        speaker_id: Option<String>,
        /// Failure description.
        message: String,
    },
    /// The manager has been torn down.
    Destroyed,
}

struct Subscription {
    buffer: Arc<Mutex<RingBuffer>>,
    task: JoinHandle<()>,
}

struct InputShared {
    transport: Arc<dyn MediaTransport>,
    buffer_config: RingBufferConfig,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    tracker: Mutex<SpeakerTracker>,
    auto_subscribe: AtomicBool,
    destroyed: AtomicBool,
    events: Emitter<InputEvent>,
}

impl InputShared {
    async fn subscribe(shared: &Arc<Self>, speaker_id: &str) {
        if shared.destroyed.load(Ordering::SeqCst) {
            return;
        }
        if shared
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .contains_key(speaker_id)
        {
            return;
        }

        let stream = match shared.transport.subscribe_speaker(speaker_id).await {
            Ok(stream) => stream,
            Err(e) => {
                // Surfaced as an event, never thrown; other speakers are
                // unaffected.
                shared.events.emit(InputEvent::Error {
                    speaker_id: Some(speaker_id.to_string()),
                    message: e.to_string(),
                });
                return;
            }
        };

        let mut subscriptions = shared
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned");
        // A concurrent subscribe may have won while we awaited the
        // transport; keep the existing subscription.
        if subscriptions.contains_key(speaker_id) {
            return;
        }

        let buffer = Arc::new(Mutex::new(RingBuffer::new(shared.buffer_config)));
        let task = tokio::spawn(Self::stream_loop(
            shared.clone(),
            speaker_id.to_string(),
            stream.events,
            buffer.clone(),
        ));
        subscriptions.insert(speaker_id.to_string(), Subscription { buffer, task });
    }

    async fn stream_loop(
        shared: Arc<InputShared>,
        speaker_id: String,
        mut events: tokio::sync::mpsc::UnboundedReceiver<StreamEvent>,
        buffer: Arc<Mutex<RingBuffer>>,
    ) {
        while let Some(event) = events.recv().await {
            if shared.destroyed.load(Ordering::SeqCst) {
                return;
            }

            match event {
                StreamEvent::Audio(payload) => {
                    let timestamp_ms = now_ms();
                    buffer
                        .lock()
                        .expect("buffer lock poisoned")
                        .push(payload.clone(), Some(timestamp_ms));
                    shared.events.emit(InputEvent::Audio {
                        speaker_id: speaker_id.clone(),
                        payload,
                        timestamp_ms,
                    });
                }
                StreamEvent::End => {
                    shared
                        .tracker
                        .lock()
                        .expect("tracker lock poisoned")
                        .stop_speaking(&speaker_id);

                    // In auto-subscribe mode the speaker is re-subscribed
                    // on their next speaking start; otherwise tear down.
                    if !shared.auto_subscribe.load(Ordering::SeqCst) {
                        shared.unsubscribe(&speaker_id);
                    }
                    return;
                }
                StreamEvent::Error(message) => {
                    shared.events.emit(InputEvent::Error {
                        speaker_id: Some(speaker_id.clone()),
                        message,
                    });
                }
            }
        }
    }

    fn unsubscribe(&self, speaker_id: &str) {
        let subscription = self
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .remove(speaker_id);

        let Some(subscription) = subscription else {
            return;
        };

        subscription
            .buffer
            .lock()
            .expect("buffer lock poisoned")
            .clear();
        subscription.task.abort();

        self.tracker
            .lock()
            .expect("tracker lock poisoned")
            .clear_speaker(speaker_id);
    }
}

/// Owns per-speaker audio subscriptions, ring buffers and the speaker
/// tracker for one channel.
pub struct AudioInputManager {
    shared: Arc<InputShared>,
    speaking_task: Mutex<Option<JoinHandle<()>>>,
    tracker_forward_task: JoinHandle<()>,
}

impl AudioInputManager {
    /// Create a manager over `transport` with the given per-speaker
    /// buffer configuration.
    pub fn new(transport: Arc<dyn MediaTransport>, buffer_config: RingBufferConfig) -> Self {
        let tracker = SpeakerTracker::new();
        let mut tracker_events = tracker.subscribe();

        let shared = Arc::new(InputShared {
            transport,
            buffer_config,
            subscriptions: Mutex::new(HashMap::new()),
            tracker: Mutex::new(tracker),
            auto_subscribe: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            events: Emitter::new(),
        });

        // Forward tracker speaking events to this manager's subscribers.
        let forward_shared = shared.clone();
        let tracker_forward_task = tokio::spawn(async move {
            while let Some(event) = tracker_events.recv().await {
                let forwarded = match event {
                    SpeakerEvent::SpeakingStart { speaker_id } => {
                        InputEvent::SpeakingStart { speaker_id }
                    }
                    SpeakerEvent::SpeakingStop {
                        speaker_id,
                        duration_ms,
                    } => InputEvent::SpeakingStop {
                        speaker_id,
                        duration_ms,
                    },
                };
                forward_shared.events.emit(forwarded);
            }
        });

        Self {
            shared,
            speaking_task: Mutex::new(None),
            tracker_forward_task,
        }
    }

    /// Subscribe to input events.
    pub fn subscribe_events(&self) -> tokio::sync::mpsc::UnboundedReceiver<InputEvent> {
        self.shared.events.subscribe()
    }

    /// Open an audio subscription for one speaker. Idempotent; a
    /// transport failure is emitted as an error event, not returned.
    pub async fn subscribe(&self, speaker_id: &str) {
        InputShared::subscribe(&self.shared, speaker_id).await;
    }

    /// Tear down one speaker's subscription: stream task, buffer and
    /// tracker state. Safe to call when not subscribed.
    pub fn unsubscribe(&self, speaker_id: &str) {
        self.shared.unsubscribe(speaker_id);
    }

    /// True when an audio subscription exists for the speaker.
    pub fn is_subscribed(&self, speaker_id: &str) -> bool {
        self.shared
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .contains_key(speaker_id)
    }

    /// Enter auto-subscribe mode: every speaking start triggers a
    /// subscription for that speaker, and ssrc mapping updates flow into
    /// the tracker continuously.
    pub fn subscribe_all(&self) {
        if self.shared.destroyed.load(Ordering::SeqCst) {
            return;
        }

        self.shared.auto_subscribe.store(true, Ordering::SeqCst);

        let mut guard = self
            .speaking_task
            .lock()
            .expect("speaking task lock poisoned");
        if guard.is_some() {
            return;
        }

        let shared = self.shared.clone();
        let mut speaking_events = shared.transport.speaking_events();
        *guard = Some(tokio::spawn(async move {
            while let Some(event) = speaking_events.recv().await {
                if shared.destroyed.load(Ordering::SeqCst) {
                    return;
                }

                match event {
                    SpeakingEvent::Started { speaker_id, ssrc } => {
                        if !shared.auto_subscribe.load(Ordering::SeqCst) {
                            continue;
                        }
                        let ssrc =
                            ssrc.or_else(|| shared.transport.ssrc_for_speaker(&speaker_id));
                        shared
                            .tracker
                            .lock()
                            .expect("tracker lock poisoned")
                            .start_speaking(&speaker_id, ssrc);
                        InputShared::subscribe(&shared, &speaker_id).await;
                    }
                    SpeakingEvent::Stopped { speaker_id } => {
                        if !shared.auto_subscribe.load(Ordering::SeqCst) {
                            continue;
                        }
                        shared
                            .tracker
                            .lock()
                            .expect("tracker lock poisoned")
                            .stop_speaking(&speaker_id);
                    }
                    SpeakingEvent::SsrcMapped { ssrc, speaker_id } => {
                        // Mapping updates apply regardless of the
                        // auto-subscribe flag.
                        shared
                            .tracker
                            .lock()
                            .expect("tracker lock poisoned")
                            .set_speaker_for_ssrc(ssrc, &speaker_id);
                    }
                }
            }
        }));
    }

    /// Stop accepting new automatic subscriptions. Existing
    /// auto-subscribed speakers stay active until their streams end.
    pub fn stop_subscribe_all(&self) {
        self.shared.auto_subscribe.store(false, Ordering::SeqCst);
    }

    /// Buffered audio for a speaker, optionally restricted to a sliding
    /// window. Empty when not subscribed.
    pub fn buffered_audio(
        &self,
        speaker_id: &str,
        window: Option<WindowOptions>,
    ) -> Vec<AudioPacket> {
        let subscriptions = self
            .shared
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned");
        let Some(subscription) = subscriptions.get(speaker_id) else {
            return Vec::new();
        };

        let buffer = subscription.buffer.lock().expect("buffer lock poisoned");
        match window {
            Some(options) => buffer.get_window(options),
            None => buffer.get_all(),
        }
    }

    /// Clear one speaker's ring buffer.
    pub fn clear_buffer(&self, speaker_id: &str) {
        let subscriptions = self
            .shared
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned");
        if let Some(subscription) = subscriptions.get(speaker_id) {
            subscription
                .buffer
                .lock()
                .expect("buffer lock poisoned")
                .clear();
        }
    }

    /// True when no human speaker is currently active.
    pub fn is_floor_open(&self) -> bool {
        self.shared
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .is_floor_open()
    }

    /// Identities of the currently-speaking speakers.
    pub fn current_speakers(&self) -> Vec<String> {
        self.shared
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .current_speakers()
    }

    /// Speaker identity for an ssrc, if the tracker knows one.
    pub fn speaker_for_ssrc(&self, ssrc: Ssrc) -> Option<String> {
        self.shared
            .tracker
            .lock()
            .expect("tracker lock poisoned")
            .speaker_for_ssrc(ssrc)
            .map(str::to_string)
    }

    /// Tear everything down: speaking-event loop, stream tasks, buffers,
    /// tracker state. Idempotent; later calls no-op.
    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop_subscribe_all();
        if let Some(task) = self
            .speaking_task
            .lock()
            .expect("speaking task lock poisoned")
            .take()
        {
            task.abort();
        }

        let speakers: Vec<String> = self
            .shared
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .keys()
            .cloned()
            .collect();
        for speaker_id in speakers {
            self.shared.unsubscribe(&speaker_id);
        }

        {
            let mut tracker = self.shared.tracker.lock().expect("tracker lock poisoned");
            tracker.clear();
            tracker.close_events();
        }
        self.tracker_forward_task.abort();

        self.shared.events.emit(InputEvent::Destroyed);
        self.shared.events.close();
    }
}

impl Drop for AudioInputManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{InboundStream, TransportError};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    /// Transport double: hands out channel-backed streams and records
    /// subscription attempts.
    struct FakeTransport {
        streams: StdMutex<HashMap<String, mpsc::UnboundedReceiver<StreamEvent>>>,
        speaking_tx: StdMutex<Vec<mpsc::UnboundedSender<SpeakingEvent>>>,
        subscribed: StdMutex<Vec<String>>,
        fail_for: Option<String>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                streams: StdMutex::new(HashMap::new()),
                speaking_tx: StdMutex::new(Vec::new()),
                subscribed: StdMutex::new(Vec::new()),
                fail_for: None,
            }
        }

        fn with_stream(self, speaker_id: &str) -> (Self, mpsc::UnboundedSender<StreamEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            self.streams
                .lock()
                .unwrap()
                .insert(speaker_id.to_string(), rx);
            (self, tx)
        }

        fn emit_speaking(&self, event: SpeakingEvent) {
            for tx in self.speaking_tx.lock().unwrap().iter() {
                let _ = tx.send(event.clone());
            }
        }
    }

    #[async_trait]
    impl MediaTransport for FakeTransport {
        async fn subscribe_speaker(
            &self,
            speaker_id: &str,
        ) -> Result<InboundStream, TransportError> {
            if self.fail_for.as_deref() == Some(speaker_id) {
                return Err(TransportError::SubscriptionFailed {
                    speaker_id: speaker_id.to_string(),
                    reason: "boom".to_string(),
                });
            }
            self.subscribed.lock().unwrap().push(speaker_id.to_string());
            let rx = self
                .streams
                .lock()
                .unwrap()
                .remove(speaker_id)
                .unwrap_or_else(|| mpsc::unbounded_channel().1);
            Ok(InboundStream { events: rx })
        }

        fn speaking_events(&self) -> mpsc::UnboundedReceiver<SpeakingEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.speaking_tx.lock().unwrap().push(tx);
            rx
        }

        fn ssrc_for_speaker(&self, _speaker_id: &str) -> Option<Ssrc> {
            None
        }
    }

    fn buffer_config() -> RingBufferConfig {
        RingBufferConfig {
            capacity: Some(8),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_subscribe_buffers_audio_and_emits_events() {
        let (transport, audio_tx) = FakeTransport::new().with_stream("alice");
        let manager = AudioInputManager::new(Arc::new(transport), buffer_config());
        let mut events = manager.subscribe_events();

        manager.subscribe("alice").await;
        assert!(manager.is_subscribed("alice"));

        audio_tx.send(StreamEvent::Audio(vec![1, 2, 3])).unwrap();

        match events.recv().await {
            Some(InputEvent::Audio {
                speaker_id,
                payload,
                ..
            }) => {
                assert_eq!(speaker_id, "alice");
                assert_eq!(payload, vec![1, 2, 3]);
            }
            other => panic!("expected audio event, got {:?}", other),
        }

        let buffered = manager.buffered_audio("alice", None);
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].payload, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (transport, _audio_tx) = FakeTransport::new().with_stream("alice");
        let transport = Arc::new(transport);
        let manager = AudioInputManager::new(transport.clone(), buffer_config());

        manager.subscribe("alice").await;
        manager.subscribe("alice").await;

        assert_eq!(transport.subscribed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_failure_is_an_event_not_a_panic() {
        let mut transport = FakeTransport::new();
        transport.fail_for = Some("alice".to_string());
        let manager = AudioInputManager::new(Arc::new(transport), buffer_config());
        let mut events = manager.subscribe_events();

        manager.subscribe("alice").await;

        assert!(!manager.is_subscribed("alice"));
        match events.recv().await {
            Some(InputEvent::Error { speaker_id, .. }) => {
                assert_eq!(speaker_id.as_deref(), Some("alice"));
            }
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_error_does_not_affect_other_speakers() {
        let (transport, alice_tx) = FakeTransport::new().with_stream("alice");
        let (transport, bob_tx) = transport.with_stream("bob");
        let manager = AudioInputManager::new(Arc::new(transport), buffer_config());
        let mut events = manager.subscribe_events();

        manager.subscribe("alice").await;
        manager.subscribe("bob").await;

        alice_tx
            .send(StreamEvent::Error("packet loss".to_string()))
            .unwrap();
        bob_tx.send(StreamEvent::Audio(vec![9])).unwrap();

        let mut saw_error = false;
        let mut saw_bob_audio = false;
        for _ in 0..2 {
            match events.recv().await {
                Some(InputEvent::Error { speaker_id, .. }) => {
                    assert_eq!(speaker_id.as_deref(), Some("alice"));
                    saw_error = true;
                }
                Some(InputEvent::Audio { speaker_id, .. }) => {
                    assert_eq!(speaker_id, "bob");
                    saw_bob_audio = true;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(saw_error && saw_bob_audio);
        assert!(manager.is_subscribed("alice"));
        assert!(manager.is_subscribed("bob"));
    }

    #[tokio::test]
    async fn test_stream_end_unsubscribes_outside_auto_mode() {
        let (transport, audio_tx) = FakeTransport::new().with_stream("alice");
        let manager = AudioInputManager::new(Arc::new(transport), buffer_config());

        manager.subscribe("alice").await;
        audio_tx.send(StreamEvent::End).unwrap();

        // Let the stream task run.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(!manager.is_subscribed("alice"));
    }

    #[tokio::test]
    async fn test_subscribe_all_auto_subscribes_on_speaking_start() {
        let (transport, _audio_tx) = FakeTransport::new().with_stream("alice");
        let transport = Arc::new(transport);
        let manager = AudioInputManager::new(transport.clone(), buffer_config());

        manager.subscribe_all();
        transport.emit_speaking(SpeakingEvent::Started {
            speaker_id: "alice".to_string(),
            ssrc: Some(42),
        });

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(manager.is_subscribed("alice"));
        assert_eq!(manager.current_speakers(), vec!["alice".to_string()]);
        assert_eq!(manager.speaker_for_ssrc(42), Some("alice".to_string()));
    }

    #[tokio::test]
    async fn test_stop_subscribe_all_keeps_existing_subscriptions() {
        let (transport, _alice_tx) = FakeTransport::new().with_stream("alice");
        let (transport, _bob_tx) = transport.with_stream("bob");
        let transport = Arc::new(transport);
        let manager = AudioInputManager::new(transport.clone(), buffer_config());

        manager.subscribe_all();
        transport.emit_speaking(SpeakingEvent::Started {
            speaker_id: "alice".to_string(),
            ssrc: None,
        });
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert!(manager.is_subscribed("alice"));

        // Stop accepting new automatic subscriptions only.
        manager.stop_subscribe_all();
        transport.emit_speaking(SpeakingEvent::Started {
            speaker_id: "bob".to_string(),
            ssrc: None,
        });
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(manager.is_subscribed("alice"));
        assert!(!manager.is_subscribed("bob"));
    }

    #[tokio::test]
    async fn test_ssrc_mapping_flows_even_before_speaking_start() {
        let transport = Arc::new(FakeTransport::new());
        let manager = AudioInputManager::new(transport.clone(), buffer_config());

        manager.subscribe_all();
        transport.emit_speaking(SpeakingEvent::SsrcMapped {
            ssrc: 7,
            speaker_id: "carol".to_string(),
        });
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(manager.speaker_for_ssrc(7), Some("carol".to_string()));
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (transport, _audio_tx) = FakeTransport::new().with_stream("alice");
        let manager = AudioInputManager::new(Arc::new(transport), buffer_config());
        manager.subscribe("alice").await;

        manager.destroy();
        manager.destroy();

        assert!(!manager.is_subscribed("alice"));
        assert!(manager.is_floor_open());
    }

    #[tokio::test]
    async fn test_no_events_after_destroy() {
        let (transport, audio_tx) = FakeTransport::new().with_stream("alice");
        let manager = AudioInputManager::new(Arc::new(transport), buffer_config());
        let mut events = manager.subscribe_events();
        manager.subscribe("alice").await;

        manager.destroy();

        // Drain until the stream closes; the last observed event must be
        // Destroyed.
        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(InputEvent::Destroyed)));

        // Late frames are dropped silently.
        let _ = audio_tx.send(StreamEvent::Audio(vec![1]));
    }
}
