// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Per-channel playback management.
//!
//! The [`AudioOutputManager`] owns one [`Player`], one [`PlaybackQueue`]
//! and one [`BargeInDetector`] per channel. A segment plays immediately
//! when the channel is idle, otherwise it is enqueued; natural completion
//! advances the queue. Accepted barge-ins stop the player, clear the
//! queue and are fanned out so the orchestrator can react.
//!
//! The synthesis-to-playback latency average is updated at exactly one
//! point: immediately before playback starts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::output::barge_in::{BargeInConfig, BargeInDetector};
use crate::output::queue::PlaybackQueue;
use crate::output::{AudioSegment, OutputError, PlaybackStats};
use crate::transport::{Player, PlayerEvent};
use crate::utils::{now_ms, Emitter};

/// Events fanned out by the [`AudioOutputManager`].
#[derive(Debug, Clone)]
pub enum OutputEvent {
    /// A segment started playing.
    PlaybackStarted {
        /// Channel the segment plays on.
        channel_id: String,
        /// Text of the segment, when known.
        text: Option<String>,
    },
    /// The current segment finished naturally.
    PlaybackFinished {
        /// Channel that finished.
        channel_id: String,
    },
    /// Playback was halted via [`AudioOutputManager::stop`].
    PlaybackStopped {
        /// Channel that was stopped.
        channel_id: String,
    },
    /// The queue drained with nothing left to play.
    QueueEmpty {
        /// Channel whose queue drained.
        channel_id: String,
    },
    /// An accepted barge-in interruption.
    BargeIn {
        /// Channel that was interrupted.
        channel_id: String,
        /// Speaker who interrupted.
        speaker_id: String,
    },
    /// A playback failure, isolated to one channel.
    Error {
        /// Affected channel.
        channel_id: String,
        /// Failure description.
        message: String,
    },
}

struct ChannelState {
    player: Box<dyn Player>,
    queue: PlaybackQueue,
    barge_in: BargeInDetector,
    stats: PlaybackStats,
    latency_samples: u64,
    is_playing_segment: bool,
    event_task: Option<JoinHandle<()>>,
}

/// Per-channel playback queue, barge-in wiring and statistics.
pub struct AudioOutputManager {
    channels: Arc<Mutex<HashMap<String, ChannelState>>>,
    barge_in_config: BargeInConfig,
    events: Arc<Emitter<OutputEvent>>,
    destroyed: AtomicBool,
}

impl AudioOutputManager {
    /// Create a manager; `barge_in_config` applies to every attached
    /// channel.
    pub fn new(barge_in_config: BargeInConfig) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            barge_in_config,
            events: Arc::new(Emitter::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Subscribe to playback events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<OutputEvent> {
        self.events.subscribe()
    }

    /// Attach a playback device to a channel. Idempotent: an already
    /// attached channel keeps its existing player.
    pub async fn attach_player(&self, channel_id: &str, mut player: Box<dyn Player>) {
        let mut channels = self.channels.lock().await;
        if channels.contains_key(channel_id) {
            return;
        }

        let player_events = player.events();
        let barge_in = BargeInDetector::new(self.barge_in_config);
        let barge_in_events = barge_in.subscribe();

        let state = ChannelState {
            player,
            queue: PlaybackQueue::new(),
            barge_in,
            stats: PlaybackStats::default(),
            latency_samples: 0,
            is_playing_segment: false,
            event_task: None,
        };
        channels.insert(channel_id.to_string(), state);
        drop(channels);

        let task = tokio::spawn(Self::channel_event_loop(
            self.channels.clone(),
            self.events.clone(),
            channel_id.to_string(),
            player_events,
            barge_in_events,
        ));

        if let Some(state) = self.channels.lock().await.get_mut(channel_id) {
            state.event_task = Some(task);
        }
    }

    /// Drives queue advancement and barge-in handling for one channel.
    async fn channel_event_loop(
        channels: Arc<Mutex<HashMap<String, ChannelState>>>,
        events: Arc<Emitter<OutputEvent>>,
        channel_id: String,
        mut player_events: tokio::sync::mpsc::UnboundedReceiver<PlayerEvent>,
        mut barge_in_events: tokio::sync::mpsc::UnboundedReceiver<crate::output::BargeInEvent>,
    ) {
        loop {
            tokio::select! {
                player_event = player_events.recv() => {
                    match player_event {
                        Some(PlayerEvent::Finished) => {
                            Self::handle_playback_finished(&channels, &events, &channel_id)
                                .await;
                        }
                        Some(PlayerEvent::Started) | Some(PlayerEvent::Stopped) => {}
                        None => break,
                    }
                }
                barge_in = barge_in_events.recv() => {
                    match barge_in {
                        Some(event) => {
                            Self::handle_barge_in(
                                &channels,
                                &events,
                                &channel_id,
                                &event.speaker_id,
                            )
                            .await;
                        }
                        None => break,
                    }
                }
            }
        }
    }

    async fn handle_playback_finished(
        channels: &Arc<Mutex<HashMap<String, ChannelState>>>,
        events: &Arc<Emitter<OutputEvent>>,
        channel_id: &str,
    ) {
        let mut guard = channels.lock().await;
        let Some(state) = guard.get_mut(channel_id) else {
            return;
        };

        state.barge_in.stop_playback();
        state.stats.total_played += 1;
        state.is_playing_segment = false;

        events.emit(OutputEvent::PlaybackFinished {
            channel_id: channel_id.to_string(),
        });

        match state.queue.dequeue() {
            Some(item) => {
                Self::play_segment(state, events, channel_id, item.segment).await;
            }
            None => {
                events.emit(OutputEvent::QueueEmpty {
                    channel_id: channel_id.to_string(),
                });
            }
        }
    }

    async fn handle_barge_in(
        channels: &Arc<Mutex<HashMap<String, ChannelState>>>,
        events: &Arc<Emitter<OutputEvent>>,
        channel_id: &str,
        speaker_id: &str,
    ) {
        let mut guard = channels.lock().await;
        let Some(state) = guard.get_mut(channel_id) else {
            return;
        };

        state.player.stop();
        state.queue.clear();
        state.stats.interruption_count += 1;
        state.is_playing_segment = false;

        events.emit(OutputEvent::BargeIn {
            channel_id: channel_id.to_string(),
            speaker_id: speaker_id.to_string(),
        });
    }

    /// Start a segment on the device, updating the latency average
    /// immediately before playback begins.
    async fn play_segment(
        state: &mut ChannelState,
        events: &Emitter<OutputEvent>,
        channel_id: &str,
        segment: AudioSegment,
    ) {
        if let Some(requested_at_ms) = segment.requested_at_ms {
            let latency_ms = now_ms().saturating_sub(requested_at_ms) as f64;
            state.latency_samples += 1;
            let n = state.latency_samples as f64;
            state.stats.average_tts_latency_ms =
                (state.stats.average_tts_latency_ms * (n - 1.0) + latency_ms) / n;
        }

        let text = segment.text.clone();
        state.is_playing_segment = true;

        if let Err(e) = state.player.play(segment).await {
            state.is_playing_segment = false;
            events.emit(OutputEvent::Error {
                channel_id: channel_id.to_string(),
                message: e.to_string(),
            });
            return;
        }

        state.barge_in.start_playback();
        events.emit(OutputEvent::PlaybackStarted {
            channel_id: channel_id.to_string(),
            text,
        });
    }

    /// Play a segment: immediately when the channel is idle, otherwise
    /// enqueued FIFO. Calling this on a channel with no attached player
    /// is a caller bug and returns [`OutputError::NoPlayerAttached`].
    pub async fn play(
        &self,
        channel_id: &str,
        segment: AudioSegment,
    ) -> Result<(), OutputError> {
        let mut channels = self.channels.lock().await;
        let Some(state) = channels.get_mut(channel_id) else {
            return Err(OutputError::NoPlayerAttached(channel_id.to_string()));
        };

        if state.is_playing_segment {
            state.queue.enqueue(segment);
        } else {
            Self::play_segment(state, &self.events, channel_id, segment).await;
        }
        Ok(())
    }

    /// Stop playback and clear the queue. Safe on unknown channels.
    pub async fn stop(&self, channel_id: &str) {
        let mut channels = self.channels.lock().await;
        let Some(state) = channels.get_mut(channel_id) else {
            return;
        };

        state.player.stop();
        state.queue.clear();
        state.barge_in.stop_playback();
        state.is_playing_segment = false;
        drop(channels);

        self.events.emit(OutputEvent::PlaybackStopped {
            channel_id: channel_id.to_string(),
        });
    }

    /// Pause the current segment.
    pub async fn pause(&self, channel_id: &str) {
        if let Some(state) = self.channels.lock().await.get_mut(channel_id) {
            state.player.pause();
        }
    }

    /// Resume a paused segment.
    pub async fn resume(&self, channel_id: &str) {
        if let Some(state) = self.channels.lock().await.get_mut(channel_id) {
            state.player.resume();
        }
    }

    /// True while a segment is playing on the channel.
    pub async fn is_playing(&self, channel_id: &str) -> bool {
        self.channels
            .lock()
            .await
            .get(channel_id)
            .map(|state| state.is_playing_segment)
            .unwrap_or(false)
    }

    /// Number of queued segments, excluding the one currently playing.
    pub async fn queue_size(&self, channel_id: &str) -> usize {
        self.channels
            .lock()
            .await
            .get(channel_id)
            .map(|state| state.queue.len())
            .unwrap_or(0)
    }

    /// Playback statistics for a channel, when attached.
    pub async fn stats(&self, channel_id: &str) -> Option<PlaybackStats> {
        self.channels
            .lock()
            .await
            .get(channel_id)
            .map(|state| state.stats)
    }

    /// Forward a speech onset into the channel's barge-in detector.
    pub async fn on_user_speech_start(&self, channel_id: &str, speaker_id: &str) {
        if let Some(state) = self.channels.lock().await.get(channel_id) {
            state.barge_in.on_user_speech_start(speaker_id);
        }
    }

    /// Forward a speech stop into the channel's barge-in detector.
    pub async fn on_user_speech_stop(&self, channel_id: &str, speaker_id: &str) {
        if let Some(state) = self.channels.lock().await.get(channel_id) {
            state.barge_in.on_user_speech_stop(speaker_id);
        }
    }

    /// Tear down every channel: stop players, clear queues, reset
    /// detectors, abort event loops. Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut channels = self.channels.lock().await;
        for (_, state) in channels.iter_mut() {
            state.player.stop();
            state.queue.clear();
            state.barge_in.reset();
            if let Some(task) = state.event_task.take() {
                task.abort();
            }
        }
        channels.clear();
        drop(channels);

        self.events.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    /// Player double: records played segments; completion is driven by
    /// the test through the event sender.
    struct MockPlayer {
        played: Arc<StdMutex<Vec<Option<String>>>>,
        stopped: Arc<StdMutex<u64>>,
        events_tx: mpsc::UnboundedSender<PlayerEvent>,
        events_rx: Option<mpsc::UnboundedReceiver<PlayerEvent>>,
        fail: bool,
    }

    impl MockPlayer {
        fn new(fail: bool) -> (Self, mpsc::UnboundedSender<PlayerEvent>, Arc<StdMutex<Vec<Option<String>>>>, Arc<StdMutex<u64>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let played = Arc::new(StdMutex::new(Vec::new()));
            let stopped = Arc::new(StdMutex::new(0));
            (
                Self {
                    played: played.clone(),
                    stopped: stopped.clone(),
                    events_tx: tx.clone(),
                    events_rx: Some(rx),
                    fail,
                },
                tx,
                played,
                stopped,
            )
        }
    }

    #[async_trait]
    impl Player for MockPlayer {
        async fn play(&mut self, segment: AudioSegment) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Playback("device gone".to_string()));
            }
            self.played.lock().unwrap().push(segment.text.clone());
            let _ = self.events_tx.send(PlayerEvent::Started);
            Ok(())
        }

        fn stop(&mut self) {
            *self.stopped.lock().unwrap() += 1;
        }

        fn events(&mut self) -> mpsc::UnboundedReceiver<PlayerEvent> {
            self.events_rx.take().expect("events() called twice")
        }
    }

    fn segment(text: &str) -> AudioSegment {
        AudioSegment::from_buffer(vec![0u8; 4], text)
    }

    fn manager() -> AudioOutputManager {
        AudioOutputManager::new(BargeInConfig {
            enabled: true,
            min_speech_duration_ms: 0,
            cooldown_after_speaking_ms: 0,
        })
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_play_without_player_is_a_hard_error() {
        let manager = manager();
        let result = manager.play("nowhere", segment("hi")).await;
        assert!(matches!(result, Err(OutputError::NoPlayerAttached(_))));
    }

    #[tokio::test]
    async fn test_play_starts_immediately_when_idle() {
        let manager = manager();
        let (player, _tx, played, _stopped) = MockPlayer::new(false);
        manager.attach_player("chan", Box::new(player)).await;
        let mut events = manager.subscribe();

        manager.play("chan", segment("hello")).await.unwrap();

        assert!(manager.is_playing("chan").await);
        assert_eq!(played.lock().unwrap().as_slice(), &[Some("hello".to_string())]);
        assert!(matches!(
            events.recv().await,
            Some(OutputEvent::PlaybackStarted { text, .. }) if text.as_deref() == Some("hello")
        ));
    }

    #[tokio::test]
    async fn test_second_segment_is_enqueued_then_advanced() {
        let manager = manager();
        let (player, finish_tx, played, _stopped) = MockPlayer::new(false);
        manager.attach_player("chan", Box::new(player)).await;
        let mut events = manager.subscribe();

        manager.play("chan", segment("one")).await.unwrap();
        manager.play("chan", segment("two")).await.unwrap();

        assert_eq!(manager.queue_size("chan").await, 1);
        assert!(matches!(
            events.recv().await,
            Some(OutputEvent::PlaybackStarted { .. })
        ));

        // Natural completion advances the queue.
        finish_tx.send(PlayerEvent::Finished).unwrap();
        settle().await;

        assert!(matches!(
            events.recv().await,
            Some(OutputEvent::PlaybackFinished { .. })
        ));
        assert!(matches!(
            events.recv().await,
            Some(OutputEvent::PlaybackStarted { text, .. }) if text.as_deref() == Some("two")
        ));
        assert_eq!(
            played.lock().unwrap().as_slice(),
            &[Some("one".to_string()), Some("two".to_string())]
        );
        assert_eq!(manager.queue_size("chan").await, 0);
    }

    #[tokio::test]
    async fn test_queue_empty_after_last_segment() {
        let manager = manager();
        let (player, finish_tx, _played, _stopped) = MockPlayer::new(false);
        manager.attach_player("chan", Box::new(player)).await;
        let mut events = manager.subscribe();

        manager.play("chan", segment("only")).await.unwrap();
        events.recv().await; // started

        finish_tx.send(PlayerEvent::Finished).unwrap();
        settle().await;

        assert!(matches!(
            events.recv().await,
            Some(OutputEvent::PlaybackFinished { .. })
        ));
        assert!(matches!(
            events.recv().await,
            Some(OutputEvent::QueueEmpty { .. })
        ));
        assert_eq!(manager.stats("chan").await.unwrap().total_played, 1);
    }

    #[tokio::test]
    async fn test_barge_in_stops_playback_and_clears_queue() {
        let manager = manager();
        let (player, _tx, _played, stopped) = MockPlayer::new(false);
        manager.attach_player("chan", Box::new(player)).await;
        let mut events = manager.subscribe();

        manager.play("chan", segment("one")).await.unwrap();
        manager.play("chan", segment("two")).await.unwrap();
        events.recv().await; // started

        manager.on_user_speech_start("chan", "alice").await;
        settle().await;

        match events.recv().await {
            Some(OutputEvent::BargeIn {
                channel_id,
                speaker_id,
            }) => {
                assert_eq!(channel_id, "chan");
                assert_eq!(speaker_id, "alice");
            }
            other => panic!("expected barge-in, got {:?}", other),
        }

        assert_eq!(*stopped.lock().unwrap(), 1);
        assert_eq!(manager.queue_size("chan").await, 0);
        assert!(!manager.is_playing("chan").await);
        let stats = manager.stats("chan").await.unwrap();
        assert_eq!(stats.interruption_count, 1);
    }

    #[tokio::test]
    async fn test_speech_when_idle_does_not_barge_in() {
        let manager = manager();
        let (player, _tx, _played, stopped) = MockPlayer::new(false);
        manager.attach_player("chan", Box::new(player)).await;
        let mut events = manager.subscribe();

        manager.on_user_speech_start("chan", "alice").await;
        settle().await;

        assert!(events.try_recv().is_err());
        assert_eq!(*stopped.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stop_halts_and_clears() {
        let manager = manager();
        let (player, _tx, _played, stopped) = MockPlayer::new(false);
        manager.attach_player("chan", Box::new(player)).await;
        let mut events = manager.subscribe();

        manager.play("chan", segment("one")).await.unwrap();
        manager.play("chan", segment("two")).await.unwrap();
        events.recv().await; // started

        manager.stop("chan").await;

        assert!(matches!(
            events.recv().await,
            Some(OutputEvent::PlaybackStopped { .. })
        ));
        assert_eq!(*stopped.lock().unwrap(), 1);
        assert_eq!(manager.queue_size("chan").await, 0);
        assert!(!manager.is_playing("chan").await);
    }

    #[tokio::test]
    async fn test_player_failure_is_channel_local_event() {
        let manager = manager();
        let (player, _tx, _played, _stopped) = MockPlayer::new(true);
        manager.attach_player("chan", Box::new(player)).await;
        let mut events = manager.subscribe();

        manager.play("chan", segment("doomed")).await.unwrap();

        assert!(matches!(
            events.recv().await,
            Some(OutputEvent::Error { channel_id, .. }) if channel_id == "chan"
        ));
        assert!(!manager.is_playing("chan").await);
    }

    #[tokio::test]
    async fn test_latency_average_updated_before_playback() {
        let manager = manager();
        let (player, _tx, _played, _stopped) = MockPlayer::new(false);
        manager.attach_player("chan", Box::new(player)).await;

        let mut seg = segment("timed");
        seg.requested_at_ms = Some(now_ms().saturating_sub(50));
        manager.play("chan", seg).await.unwrap();

        let stats = manager.stats("chan").await.unwrap();
        assert!(stats.average_tts_latency_ms >= 50.0);
        // total_played counts completions, not starts.
        assert_eq!(stats.total_played, 0);
    }

    #[tokio::test]
    async fn test_attach_is_idempotent_and_destroy_repeats() {
        let manager = manager();
        let (player1, _tx1, played1, _s1) = MockPlayer::new(false);
        let (player2, _tx2, played2, _s2) = MockPlayer::new(false);
        manager.attach_player("chan", Box::new(player1)).await;
        manager.attach_player("chan", Box::new(player2)).await;

        manager.play("chan", segment("hi")).await.unwrap();
        assert_eq!(played1.lock().unwrap().len(), 1);
        assert!(played2.lock().unwrap().is_empty());

        manager.destroy().await;
        manager.destroy().await;
        assert!(matches!(
            manager.play("chan", segment("late")).await,
            Err(OutputError::NoPlayerAttached(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_duration_barge_in_cancelled_by_stop() {
        let manager = AudioOutputManager::new(BargeInConfig {
            enabled: true,
            min_speech_duration_ms: 300,
            cooldown_after_speaking_ms: 0,
        });
        let (player, _tx, _played, stopped) = MockPlayer::new(false);
        manager.attach_player("chan", Box::new(player)).await;
        let mut events = manager.subscribe();

        manager.play("chan", segment("long")).await.unwrap();
        events.recv().await; // started

        manager.on_user_speech_start("chan", "alice").await;
        tokio::time::advance(std::time::Duration::from_millis(200)).await;
        manager.on_user_speech_stop("chan", "alice").await;

        tokio::time::advance(std::time::Duration::from_millis(500)).await;
        settle().await;

        assert!(events.try_recv().is_err());
        assert_eq!(*stopped.lock().unwrap(), 0);
        assert!(manager.is_playing("chan").await);
    }
}
