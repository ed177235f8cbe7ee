// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Time-gated barge-in detection.
//!
//! Watches user speech onsets during agent playback. Onsets inside the
//! post-playback cooldown window, or while nothing is playing, are
//! ignored. When a minimum speech duration is configured, the
//! interruption is delayed by that duration and cancelled if the speaker
//! stops first - a cough should not cut the agent off.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::utils::Emitter;

/// Barge-in detection configuration.
#[derive(Debug, Clone, Copy)]
pub struct BargeInConfig {
    /// Master switch for detection.
    pub enabled: bool,
    /// Minimum user speech duration before an interruption fires, in
    /// milliseconds. Zero means immediate.
    pub min_speech_duration_ms: u64,
    /// Window after playback stops during which onsets are ignored, in
    /// milliseconds.
    pub cooldown_after_speaking_ms: u64,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_speech_duration_ms: 0,
            cooldown_after_speaking_ms: 200,
        }
    }
}

/// An accepted interruption.
#[derive(Debug, Clone)]
pub struct BargeInEvent {
    /// The speaker who interrupted.
    pub speaker_id: String,
}

struct DetectorInner {
    playing: bool,
    cooldown_until: Option<Instant>,
    pending: HashMap<String, JoinHandle<()>>,
}

/// Detects barge-in interruptions during active playback.
pub struct BargeInDetector {
    config: BargeInConfig,
    inner: Arc<Mutex<DetectorInner>>,
    events: Arc<Emitter<BargeInEvent>>,
}

impl BargeInDetector {
    /// Create a detector with the given configuration.
    pub fn new(config: BargeInConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(DetectorInner {
                playing: false,
                cooldown_until: None,
                pending: HashMap::new(),
            })),
            events: Arc::new(Emitter::new()),
        }
    }

    /// Subscribe to accepted interruptions.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<BargeInEvent> {
        self.events.subscribe()
    }

    /// Playback started: arm detection and clear any stale cooldown.
    pub fn start_playback(&self) {
        let mut inner = self.inner.lock().expect("detector lock poisoned");
        inner.playing = true;
        inner.cooldown_until = None;
    }

    /// Playback stopped: disarm detection and open the cooldown window.
    pub fn stop_playback(&self) {
        let mut inner = self.inner.lock().expect("detector lock poisoned");
        inner.playing = false;
        if self.config.cooldown_after_speaking_ms > 0 {
            inner.cooldown_until = Some(
                Instant::now() + Duration::from_millis(self.config.cooldown_after_speaking_ms),
            );
        }
    }

    /// True while playback is active.
    pub fn is_playing(&self) -> bool {
        self.inner.lock().expect("detector lock poisoned").playing
    }

    /// A user started speaking. Fires (or schedules) an interruption when
    /// detection is enabled, playback is active and the cooldown has
    /// elapsed.
    pub fn on_user_speech_start(&self, speaker_id: &str) {
        if !self.config.enabled {
            return;
        }

        {
            let inner = self.inner.lock().expect("detector lock poisoned");
            if let Some(cooldown_until) = inner.cooldown_until {
                if Instant::now() < cooldown_until {
                    return;
                }
            }
            if !inner.playing {
                return;
            }
        }

        if self.config.min_speech_duration_ms > 0 {
            // Delay the interruption; speech-stop cancels it.
            let inner = self.inner.clone();
            let events = self.events.clone();
            let speaker = speaker_id.to_string();
            let delay = Duration::from_millis(self.config.min_speech_duration_ms);
            let task = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let still_playing = {
                    let mut guard = inner.lock().expect("detector lock poisoned");
                    guard.pending.remove(&speaker);
                    guard.playing
                };
                if still_playing {
                    events.emit(BargeInEvent {
                        speaker_id: speaker,
                    });
                }
            });
            let mut guard = self.inner.lock().expect("detector lock poisoned");
            if let Some(previous) = guard.pending.insert(speaker_id.to_string(), task) {
                previous.abort();
            }
        } else {
            self.events.emit(BargeInEvent {
                speaker_id: speaker_id.to_string(),
            });
        }
    }

    /// A user stopped speaking: cancel their pending interruption, if
    /// any.
    pub fn on_user_speech_stop(&self, speaker_id: &str) {
        let mut inner = self.inner.lock().expect("detector lock poisoned");
        if let Some(task) = inner.pending.remove(speaker_id) {
            task.abort();
        }
    }

    /// Reset all state and cancel every pending timer.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("detector lock poisoned");
        inner.playing = false;
        inner.cooldown_until = None;
        for (_, task) in inner.pending.drain() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for BargeInDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BargeInDetector")
            .field("enabled", &self.config.enabled)
            .field("playing", &self.is_playing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(min_ms: u64, cooldown_ms: u64) -> BargeInDetector {
        BargeInDetector::new(BargeInConfig {
            enabled: true,
            min_speech_duration_ms: min_ms,
            cooldown_after_speaking_ms: cooldown_ms,
        })
    }

    #[tokio::test]
    async fn test_immediate_barge_in_during_playback() {
        let detector = detector(0, 200);
        let mut events = detector.subscribe();

        detector.start_playback();
        detector.on_user_speech_start("alice");

        let event = events.recv().await.unwrap();
        assert_eq!(event.speaker_id, "alice");
    }

    #[tokio::test]
    async fn test_no_barge_in_when_not_playing() {
        let detector = detector(0, 200);
        let mut events = detector.subscribe();

        detector.on_user_speech_start("alice");

        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disabled_detector_ignores_speech() {
        let detector = BargeInDetector::new(BargeInConfig {
            enabled: false,
            ..Default::default()
        });
        let mut events = detector.subscribe();

        detector.start_playback();
        detector.on_user_speech_start("alice");

        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_suppresses_onsets() {
        let detector = detector(0, 200);
        let mut events = detector.subscribe();

        detector.start_playback();
        detector.stop_playback();

        // Inside the cooldown window: suppressed even though playback
        // restarts checks would pass.
        detector.on_user_speech_start("alice");
        assert!(events.try_recv().is_err());

        // A new playback clears the cooldown.
        tokio::time::advance(Duration::from_millis(300)).await;
        detector.start_playback();
        detector.on_user_speech_start("alice");
        assert_eq!(events.recv().await.unwrap().speaker_id, "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_duration_delays_interruption() {
        let detector = detector(300, 0);
        let mut events = detector.subscribe();

        detector.start_playback();
        detector.on_user_speech_start("alice");
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert!(events.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;
        assert_eq!(events.try_recv().unwrap().speaker_id, "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_speech_stop_cancels_pending_interruption() {
        let detector = detector(300, 0);
        let mut events = detector.subscribe();

        detector.start_playback();
        detector.on_user_speech_start("alice");

        tokio::time::advance(Duration::from_millis(200)).await;
        detector.on_user_speech_stop("alice");

        // Even after the original 300 ms would have elapsed: nothing.
        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_interruption_dropped_if_playback_ended() {
        let detector = detector(300, 0);
        let mut events = detector.subscribe();

        detector.start_playback();
        detector.on_user_speech_start("alice");

        // Playback finishes before the minimum duration elapses.
        tokio::time::advance(Duration::from_millis(100)).await;
        detector.stop_playback();

        tokio::time::advance(Duration::from_millis(400)).await;
        tokio::task::yield_now().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_pending_timers() {
        let detector = detector(300, 0);
        let mut events = detector.subscribe();

        detector.start_playback();
        detector.on_user_speech_start("alice");
        detector.reset();

        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert!(events.try_recv().is_err());
        assert!(!detector.is_playing());
    }
}
