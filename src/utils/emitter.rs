// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Typed event fan-out over unbounded channels.
//!
//! Every component that broadcasts notifications holds an [`Emitter<T>`]
//! per event family. Subscribing returns an `UnboundedReceiver<T>`; the
//! unsubscribe token is simply dropping the receiver - the emitter prunes
//! closed channels on the next [`emit`](Emitter::emit). [`close`]
//! (Emitter::close) drops every sender so nothing is delivered after
//! teardown.

use std::sync::Mutex;

use tokio::sync::mpsc;

/// Multi-subscriber event broadcaster.
///
/// Sends are synchronous (unbounded channel) and never block, so events can
/// be emitted from both sync and async code. Receivers that have been
/// dropped are removed lazily during `emit`.
pub struct Emitter<T: Clone> {
    senders: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> Emitter<T> {
    /// Create an emitter with no subscribers.
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .expect("emitter lock poisoned")
            .push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, pruning closed ones.
    pub fn emit(&self, event: T) {
        let mut senders = self.senders.lock().expect("emitter lock poisoned");
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers (closed receivers still pending prune
    /// are counted until the next emit).
    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().expect("emitter lock poisoned").len()
    }

    /// Drop all senders. Subscribed receivers observe end-of-stream and no
    /// event is delivered after this call.
    pub fn close(&self) {
        self.senders.lock().expect("emitter lock poisoned").clear();
    }
}

impl<T: Clone> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
