// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Fixed-capacity ring buffer for per-speaker audio packets.
//!
//! Each subscribed speaker owns one [`RingBuffer`]. Pushes are O(1) and
//! never fail: at capacity the oldest packet is evicted first
//! (drop-oldest), which bounds memory under backpressure. Retrieval is
//! chronological, either in full ([`RingBuffer::get_all`]) or as a sliding
//! window over age and packet count ([`RingBuffer::get_window`]).

use crate::utils::now_ms;

/// A single timestamped audio packet. Immutable once stored; owned by the
/// buffer slot holding it until overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    /// Raw audio bytes (opaque to the buffer; typically PCM16 or opus).
    pub payload: Vec<u8>,
    /// Arrival time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

/// Capacity configuration for a [`RingBuffer`].
///
/// Capacity may be given directly in packets, or derived from a time span:
/// `floor(buffer_seconds * 1000 / frame_duration_ms)`.
#[derive(Debug, Clone, Copy)]
pub struct RingBufferConfig {
    /// Direct packet capacity. Takes precedence when set.
    pub capacity: Option<usize>,
    /// Seconds of audio to retain when deriving capacity.
    pub buffer_seconds: f64,
    /// Duration of one audio frame in milliseconds when deriving capacity.
    pub frame_duration_ms: u64,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            buffer_seconds: 5.0,
            frame_duration_ms: 20,
        }
    }
}

impl RingBufferConfig {
    fn effective_capacity(&self) -> usize {
        match self.capacity {
            Some(capacity) => capacity,
            None => {
                if self.frame_duration_ms == 0 {
                    0
                } else {
                    ((self.buffer_seconds * 1000.0) / self.frame_duration_ms as f64).floor()
                        as usize
                }
            }
        }
    }
}

/// Sliding-window retrieval options.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowOptions {
    /// Keep at most this many packets, preferring the most recent.
    pub max_packets: Option<usize>,
    /// Keep packets no older than this many milliseconds.
    pub max_age_ms: Option<u64>,
}

/// Fixed-capacity circular store of [`AudioPacket`]s with drop-oldest
/// overflow. A zero-capacity buffer silently discards every push.
#[derive(Debug)]
pub struct RingBuffer {
    slots: Vec<Option<AudioPacket>>,
    head: usize,
    tail: usize,
    count: usize,
    capacity: usize,
}

impl RingBuffer {
    /// Create a buffer from a [`RingBufferConfig`].
    pub fn new(config: RingBufferConfig) -> Self {
        let capacity = config.effective_capacity();
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            count: 0,
            capacity,
        }
    }

    /// Create a buffer with a direct packet capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(RingBufferConfig {
            capacity: Some(capacity),
            ..Default::default()
        })
    }

    /// Current number of stored packets.
    pub fn size(&self) -> usize {
        self.count
    }

    /// Maximum number of packets this buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True when no packets are stored.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Store a packet, evicting the oldest one first when full. The
    /// timestamp defaults to the current wall-clock time.
    pub fn push(&mut self, payload: Vec<u8>, timestamp_ms: Option<u64>) {
        if self.capacity == 0 {
            return;
        }

        if self.count == self.capacity {
            // Full: advance head to drop the oldest packet.
            self.head = (self.head + 1) % self.capacity;
            self.count -= 1;
        }

        self.slots[self.tail] = Some(AudioPacket {
            payload,
            timestamp_ms: timestamp_ms.unwrap_or_else(now_ms),
        });
        self.tail = (self.tail + 1) % self.capacity;
        self.count += 1;
    }

    /// All stored packets in chronological (oldest -> newest) order.
    pub fn get_all(&self) -> Vec<AudioPacket> {
        let mut result = Vec::with_capacity(self.count);
        let mut index = self.head;
        for _ in 0..self.count {
            if let Some(packet) = &self.slots[index] {
                result.push(packet.clone());
            }
            index = (index + 1) % self.capacity;
        }
        result
    }

    /// Packets within a sliding window, most recent preferred.
    ///
    /// The age filter applies first (`timestamp >= now - max_age_ms`), then
    /// the result is truncated to the most recent `max_packets`.
    pub fn get_window(&self, options: WindowOptions) -> Vec<AudioPacket> {
        let mut filtered = self.get_all();
        if filtered.is_empty() {
            return filtered;
        }

        if let Some(max_age_ms) = options.max_age_ms {
            let cutoff = now_ms().saturating_sub(max_age_ms);
            filtered.retain(|p| p.timestamp_ms >= cutoff);
        }

        if let Some(max_packets) = options.max_packets {
            if filtered.len() > max_packets {
                filtered.drain(..filtered.len() - max_packets);
            }
        }

        filtered
    }

    /// Remove every packet, preserving capacity.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(byte: u8) -> Vec<u8> {
        vec![byte; 4]
    }

    #[test]
    fn test_push_and_size() {
        let mut buffer = RingBuffer::with_capacity(4);
        assert!(buffer.is_empty());

        buffer.push(packet(1), None);
        buffer.push(packet(2), None);

        assert_eq!(buffer.size(), 2);
        assert_eq!(buffer.capacity(), 4);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut buffer = RingBuffer::with_capacity(3);
        for i in 0..5u8 {
            buffer.push(packet(i), Some(i as u64));
        }

        assert_eq!(buffer.size(), 3);
        let all = buffer.get_all();
        let payload_heads: Vec<u8> = all.iter().map(|p| p.payload[0]).collect();
        assert_eq!(payload_heads, vec![2, 3, 4]);
    }

    #[test]
    fn test_get_all_chronological_after_wrap() {
        let mut buffer = RingBuffer::with_capacity(2);
        buffer.push(packet(1), Some(10));
        buffer.push(packet(2), Some(20));
        buffer.push(packet(3), Some(30));

        let timestamps: Vec<u64> = buffer.get_all().iter().map(|p| p.timestamp_ms).collect();
        assert_eq!(timestamps, vec![20, 30]);
    }

    #[test]
    fn test_zero_capacity_discards_pushes() {
        let mut buffer = RingBuffer::with_capacity(0);
        buffer.push(packet(1), None);
        assert_eq!(buffer.size(), 0);
        assert!(buffer.get_all().is_empty());
    }

    #[test]
    fn test_capacity_derived_from_time_config() {
        let buffer = RingBuffer::new(RingBufferConfig {
            capacity: None,
            buffer_seconds: 5.0,
            frame_duration_ms: 20,
        });
        // 5 s of 20 ms frames.
        assert_eq!(buffer.capacity(), 250);
    }

    #[test]
    fn test_window_max_packets_keeps_most_recent() {
        let mut buffer = RingBuffer::with_capacity(10);
        let base = now_ms();
        for i in 0..6u8 {
            buffer.push(packet(i), Some(base + i as u64));
        }

        let window = buffer.get_window(WindowOptions {
            max_packets: Some(2),
            max_age_ms: None,
        });
        let heads: Vec<u8> = window.iter().map(|p| p.payload[0]).collect();
        assert_eq!(heads, vec![4, 5]);
    }

    #[test]
    fn test_window_age_filter_applies_before_count() {
        let mut buffer = RingBuffer::with_capacity(10);
        let now = now_ms();
        // Two stale packets, three fresh ones.
        buffer.push(packet(0), Some(now.saturating_sub(60_000)));
        buffer.push(packet(1), Some(now.saturating_sub(50_000)));
        buffer.push(packet(2), Some(now));
        buffer.push(packet(3), Some(now));
        buffer.push(packet(4), Some(now));

        let window = buffer.get_window(WindowOptions {
            max_packets: Some(2),
            max_age_ms: Some(10_000),
        });
        let heads: Vec<u8> = window.iter().map(|p| p.payload[0]).collect();
        assert_eq!(heads, vec![3, 4]);
    }

    #[test]
    fn test_clear_preserves_capacity() {
        let mut buffer = RingBuffer::with_capacity(3);
        buffer.push(packet(1), None);
        buffer.clear();

        assert_eq!(buffer.size(), 0);
        assert_eq!(buffer.capacity(), 3);

        buffer.push(packet(2), None);
        assert_eq!(buffer.size(), 1);
    }

    #[test]
    fn test_push_defaults_timestamp_to_now() {
        let mut buffer = RingBuffer::with_capacity(1);
        let before = now_ms();
        buffer.push(packet(1), None);
        let after = now_ms();

        let stored = buffer.get_all();
        assert!(stored[0].timestamp_ms >= before && stored[0].timestamp_ms <= after);
    }
}
