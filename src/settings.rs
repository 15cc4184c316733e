//! Protocol defaults and pipeline sizing shared across the Reader, worker
//! pool, and Writer of a single connection.

use std::time::Duration;

/// A dynamically resized buffer's start/min/max bounds, plus the size in
/// effect right now. Grows by doubling on a full read/write, shrinks by
/// halving on a sparse one — see [`crate::reader`] and [`crate::writer`].
#[derive(Debug, Clone, Copy)]
pub struct BufferSizing {
    pub start: usize,
    pub min: usize,
    pub max: usize,
    pub current: usize,
}

impl BufferSizing {
    pub fn new(start: usize, min: usize, max: usize) -> BufferSizing {
        BufferSizing {
            start,
            min,
            max,
            current: start,
        }
    }

    /// Grow/shrink the live size based on how much of the last read/write it
    /// actually used: doubles on a full use (up to `max`), halves on a use
    /// under half the buffer (down to `min`).
    pub fn adapt(&mut self, used: usize, capacity: usize) {
        if used == capacity && self.current < self.max {
            self.current = (self.current * 2).min(self.max);
        } else if capacity > 0 && used * 2 < capacity && self.current > self.min {
            self.current = (self.current / 2).max(self.min);
        }
    }
}

impl Default for BufferSizing {
    fn default() -> Self {
        BufferSizing::new(512, 128, 65536)
    }
}

/// Fixed configuration for one connection's pipeline, shared read-only by
/// every stage via `Arc`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_length: u32,
    pub queue_size: usize,
    pub processors: usize,
    pub read_buffer: BufferSizing,
    pub write_buffer: BufferSizing,
    pub idle_timeout: Duration,
}

impl Settings {
    /// The write buffer must hold at least one maximum-size frame.
    pub fn min_write_buffer_max(max_length: u32) -> usize {
        max_length as usize + crate::frame::Frame::HEADER_LEN
    }
}

impl Default for Settings {
    fn default() -> Self {
        let max_length: u32 = 65536;
        Settings {
            max_length,
            queue_size: 4096,
            processors: 32,
            read_buffer: BufferSizing::default(),
            write_buffer: BufferSizing::new(512, 128, Settings::min_write_buffer_max(max_length)),
            idle_timeout: Duration::from_secs(5 * 60),
        }
    }
}
