//! Process-wide object pools for frame shells and body buffers.
//!
//! Both pools are bounded, best-effort caches: `get` falls back to a fresh
//! allocation on a miss, and `put` silently discards on a full pool. They
//! exist to amortize allocation under sustained load, not to guarantee reuse.

use bytes::BytesMut;
use std::sync::Mutex;

use crate::frame::FrameShell;

/// Default pool capacity, shared by [`FramePool`] and [`BodyPool`].
pub const DEFAULT_POOL_SIZE: usize = 4096;

/// Pool of [`FrameShell`] values — the fixed-size fields of a frame minus its
/// body. Shells are `Copy`, so pooling them is mostly bookkeeping, but it
/// keeps `Frame` assembly symmetric with [`BodyPool`].
pub struct FramePool {
    shells: Mutex<Vec<FrameShell>>,
    capacity: usize,
}

impl FramePool {
    pub fn new(capacity: usize) -> FramePool {
        FramePool {
            shells: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Pop a shell from the pool, or build a default one on a miss.
    pub fn get(&self) -> FrameShell {
        self.shells
            .lock()
            .expect("frame pool mutex poisoned")
            .pop()
            .unwrap_or_default()
    }

    /// Return a shell to the pool. Discarded if the pool is full.
    pub fn put(&self, shell: FrameShell) {
        let mut shells = self.shells.lock().expect("frame pool mutex poisoned");
        if shells.len() < self.capacity {
            shells.push(shell);
        }
    }
}

impl Default for FramePool {
    fn default() -> Self {
        FramePool::new(DEFAULT_POOL_SIZE)
    }
}

/// Pool of reusable body buffers.
///
/// `put` applies a running-average acceptance filter: a buffer whose length
/// falls far outside the average of sizes requested via `get` is dropped
/// rather than kept, so one oversized outlier can't permanently inflate the
/// pool's footprint. The average is `total / count` accumulated over every
/// `get` call (hit or miss), seeded at 5 bytes over 1 call, mirroring the
/// source pool's running statistic.
pub struct BodyPool {
    inner: Mutex<BodyPoolInner>,
    capacity: usize,
}

struct BodyPoolInner {
    buffers: Vec<BytesMut>,
    total: u64,
    count: u64,
}

impl BodyPool {
    pub fn new(capacity: usize) -> BodyPool {
        BodyPool {
            inner: Mutex::new(BodyPoolInner {
                buffers: Vec::with_capacity(capacity),
                total: 5,
                count: 1,
            }),
            capacity,
        }
    }

    /// Obtain a buffer with at least `size` bytes of capacity. Reuses a
    /// pooled buffer if one is large enough, otherwise allocates fresh.
    /// Every call, hit or miss, folds `size` into the running average used
    /// by [`Self::put`]'s acceptance filter.
    pub fn get(&self, size: usize) -> BytesMut {
        let mut inner = self.inner.lock().expect("body pool mutex poisoned");
        inner.total += size as u64;
        inner.count += 1;

        if let Some(pos) = inner.buffers.iter().position(|b| b.capacity() >= size) {
            let mut buf = inner.buffers.swap_remove(pos);
            buf.clear();
            return buf;
        }
        BytesMut::with_capacity(size)
    }

    /// Return a buffer to the pool, subject to the acceptance filter.
    pub fn put(&self, mut buf: BytesMut) {
        let len = buf.capacity() as u64;
        let mut inner = self.inner.lock().expect("body pool mutex poisoned");

        let avg = inner.total / inner.count;
        let accepted = len >= avg / 2 && len <= avg.saturating_mul(8);

        if accepted && inner.buffers.len() < self.capacity {
            buf.clear();
            inner.buffers.push(buf);
        }
    }
}

impl Default for BodyPool {
    fn default() -> Self {
        BodyPool::new(DEFAULT_POOL_SIZE)
    }
}

/// True if `buf` fills its own allocation exactly (`len == capacity`).
///
/// A buffer that was split off from a larger allocation, or left with spare
/// capacity after a partial write, fails this check and should be dropped
/// rather than recycled — recycling it would either waste the spare capacity
/// forever or, worse, hand out a buffer another handle still aliases.
pub fn is_pool_owned(buf: &BytesMut) -> bool {
    buf.len() == buf.capacity()
}
