//! Lock-free free list of frame buffers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use crossbeam::utils::CachePadded;

use crate::capture::FrameBuffer;

/// Recycles frame storage so steady-state capture does not allocate per frame.
///
/// There is no size cap: only a handful of buffers circulate (one published,
/// one being filled, occasionally one held by a snapshot request).
pub struct FramePool {
    /// Uniquely owned buffers ready for reuse
    free: SegQueue<FrameBuffer>,

    /// Released while a snapshot request still held a reference; reclaimed
    /// once that reference is dropped
    deferred: SegQueue<Arc<FrameBuffer>>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    buffers_allocated: AtomicUsize,
    storage_allocations: AtomicUsize,
    recycled: AtomicUsize,
    deferred: AtomicUsize,
}

/// Point-in-time view of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// `FrameBuffer`s created because the free list was empty
    pub buffers_allocated: usize,
    /// Backing-storage allocations caused by a shape change
    pub storage_allocations: usize,
    /// Buffers handed back to the free list
    pub recycled: usize,
    /// Releases that had to wait for a reader
    pub deferred: usize,
    pub free: usize,
}

impl FramePool {
    pub fn new() -> Self {
        Self {
            free: SegQueue::new(),
            deferred: SegQueue::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Take a buffer from the free list, or allocate an empty one.
    pub fn acquire(&self) -> FrameBuffer {
        if let Some(buffer) = self.free.pop() {
            return buffer;
        }

        if let Some(buffer) = self.reclaim_deferred() {
            return buffer;
        }

        self.stats.buffers_allocated.fetch_add(1, Ordering::Relaxed);
        FrameBuffer::empty()
    }

    /// Return a buffer for reuse. Never deallocates.
    ///
    /// If another holder of the `Arc` is still reading, the buffer is parked
    /// until it becomes unique again.
    pub fn release(&self, buffer: Arc<FrameBuffer>) {
        match Arc::try_unwrap(buffer) {
            Ok(buffer) => {
                self.free.push(buffer);
                self.stats.recycled.fetch_add(1, Ordering::Relaxed);
            }
            Err(shared) => {
                self.deferred.push(shared);
                self.stats.deferred.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Count a storage (re)allocation made on a buffer from this pool.
    pub fn record_storage_allocation(&self) {
        self.stats.storage_allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            buffers_allocated: self.stats.buffers_allocated.load(Ordering::Relaxed),
            storage_allocations: self.stats.storage_allocations.load(Ordering::Relaxed),
            recycled: self.stats.recycled.load(Ordering::Relaxed),
            deferred: self.stats.deferred.load(Ordering::Relaxed),
            free: self.free.len(),
        }
    }

    fn reclaim_deferred(&self) -> Option<FrameBuffer> {
        // Each parked buffer is looked at once; still-shared ones go back.
        for _ in 0..self.deferred.len() {
            let shared = self.deferred.pop()?;
            match Arc::try_unwrap(shared) {
                Ok(buffer) => {
                    self.stats.recycled.fetch_add(1, Ordering::Relaxed);
                    return Some(buffer);
                }
                Err(shared) => self.deferred.push(shared),
            }
        }
        None
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}
