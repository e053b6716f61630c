//! Reusable preallocated read buffers.
//!
//! Remote reads land in capability-allocated buffers. Allocating one per
//! operation would put an allocation round-trip on every hop of a traversal,
//! so each collection instance keeps a small pool of buffers: one per
//! concurrent find slot, fetched at operation entry and released on exit.

use crossbeam_queue::SegQueue;

use crate::capability::{MemoryCapability, RemoteObject};
use crate::remote_ptr::RemotePtr;

/// A pool of interchangeable scratch buffers for `T`-sized reads.
pub struct ScratchPool<T> {
    buffers: SegQueue<RemotePtr<T>>,
}

impl<T: RemoteObject> ScratchPool<T> {
    /// Create a pool pre-seeded with `slots` buffers.
    pub fn new<C: MemoryCapability>(cap: &C, slots: usize) -> Self {
        let buffers = SegQueue::new();
        for _ in 0..slots {
            buffers.push(cap.allocate::<T>(1));
        }
        ScratchPool { buffers }
    }

    /// Fetch a buffer, allocating a fresh one if the pool is momentarily dry.
    pub fn fetch<C: MemoryCapability>(&self, cap: &C) -> RemotePtr<T> {
        self.buffers.pop().unwrap_or_else(|| cap.allocate::<T>(1))
    }

    /// Return a buffer to circulation.
    pub fn release(&self, buffer: RemotePtr<T>) {
        debug_assert!(!buffer.is_null(), "releasing a null scratch buffer");
        self.buffers.push(buffer);
    }

    /// Deallocate every pooled buffer. Outstanding fetches must have been
    /// released first.
    pub fn drain<C: MemoryCapability>(&self, cap: &C) {
        while let Some(buffer) = self.buffers.pop() {
            cap.deallocate(buffer, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counting_pool::CountingPool;

    #[test]
    fn fetch_reuses_released_buffers() {
        let pool = CountingPool::new(true);
        let scratch: ScratchPool<u64> = ScratchPool::new(&pool, 2);
        let before = pool.live_allocations();

        let a = scratch.fetch(&pool);
        let b = scratch.fetch(&pool);
        assert_eq!(pool.live_allocations(), before);
        scratch.release(a);
        scratch.release(b);

        let c = scratch.fetch(&pool);
        assert!(c == a || c == b);
        scratch.release(c);

        scratch.drain(&pool);
        assert!(pool.has_no_leaks());
    }

    #[test]
    fn dry_pool_falls_back_to_the_capability() {
        let pool = CountingPool::new(true);
        let scratch: ScratchPool<u64> = ScratchPool::new(&pool, 1);

        let a = scratch.fetch(&pool);
        let b = scratch.fetch(&pool); // pool is dry, fresh allocation
        assert_ne!(a, b);

        scratch.release(a);
        scratch.release(b);
        scratch.drain(&pool);
        assert!(pool.has_no_leaks());
    }
}
