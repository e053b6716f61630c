use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_queue::SegQueue;
use log::debug;

use anemone_remote::{MemoryCapability, RemoteObject, RemotePtr};

use crate::limbo::LimboLists;

// Epoch advance is attempted once per this many match_version calls, so the
// all-threads scan stays off the per-operation fast path. The maintenance
// worker passes `urgent` to attempt on every sweep.
const ADVANCE_STRIDE: u32 = 100;

struct ThreadSlot<T> {
    local_epoch: AtomicU64,
    limbo: Arc<LimboLists<T>>,
    free: SegQueue<RemotePtr<T>>,
}

impl<T> ThreadSlot<T> {
    fn new(epoch: u64) -> Self {
        ThreadSlot {
            local_epoch: AtomicU64::new(epoch),
            limbo: Arc::new(LimboLists::new()),
            free: SegQueue::new(),
        }
    }
}

/// Shared epoch state for one family of remote objects.
///
/// Each participating thread registers once and works through its
/// [`EbrHandle`]; the pool itself only coordinates the global epoch and the
/// per-thread slots.
pub struct EbrPool<T> {
    global_epoch: AtomicU64,
    slots: Mutex<Vec<Arc<ThreadSlot<T>>>>,
}

impl<T: RemoteObject> EbrPool<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(EbrPool {
            global_epoch: AtomicU64::new(0),
            slots: Mutex::new(Vec::new()),
        })
    }

    /// Bind the calling thread to a fresh slot.
    pub fn register_thread(pool: &Arc<Self>) -> EbrHandle<T> {
        let slot = Arc::new(ThreadSlot::new(pool.global_epoch.load(Ordering::Acquire)));
        pool.slots.lock().unwrap().push(Arc::clone(&slot));
        EbrHandle {
            pool: Arc::clone(pool),
            slot,
            op_count: AtomicU32::new(0),
        }
    }

    /// The current global epoch.
    pub fn global_epoch(&self) -> u64 {
        self.global_epoch.load(Ordering::Acquire)
    }

    /// Limbo handles of every registered thread, in registration order.
    /// The maintenance worker distributes unlinked nodes across these.
    pub fn limbo_handles(&self) -> Vec<Arc<LimboLists<T>>> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .map(|slot| Arc::clone(&slot.limbo))
            .collect()
    }

    /// Advance the global epoch if every registered thread has observed the
    /// current one, rotating all limbo generations. Returns true on advance.
    fn try_advance(&self) -> bool {
        let epoch = self.global_epoch.load(Ordering::Acquire);
        let slots = self.slots.lock().unwrap();
        if !slots
            .iter()
            .all(|slot| slot.local_epoch.load(Ordering::Acquire) >= epoch)
        {
            return false;
        }
        if self
            .global_epoch
            .compare_exchange(epoch, epoch + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another coordinator advanced for us.
            return false;
        }
        let new_epoch = epoch + 1;
        for slot in slots.iter() {
            slot.limbo.drain_expired(new_epoch, &slot.free);
        }
        debug!("epoch advanced to {}", new_epoch);
        true
    }

    /// Return every pooled and in-limbo pointer to the capability.
    ///
    /// Quiescent-only: no thread may still be operating through a handle.
    pub fn destroy<C: MemoryCapability>(&self, cap: &C) {
        let slots = self.slots.lock().unwrap();
        for slot in slots.iter() {
            for ptr in slot.limbo.drain_all() {
                cap.deallocate(ptr, 1);
            }
            while let Some(ptr) = slot.free.pop() {
                cap.deallocate(ptr, 1);
            }
        }
    }
}

/// One thread's view of an [`EbrPool`]: allocation, retirement, and epoch
/// publication. Not shared across threads; each thread registers its own.
pub struct EbrHandle<T> {
    pool: Arc<EbrPool<T>>,
    slot: Arc<ThreadSlot<T>>,
    op_count: AtomicU32,
}

impl<T: RemoteObject> EbrHandle<T> {
    /// Pop a reclaimed pointer if one has aged out, else allocate fresh.
    pub fn allocate<C: MemoryCapability>(&self, cap: &C) -> RemotePtr<T> {
        self.slot
            .free
            .pop()
            .unwrap_or_else(|| cap.allocate::<T>(1))
    }

    /// Hand a no-longer-reachable pointer to the reclaimer. At most once per
    /// allocated pointer per lifecycle.
    pub fn retire(&self, ptr: RemotePtr<T>) {
        self.slot
            .limbo
            .retire_at(self.pool.global_epoch(), ptr);
    }

    /// Return an unused just-allocated pointer straight to the free pool
    /// (a speculative insert lost its CAS; the node was never published).
    pub fn requeue(&self, ptr: RemotePtr<T>) {
        debug_assert!(!ptr.is_null(), "requeueing a null pointer");
        self.slot.free.push(ptr);
    }

    /// Publish that this thread has observed the current epoch; called once
    /// per top-level operation. Attempts a global advance every
    /// `ADVANCE_STRIDE` calls, or always when `urgent`.
    pub fn match_version(&self, urgent: bool) {
        let epoch = self.pool.global_epoch();
        self.slot.local_epoch.store(epoch, Ordering::Release);
        let count = self.op_count.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if urgent || count % ADVANCE_STRIDE == 0 {
            self.pool.try_advance();
        }
    }

    /// This thread's limbo handle (shared with the maintenance worker).
    pub fn limbo(&self) -> Arc<LimboLists<T>> {
        Arc::clone(&self.slot.limbo)
    }

    /// The pool this handle belongs to.
    pub fn pool(&self) -> &Arc<EbrPool<T>> {
        &self.pool
    }

    /// The global epoch as of now.
    pub fn global_epoch(&self) -> u64 {
        self.pool.global_epoch()
    }
}

/// A second object family whose reclamation piggy-backs on a primary pool's
/// epoch, tying the lifetimes of two related node families together. The
/// companion never advances the epoch itself; each handle rotates its own
/// generations when it notices the primary has advanced.
pub struct EbrPoolAccompany<T, P> {
    primary: Arc<EbrPool<P>>,
    slots: Mutex<Vec<Arc<ThreadSlot<T>>>>,
}

impl<T: RemoteObject, P: RemoteObject> EbrPoolAccompany<T, P> {
    pub fn new(primary: &Arc<EbrPool<P>>) -> Arc<Self> {
        Arc::new(EbrPoolAccompany {
            primary: Arc::clone(primary),
            slots: Mutex::new(Vec::new()),
        })
    }

    pub fn register_thread(pool: &Arc<Self>) -> AccompanyHandle<T, P> {
        let epoch = pool.primary.global_epoch();
        let slot = Arc::new(ThreadSlot::new(epoch));
        pool.slots.lock().unwrap().push(Arc::clone(&slot));
        AccompanyHandle {
            pool: Arc::clone(pool),
            slot,
            seen_epoch: AtomicU64::new(epoch),
        }
    }

    pub fn destroy<C: MemoryCapability>(&self, cap: &C) {
        let slots = self.slots.lock().unwrap();
        for slot in slots.iter() {
            for ptr in slot.limbo.drain_all() {
                cap.deallocate(ptr, 1);
            }
            while let Some(ptr) = slot.free.pop() {
                cap.deallocate(ptr, 1);
            }
        }
    }
}

/// Per-thread handle to an [`EbrPoolAccompany`].
pub struct AccompanyHandle<T, P> {
    pool: Arc<EbrPoolAccompany<T, P>>,
    slot: Arc<ThreadSlot<T>>,
    seen_epoch: AtomicU64,
}

impl<T: RemoteObject, P: RemoteObject> AccompanyHandle<T, P> {
    pub fn allocate<C: MemoryCapability>(&self, cap: &C) -> RemotePtr<T> {
        self.slot
            .free
            .pop()
            .unwrap_or_else(|| cap.allocate::<T>(1))
    }

    pub fn retire(&self, ptr: RemotePtr<T>) {
        self.slot
            .limbo
            .retire_at(self.pool.primary.global_epoch(), ptr);
    }

    pub fn requeue(&self, ptr: RemotePtr<T>) {
        self.slot.free.push(ptr);
    }

    /// Rotate this slot's generations if the primary epoch has advanced
    /// since the last call. The primary's own threads drive the advance.
    pub fn match_version(&self) {
        let epoch = self.pool.primary.global_epoch();
        let seen = self.seen_epoch.swap(epoch, Ordering::AcqRel);
        if epoch > seen {
            self.slot.limbo.drain_expired(epoch, &self.slot.free);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anemone_remote::CountingPool;

    #[test]
    fn requeue_returns_a_pointer_immediately() {
        let cap = CountingPool::new(true);
        let pool: Arc<EbrPool<u64>> = EbrPool::new();
        let handle = EbrPool::register_thread(&pool);

        let p = handle.allocate(&cap);
        handle.requeue(p);
        assert_eq!(handle.allocate(&cap), p);

        handle.requeue(p);
        pool.destroy(&cap);
        assert!(cap.has_no_leaks());
    }

    #[test]
    fn retired_pointer_needs_two_advances() {
        let cap = CountingPool::new(true);
        let pool: Arc<EbrPool<u64>> = EbrPool::new();
        let handle = EbrPool::register_thread(&pool);

        let p = handle.allocate(&cap);
        handle.retire(p);

        // One advance: still in limbo.
        handle.match_version(true);
        assert_eq!(pool.global_epoch(), 1);
        let q = handle.allocate(&cap);
        assert_ne!(q, p);
        handle.requeue(q);

        // Second advance: p has aged out and is allocatable again.
        handle.match_version(true);
        assert_eq!(pool.global_epoch(), 2);
        let mut reclaimed = Vec::new();
        loop {
            let r = handle.allocate(&cap);
            reclaimed.push(r);
            if r == p {
                break;
            }
            assert!(reclaimed.len() <= 2, "retired pointer never reclaimed");
        }

        for r in reclaimed {
            handle.requeue(r);
        }
        pool.destroy(&cap);
        assert!(cap.has_no_leaks());
    }

    #[test]
    fn lagging_thread_blocks_the_advance() {
        let cap = CountingPool::new(true);
        let pool: Arc<EbrPool<u64>> = EbrPool::new();
        let fast = EbrPool::register_thread(&pool);
        let slow = EbrPool::register_thread(&pool);

        // Both slots start at epoch 0, so the first urgent call advances.
        fast.match_version(true);
        assert_eq!(pool.global_epoch(), 1);

        // slow has not observed epoch 1 yet: no further advance.
        fast.match_version(true);
        fast.match_version(true);
        assert_eq!(pool.global_epoch(), 1);

        slow.match_version(true);
        assert_eq!(pool.global_epoch(), 2);

        pool.destroy(&cap);
        assert!(cap.has_no_leaks());
    }

    #[test]
    fn worker_can_retire_into_another_threads_limbo() {
        let cap = CountingPool::new(true);
        let pool: Arc<EbrPool<u64>> = EbrPool::new();
        let handle = EbrPool::register_thread(&pool);

        let p = handle.allocate(&cap);
        let queues = pool.limbo_handles();
        assert_eq!(queues.len(), 1);
        queues[0].retire_at(pool.global_epoch(), p);
        assert_eq!(queues[0].len(), 1);

        handle.match_version(true);
        handle.match_version(true);
        assert!(queues[0].is_empty());
        assert_eq!(handle.allocate(&cap), p);

        handle.requeue(p);
        pool.destroy(&cap);
        assert!(cap.has_no_leaks());
    }

    #[test]
    fn companion_rotates_on_the_primary_epoch() {
        let cap = CountingPool::new(true);
        let primary: Arc<EbrPool<u64>> = EbrPool::new();
        let companion: Arc<EbrPoolAccompany<u32, u64>> = EbrPoolAccompany::new(&primary);

        let main = EbrPool::register_thread(&primary);
        let side = EbrPoolAccompany::register_thread(&companion);

        let p = side.allocate(&cap);
        side.retire(p);

        main.match_version(true);
        side.match_version();
        let q = side.allocate(&cap);
        assert_ne!(q, p);
        side.requeue(q);

        main.match_version(true);
        side.match_version();
        let mut found = false;
        for _ in 0..2 {
            let r = side.allocate(&cap);
            if r == p {
                found = true;
                side.requeue(r);
                break;
            }
            side.requeue(r);
        }
        assert!(found, "companion pointer never aged out");

        companion.destroy(&cap);
        primary.destroy(&cap);
        assert!(cap.has_no_leaks());
    }
}
