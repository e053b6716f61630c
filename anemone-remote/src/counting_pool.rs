//! An in-process capability with allocation accounting.
//!
//! Backs the collections in tests: every allocation is recorded, every free
//! is checked against the record, and reads/writes/CAS are serialised so the
//! word-level CAS total order of the real capability holds here too.

use std::alloc::{alloc, dealloc, Layout};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::warn;

use crate::capability::{MemoryCapability, RemoteObject};
use crate::remote_ptr::RemotePtr;

/// In-process mock of the remote capability.
///
/// Deallocating an address that was never allocated, freeing twice, or
/// freeing with a mismatched size is an invariant violation and panics
/// immediately - the collections are correct only if none ever fires.
pub struct CountingPool {
    // address -> (layout of the live allocation)
    live: Mutex<HashMap<u64, Layout>>,
    total_allocations: AtomicU64,
    total_deallocations: AtomicU64,
    locality: bool,
}

impl CountingPool {
    /// `all_local` controls what `is_local` reports, steering the callers'
    /// local-write fast path without changing where the bytes live.
    pub fn new(all_local: bool) -> Self {
        CountingPool {
            live: Mutex::new(HashMap::new()),
            total_allocations: AtomicU64::new(0),
            total_deallocations: AtomicU64::new(0),
            locality: all_local,
        }
    }

    /// True when every allocation has been returned.
    pub fn has_no_leaks(&self) -> bool {
        self.live.lock().unwrap().is_empty()
    }

    /// Number of live allocations.
    pub fn live_allocations(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    /// Log the allocation counters and any still-live addresses.
    pub fn debug(&self) {
        warn!(
            "total allocations {}",
            self.total_allocations.load(Ordering::Relaxed)
        );
        warn!(
            "total deallocations {}",
            self.total_deallocations.load(Ordering::Relaxed)
        );
        for (addr, layout) in self.live.lock().unwrap().iter() {
            warn!("{:#x} ({} bytes) was not freed", addr, layout.size());
        }
    }
}

impl Default for CountingPool {
    fn default() -> Self {
        CountingPool::new(true)
    }
}

impl Drop for CountingPool {
    fn drop(&mut self) {
        // Return whatever the callers leaked so the process stays clean.
        let live = std::mem::take(&mut *self.live.lock().unwrap());
        for (addr, layout) in live {
            unsafe { dealloc(addr as *mut u8, layout) };
        }
    }
}

impl MemoryCapability for CountingPool {
    fn allocate<T: RemoteObject>(&self, count: usize) -> RemotePtr<T> {
        assert!(count > 0, "allocating zero objects");
        let layout = Layout::array::<T>(count).expect("allocation size overflow");
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        self.live.lock().unwrap().insert(ptr as u64, layout);
        RemotePtr::new(0, ptr as u64)
    }

    fn deallocate<T: RemoteObject>(&self, ptr: RemotePtr<T>, count: usize) {
        assert!(!ptr.is_null(), "deallocating a null pointer");
        let layout = Layout::array::<T>(count).expect("allocation size overflow");
        let mut live = self.live.lock().unwrap();
        let recorded = live.remove(&ptr.address());
        match recorded {
            None => panic!("double or foreign free at {:?}", ptr),
            Some(l) => assert_eq!(
                l,
                layout,
                "free at {:?} with wrong size (allocated {} bytes, freed {})",
                ptr,
                l.size(),
                layout.size()
            ),
        }
        self.total_deallocations.fetch_add(1, Ordering::Relaxed);
        unsafe { dealloc(ptr.address() as *mut u8, layout) };
    }

    fn extended_read<T: RemoteObject>(
        &self,
        ptr: RemotePtr<T>,
        count: usize,
        scratch: Option<RemotePtr<T>>,
    ) -> RemotePtr<T> {
        assert!(!ptr.is_null(), "reading through a null pointer");
        if let Some(s) = scratch {
            assert_ne!(s.address(), ptr.address(), "scratch aliases the read target");
        }
        let dst = scratch.unwrap_or_else(|| self.allocate::<T>(count));
        // Serialise with CAS so a snapshot never observes a half-applied swap.
        let _guard = self.live.lock().unwrap();
        unsafe {
            std::ptr::copy_nonoverlapping(
                ptr.address() as *const T,
                dst.address() as *mut T,
                count,
            );
        }
        dst
    }

    fn write<T: RemoteObject>(&self, dst: RemotePtr<T>, value: T, scratch: Option<RemotePtr<T>>) {
        assert!(!dst.is_null(), "writing through a null pointer");
        let _guard = self.live.lock().unwrap();
        unsafe {
            if let Some(s) = scratch {
                assert_ne!(s.address(), dst.address(), "scratch aliases the write target");
                *s.deref_mut() = value;
                *dst.deref_mut() = *s.deref();
            } else {
                *dst.deref_mut() = value;
            }
        }
    }

    fn compare_and_swap(&self, ptr: RemotePtr<u64>, expected: u64, swap: u64) -> u64 {
        assert!(!ptr.is_null(), "CAS through a null pointer");
        assert_eq!(ptr.address() % 8, 0, "CAS target is not word aligned");
        let _guard = self.live.lock().unwrap();
        unsafe {
            let prev = *ptr.deref();
            if prev == expected {
                *ptr.deref_mut() = swap;
            }
            prev
        }
    }

    fn is_local<T>(&self, _ptr: RemotePtr<T>) -> bool {
        self.locality
    }
}
