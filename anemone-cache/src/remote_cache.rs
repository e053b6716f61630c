use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use log::{debug, info};

use anemone_remote::{MemoryCapability, RemoteObject, RemotePtr};

use crate::cached_object::{CachedObject, CachedSlice};

const SHARD_COUNT: usize = 64;

/// Snapshot of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub invalidations: u64,
}

/// Per-process coherent cache of remote object snapshots.
///
/// Entries are keyed by the canonical (flag-free) pointer word, so a marked
/// or hinted pointer and its clean form always address the same line. Reads
/// are gated twice: by the pointer's cached-hint bit (a pointer published
/// without the hint is never looked up) and by the caller's cacheability
/// level (levels at or below the depth threshold bypass the cache).
///
/// Coherence discipline: a mutator that CASes a field of a node invalidates
/// that node's line before its operation returns. CASes performed by other
/// processes are observed lazily - the stale snapshot makes the local CAS
/// fail, and the retry refills the line.
pub struct RemoteCache<C: MemoryCapability> {
    shards: Vec<Mutex<HashMap<u64, Box<[u8]>>>>,
    depth_threshold: i32,
    root: RemotePtr<u64>,
    peer_roots: Mutex<Vec<u64>>,
    master: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
    invalidations: AtomicU64,
    _capability: PhantomData<C>,
}

impl<C: MemoryCapability> RemoteCache<C> {
    /// Create a cache whose identity word lives in `cap`'s region.
    ///
    /// Levels `<= depth_threshold` are never cached; `-1` caches every
    /// hinted line while keeping sentinel reads (issued at level `-1`)
    /// read-through.
    pub fn new(cap: &C, depth_threshold: i32) -> Self {
        let root = cap.allocate::<u64>(1);
        cap.write(root, 0u64, None);
        RemoteCache {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            depth_threshold,
            root,
            peer_roots: Mutex::new(Vec::new()),
            master: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            bypasses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
            _capability: PhantomData,
        }
    }

    #[inline]
    fn shard(&self, key: u64) -> &Mutex<HashMap<u64, Box<[u8]>>> {
        let idx = (key.wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 58) as usize & (SHARD_COUNT - 1);
        &self.shards[idx]
    }

    fn read_through<T: RemoteObject>(
        &self,
        cap: &C,
        ptr: RemotePtr<T>,
        scratch: Option<RemotePtr<T>>,
    ) -> T {
        let snapshot = cap.read(ptr, scratch);
        let value = unsafe { *snapshot.deref() };
        if scratch.is_none() {
            cap.deallocate(snapshot, 1);
        }
        value
    }

    /// Read a snapshot of `*ptr`, consulting the cache when the pointer is
    /// hinted and `cacheability_level` is above the depth threshold.
    ///
    /// The returned object's `remote_origin` is `ptr` with the delete mark
    /// stripped; mutators CAS against its fields and must `invalidate` it
    /// afterwards.
    pub fn read<T: RemoteObject>(
        &self,
        cap: &C,
        ptr: RemotePtr<T>,
        scratch: Option<RemotePtr<T>>,
        cacheability_level: i32,
    ) -> CachedObject<T> {
        debug_assert!(!ptr.is_null(), "reading through a null pointer");
        let origin = ptr.unmark();

        if cacheability_level <= self.depth_threshold || !ptr.has_hint() {
            self.bypasses.fetch_add(1, Ordering::Relaxed);
            let value = self.read_through(cap, origin, scratch);
            return CachedObject::new(origin, value);
        }

        let key = ptr.canonical();
        let mut shard = self.shard(key).lock().unwrap();
        if let Some(bytes) = shard.get(&key) {
            debug_assert_eq!(bytes.len(), std::mem::size_of::<T>());
            self.hits.fetch_add(1, Ordering::Relaxed);
            let value = unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) };
            return CachedObject::new(origin, value);
        }

        // Miss: fill under the shard lock so concurrent readers of this line
        // observe one linearised fill.
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = self.read_through(cap, origin, scratch);
        let bytes = unsafe {
            std::slice::from_raw_parts(&value as *const T as *const u8, std::mem::size_of::<T>())
        };
        shard.insert(key, bytes.to_vec().into_boxed_slice());
        CachedObject::new(origin, value)
    }

    /// Snapshot `count` contiguous objects starting at `ptr`. Never cached;
    /// used for one-shot reads of the root header array.
    pub fn extended_read<T: RemoteObject>(
        &self,
        cap: &C,
        ptr: RemotePtr<T>,
        count: usize,
    ) -> CachedSlice<T> {
        debug_assert!(!ptr.is_null(), "reading through a null pointer");
        let origin = ptr.unmark();
        let snapshot = cap.extended_read(origin, count, None);
        let values = (0..count)
            .map(|i| unsafe { *snapshot.element(i).deref() })
            .collect();
        cap.deallocate(snapshot, count);
        CachedSlice::new(origin, values)
    }

    /// Evict the line for `ptr` (any flag state).
    pub fn invalidate<T>(&self, ptr: RemotePtr<T>) {
        let key = ptr.canonical();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.shard(key).lock().unwrap().remove(&key);
    }

    /// The capability-allocated word identifying this cache to its peers.
    pub fn root(&self) -> RemotePtr<u64> {
        self.root
    }

    /// Record the peer caches' identity words once the bootstrap exchange
    /// has gathered them all.
    pub fn init(&self, peer_roots: Vec<u64>, expected_peers: usize) {
        assert_eq!(
            peer_roots.len(),
            expected_peers,
            "bootstrap exchange delivered {} peer roots, expected {}",
            peer_roots.len(),
            expected_peers
        );
        info!("cache joined a group of {} peers", expected_peers + 1);
        *self.peer_roots.lock().unwrap() = peer_roots;
    }

    /// Designate the calling process as the one-time directory owner.
    /// Returns true for the first claimant only.
    pub fn claim_master(&self) -> bool {
        self.master
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            bypasses: self.bypasses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Release the identity word and log the final counters.
    pub fn destroy(&self, cap: &C) {
        let stats = self.stats();
        debug!(
            "cache destroyed: {} hits, {} misses, {} bypasses, {} invalidations",
            stats.hits, stats.misses, stats.bypasses, stats.invalidations
        );
        cap.deallocate(self.root, 1);
    }
}
