//! Client-side coherent cache of remote node snapshots.
//!
//! Every traversal hop of the collections goes through [`RemoteCache::read`];
//! every successful CAS is followed by [`RemoteCache::invalidate`] on the
//! modified line. Remote CASes are observed lazily: a stale snapshot makes
//! the next CAS fail (it compares against the stale word), the mutator
//! retries through a fresh read, and the line is refilled.

pub mod cached_object;
pub mod remote_cache;

pub use cached_object::{CachedObject, CachedSlice};
pub use remote_cache::{CacheStats, RemoteCache};
