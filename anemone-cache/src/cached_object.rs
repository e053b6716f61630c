use std::ops::Deref;

use anemone_remote::RemotePtr;

/// An owned snapshot of a remote object plus the pointer it was read from.
///
/// Mutators CAS against fields of [`remote_origin`](Self::remote_origin) and
/// invalidate that origin before returning; the snapshot itself stays valid
/// for as long as the holder keeps it.
pub struct CachedObject<T> {
    origin: RemotePtr<T>,
    snapshot: T,
}

impl<T> CachedObject<T> {
    pub(crate) fn new(origin: RemotePtr<T>, snapshot: T) -> Self {
        CachedObject { origin, snapshot }
    }

    /// The pointer this snapshot was read through (delete mark stripped,
    /// cached hint preserved).
    #[inline]
    pub fn remote_origin(&self) -> RemotePtr<T> {
        self.origin
    }
}

impl<T> Deref for CachedObject<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.snapshot
    }
}

/// A snapshot of `n` contiguous remote objects.
pub struct CachedSlice<T> {
    origin: RemotePtr<T>,
    snapshots: Vec<T>,
}

impl<T> CachedSlice<T> {
    pub(crate) fn new(origin: RemotePtr<T>, snapshots: Vec<T>) -> Self {
        CachedSlice { origin, snapshots }
    }

    #[inline]
    pub fn remote_origin(&self) -> RemotePtr<T> {
        self.origin
    }
}

impl<T> Deref for CachedSlice<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        &self.snapshots
    }
}
