//! The one-sided memory capability seam.
//!
//! Every remote interaction of the collections - allocation, snapshot reads,
//! bulk writes, and word-sized CAS - goes through [`MemoryCapability`]. The
//! engine is written once against this trait and instantiated with either a
//! real remote-memory capability or the in-process
//! [`CountingPool`](crate::CountingPool) used by the test suites.

use crate::remote_ptr::RemotePtr;

/// Marker for types that may live in a remote region.
///
/// Remote objects are plain bytes: fixed layout, no destructor, no interior
/// references into the local address space.
pub trait RemoteObject: Copy + Send + Sync + 'static {}

impl<T: Copy + Send + Sync + 'static> RemoteObject for T {}

/// One-sided access to remotely addressable memory.
///
/// Contract assumed by the collections:
///
/// * `allocate` returns memory aligned for `T`, tagged with the owning
///   process id.
/// * `read` copies the current target bytes into `scratch` (or a fresh
///   allocation when `None`) and returns a locally dereferenceable pointer;
///   the snapshot stays stable until the caller discards it.
/// * `compare_and_swap` on a well-aligned 8-byte word is globally atomic
///   and totally ordered with every other CAS on the same address, and
///   returns the pre-swap word.
/// * `is_local` is a performance hint only; correctness never depends on it.
/// * `deallocate` is sound only once the caller has proven the region
///   quiescent (the epoch reclaimer provides that proof).
pub trait MemoryCapability: Send + Sync + 'static {
    fn allocate<T: RemoteObject>(&self, count: usize) -> RemotePtr<T>;

    fn deallocate<T: RemoteObject>(&self, ptr: RemotePtr<T>, count: usize);

    fn read<T: RemoteObject>(
        &self,
        ptr: RemotePtr<T>,
        scratch: Option<RemotePtr<T>>,
    ) -> RemotePtr<T> {
        self.extended_read(ptr, 1, scratch)
    }

    fn extended_read<T: RemoteObject>(
        &self,
        ptr: RemotePtr<T>,
        count: usize,
        scratch: Option<RemotePtr<T>>,
    ) -> RemotePtr<T>;

    fn write<T: RemoteObject>(&self, dst: RemotePtr<T>, value: T, scratch: Option<RemotePtr<T>>);

    /// Returns the pre-swap word.
    fn compare_and_swap(&self, ptr: RemotePtr<u64>, expected: u64, swap: u64) -> u64;

    fn is_local<T>(&self, ptr: RemotePtr<T>) -> bool;
}
