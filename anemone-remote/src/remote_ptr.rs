// Tagged remote pointer using bit 0 and bit 63 as flag bits.
//
// Word layout:
//   Bit 63:     CACHED_HINT - target is eligible for the local node cache
//   Bits 48-62: owner process id (15 bits)
//   Bits 0-47:  byte address inside the owner's registered region
//   Bit 0:      DELETE_MARK - the pointed-to node is scheduled for removal
//               at the level holding this word; nothing may be inserted
//               behind it
//
// The delete mark can share bit 0 with the address because remote objects
// are at least 8-byte aligned. `address()` and `id()` always return the
// flag-free components, so a marked or hinted pointer still dereferences
// and re-targets correctly; only `raw()` exposes the flags, and only CAS
// call sites compare raw words.

use std::fmt;
use std::marker::PhantomData;

const DELETE_MARK: u64 = 1;
const CACHED_HINT: u64 = 1 << 63;
const ADDRESS_MASK: u64 = (1 << 48) - 1;
const ID_SHIFT: u32 = 48;
const ID_MASK: u64 = 0x7fff;

/// A 64-bit word identifying an object in some process's remote region.
pub struct RemotePtr<T> {
    raw: u64,
    _marker: PhantomData<fn(T) -> T>,
}

// Manual impls to avoid requiring T: Copy/Clone
impl<T> Copy for RemotePtr<T> {}

impl<T> Clone for RemotePtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for RemotePtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for RemotePtr<T> {}

impl<T> std::hash::Hash for RemotePtr<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for RemotePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RemotePtr(id={}, addr={:#x}{}{})",
            self.id(),
            self.address(),
            if self.is_marked() { ", marked" } else { "" },
            if self.has_hint() { ", hinted" } else { "" },
        )
    }
}

impl<T> RemotePtr<T> {
    // =========================================================================
    // Construction
    // =========================================================================

    /// The null pointer (id 0, address 0, no flags).
    #[inline]
    pub const fn null() -> Self {
        RemotePtr {
            raw: 0,
            _marker: PhantomData,
        }
    }

    /// Build a pointer from an owner id and a byte address.
    #[inline]
    pub fn new(id: u16, address: u64) -> Self {
        debug_assert_eq!(address & !ADDRESS_MASK, 0, "address exceeds 48 bits");
        debug_assert_eq!(u64::from(id) & !ID_MASK, 0, "id exceeds 15 bits");
        RemotePtr {
            raw: (u64::from(id) << ID_SHIFT) | address,
            _marker: PhantomData,
        }
    }

    /// Reconstitute a pointer from a raw word, flags included.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        RemotePtr {
            raw,
            _marker: PhantomData,
        }
    }

    // =========================================================================
    // Extraction
    // =========================================================================

    /// The raw word, flags included (the value CAS call sites compare).
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.raw
    }

    /// The flag-free word: id and address only.
    #[inline]
    pub const fn canonical(&self) -> u64 {
        self.raw & !(DELETE_MARK | CACHED_HINT)
    }

    /// Owner process id.
    #[inline]
    pub const fn id(&self) -> u16 {
        ((self.raw >> ID_SHIFT) & ID_MASK) as u16
    }

    /// Byte address inside the owner's region, without flag bits.
    #[inline]
    pub const fn address(&self) -> u64 {
        self.raw & ADDRESS_MASK & !DELETE_MARK
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        self.canonical() == 0
    }

    // =========================================================================
    // Delete mark (bit 0)
    // =========================================================================

    #[inline]
    pub const fn mark(&self) -> Self {
        RemotePtr {
            raw: self.raw | DELETE_MARK,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn unmark(&self) -> Self {
        RemotePtr {
            raw: self.raw & !DELETE_MARK,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn is_marked(&self) -> bool {
        self.raw & DELETE_MARK != 0
    }

    // =========================================================================
    // Cached hint (bit 63, advisory)
    // =========================================================================

    #[inline]
    pub const fn with_hint(&self) -> Self {
        RemotePtr {
            raw: self.raw | CACHED_HINT,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn strip_hint(&self) -> Self {
        RemotePtr {
            raw: self.raw & !CACHED_HINT,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn has_hint(&self) -> bool {
        self.raw & CACHED_HINT != 0
    }

    // =========================================================================
    // Retargeting
    // =========================================================================

    /// Reinterpret the target type. Flags are preserved.
    #[inline]
    pub const fn cast<U>(&self) -> RemotePtr<U> {
        RemotePtr {
            raw: self.raw,
            _marker: PhantomData,
        }
    }

    /// A word-sized CAS target at `byte_offset` into the pointed-to object.
    /// Flags are dropped; the result addresses the field itself.
    #[inline]
    pub fn field(&self, byte_offset: usize) -> RemotePtr<u64> {
        RemotePtr::new(self.id(), self.address() + byte_offset as u64)
    }

    /// The `n`-th element of a contiguous array starting at this pointer.
    #[inline]
    pub fn element(&self, n: usize) -> Self {
        RemotePtr::new(self.id(), self.address() + (n * std::mem::size_of::<T>()) as u64)
    }

    // =========================================================================
    // Local dereference
    // =========================================================================

    /// Dereference the address as local memory.
    ///
    /// # Safety
    /// The address must be mapped in this process (a capability snapshot, a
    /// scratch buffer, or an `is_local` allocation) and contain an
    /// initialized `T`.
    #[inline]
    pub unsafe fn deref(&self) -> &T {
        unsafe { &*(self.address() as *const T) }
    }

    /// Mutable local dereference; same contract as [`deref`](Self::deref),
    /// plus exclusive access.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub unsafe fn deref_mut(&self) -> &mut T {
        unsafe { &mut *(self.address() as *mut T) }
    }
}
