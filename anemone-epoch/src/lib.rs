//! Epoch-based reclamation for remotely shared nodes.
//!
//! A node physically unlinked by one participant may still be dereferenced
//! by another whose traversal snapshot predates the unlink. Retired pointers
//! therefore sit in per-thread [`LimboLists`] - three generations - and only
//! become allocatable again after every registered thread has observed two
//! further epoch advances, which bounds the lifetime of any borrowed
//! snapshot (each top-level operation publishes its epoch exactly once).

pub mod limbo;
pub mod pool;

pub use limbo::LimboLists;
pub use pool::{EbrHandle, EbrPool, EbrPoolAccompany};
