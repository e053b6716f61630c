//! Remote-memory primitives for the anemone collections.
//!
//! # Organization
//!
//! - [`remote_ptr`] - 64-bit tagged pointers into remotely accessible regions
//! - [`capability`] - the one-sided read/write/CAS capability seam
//! - [`counting_pool`] - an in-process capability with allocation accounting
//! - [`scratch`] - reusable preallocated read buffers
//!
//! Collections are generic over `C: MemoryCapability`, so the same engine
//! runs against real remote memory or against [`CountingPool`] in tests.

pub mod capability;
pub mod counting_pool;
pub mod remote_ptr;
pub mod scratch;

pub use capability::{MemoryCapability, RemoteObject};
pub use counting_pool::CountingPool;
pub use remote_ptr::RemotePtr;
pub use scratch::ScratchPool;
