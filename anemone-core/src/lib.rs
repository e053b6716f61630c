//! A distributed, lock-free skip list over one-sided remote memory.
//!
//! # Organization
//!
//! - [`skip_list`] - the engine: traversal, insert/remove/contains, the
//!   two-phase removal protocol, and tower promotion
//! - [`worker`] - the per-process maintenance task completing unlinks and
//!   promotions
//! - [`node`] - remote node layout and the reserved value sentinels
//! - [`key`] - the ordered key domain seam
//! - [`common_tests`] - shared fixtures for the integration suites
//!
//! Every participant - local threads and remote processes alike - mutates
//! the structure exclusively through word-sized CAS on shared node fields.
//! Reads go through a per-process coherent cache (`anemone-cache`), and
//! node memory is recycled through per-thread epoch limbo lists
//! (`anemone-epoch`).
//!
//! # Usage
//!
//! ```ignore
//! let mut list = SkipList::<u64, _>::new(&cap, self_id, 0, -1, cache, ebr);
//! let root = list.init_as_first(&cap);   // one process
//! // ... hand `root` to the other processes, which init_from_pointer(root)
//! list.insert(&cap, 5, 50);
//! assert_eq!(list.contains(&cap, 5), Some(50));
//! ```

pub mod common_tests;
pub mod key;
pub mod node;
pub mod skip_list;
pub mod worker;

pub use key::Key;
pub use node::{Node, RootEntry, DELETE_SENTINEL, MAX_HEIGHT, UNLINK_SENTINEL};
pub use skip_list::SkipList;
pub use worker::SweepStats;
