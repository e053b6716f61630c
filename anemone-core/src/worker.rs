//! The maintenance worker: one long-running task per process that finishes
//! what mutators start. Mutators only flip a node's value to the delete
//! sentinel; the worker claims such nodes for unlinking, dismantles their
//! towers, and hands the memory to the epoch reclaimer. It also promotes
//! freshly inserted nodes to their target height, so mutator inserts stay
//! a single CAS.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anemone_epoch::LimboLists;
use anemone_remote::MemoryCapability;

use crate::key::Key;
use crate::node::{Node, DELETE_SENTINEL, MAX_HEIGHT, UNLINK_SENTINEL};
use crate::skip_list::SkipList;

/// What one pass over the data levels accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Nodes claimed, unlinked, and handed to the reclaimer.
    pub unlinked: usize,
    /// Nodes promoted to their target height (or finalised at height 1).
    pub promoted: usize,
}

impl<K: Key, C: MemoryCapability> SkipList<K, C> {
    /// One maintenance pass: walk every sub-list's data level, unlinking
    /// logically deleted nodes whose towers are complete and promoting
    /// nodes that have not been indexed yet.
    ///
    /// Unlinked nodes are retired into `queues` (one entry per registered
    /// thread) in round-robin, continuing from `*cursor`.
    pub fn sweep(
        &self,
        cap: &C,
        queues: &[Arc<LimboLists<Node<K>>>],
        cursor: &mut usize,
    ) -> SweepStats {
        assert!(!queues.is_empty(), "no reclamation queues to sweep into");
        let buf = self.scratch_fetch(cap);
        let mut stats = SweepStats::default();

        for root_index in 0..self.roots().len() {
            let root = self.roots()[root_index];
            let mut curr = self.cache().read(cap, root, Some(buf), -1);
            while !curr.next[0].unmark().is_null() {
                let next = curr.next[0].unmark();
                let below = MAX_HEIGHT as i32 - curr.height as i32;
                curr = self.cache().read(cap, next, Some(buf), below);
                let origin = curr.remote_origin();

                if curr.value == DELETE_SENTINEL && curr.link_level == curr.height {
                    // Claim the unlink. Losing this CAS means the node was
                    // revived or another sweep got here first; skip it.
                    let value_ptr = Node::value_ptr(origin);
                    let old = cap.compare_and_swap(value_ptr, DELETE_SENTINEL, UNLINK_SENTINEL);
                    if old != DELETE_SENTINEL {
                        continue;
                    }
                    self.cache().invalidate(origin);
                    self.unlink_node(cap, curr.key);
                    self.cache().invalidate(origin);
                    curr = self.cache().read(cap, origin, Some(buf), below);

                    queues[*cursor].retire_at(self.ebr().global_epoch(), origin.strip_hint());
                    *cursor = (*cursor + 1) % queues.len();
                    stats.unlinked += 1;
                } else if curr.value == UNLINK_SENTINEL {
                    // Another participant owns this unlink; move on.
                    continue;
                } else if curr.link_level == 0 {
                    // Unclaimed tower: claim it, then install the levels.
                    // Height-1 nodes only need the claim to become indexed.
                    let link_ptr = Node::link_level_ptr(origin);
                    let old = cap.compare_and_swap(link_ptr, 0, 1);
                    if old == 0 {
                        self.cache().invalidate(origin);
                        if curr.height > 1 {
                            self.raise_node(cap, curr.key, curr.height);
                            self.cache().invalidate(origin);
                        }
                        curr = self.cache().read(cap, origin, Some(buf), below);
                        stats.promoted += 1;
                    }
                }
            }
        }

        self.scratch_release(buf);
        stats
    }

    /// Worker entry point: sweep until `run` is cleared, publishing this
    /// thread's epoch after every pass so reclamation keeps advancing.
    pub fn helper_thread(
        &self,
        cap: &C,
        run: &AtomicBool,
        queues: &[Arc<LimboLists<Node<K>>>],
    ) {
        let mut cursor = 0;
        while run.load(Ordering::Acquire) {
            self.sweep(cap, queues, &mut cursor);
            self.ebr().match_version(true);
        }
    }
}
