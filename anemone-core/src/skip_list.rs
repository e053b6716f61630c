use std::sync::Arc;

use log::{debug, error};

use anemone_cache::{CachedObject, RemoteCache};
use anemone_epoch::EbrHandle;
use anemone_remote::{MemoryCapability, RemotePtr, ScratchPool};

use crate::key::Key;
use crate::node::{Node, RootEntry, DELETE_SENTINEL, MAX_HEIGHT, UNLINK_SENTINEL};

// =============================================================================
// REMOVAL PROTOCOL & DIVISION OF LABOUR
// =============================================================================
//
// The list is shared by every process through word-sized remote CAS; no
// participant ever holds a lock. Removal is split into phases owned by
// different parties:
//
//   remove()            value: v -> DELETE   (mutator, linearisation point)
//   sweep()             value: DELETE -> UNLINK   (maintenance worker claim)
//   unlink_node()       per level, top down:
//                         1. mark node.next[l]    (no insert behind the node)
//                         2. swing pred.next[l]   (node leaves the level)
//   limbo push          node ages two epochs, then returns to the free pool
//
// A key in state DELETE is still physically present, so an insert of the
// same key can CAS the value straight back to a user value and revive the
// node without allocation. Once the value reads UNLINK the node is doomed:
// traversals treat it as absent, inserts retry until the worker has cut it
// out.
//
// Level-0 is the authoritative membership set. Promotion of a fresh node to
// its full height is likewise worker-driven: publish at level 0 with
// link_level = 0, a sweep claims the node with a link_level 0 -> 1 CAS and
// installs the tower bottom-up, finishing with link_level = height.
//
// Every successful CAS by this process is followed by an invalidation of
// the affected cache line before the operation returns. CASes by other
// processes are observed lazily: the stale snapshot makes our next CAS on
// that line fail, and the retry re-reads through the cache.
//
// =============================================================================

// Bound on helping-unlink restarts per find; past it the traversal stops
// helping and lets the maintenance worker finish the unlink.
const HELP_RESTART_LIMIT: usize = 64;

// Safety net for the worker's unlink/raise CAS chains. On exhaustion the
// node is logged and abandoned; a later sweep re-attempts it.
const MAINTENANCE_RETRY_LIMIT: usize = 10_000;

// Scratch buffers seeded per instance: enough for the deepest call chain
// (find + helping fill + insert write) without touching the allocator.
const SCRATCH_SLOTS: usize = 7;

/// Per-level traversal frontier produced by `fill`: the predecessor, the
/// successor, and whether the key itself was met at each level.
struct Frontier<K: Key> {
    preds: [RemotePtr<Node<K>>; MAX_HEIGHT],
    succs: [RemotePtr<Node<K>>; MAX_HEIGHT],
    found: [bool; MAX_HEIGHT],
    prev_keys: [K; MAX_HEIGHT],
}

impl<K: Key> Frontier<K> {
    fn new() -> Self {
        Frontier {
            preds: [RemotePtr::null(); MAX_HEIGHT],
            succs: [RemotePtr::null(); MAX_HEIGHT],
            found: [false; MAX_HEIGHT],
            prev_keys: [K::MIN; MAX_HEIGHT],
        }
    }
}

/// A distributed lock-free skip list over one-sided remote memory.
///
/// Handles are per-thread: each participating thread constructs its own
/// `SkipList` against the shared cache and epoch pool, then either
/// [`init_as_first`](Self::init_as_first) or
/// [`init_from_pointer`](Self::init_from_pointer) binds it to the shared
/// structure. A fan-out degree `d` partitions the key range across `2^d`
/// independent head sentinels to relieve contention on a single head.
pub struct SkipList<K: Key, C: MemoryCapability> {
    self_id: u16,
    fanout: usize,
    cache_floor: i32,
    cache: Arc<RemoteCache<C>>,
    ebr: EbrHandle<Node<K>>,
    scratch: ScratchPool<Node<K>>,
    root_array: RemotePtr<RootEntry<K>>,
    roots: Vec<RemotePtr<Node<K>>>,
    key_lb: K,
    key_ub: K,
}

impl<K: Key, C: MemoryCapability> SkipList<K, C> {
    /// Create an unbound handle. `fanout_degree` selects `2^d` sub-lists;
    /// `cache_floor` is the height above which published pointers carry the
    /// cached hint (pass `MAX_HEIGHT as i32` to disable caching entirely).
    pub fn new(
        cap: &C,
        self_id: u16,
        fanout_degree: u32,
        cache_floor: i32,
        cache: Arc<RemoteCache<C>>,
        ebr: EbrHandle<Node<K>>,
    ) -> Self {
        let fanout = 1usize << fanout_degree;
        SkipList {
            self_id,
            fanout,
            cache_floor,
            cache,
            ebr,
            scratch: ScratchPool::new(cap, SCRATCH_SLOTS),
            root_array: RemotePtr::null(),
            roots: Vec::new(),
            key_lb: K::MIN,
            key_ub: K::MIN,
        }
    }

    /// The process id this handle was constructed for.
    pub fn self_id(&self) -> u16 {
        self.self_id
    }

    /// Number of independent sub-lists.
    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// The opaque pointer other processes pass to
    /// [`init_from_pointer`](Self::init_from_pointer). Null until one of the
    /// init methods has run.
    pub fn root_handle(&self) -> RemotePtr<RootEntry<K>> {
        self.root_array
    }

    /// Set the key bounds used for fan-out routing. Must cover every key
    /// subsequently routed when the fan-out degree is non-zero.
    pub fn set_key_range(&mut self, key_lb: K, key_ub: K) {
        assert!(key_lb < key_ub, "empty key range");
        self.key_lb = key_lb;
        self.key_ub = key_ub;
    }

    /// Allocate the head sentinels and the root header array. Exactly one
    /// process calls this; the returned pointer is handed to every other
    /// process for [`init_from_pointer`](Self::init_from_pointer).
    pub fn init_as_first(&mut self, cap: &C) -> RemotePtr<RootEntry<K>> {
        let array = cap.allocate::<RootEntry<K>>(self.fanout);
        let mut roots = Vec::with_capacity(self.fanout);
        for i in 0..self.fanout {
            let sentinel = cap.allocate::<Node<K>>(1);
            cap.write(sentinel, Node::sentinel(), None);
            cap.write(array.element(i), RootEntry { node: sentinel }, None);
            roots.push(self.decorate_root(sentinel));
        }
        self.root_array = array;
        self.roots = roots;
        array
    }

    /// Join a structure initialised elsewhere.
    pub fn init_from_pointer(&mut self, cap: &C, root_ptr: RemotePtr<RootEntry<K>>) {
        let entries = self.cache.extended_read(cap, root_ptr, self.fanout);
        self.roots = entries
            .iter()
            .map(|entry| self.decorate_root(entry.node))
            .collect();
        self.root_array = root_ptr;
    }

    fn decorate_root(&self, root: RemotePtr<Node<K>>) -> RemotePtr<Node<K>> {
        if self.cache_floor < MAX_HEIGHT as i32 {
            root.with_hint()
        } else {
            root
        }
    }

    /// The head sentinel whose sub-list covers `key`.
    fn root_for(&self, key: K) -> RemotePtr<Node<K>> {
        debug_assert!(!self.roots.is_empty(), "handle not initialised");
        if self.fanout == 1 {
            return self.roots[0];
        }
        let lb = self.key_lb.to_index();
        let ub = self.key_ub.to_index();
        debug_assert!(lb < ub, "fan-out routing without a key range");
        let k = key.to_index().clamp(lb, ub);
        let index = ((u128::from(k - lb) * self.fanout as u128) / u128::from(ub - lb)) as usize;
        self.roots[index.min(self.fanout - 1)]
    }

    #[inline]
    fn cacheability_below(pred: &Node<K>) -> i32 {
        MAX_HEIGHT as i32 - pred.height as i32
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Record the predecessor and successor of `key` at every level.
    /// Returns the frontier and the snapshot of the last node read (the
    /// key's node whenever `found[0]` is set).
    fn fill(
        &self,
        cap: &C,
        key: K,
        buf_a: RemotePtr<Node<K>>,
        buf_b: RemotePtr<Node<K>>,
    ) -> (Frontier<K>, Option<CachedObject<Node<K>>>) {
        let mut frontier = Frontier::new();
        let mut curr = self.cache.read(cap, self.root_for(key), Some(buf_a), -1);
        let mut last_read = None;
        let mut use_a = false;
        for level in (0..MAX_HEIGHT).rev() {
            loop {
                let next = curr.next[level].unmark();
                if next.is_null() {
                    frontier.preds[level] = curr.remote_origin();
                    frontier.prev_keys[level] = curr.key;
                    frontier.succs[level] = RemotePtr::null();
                    frontier.found[level] = false;
                    break;
                }
                let buf = if use_a { buf_a } else { buf_b };
                let next_curr = self.cache.read(cap, next, Some(buf), Self::cacheability_below(&curr));
                if next_curr.key < key {
                    curr = next_curr;
                    use_a = !use_a;
                    continue;
                }
                if next_curr.key == key {
                    frontier.preds[level] = curr.remote_origin();
                    frontier.prev_keys[level] = curr.key;
                    frontier.succs[level] = next_curr.next[level];
                    frontier.found[level] = true;
                } else {
                    frontier.preds[level] = curr.remote_origin();
                    frontier.prev_keys[level] = curr.key;
                    frontier.succs[level] = next_curr.remote_origin();
                    frontier.found[level] = false;
                }
                last_read = Some(next_curr);
                break;
            }
        }
        (frontier, last_read)
    }

    /// Descend to the last node with `node.key <= key`, reading every hop
    /// through the cache.
    ///
    /// With `for_insert`, a level-0 hop onto a predecessor whose forward
    /// pointer is delete-marked and whose value reads `UNLINK_SENTINEL`
    /// helps cut that predecessor out and restarts from the head (bounded;
    /// past the bound the worker is left to finish the job).
    fn find(&self, cap: &C, key: K, for_insert: bool) -> CachedObject<Node<K>> {
        let buf_a = self.scratch.fetch(cap);
        let buf_b = self.scratch.fetch(cap);
        let result = self.find_inner(cap, key, for_insert, buf_a, buf_b);
        self.scratch.release(buf_a);
        self.scratch.release(buf_b);
        result
    }

    fn find_inner(
        &self,
        cap: &C,
        key: K,
        for_insert: bool,
        buf_a: RemotePtr<Node<K>>,
        buf_b: RemotePtr<Node<K>>,
    ) -> CachedObject<Node<K>> {
        let mut restarts = 0;
        'restart: loop {
            let mut curr = self.cache.read(cap, self.root_for(key), Some(buf_a), -1);
            let mut use_a = false;
            for level in (0..MAX_HEIGHT).rev() {
                loop {
                    if curr.key == key {
                        return curr;
                    }
                    let next = curr.next[level].unmark();
                    if next.is_null() {
                        break;
                    }
                    let buf = if use_a { buf_a } else { buf_b };
                    let next_curr =
                        self.cache.read(cap, next, Some(buf), Self::cacheability_below(&curr));
                    if for_insert
                        && level == 0
                        && curr.next[0].is_marked()
                        && next_curr.key >= key
                        && curr.value == UNLINK_SENTINEL
                        && restarts < HELP_RESTART_LIMIT
                    {
                        // Inserting directly behind a half-unlinked node:
                        // help cut it out, then retry from the head.
                        restarts += 1;
                        self.nonblock_unlink_node(cap, curr.key, HELP_RESTART_LIMIT);
                        continue 'restart;
                    }
                    if next_curr.key <= key {
                        curr = next_curr;
                        use_a = !use_a;
                    } else {
                        break;
                    }
                }
            }
            return curr;
        }
    }

    /// Level-0-only unlink used by helping traversals: cuts a node whose
    /// tower is already dismantled (indexed nowhere above level 0) out of
    /// the data level. If the predecessor itself turns out to be marked,
    /// helps that predecessor first.
    fn nonblock_unlink_node(&self, cap: &C, key: K, fuel: usize) {
        if fuel == 0 {
            return;
        }
        let buf_a = self.scratch.fetch(cap);
        let buf_b = self.scratch.fetch(cap);
        let (frontier, node) = self.fill(cap, key, buf_a, buf_b);
        self.scratch.release(buf_a);
        self.scratch.release(buf_b);
        let Some(node) = node else { return };

        if !frontier.found[1] && frontier.found[0] && node.value == UNLINK_SENTINEL {
            let origin = node.remote_origin();
            debug_assert!(!frontier.preds[0].is_marked(), "marked predecessor");
            let dest = Node::level_ptr(frontier.preds[0], 0);
            let old = cap.compare_and_swap(dest, origin.raw(), frontier.succs[0].unmark().raw());
            if old == origin.raw() {
                self.cache.invalidate(frontier.preds[0]);
            } else if old == origin.mark().raw() {
                // The predecessor is being unlinked as well; it must go first.
                debug_assert!(
                    frontier.prev_keys[0] != key,
                    "node {:?} appears to precede itself",
                    key
                );
                self.nonblock_unlink_node(cap, frontier.prev_keys[0], fuel - 1);
            }
        }
    }

    // =========================================================================
    // Client operations
    // =========================================================================

    /// Look up `key`. Returns its value unless the key is absent or in
    /// either removal phase.
    pub fn contains(&self, cap: &C, key: K) -> Option<u64> {
        let node = self.find(cap, key, false);
        self.ebr.match_version(false);
        if node.key == key && node.value != DELETE_SENTINEL && node.value != UNLINK_SENTINEL {
            Some(node.value)
        } else {
            None
        }
    }

    /// Insert `key -> value`. Returns `None` on insertion, or the already
    /// present value on collision.
    ///
    /// A key met in the logically-deleted state is revived in place by a
    /// single value CAS; one met mid-unlink forces a retry until the worker
    /// has finished cutting it out.
    pub fn insert(&self, cap: &C, key: K, value: u64) -> Option<u64> {
        assert!(key != K::MIN, "the minimum key is reserved for the head sentinels");
        assert!(
            value != DELETE_SENTINEL && value != UNLINK_SENTINEL,
            "value collides with a reserved sentinel"
        );
        loop {
            let curr = self.find(cap, key, true);
            if curr.key == key {
                if curr.value == UNLINK_SENTINEL {
                    continue;
                }
                if curr.value == DELETE_SENTINEL {
                    let value_ptr = Node::value_ptr(curr.remote_origin());
                    let old = cap.compare_and_swap(value_ptr, DELETE_SENTINEL, value);
                    if old == DELETE_SENTINEL {
                        // Revived the node in place.
                        self.cache.invalidate(curr.remote_origin());
                        self.ebr.match_version(false);
                        return None;
                    } else if old == UNLINK_SENTINEL {
                        continue;
                    } else {
                        // Someone else revived it first.
                        self.ebr.match_version(false);
                        return Some(old);
                    }
                }
                self.ebr.match_version(false);
                return Some(curr.value);
            }

            let new_node_ptr = self.ebr.allocate(cap);
            let mut node = Node::new(key, value);
            node.next[0] = curr.next[0];
            let height = node.height;
            if cap.is_local(new_node_ptr) {
                unsafe { *new_node_ptr.deref_mut() = node };
            } else {
                let buf = self.scratch.fetch(cap);
                cap.write(new_node_ptr, node, Some(buf));
                self.scratch.release(buf);
            }
            // A previous life of this node may still be cached.
            self.cache.invalidate(new_node_ptr);

            let published = if height as i32 > self.cache_floor {
                new_node_ptr.with_hint()
            } else {
                new_node_ptr
            };
            let dest = Node::level_ptr(curr.remote_origin(), 0);
            // Fails if the predecessor's pointer is delete-marked: nothing
            // may be inserted behind a node scheduled for unlinking.
            let old = cap.compare_and_swap(dest, curr.next[0].unmark().raw(), published.raw());
            if old == curr.next[0].unmark().raw() {
                self.cache.invalidate(curr.remote_origin());
                self.ebr.match_version(false);
                return None;
            }
            self.ebr.requeue(new_node_ptr);
        }
    }

    /// Remove `key`. Returns the previous value, or `None` if the key was
    /// absent (or a concurrent deleter won). Physical unlinking is left to
    /// the maintenance worker.
    pub fn remove(&self, cap: &C, key: K) -> Option<u64> {
        let curr = self.find(cap, key, false);
        if curr.key != key {
            self.ebr.match_version(false);
            return None;
        }
        if curr.value == DELETE_SENTINEL || curr.value == UNLINK_SENTINEL {
            self.ebr.match_version(false);
            return None;
        }

        let value_ptr = Node::value_ptr(curr.remote_origin());
        let old = cap.compare_and_swap(value_ptr, curr.value, DELETE_SENTINEL);
        if old == curr.value {
            self.cache.invalidate(curr.remote_origin());
            self.ebr.match_version(false);
            Some(curr.value)
        } else {
            self.ebr.match_version(false);
            None
        }
    }

    /// Bulk-load `op_count` distinct successful inserts with uniform random
    /// keys in `[key_lb, key_ub)`. Returns the number inserted.
    pub fn populate(
        &self,
        cap: &C,
        op_count: usize,
        key_lb: K,
        key_ub: K,
        value_of: impl Fn(K) -> u64,
    ) -> usize {
        let lb = key_lb.to_index();
        let ub = key_ub.to_index();
        assert!(lb < ub, "empty key range");
        let mut inserted = 0;
        while inserted != op_count {
            let key = K::from_index(lb + fastrand::u64(..ub - lb));
            if key == K::MIN {
                continue;
            }
            if self.insert(cap, key, value_of(key)).is_none() {
                inserted += 1;
            }
        }
        inserted
    }

    // =========================================================================
    // Maintenance primitives (worker side; see worker.rs for the sweep)
    // =========================================================================

    /// Physically unlink a node this participant has claimed (value already
    /// CASed to `UNLINK_SENTINEL`). Per level, top down: first delete-mark
    /// the node's own forward pointer so no insert can land behind it, then
    /// swing the predecessor past it. Any CAS failure rebuilds the frontier
    /// and restarts.
    pub(crate) fn unlink_node(&self, cap: &C, key: K) {
        if key == K::MIN {
            return;
        }
        let buf_a = self.scratch.fetch(cap);
        let buf_b = self.scratch.fetch(cap);
        let mut retries = MAINTENANCE_RETRY_LIMIT;
        'retry: loop {
            if retries == 0 {
                error!("unlink of {:?} exhausted its retries; abandoning the node", key);
                break;
            }
            retries -= 1;

            let (frontier, node) = self.fill(cap, key, buf_a, buf_b);
            let Some(node) = node else { break };
            let origin = node.remote_origin();

            for level in (0..MAX_HEIGHT).rev() {
                if !frontier.found[level] {
                    continue;
                }
                if !frontier.succs[level].is_marked() {
                    let dest = Node::level_ptr(origin, level);
                    let old = cap.compare_and_swap(
                        dest,
                        frontier.succs[level].raw(),
                        frontier.succs[level].mark().raw(),
                    );
                    if old != frontier.succs[level].raw() {
                        continue 'retry;
                    }
                    self.cache.invalidate(origin);
                }

                debug_assert!(!frontier.preds[level].is_marked(), "marked predecessor");
                let dest = Node::level_ptr(frontier.preds[level], level);
                let old = cap.compare_and_swap(
                    dest,
                    origin.raw(),
                    frontier.succs[level].unmark().raw(),
                );
                if old != origin.raw() {
                    continue 'retry;
                }
                self.cache.invalidate(frontier.preds[level]);
            }
            break;
        }
        self.scratch.release(buf_a);
        self.scratch.release(buf_b);
    }

    /// Promote a claimed node (link_level already CASed `0 -> 1`) into
    /// every level below `goal_height`: per level install the node's own
    /// forward pointer first, then the predecessor's. Finishes by raising
    /// `link_level` to the goal.
    pub(crate) fn raise_node(&self, cap: &C, key: K, goal_height: u64) {
        let buf_a = self.scratch.fetch(cap);
        let buf_b = self.scratch.fetch(cap);
        let mut retries = MAINTENANCE_RETRY_LIMIT;
        'retry: loop {
            if retries == 0 {
                error!("promotion of {:?} exhausted its retries; abandoning the node", key);
                break;
            }
            retries -= 1;

            let (frontier, node) = self.fill(cap, key, buf_a, buf_b);
            let Some(node) = node else { break };
            let origin = node.remote_origin();

            for level in 0..goal_height as usize {
                if frontier.found[level] {
                    continue;
                }
                debug_assert!(!node.next[level].is_marked(), "promoting a marked level");
                let dest = Node::level_ptr(origin, level);
                let old =
                    cap.compare_and_swap(dest, node.next[level].raw(), frontier.succs[level].raw());
                if old != node.next[level].raw() {
                    continue 'retry;
                }
                self.cache.invalidate(origin);

                debug_assert!(!frontier.preds[level].is_marked(), "marked predecessor");
                let dest = Node::level_ptr(frontier.preds[level], level);
                let old = cap.compare_and_swap(
                    dest,
                    frontier.succs[level].unmark().raw(),
                    origin.raw(),
                );
                if old != frontier.succs[level].unmark().raw() {
                    continue 'retry;
                }
                self.cache.invalidate(frontier.preds[level]);
            }

            cap.compare_and_swap(Node::link_level_ptr(origin), 1, goal_height);
            self.cache.invalidate(origin);
            break;
        }
        self.scratch.release(buf_a);
        self.scratch.release(buf_b);
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// The epoch handle this instance operates through. Exposed so callers
    /// can drive `match_version` outside the data-structure operations
    /// (the worker loop does; shutdown paths may).
    pub fn ebr(&self) -> &EbrHandle<Node<K>> {
        &self.ebr
    }

    pub(crate) fn cache(&self) -> &RemoteCache<C> {
        &self.cache
    }

    pub(crate) fn roots(&self) -> &[RemotePtr<Node<K>>] {
        &self.roots
    }

    pub(crate) fn scratch_fetch(&self, cap: &C) -> RemotePtr<Node<K>> {
        self.scratch.fetch(cap)
    }

    pub(crate) fn scratch_release(&self, buf: RemotePtr<Node<K>>) {
        self.scratch.release(buf)
    }

    /// Tower height of the node holding `key`, in any lifecycle state.
    pub fn height_of(&self, cap: &C, key: K) -> Option<u64> {
        let node = self.find(cap, key, false);
        (node.key == key).then(|| node.height)
    }

    /// Current link level of the node holding `key`, in any lifecycle state.
    pub fn link_level_of(&self, cap: &C, key: K) -> Option<u64> {
        let node = self.find(cap, key, false);
        (node.key == key).then(|| node.link_level)
    }

    /// Keys physically linked at `level` of sub-list `root_index`, in chain
    /// order, regardless of value state. Quiescent-only.
    pub fn level_chain(&self, cap: &C, root_index: usize, level: usize) -> Vec<K> {
        assert!(level < MAX_HEIGHT);
        let buf = self.scratch.fetch(cap);
        let mut keys = Vec::new();
        let mut curr = self.cache.read(cap, self.roots[root_index], Some(buf), -1);
        while !curr.next[level].unmark().is_null() {
            let next = curr.next[level].unmark();
            curr = self.cache.read(cap, next, Some(buf), Self::cacheability_below(&curr));
            keys.push(curr.key);
        }
        self.scratch.release(buf);
        keys
    }

    /// Count live keys (value outside the removal sentinels) across every
    /// sub-list's data level, logging a height histogram. Quiescent-only.
    pub fn count(&self, cap: &C) -> usize {
        let buf = self.scratch.fetch(cap);
        let mut per_height = [0usize; MAX_HEIGHT];
        let mut cumulative = [0usize; MAX_HEIGHT];
        let mut live = 0;
        for &root in &self.roots {
            let mut curr = self.cache.read(cap, root, Some(buf), -1);
            while !curr.next[0].unmark().is_null() {
                let next = curr.next[0].unmark();
                curr = self.cache.read(cap, next, Some(buf), Self::cacheability_below(&curr));
                per_height[curr.height as usize - 1] += 1;
                for level in 0..curr.height as usize {
                    cumulative[level] += 1;
                }
                if curr.value != DELETE_SENTINEL && curr.value != UNLINK_SENTINEL {
                    live += 1;
                }
            }
        }
        self.scratch.release(buf);
        for level in 0..MAX_HEIGHT {
            debug!(
                "nodes with height {} = {}, cumulative = {}",
                level + 1,
                per_height[level],
                cumulative[level]
            );
        }
        live
    }

    /// Walk every chain and assert the structural invariants: per-level
    /// strict key ordering, tower heights covering the levels they appear
    /// on, link levels within the tower, and every indexed node reachable
    /// at each level below its link level. Quiescent-only.
    pub fn check_invariants(&self, cap: &C) {
        use std::collections::HashSet;

        let buf = self.scratch.fetch(cap);
        for root_index in 0..self.roots.len() {
            let root = self.roots[root_index];
            let mut indexed: Vec<HashSet<u64>> = (0..MAX_HEIGHT).map(|_| HashSet::new()).collect();

            for level in (0..MAX_HEIGHT).rev() {
                let mut curr = self.cache.read(cap, root, Some(buf), -1);
                let mut prev: Option<K> = None;
                while !curr.next[level].unmark().is_null() {
                    let next = curr.next[level].unmark();
                    curr = self.cache.read(cap, next, Some(buf), Self::cacheability_below(&curr));
                    if let Some(prev_key) = prev {
                        assert!(
                            prev_key < curr.key,
                            "chain order broken at level {}: {:?} before {:?}",
                            level,
                            prev_key,
                            curr.key
                        );
                    }
                    assert!(
                        curr.height as usize > level,
                        "node {:?} with height {} linked at level {}",
                        curr.key,
                        curr.height,
                        level
                    );
                    indexed[level].insert(curr.key.to_index());
                    prev = Some(curr.key);
                }
            }

            // Every data-level node: link level within the tower, and
            // reachable at every level it claims.
            for &key_index in &indexed[0] {
                let key = K::from_index(key_index);
                let node = self.find(cap, key, false);
                assert_eq!(node.key, key);
                assert!(
                    node.link_level <= node.height,
                    "node {:?} indexed above its height ({} > {})",
                    key,
                    node.link_level,
                    node.height
                );
                for level in 0..node.link_level as usize {
                    assert!(
                        indexed[level].contains(&key_index),
                        "node {:?} with link level {} missing from level {}",
                        key,
                        node.link_level,
                        level
                    );
                }
            }
        }
        self.scratch.release(buf);
    }

    /// Log every chain of every sub-list, annotating removal states.
    pub fn debug_dump(&self, cap: &C) {
        let buf = self.scratch.fetch(cap);
        for (root_index, &root) in self.roots.iter().enumerate() {
            for level in (0..MAX_HEIGHT).rev() {
                let mut line = format!("list {} level {}: head", root_index, level);
                let mut curr = self.cache.read(cap, root, Some(buf), -1);
                while !curr.next[level].unmark().is_null() {
                    let marked = curr.next[level].is_marked();
                    let next = curr.next[level].unmark();
                    curr = self.cache.read(cap, next, Some(buf), Self::cacheability_below(&curr));
                    let state = match curr.value {
                        DELETE_SENTINEL => format!("D({:?})", curr.key),
                        UNLINK_SENTINEL => format!("U({:?})", curr.key),
                        _ => format!("{:?}", curr.key),
                    };
                    line.push_str(if marked { " -!> " } else { " -> " });
                    line.push_str(&state);
                }
                debug!("{}", line);
            }
        }
        self.scratch.release(buf);
    }

    /// Release the scratch buffers and, when this process owns the
    /// structure, the sentinels and header array.
    pub fn destroy(&self, cap: &C, delete_roots: bool) {
        self.scratch.drain(cap);
        if delete_roots {
            for &root in &self.roots {
                cap.deallocate(root.strip_hint(), 1);
            }
            cap.deallocate(self.root_array, self.fanout);
        }
    }
}
