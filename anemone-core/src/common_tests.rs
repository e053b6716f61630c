//! Shared fixtures for the integration suites.
//!
//! A [`TestCluster`] is one "process": a counting capability, a coherent
//! cache, and an epoch pool. Each simulated thread registers its own
//! [`SkipList`] handle against the cluster, mirroring how real deployments
//! hand every thread its own capability registration.

use std::sync::Arc;

use anemone_cache::RemoteCache;
use anemone_epoch::EbrPool;
use anemone_remote::CountingPool;

use crate::node::Node;
use crate::skip_list::SkipList;

pub type TestList = SkipList<u64, CountingPool>;

pub struct TestCluster {
    pub cap: Arc<CountingPool>,
    pub cache: Arc<RemoteCache<CountingPool>>,
    pub pool: Arc<EbrPool<Node<u64>>>,
}

impl TestCluster {
    /// A cluster whose capability reports every pointer as local.
    pub fn new() -> Self {
        Self::with_locality(true)
    }

    /// `all_local = false` forces the write-through publication path.
    pub fn with_locality(all_local: bool) -> Self {
        let cap = Arc::new(CountingPool::new(all_local));
        let cache = Arc::new(RemoteCache::new(&*cap, -1));
        let pool = EbrPool::new();
        TestCluster { cap, cache, pool }
    }

    /// A cluster sharing `cap` with another one: a second process mapping
    /// the same remote region through its own cache and epoch pool.
    pub fn join_process(other: &TestCluster) -> Self {
        let cap = Arc::clone(&other.cap);
        let cache = Arc::new(RemoteCache::new(&*cap, -1));
        let pool = EbrPool::new();
        TestCluster { cap, cache, pool }
    }

    /// Register a fresh thread handle. The returned list still needs
    /// `init_as_first` or `init_from_pointer`.
    pub fn list(&self, fanout_degree: u32, cache_floor: i32) -> TestList {
        SkipList::new(
            &*self.cap,
            0,
            fanout_degree,
            cache_floor,
            Arc::clone(&self.cache),
            EbrPool::register_thread(&self.pool),
        )
    }

    /// Register a thread handle and initialise the shared structure.
    pub fn first_list(&self, fanout_degree: u32, cache_floor: i32) -> TestList {
        let mut list = self.list(fanout_degree, cache_floor);
        list.init_as_first(&*self.cap);
        list
    }

    /// Drive the worker for `sweeps` full passes from `list`, advancing the
    /// epoch after each so claimed nodes age toward reclamation.
    pub fn run_sweeps(&self, list: &TestList, sweeps: usize) {
        let queues = self.pool.limbo_handles();
        let mut cursor = 0;
        for _ in 0..sweeps {
            list.sweep(&*self.cap, &queues, &mut cursor);
            list.ebr().match_version(true);
        }
    }

    /// Tear down in dependency order and assert nothing leaked.
    /// `owner` must be the handle that ran `init_as_first`. Quiescent-only.
    pub fn shutdown(self, owner: TestList, others: Vec<TestList>) {
        for list in others {
            list.destroy(&*self.cap, false);
        }
        drain_structure(&owner, &self.cap);
        owner.destroy(&*self.cap, true);
        self.pool.destroy(&*self.cap);
        self.cache.destroy(&*self.cap);
        assert!(self.cap.has_no_leaks(), "capability reports leaked allocations");
    }
}

/// Return every node still linked at the data level to the capability.
/// The pool's free and limbo queues hold the unlinked ones.
fn drain_structure(list: &TestList, cap: &CountingPool) {
    use anemone_remote::MemoryCapability;

    for &root in list.roots() {
        let mut nodes = Vec::new();
        let mut curr = unsafe { *root.strip_hint().deref() };
        loop {
            let next = curr.next[0].unmark().strip_hint();
            if next.is_null() {
                break;
            }
            nodes.push(next);
            curr = unsafe { *next.deref() };
        }
        for node in nodes {
            cap.deallocate(node, 1);
        }
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        TestCluster::new()
    }
}

/// The S1-style single-key lifecycle, reusable against any configuration.
pub fn check_single_key_lifecycle(list: &TestList, cap: &CountingPool) {
    assert_eq!(list.contains(cap, 5), None);
    assert_eq!(list.insert(cap, 5, 50), None);
    assert_eq!(list.contains(cap, 5), Some(50));
    assert_eq!(list.insert(cap, 5, 51), Some(50));
    assert_eq!(list.remove(cap, 5), Some(50));
    assert_eq!(list.contains(cap, 5), None);
    assert_eq!(list.remove(cap, 5), None);
}
