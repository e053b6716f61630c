//! Single-threaded behaviour of the engine: the op laws, the boundary
//! keys, and the in-place revival path of the removal protocol.

use rstest::rstest;

use anemone_core::common_tests::{check_single_key_lifecycle, TestCluster};

#[test]
fn empty_structure_answers_absent() {
    let cluster = TestCluster::new();
    let list = cluster.first_list(0, -1);

    assert_eq!(list.contains(&cluster.cap, 1), None);
    assert_eq!(list.remove(&cluster.cap, 1), None);
    assert_eq!(list.count(&cluster.cap), 0);
    list.check_invariants(&cluster.cap);

    cluster.shutdown(list, vec![]);
}

#[rstest]
#[case::single_root(0, -1)]
#[case::single_root_uncached(0, anemone_core::MAX_HEIGHT as i32)]
#[case::fanout(2, -1)]
fn single_key_lifecycle(#[case] degree: u32, #[case] cache_floor: i32) {
    let cluster = TestCluster::new();
    let mut list = cluster.list(degree, cache_floor);
    list.init_as_first(&cluster.cap);
    if degree > 0 {
        list.set_key_range(1, 1 << 20);
    }

    check_single_key_lifecycle(&list, &cluster.cap);
    list.check_invariants(&cluster.cap);

    cluster.shutdown(list, vec![]);
}

#[test]
fn insert_remove_round_trip_leaves_no_trace() {
    let cluster = TestCluster::new();
    let list = cluster.first_list(0, -1);

    assert_eq!(list.insert(&cluster.cap, 42, 420), None);
    assert_eq!(list.remove(&cluster.cap, 42), Some(420));
    assert_eq!(list.count(&cluster.cap), 0);
    list.check_invariants(&cluster.cap);

    cluster.shutdown(list, vec![]);
}

#[test]
fn collision_returns_the_present_value_unchanged() {
    let cluster = TestCluster::new();
    let list = cluster.first_list(0, -1);

    assert_eq!(list.insert(&cluster.cap, 9, 90), None);
    assert_eq!(list.insert(&cluster.cap, 9, 91), Some(90));
    assert_eq!(list.insert(&cluster.cap, 9, 92), Some(90));
    assert_eq!(list.contains(&cluster.cap, 9), Some(90));

    cluster.shutdown(list, vec![]);
}

#[test]
fn remove_is_idempotent() {
    let cluster = TestCluster::new();
    let list = cluster.first_list(0, -1);

    list.insert(&cluster.cap, 3, 30);
    assert_eq!(list.remove(&cluster.cap, 3), Some(30));
    assert_eq!(list.remove(&cluster.cap, 3), None);

    cluster.shutdown(list, vec![]);
}

#[test]
fn reinsertion_revives_the_deleted_node_in_place() {
    let cluster = TestCluster::new();
    let list = cluster.first_list(0, -1);

    assert_eq!(list.insert(&cluster.cap, 7, 70), None);
    assert_eq!(list.remove(&cluster.cap, 7), Some(70));
    // No sweep has run: the node sits in the logically-deleted state and
    // the new insert must revive it rather than allocate.
    let live_before = cluster.cap.live_allocations();
    assert_eq!(list.insert(&cluster.cap, 7, 71), None);
    assert_eq!(cluster.cap.live_allocations(), live_before);
    assert_eq!(list.contains(&cluster.cap, 7), Some(71));
    assert_eq!(list.count(&cluster.cap), 1);
    list.check_invariants(&cluster.cap);

    cluster.shutdown(list, vec![]);
}

#[test]
fn boundary_keys_of_the_domain() {
    let cluster = TestCluster::new();
    let list = cluster.first_list(0, -1);

    // Smallest legal key (MIN + 1) and the top of the domain.
    assert_eq!(list.insert(&cluster.cap, 1, 10), None);
    assert_eq!(list.insert(&cluster.cap, u64::MAX - 2, 20), None);
    assert_eq!(list.contains(&cluster.cap, 1), Some(10));
    assert_eq!(list.contains(&cluster.cap, u64::MAX - 2), Some(20));
    assert_eq!(list.count(&cluster.cap), 2);
    list.check_invariants(&cluster.cap);

    cluster.shutdown(list, vec![]);
}

#[test]
fn many_keys_stay_ordered_and_findable() {
    let cluster = TestCluster::new();
    let list = cluster.first_list(0, -1);

    fastrand::seed(0x5eed);
    let mut keys: Vec<u64> = (1..=200).collect();
    fastrand::shuffle(&mut keys);
    for &k in &keys {
        assert_eq!(list.insert(&cluster.cap, k, k * 10), None);
    }

    assert_eq!(list.count(&cluster.cap), 200);
    for k in 1..=200u64 {
        assert_eq!(list.contains(&cluster.cap, k), Some(k * 10));
    }
    assert_eq!(list.contains(&cluster.cap, 201), None);
    assert_eq!(
        list.level_chain(&cluster.cap, 0, 0),
        (1..=200).collect::<Vec<u64>>()
    );
    list.check_invariants(&cluster.cap);

    cluster.shutdown(list, vec![]);
}

#[test]
fn populate_loads_the_requested_amount() {
    let cluster = TestCluster::new();
    let list = cluster.first_list(0, -1);

    fastrand::seed(11);
    let inserted = list.populate(&cluster.cap, 60, 1, 500, |k| k * 2);
    assert_eq!(inserted, 60);
    assert_eq!(list.count(&cluster.cap), 60);
    list.check_invariants(&cluster.cap);

    cluster.shutdown(list, vec![]);
}

#[test]
fn interleaved_inserts_and_removes_keep_the_census() {
    let cluster = TestCluster::new();
    let list = cluster.first_list(0, -1);

    for k in 1..=50u64 {
        list.insert(&cluster.cap, k, k);
    }
    for k in (1..=50u64).filter(|k| k % 2 == 0) {
        assert_eq!(list.remove(&cluster.cap, k), Some(k));
    }
    assert_eq!(list.count(&cluster.cap), 25);
    for k in 1..=50u64 {
        let expected = (k % 2 == 1).then_some(k);
        assert_eq!(list.contains(&cluster.cap, k), expected);
    }
    list.check_invariants(&cluster.cap);

    cluster.shutdown(list, vec![]);
}
