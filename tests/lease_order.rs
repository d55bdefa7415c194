//! Reaper ordering and exactly-once collection under load.

use parking_lot::Mutex;
use spindle::test_utils::init_test_logging;
use spindle::{CoreError, LeaseManager};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deterministic linear congruential generator; keeps the random-expiry
/// scenario reproducible without pulling in an RNG crate.
struct Lcg(u64);

impl Lcg {
    fn next_millis(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) % bound
    }
}

fn wait_for(cond: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn thousand_contracts_collected_exactly_once_never_early() {
    init_test_logging();
    spindle::test_phase!("thousand_contracts_collected_exactly_once_never_early");

    let log: Arc<Mutex<Vec<(usize, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let manager = LeaseManager::start(move |index: usize| {
        sink.lock().push((index, Instant::now()));
    });

    let mut rng = Lcg(0xDEAD_BEEF);
    let count = 1000;
    let mut leases = Vec::with_capacity(count);
    for index in 0..count {
        let duration = Duration::from_millis(rng.next_millis(1000));
        leases.push(manager.issue(index, duration).expect("issue"));
    }

    assert!(
        wait_for(|| log.lock().len() == count, Duration::from_secs(10)),
        "collected {} of {count}",
        log.lock().len()
    );

    let collected = log.lock().clone();
    let mut seen = HashSet::new();
    for (index, at) in &collected {
        let nominal = leases[*index].expiry();
        assert!(
            *at >= nominal,
            "contract {index} collected {}us early",
            (nominal - *at).as_micros()
        );
        assert!(seen.insert(*index), "contract {index} collected twice");
    }
    assert_eq!(seen.len(), count);

    // Collection follows the total order exactly: expiry ascending,
    // issue order breaking ties.
    let mut expected: Vec<usize> = (0..count).collect();
    expected.sort_by_key(|&index| (leases[index].expiry(), index));
    let observed: Vec<usize> = collected.iter().map(|(index, _)| *index).collect();
    assert_eq!(observed, expected, "collections out of contract order");

    manager.close();
    spindle::test_complete!(
        "thousand_contracts_collected_exactly_once_never_early",
        collected = count
    );
}

#[test]
fn same_duration_contracts_collected_in_issue_order() {
    init_test_logging();
    spindle::test_phase!("same_duration_contracts_collected_in_issue_order");

    let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&order);
    let manager = LeaseManager::start(move |index: usize| {
        sink.lock().push(index);
    });

    let count = 50;
    for index in 0..count {
        manager
            .issue(index, Duration::from_millis(50))
            .expect("issue");
    }

    assert!(wait_for(|| order.lock().len() == count, Duration::from_secs(5)));
    let observed = order.lock().clone();
    let expected: Vec<usize> = (0..count).collect();
    assert_eq!(observed, expected, "burst expiry must not starve early issuers");

    manager.close();
    spindle::test_complete!("same_duration_contracts_collected_in_issue_order");
}

#[test]
fn renew_strictly_replaces_expiry() {
    init_test_logging();
    spindle::test_phase!("renew_strictly_replaces_expiry");

    let manager = LeaseManager::start(|_resource: u8| {});
    let lease = manager.issue(0, Duration::from_secs(5)).expect("issue");

    let before = lease.expiry();
    lease.renew(Duration::from_secs(10)).expect("extend");
    assert!(lease.expiry() > before);

    // Replacing with a shorter horizon is also a replacement, not a max.
    lease.renew(Duration::from_millis(50)).expect("shorten");
    assert!(lease.expiry() < before);
    assert!(lease.contract().delay_millis() <= 50);

    manager.close();
    spindle::test_complete!("renew_strictly_replaces_expiry");
}

#[test]
fn renewed_to_earlier_deadline_wakes_the_reaper() {
    init_test_logging();
    spindle::test_phase!("renewed_to_earlier_deadline_wakes_the_reaper");

    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);
    let manager = LeaseManager::start(move |index: usize| {
        sink.lock().push((index, Instant::now()));
    });

    // Far-future contract; the reaper parks on it.
    let lease = manager.issue(1, Duration::from_secs(60)).expect("issue");
    std::thread::sleep(Duration::from_millis(20));

    // Pull the deadline near: the reaper must wake and honor it.
    let renewed_at = Instant::now();
    lease.renew(Duration::from_millis(40)).expect("renew earlier");

    assert!(wait_for(|| !collected.lock().is_empty(), Duration::from_secs(2)));
    let (_, at) = collected.lock()[0];
    assert!(at >= renewed_at + Duration::from_millis(40), "never early");
    assert!(
        at < renewed_at + Duration::from_secs(5),
        "reaper kept sleeping on the stale deadline"
    );

    manager.close();
    spindle::test_complete!("renewed_to_earlier_deadline_wakes_the_reaper");
}

#[test]
fn renew_after_collect_and_cancel_semantics() {
    init_test_logging();
    spindle::test_phase!("renew_after_collect_and_cancel_semantics");

    let manager = LeaseManager::start(|_resource: u8| {});

    let lease = manager.issue(0, Duration::from_millis(10)).expect("issue");
    assert!(wait_for(
        || lease.contract().is_collected(),
        Duration::from_secs(2)
    ));

    // Renew after collection: expired, not not-found.
    match lease.renew(Duration::from_secs(1)) {
        Err(CoreError::ContractExpired(_)) => {}
        other => panic!("expected ContractExpired, got {other:?}"),
    }
    // Cancel after collection: no-op.
    lease.cancel().expect("cancel after collect");

    // Cancel before expiry: the cleaner never runs, and renewing the
    // cancelled contract reads as not-found.
    let lease2 = manager.issue(1, Duration::from_secs(30)).expect("issue");
    lease2.cancel().expect("cancel");
    match lease2.renew(Duration::from_secs(1)) {
        Err(CoreError::ContractNotFound(_)) => {}
        other => panic!("expected ContractNotFound, got {other:?}"),
    }

    manager.close();
    spindle::test_complete!("renew_after_collect_and_cancel_semantics");
}
