//! Unit tests for the replay guard and in-memory store.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rstest::rstest;
use serde_json::json;

use super::*;
use crate::error::ErrorCode;

fn guard(strategy: ReplayStrategy) -> ReplayGuard {
    ReplayGuard::new(strategy, Arc::new(InMemoryReplayStore::new()))
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[test]
fn store_inserts_only_when_absent() {
    let store = InMemoryReplayStore::new();
    assert!(!store.has("k"));
    store.set("k", ReplayEntry::Seen).expect("first insert");
    assert!(store.has("k"));
    assert_eq!(
        store.set("k", ReplayEntry::Completed(json!(1))),
        Err(ReplayStoreError::Occupied { key: "k".to_owned() })
    );
    assert_eq!(store.get("k"), Some(ReplayEntry::Seen));
}

#[test]
fn bounded_store_evicts_least_recent() {
    let store = InMemoryReplayStore::with_capacity(NonZeroUsize::MIN.saturating_add(1));
    store.set("a", ReplayEntry::Seen).expect("a");
    store.set("b", ReplayEntry::Seen).expect("b");
    store.set("c", ReplayEntry::Seen).expect("c");
    assert_eq!(store.len(), 2);
    assert!(!store.has("a"));
    assert!(store.has("c"));
}

#[rstest]
#[case(None, 5)]
#[case(Some(3), 3)]
fn from_capacity_selects_bound(#[case] capacity: Option<usize>, #[case] expected: usize) {
    let store = InMemoryReplayStore::from_capacity(capacity);
    for key in ["a", "b", "c", "d", "e"] {
        store.set(key, ReplayEntry::Seen).expect("insert");
    }
    assert_eq!(store.len(), expected);
}

// ---------------------------------------------------------------------------
// Reject strategy
// ---------------------------------------------------------------------------

#[test]
fn reject_refuses_second_use() {
    let guard = guard(ReplayStrategy::Reject);
    let ReplayCheck::Fresh(ticket) = guard.check_and_record("k") else {
        panic!("first use should be fresh");
    };
    assert_eq!(ticket.key(), "k");
    ticket.complete(&Err(DispatchFailure::execution_failed()));
    assert!(matches!(guard.check_and_record("k"), ReplayCheck::Duplicate));
}

#[test]
fn reject_admits_exactly_one_concurrent_claim() {
    let guard = Arc::new(guard(ReplayStrategy::Reject));
    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let shared = Arc::clone(&guard);
            let gate = Arc::clone(&barrier);
            thread::spawn(move || {
                gate.wait();
                matches!(shared.check_and_record("same"), ReplayCheck::Fresh(_))
            })
        })
        .collect();
    let fresh = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker thread"))
        .filter(|fresh| *fresh)
        .count();
    assert_eq!(fresh, 1);
}

// ---------------------------------------------------------------------------
// Idempotent strategy
// ---------------------------------------------------------------------------

#[test]
fn idempotent_returns_cached_success() {
    let guard = guard(ReplayStrategy::Idempotent);
    let ReplayCheck::Fresh(ticket) = guard.check_and_record("k") else {
        panic!("first use should be fresh");
    };
    ticket.complete(&Ok(json!({ "stored": true })));
    let ReplayCheck::Cached(outcome) = guard.check_and_record("k") else {
        panic!("second use should be cached");
    };
    assert_eq!(outcome, Ok(json!({ "stored": true })));
}

#[test]
fn idempotent_does_not_cache_failures() {
    let guard = guard(ReplayStrategy::Idempotent);
    let ReplayCheck::Fresh(ticket) = guard.check_and_record("k") else {
        panic!("first use should be fresh");
    };
    ticket.complete(&Err(DispatchFailure::execution_timeout()));
    assert!(matches!(guard.check_and_record("k"), ReplayCheck::Fresh(_)));
}

#[test]
fn dropped_ticket_releases_key() {
    let guard = guard(ReplayStrategy::Idempotent);
    let first = guard.check_and_record("k");
    assert!(matches!(first, ReplayCheck::Fresh(_)));
    drop(first);
    assert!(matches!(guard.check_and_record("k"), ReplayCheck::Fresh(_)));
}

#[test]
fn concurrent_duplicates_wait_for_leader() {
    let guard = Arc::new(guard(ReplayStrategy::Idempotent));
    let executions = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(6));
    let handles: Vec<_> = (0..6)
        .map(|_| {
            let shared = Arc::clone(&guard);
            let counter = Arc::clone(&executions);
            let gate = Arc::clone(&barrier);
            thread::spawn(move || {
                gate.wait();
                match shared.check_and_record("same") {
                    ReplayCheck::Fresh(ticket) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        let outcome = Ok(json!({ "winner": true }));
                        ticket.complete(&outcome);
                        outcome
                    }
                    ReplayCheck::Cached(outcome) => outcome,
                    ReplayCheck::Duplicate => Err(DispatchFailure::new(
                        ErrorCode::ReplayRejected,
                        "duplicate",
                    )),
                }
            })
        })
        .collect();
    for handle in handles {
        let outcome = handle.join().expect("worker thread");
        assert_eq!(outcome, Ok(json!({ "winner": true })));
    }
    assert_eq!(executions.load(Ordering::SeqCst), 1);
}

#[test]
fn waiters_receive_leader_failure() {
    let guard = Arc::new(guard(ReplayStrategy::Idempotent));
    let ReplayCheck::Fresh(ticket) = guard.check_and_record("k") else {
        panic!("first use should be fresh");
    };
    let shared = Arc::clone(&guard);
    let waiter = thread::spawn(move || match shared.check_and_record("k") {
        ReplayCheck::Cached(outcome) => outcome.map_err(|failure| failure.error_code()),
        other => panic!("expected cached outcome, got {other:?}"),
    });
    thread::sleep(Duration::from_millis(150));
    ticket.complete(&Err(DispatchFailure::execution_failed()));
    assert_eq!(
        waiter.join().expect("waiter thread"),
        Err(ErrorCode::ExecutionFailed)
    );
}
