//! Unit tests for the execution watchdog.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::rstest;
use serde_json::json;

use super::*;
use crate::tests::support::{FnHandler, sample_envelope};

fn run(handler: FnHandler, budget_ms: u64) -> ExecutionOutcome {
    execute(
        Arc::new(handler),
        Arc::new(sample_envelope("msg-exec", "key-exec")),
        Duration::from_millis(budget_ms),
        "switchboard-test-worker".to_owned(),
    )
}

#[test]
fn returns_handler_value() {
    let outcome = run(FnHandler::new(|_, _| Ok(json!({ "ok": true }))), 1_000);
    assert_eq!(outcome, ExecutionOutcome::Completed(json!({ "ok": true })));
}

#[test]
fn keeps_handler_error_detail_internal() {
    let outcome = run(
        FnHandler::new(|_, _| Err(HandlerError::failed("SECRET: database password"))),
        1_000,
    );
    let ExecutionOutcome::Failed { detail } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(detail.contains("SECRET"));
}

#[test]
fn converts_panics_into_failures() {
    let outcome = run(FnHandler::new(|_, _| panic!("boom")), 1_000);
    assert_eq!(
        outcome,
        ExecutionOutcome::Failed {
            detail: "handler panicked: boom".to_owned()
        }
    );
}

#[test]
fn times_out_and_cancels_slow_handler() {
    let (observed_tx, observed_rx) = std::sync::mpsc::channel();
    let outcome = run(
        FnHandler::new(move |_, context| {
            while !context.is_cancelled() {
                thread::sleep(Duration::from_millis(5));
            }
            let _sent = observed_tx.send(());
            Err(HandlerError::Cancelled)
        }),
        30,
    );
    assert_eq!(outcome, ExecutionOutcome::TimedOut);
    observed_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("handler observes cancellation");
}

#[rstest]
#[case(Duration::from_secs(5), false)]
#[case(Duration::ZERO, true)]
fn context_reports_deadline(#[case] budget: Duration, #[case] expired: bool) {
    let context = ExecutionContext::new(budget);
    assert_eq!(context.is_cancelled(), expired);
    assert_eq!(context.checkpoint().is_err(), expired);
    assert_eq!(context.budget(), budget);
}

#[test]
fn cancel_sets_flag_for_clones() {
    let context = ExecutionContext::new(Duration::from_secs(5));
    let clone = context.clone();
    context.cancel();
    assert!(clone.is_cancelled());
    assert_eq!(clone.checkpoint(), Err(HandlerError::Cancelled));
    assert!(context.remaining() <= Duration::from_secs(5));
}
