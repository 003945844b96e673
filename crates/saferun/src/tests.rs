//! Tests for the record state machine and the manager's scheduling paths.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;

use crate::manager::Error;
use crate::manager::Manager;
use crate::record::CallId;
use crate::record::Identifier;
use crate::record::Outcome;
use crate::record::Record;
use crate::record::State;

fn make_record(timeout: Duration) -> Record {
    Record::new(CallId(1), Identifier::from("test"), "op", timeout)
}

// --- Record state machine ---

#[test]
fn test_record_settles_once() {
    let record = make_record(Duration::from_secs(1));
    assert_eq!(record.state(), State::Pending);

    assert!(record.settle(State::Completed));
    assert_eq!(record.state(), State::Completed);

    // Every later transition loses.
    assert!(!record.settle(State::Failed));
    assert!(!record.settle(State::TimedOut));
    assert_eq!(record.state(), State::Completed);
}

#[test]
fn test_record_timeout_wins_race() {
    let record = make_record(Duration::from_millis(10));
    assert!(record.settle(State::TimedOut));
    assert!(!record.settle(State::Completed), "late completion must lose");
    assert_eq!(record.state(), State::TimedOut);
}

// --- Identifiers ---

#[test]
fn test_identifier_defaults_to_target_address() {
    let a = Arc::new(1u32);
    let b = Arc::new(1u32);
    assert_ne!(Identifier::of(&a), Identifier::of(&b));
    assert_eq!(Identifier::of(&a), Identifier::of(&Arc::clone(&a)));
}

#[test]
fn test_identifier_named() {
    let id: Identifier = "relay-bank".into();
    assert_eq!(id, Identifier::Named("relay-bank".to_string()));
    assert_eq!(id.to_string(), "relay-bank");
}

#[test]
fn test_call_id_display() {
    assert_eq!(CallId(7).to_string(), "call-7");
}

// --- Manager scheduling ---

#[tokio::test]
async fn test_submit_delivers_completion() {
    let manager = Arc::new(Manager::new());
    let id = Identifier::from("ok");

    let rx = manager.submit(&id, "op", Duration::from_secs(1), async { Ok(42u64) });
    match rx.await {
        Ok(Outcome::Completed(v)) => assert_eq!(v, 42),
        _ => panic!("Expected Completed"),
    }

    let stats = manager.stats(&id).expect("group should exist");
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.active, 0);
    assert_eq!(manager.in_flight(), 0);
}

#[tokio::test]
async fn test_submit_delivers_failure() {
    let manager = Arc::new(Manager::new());
    let id = Identifier::from("boom");

    let rx = manager.submit::<u64, _>(&id, "op", Duration::from_secs(1), async {
        Err(anyhow!("boom"))
    });
    match rx.await {
        Ok(Outcome::Failed(e)) => assert!(e.to_string().contains("boom")),
        _ => panic!("Expected Failed"),
    }

    let stats = manager.stats(&id).expect("group should exist");
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.active, 0);
}

#[tokio::test]
async fn test_submit_times_out_and_discards_late_result() {
    let manager = Arc::new(Manager::new());
    let id = Identifier::from("slow");

    let rx = manager.submit(&id, "op", Duration::from_millis(50), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(99u64)
    });
    match rx.await {
        Ok(Outcome::TimedOut) => {}
        _ => panic!("Expected TimedOut"),
    }

    // The abandoned execution is still tracked until it returns.
    assert_eq!(manager.in_flight(), 1);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(manager.in_flight(), 0);

    let stats = manager.stats(&id).expect("group should exist");
    assert_eq!(stats.timed_out, 1);
    assert_eq!(stats.completed, 0, "late result must not be recorded as completed");
}

#[tokio::test]
async fn test_submit_captures_target_panic() {
    let manager = Arc::new(Manager::new());
    let id = Identifier::from("panicky");

    let rx = manager.submit::<u64, _>(&id, "op", Duration::from_secs(1), async {
        panic!("wires crossed");
    });
    match rx.await {
        Ok(Outcome::Failed(e)) => {
            let msg = e.to_string();
            assert!(msg.contains("panicked"), "got: {}", msg);
            assert!(msg.contains("wires crossed"), "got: {}", msg);
        }
        _ => panic!("Expected Failed"),
    }
}

#[tokio::test]
async fn test_submit_rejected_when_saturated() {
    // One worker, no queue: the second submission cannot reserve a slot.
    let manager = Arc::new(Manager::with_limits(1, 0).expect("valid limits"));
    let id = Identifier::from("crowded");

    let busy = manager.submit(&id, "op", Duration::from_secs(1), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(1u64)
    });
    let rejected = manager.submit(&id, "op", Duration::from_secs(1), async { Ok(2u64) });

    match rejected.await {
        Ok(Outcome::Failed(e)) => {
            let err = e.downcast_ref::<Error>().expect("manager error");
            assert!(matches!(err, Error::Saturated { .. }), "got: {:?}", err);
        }
        _ => panic!("Expected Failed"),
    }
    match busy.await {
        Ok(Outcome::Completed(v)) => assert_eq!(v, 1),
        _ => panic!("Expected Completed"),
    }

    let stats = manager.stats(&id).expect("group should exist");
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn test_submit_after_shutdown_fails() {
    let manager = Arc::new(Manager::new());
    manager.shutdown();
    assert!(manager.is_shutdown());

    let rx = manager.submit(&Identifier::from("late"), "op", Duration::from_secs(1), async {
        Ok(1u64)
    });
    match rx.await {
        Ok(Outcome::Failed(e)) => {
            let err = e.downcast_ref::<Error>().expect("manager error");
            assert!(matches!(err, Error::Shutdown), "got: {:?}", err);
        }
        _ => panic!("Expected Failed"),
    }
}

#[test]
fn test_zero_worker_limits_rejected() {
    let err = Manager::with_limits(0, 16).expect_err("zero workers must be rejected");
    assert!(matches!(err, Error::InvalidLimits { workers: 0 }));
}

#[tokio::test]
async fn test_groups_persist_after_calls_finish() {
    let manager = Arc::new(Manager::new());
    let id = Identifier::from("sticky");

    let rx = manager.submit(&id, "op", Duration::from_secs(1), async { Ok(()) });
    let _ = rx.await;

    // The group outlives its records; only the counters remain.
    assert_eq!(manager.in_flight(), 0);
    assert!(manager.stats(&id).is_some());
}
