//! Scenario: ingestion queue registration semantics.
//!
//! Drives the ingestion worker tick by tick against the paper service:
//! - a type is subscribed at most once; a repeat becomes a repair request
//! - failures re-queue at the tail and never lose the request
//! - callbacks are registered on first processing only
//! - unauthorized responses ask the credential flow for a refresh
//! - bounded retry policies delay and finally drop a request

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use esub_config::{ManagerSettings, RetrySettings};
use esub_core::{callback, ActiveManager, TickOutcome, Workers};
use esub_remote::{PaperSubscriptionService, SharedCredentials};
use esub_schemas::Condition;
use serde_json::json;

struct Harness {
    paper: Arc<PaperSubscriptionService>,
    creds: Arc<SharedCredentials>,
    manager: ActiveManager,
    workers: Workers,
}

fn harness(settings: ManagerSettings, token: Option<&str>) -> Harness {
    let paper = Arc::new(PaperSubscriptionService::new());
    let creds = Arc::new(SharedCredentials::new(token.map(str::to_string)));
    let (manager, workers) = ActiveManager::assemble(&settings, paper.clone(), creds.clone());
    Harness {
        paper,
        creds,
        manager,
        workers,
    }
}

fn cond() -> Condition {
    Condition::from([("broadcaster_user_id".to_string(), json!("1001"))])
}

#[tokio::test]
async fn same_type_queued_twice_subscribes_once_and_requests_repair() {
    let mut h = harness(ManagerSettings::default(), Some("tok"));
    h.manager.queue_subscription("stream.online", cond(), None);
    h.manager.queue_subscription("stream.online", cond(), None);

    let first = h.workers.ingestion.tick().await;
    assert!(matches!(first, TickOutcome::Subscribed { ref kind, .. } if kind == "stream.online"));

    let second = h.workers.ingestion.tick().await;
    assert_eq!(
        second,
        TickOutcome::Conflict {
            kind: "stream.online".to_string()
        }
    );

    assert_eq!(h.paper.subscribe_calls(), 1);
    assert_eq!(h.paper.enabled_of("stream.online").len(), 1);
    assert_eq!(h.manager.stats().repairs_requested(), 1);

    // the requested pass finds nothing to fix
    let report = h.workers.repair.run_pending().await.expect("pass ran");
    assert!(report.is_clean(), "{report:?}");
}

#[tokio::test]
async fn failing_subscribe_is_retried_until_success_and_callback_registered_once() {
    let mut h = harness(ManagerSettings::default(), Some("tok"));
    h.paper.fail_next_subscribes(10);

    let hits = Arc::new(AtomicUsize::new(0));
    let hc = hits.clone();
    h.manager.queue_subscription(
        "channel.moderate",
        cond(),
        Some(callback(move |_, _| {
            hc.fetch_add(1, Ordering::SeqCst);
        })),
    );

    for attempt in 1..=10 {
        let out = h.workers.ingestion.tick().await;
        assert_eq!(
            out,
            TickOutcome::Retrying {
                kind: "channel.moderate".to_string(),
                attempts: attempt
            }
        );
        assert_eq!(h.manager.queue().len(), 1, "request must stay queued");
    }
    let out = h.workers.ingestion.tick().await;
    assert!(matches!(out, TickOutcome::Subscribed { .. }));
    assert!(h.manager.queue().is_empty());

    assert_eq!(h.manager.registry().count("channel.moderate"), 1);
    assert_eq!(h.manager.stats().subscribe_failures(), 10);
    assert!(h.manager.table().lock().await.contains("channel.moderate"));
}

#[tokio::test]
async fn failed_request_goes_to_the_tail() {
    let mut h = harness(ManagerSettings::default(), Some("tok"));
    h.paper.fail_next_subscribes(1);
    h.manager.queue_subscription("a.type", cond(), None);
    h.manager.queue_subscription("b.type", cond(), None);

    assert!(matches!(
        h.workers.ingestion.tick().await,
        TickOutcome::Retrying { .. }
    ));
    assert_eq!(h.manager.queue().kinds(), vec!["b.type", "a.type"]);
}

#[tokio::test]
async fn missing_or_rejected_credential_requests_refresh_and_keeps_request() {
    let mut h = harness(ManagerSettings::default(), None);
    h.manager.queue_subscription("stream.online", cond(), None);

    assert!(matches!(
        h.workers.ingestion.tick().await,
        TickOutcome::Retrying { .. }
    ));
    assert_eq!(h.creds.refresh_requests(), 1);
    assert_eq!(h.paper.subscribe_calls(), 0);

    h.creds.set_token("expired");
    h.paper.reject_next_subscribes_unauthorized(1);
    assert!(matches!(
        h.workers.ingestion.tick().await,
        TickOutcome::Retrying { .. }
    ));
    assert_eq!(h.creds.refresh_requests(), 2);

    h.creds.set_token("fresh");
    assert!(matches!(
        h.workers.ingestion.tick().await,
        TickOutcome::Subscribed { .. }
    ));
}

#[tokio::test]
async fn heat_rises_with_work_and_decays_when_idle() {
    let mut h = harness(ManagerSettings::default(), Some("tok"));
    for kind in ["a", "b", "c"] {
        h.manager.queue_subscription(kind, cond(), None);
    }
    let mut last = h.workers.ingestion.next_interval();
    for _ in 0..3 {
        h.workers.ingestion.tick().await;
        let next = h.workers.ingestion.next_interval();
        assert!(next > last);
        last = next;
    }
    assert_eq!(h.manager.stats().heat(), 3);

    for _ in 0..5 {
        assert_eq!(h.workers.ingestion.tick().await, TickOutcome::Idle);
    }
    assert_eq!(h.manager.stats().heat(), 0);
    assert_eq!(
        h.workers.ingestion.next_interval(),
        Duration::from_millis(100)
    );
}

#[tokio::test(start_paused = true)]
async fn bounded_retry_waits_between_attempts_then_gives_up() {
    let settings = ManagerSettings {
        retry: RetrySettings {
            max_attempts: Some(2),
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        },
        ..ManagerSettings::default()
    };
    let mut h = harness(settings, Some("tok"));
    h.paper.fail_next_subscribes(5);
    h.manager.queue_subscription("stream.online", cond(), None);

    assert!(matches!(
        h.workers.ingestion.tick().await,
        TickOutcome::Retrying { attempts: 1, .. }
    ));
    assert!(matches!(
        h.workers.ingestion.tick().await,
        TickOutcome::NotDue { .. }
    ));
    assert_eq!(h.paper.subscribe_calls(), 1);

    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert_eq!(
        h.workers.ingestion.tick().await,
        TickOutcome::Abandoned {
            kind: "stream.online".to_string(),
            attempts: 2
        }
    );
    assert!(h.manager.queue().is_empty());
    assert_eq!(h.paper.subscribe_calls(), 2);
}
