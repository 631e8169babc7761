//! Scenario: overlay observers receive mirrored events over the websocket.
//!
//! Binds the router on an ephemeral port, connects a real websocket client,
//! delivers an event through the notification route and reads the overlay
//! line back. Closing the client must unregister the observer.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, StatusCode};
use esub_config::{ManagerSettings, MirrorAction, SubscriptionRequestConfig};
use esub_core::{ActiveManager, FanoutSink, SubscriptionManager};
use esub_daemon::{routes, state};
use esub_remote::{PaperSubscriptionService, SharedCredentials};
use esub_schemas::Condition;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

async fn wait_for_observers(fanout: &FanoutSink, n: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while fanout.observer_count() != n {
        assert!(
            tokio::time::Instant::now() < deadline,
            "observer count never reached {n}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn mirrored_event_reaches_websocket_observer() {
    let paper = Arc::new(PaperSubscriptionService::new());
    let creds = Arc::new(SharedCredentials::new(Some("tok".to_string())));
    let (active, mut workers) =
        ActiveManager::assemble(&ManagerSettings::default(), paper.clone(), creds);
    let manager = Arc::new(SubscriptionManager::Active(Arc::new(active)));
    let fanout = Arc::new(FanoutSink::new());
    state::register_configured(
        &manager,
        &fanout,
        &[SubscriptionRequestConfig {
            kind: "channel.chat.message_delete".to_string(),
            condition: Condition::from([("broadcaster_user_id".to_string(), json!("7"))]),
            mirror: Some(MirrorAction::MessageDelete),
        }],
    );
    workers.ingestion.tick().await;

    let st = Arc::new(state::AppState::new(manager, fanout.clone()));
    let router = routes::build_router(st);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router.clone();
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/v1/widgets"))
        .await
        .expect("websocket connect");
    wait_for_observers(&fanout, 1).await;

    let sub = paper.enabled_of("channel.chat.message_delete").remove(0);
    let req = Request::builder()
        .method("POST")
        .uri("/v1/notifications")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            json!({
                "kind": "event",
                "subscription": sub,
                "event": {"message_id": "m-77", "target_user_login": "someone"}
            })
            .to_string(),
        ))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("frame in time")
        .expect("stream open")
        .expect("frame ok");
    let Message::Text(text) = frame else {
        panic!("expected text frame, got {frame:?}");
    };
    let msg: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
    assert_eq!(msg["kiawaAction"], "Message_Delete");
    assert_eq!(msg["messageDelete"]["message_id"], "m-77");

    ws.send(Message::Close(None)).await.unwrap();
    wait_for_observers(&fanout, 0).await;

    server.abort();
}
