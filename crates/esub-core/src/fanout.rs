//! Best-effort broadcast to overlay observers.
//!
//! Observers are opened and closed by the transport layer (the daemon's
//! websocket route). Every broadcast serializes once and sends a
//! newline-terminated JSON text to each open observer; a failing observer is
//! logged and skipped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use esub_config::MirrorAction;
use esub_schemas::{EventPayload, Subscription};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::EventCallback;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
pub struct FanoutSink {
    observers: Mutex<HashMap<ObserverId, mpsc::UnboundedSender<String>>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) -> (ObserverId, mpsc::UnboundedReceiver<String>) {
        let id = ObserverId(Uuid::new_v4());
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(id, tx);
        debug!(observer = %id, "overlay observer opened");
        (id, rx)
    }

    pub fn close(&self, id: ObserverId) -> bool {
        let removed = self.lock().remove(&id).is_some();
        if removed {
            debug!(observer = %id, "overlay observer closed");
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.lock().len()
    }

    /// Send `payload` to every open observer. Returns how many accepted it.
    pub fn broadcast<T: Serialize + ?Sized>(&self, payload: &T) -> usize {
        let text = match serde_json::to_string(payload) {
            Ok(mut s) => {
                s.push('\n');
                s
            }
            Err(e) => {
                warn!(error = %e, "failed to serialize overlay payload");
                return 0;
            }
        };
        let observers = self.lock();
        let mut sent = 0;
        for (id, tx) in observers.iter() {
            match tx.send(text.clone()) {
                Ok(()) => sent += 1,
                Err(_) => warn!(observer = %id, "overlay observer is gone; skipping"),
            }
        }
        sent
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ObserverId, mpsc::UnboundedSender<String>>> {
        match self.observers.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ---------------------------------------------------------------------------
// Overlay messages
// ---------------------------------------------------------------------------

/// Messages understood by the overlay widgets, tagged by `kiawaAction`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kiawaAction")]
pub enum WidgetMessage {
    #[serde(rename = "Message")]
    Message {
        channel: String,
        tags: Value,
        message: String,
        #[serde(rename = "messageBadges")]
        message_badges: Value,
    },
    #[serde(rename = "Message_Delete")]
    MessageDelete {
        #[serde(rename = "messageDelete")]
        message_delete: Value,
    },
    #[serde(rename = "Mod_Action")]
    ModAction {
        #[serde(rename = "modAction")]
        mod_action: Value,
    },
}

impl WidgetMessage {
    pub fn mirror(action: MirrorAction, event: &EventPayload) -> Self {
        match action {
            MirrorAction::Message => Self::chat(event),
            MirrorAction::MessageDelete => WidgetMessage::MessageDelete {
                message_delete: event.clone(),
            },
            MirrorAction::ModAction => WidgetMessage::ModAction {
                mod_action: event.clone(),
            },
        }
    }

    /// Chat message in the overlay's IRC-like shape.
    fn chat(event: &EventPayload) -> Self {
        let text = |v: &Value| v.as_str().unwrap_or_default().to_string();
        let login = text(&event["broadcaster_user_login"]);
        WidgetMessage::Message {
            channel: format!("#{login}"),
            tags: json!({
                "id": event["message_id"],
                "user-id": event["chatter_user_id"],
                "display-name": event["chatter_user_name"],
                "color": event["color"],
            }),
            message: text(&event["message"]["text"]),
            message_badges: event.get("badges").cloned().unwrap_or_else(|| json!([])),
        }
    }
}

/// Callback that mirrors every event of its type to the overlay.
pub fn mirror_callback(sink: Arc<FanoutSink>, action: MirrorAction) -> EventCallback {
    Arc::new(move |event: &EventPayload, sub: &Subscription| {
        let sent = sink.broadcast(&WidgetMessage::mirror(action, event));
        debug!(kind = %sub.kind, observers = sent, "mirrored event to overlay");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use esub_schemas::{Condition, SubscriptionStatus};

    #[test]
    fn broadcast_reaches_every_open_observer() {
        let sink = FanoutSink::new();
        let (_a, mut ra) = sink.open();
        let (b, mut rb) = sink.open();
        assert_eq!(sink.broadcast(&json!({"x": 1})), 2);
        assert_eq!(ra.try_recv().unwrap(), "{\"x\":1}\n");
        assert_eq!(rb.try_recv().unwrap(), "{\"x\":1}\n");

        assert!(sink.close(b));
        assert!(!sink.close(b));
        assert_eq!(sink.broadcast(&json!({"x": 2})), 1);
    }

    #[test]
    fn dropped_observer_does_not_stop_the_others() {
        let sink = FanoutSink::new();
        let (_a, ra) = sink.open();
        let (_b, mut rb) = sink.open();
        drop(ra);
        assert_eq!(sink.broadcast(&json!("hi")), 1);
        assert_eq!(rb.try_recv().unwrap(), "\"hi\"\n");
    }

    #[test]
    fn unserializable_payload_is_sent_to_nobody() {
        let sink = FanoutSink::new();
        let (_a, mut ra) = sink.open();
        let (_b, mut rb) = sink.open();
        // non-string map keys have no JSON form
        let bad: HashMap<Vec<u8>, u8> = HashMap::from([(vec![1, 2], 3)]);

        assert_eq!(sink.broadcast(&bad), 0);
        assert!(ra.try_recv().is_err());
        assert!(rb.try_recv().is_err());
        assert_eq!(sink.observer_count(), 2);
    }

    #[test]
    fn widget_messages_carry_action_tag() {
        let del = WidgetMessage::mirror(MirrorAction::MessageDelete, &json!({"message_id": "m"}));
        let v = serde_json::to_value(&del).unwrap();
        assert_eq!(v["kiawaAction"], "Message_Delete");
        assert_eq!(v["messageDelete"]["message_id"], "m");

        let m = WidgetMessage::mirror(MirrorAction::ModAction, &json!({"action": "ban"}));
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["kiawaAction"], "Mod_Action");
        assert_eq!(v["modAction"]["action"], "ban");
    }

    #[test]
    fn chat_message_shape() {
        let ev = json!({
            "broadcaster_user_login": "kiara",
            "chatter_user_id": "42",
            "chatter_user_name": "Viewer",
            "message_id": "m-1",
            "message": {"text": "hello"},
            "badges": [{"set_id": "vip"}]
        });
        let v = serde_json::to_value(WidgetMessage::mirror(MirrorAction::Message, &ev)).unwrap();
        assert_eq!(v["kiawaAction"], "Message");
        assert_eq!(v["channel"], "#kiara");
        assert_eq!(v["message"], "hello");
        assert_eq!(v["tags"]["display-name"], "Viewer");
        assert_eq!(v["messageBadges"][0]["set_id"], "vip");
    }

    #[test]
    fn mirror_callback_broadcasts() {
        let sink = Arc::new(FanoutSink::new());
        let (_id, mut rx) = sink.open();
        let cb = mirror_callback(sink.clone(), MirrorAction::ModAction);
        let sub = Subscription::new(
            "A",
            "channel.moderate",
            Condition::new(),
            SubscriptionStatus::Enabled,
        );
        cb(&json!({"action": "timeout"}), &sub);
        let line = rx.try_recv().unwrap();
        assert!(line.contains("\"kiawaAction\":\"Mod_Action\""));
    }
}
