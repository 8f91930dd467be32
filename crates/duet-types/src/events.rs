use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Channel string for document changes in one collection.
pub fn documents_channel(database_id: &str, collection_id: &str) -> String {
    format!("databases.{}.collections.{}.documents", database_id, collection_id)
}

/// Frames received from the realtime socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Handshake accepted; echoes the subscribed channels
    Connected(Value),

    /// A change in one of the subscribed channels
    Event(RealtimeEvent),

    /// Server-side failure (bad channel, auth, ...)
    Error(RealtimeError),

    /// Reply to a ping or authentication frame
    Response(Value),
}

/// Frames sent from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ClientFrame {
    Ping,
    Authentication { session: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeError {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
}

/// A change delivered on a subscription. `payload` has the document shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub events: Vec<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Create => ".create",
            Self::Update => ".update",
            Self::Delete => ".delete",
        }
    }
}

impl RealtimeEvent {
    /// Action carried by the event names. Create wins over delete, delete
    /// over update, when several are present.
    pub fn action(&self) -> Option<ChangeAction> {
        [ChangeAction::Create, ChangeAction::Delete, ChangeAction::Update]
            .into_iter()
            .find(|action| self.events.iter().any(|e| e.ends_with(action.suffix())))
    }

    /// Build the event the backend would emit for `action` on a document.
    pub fn for_document(channel: &str, action: ChangeAction, payload: Value) -> Self {
        let id = payload
            .get("$id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            events: vec![
                format!("{}.{}{}", channel, id, action.suffix()),
                format!("{}.*{}", channel, action.suffix()),
            ],
            channels: vec![channel.to_string()],
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_event_frame() {
        let raw = r#"{
            "type": "event",
            "data": {
                "events": [
                    "databases.db.collections.msgs.documents.m1.update",
                    "databases.*.collections.*.documents.*.update"
                ],
                "channels": ["databases.db.collections.msgs.documents"],
                "timestamp": "2024-07-15 10:00:00.000",
                "payload": {"$id": "m1", "content": "hi"}
            }
        }"#;
        let frame: ServerFrame = serde_json::from_str(raw).unwrap();
        let ServerFrame::Event(event) = frame else {
            panic!("expected event frame");
        };
        assert_eq!(event.action(), Some(ChangeAction::Update));
        assert_eq!(event.payload["content"], "hi");
    }

    #[test]
    fn ping_frame_shape() {
        let text = serde_json::to_string(&ClientFrame::Ping).unwrap();
        assert_eq!(text, r#"{"type":"ping"}"#);
    }

    #[test]
    fn create_takes_priority() {
        let event = RealtimeEvent {
            events: vec!["x.update".into(), "x.create".into()],
            channels: vec![],
            payload: json!({}),
        };
        assert_eq!(event.action(), Some(ChangeAction::Create));

        let other = RealtimeEvent {
            events: vec!["x.documents.m1".into()],
            channels: vec![],
            payload: json!({}),
        };
        assert_eq!(other.action(), None);
    }

    #[test]
    fn synthesized_event_round_trips_action() {
        let channel = documents_channel("db", "msgs");
        let event = RealtimeEvent::for_document(&channel, ChangeAction::Delete, json!({"$id": "m9"}));
        assert_eq!(event.action(), Some(ChangeAction::Delete));
        assert_eq!(event.events[0], "databases.db.collections.msgs.documents.m9.delete");
    }
}
