use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use duet_types::Message;
use duet_types::events::{ChangeAction, RealtimeEvent};

/// A change to the message list, whether it came from the change feed or
/// from a local action that succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Created(Message),
    Updated(Message),
    Deleted(String),
}

impl ChatEvent {
    /// Convert a change-feed event for the messages collection. Returns
    /// `None` for other relationships and for payloads that are not
    /// messages.
    pub fn from_realtime(event: &RealtimeEvent, relationship_id: &str) -> Option<Self> {
        let action = event.action()?;
        let payload = &event.payload;

        if let Some(rel) = payload.get("relationshipId").and_then(Value::as_str)
            && rel != relationship_id
        {
            return None;
        }

        if action == ChangeAction::Delete {
            let id = payload.get("$id").and_then(Value::as_str)?;
            return Some(Self::Deleted(id.to_string()));
        }

        let message = match serde_json::from_value::<Message>(payload.clone()) {
            Ok(m) => m,
            Err(e) => {
                debug!("Ignoring {:?} event with non-message payload: {}", action, e);
                return None;
            }
        };
        if message.relationship_id != relationship_id {
            return None;
        }

        Some(match action {
            ChangeAction::Create => Self::Created(message),
            _ => Self::Updated(message),
        })
    }
}

/// Loaded messages, newest first. Ids are unique.
#[derive(Debug, Default, Clone)]
pub struct MessageCache {
    messages: Vec<Message>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Id of the oldest loaded message.
    pub fn oldest_id(&self) -> Option<&str> {
        self.messages.last().map(|m| m.id.as_str())
    }

    /// Apply one change. Returns whether the list changed.
    pub fn apply(&mut self, event: ChatEvent) -> bool {
        match event {
            ChatEvent::Created(message) => {
                match self.messages.iter_mut().find(|m| m.id == message.id) {
                    Some(existing) => *existing = message,
                    None => self.messages.insert(0, message),
                }
                true
            }
            ChatEvent::Updated(message) => match self.messages.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => {
                    *existing = message;
                    true
                }
                None => false,
            },
            ChatEvent::Deleted(id) => {
                let before = self.messages.len();
                self.messages.retain(|m| m.id != id);
                self.messages.len() != before
            }
        }
    }

    /// Append an older page, skipping ids already held. Returns how many
    /// messages were added.
    pub fn merge_page(&mut self, page: Vec<Message>) -> usize {
        let mut seen: HashSet<String> = self.messages.iter().map(|m| m.id.clone()).collect();
        let before = self.messages.len();
        for message in page {
            if seen.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }
        self.messages.len() - before
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use duet_types::ContentType;

    use super::*;

    pub(crate) fn message(id: &str, content: &str) -> Message {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Message {
            id: id.to_string(),
            created_at: at,
            content: content.to_string(),
            sender_id: "u1".into(),
            timestamp: at,
            reply_to: None,
            content_type: ContentType::text(),
            relationship_id: "rel".into(),
            file_id: None,
        }
    }

    fn ids(cache: &MessageCache) -> Vec<&str> {
        cache.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn pages_never_duplicate_ids() {
        let mut cache = MessageCache::new();
        assert_eq!(cache.merge_page(vec![message("c", ""), message("b", "")]), 2);
        assert_eq!(cache.merge_page(vec![message("b", ""), message("a", "")]), 1);
        assert_eq!(cache.merge_page(vec![message("a", ""), message("c", "")]), 0);
        assert_eq!(ids(&cache), vec!["c", "b", "a"]);
        assert_eq!(cache.oldest_id(), Some("a"));
    }

    #[test]
    fn create_prepends_or_replaces() {
        let mut cache = MessageCache::new();
        cache.merge_page(vec![message("b", "old"), message("a", "")]);

        assert!(cache.apply(ChatEvent::Created(message("c", ""))));
        assert_eq!(ids(&cache), vec!["c", "b", "a"]);

        cache.apply(ChatEvent::Created(message("b", "again")));
        assert_eq!(ids(&cache), vec!["c", "b", "a"]);
        assert_eq!(cache.get("b").unwrap().content, "again");
    }

    #[test]
    fn update_and_delete_of_unknown_ids_are_ignored() {
        let mut cache = MessageCache::new();
        cache.merge_page(vec![message("a", "hi")]);

        assert!(!cache.apply(ChatEvent::Updated(message("zz", "x"))));
        assert!(!cache.apply(ChatEvent::Deleted("zz".into())));
        assert!(cache.apply(ChatEvent::Updated(message("a", "edited"))));
        assert_eq!(cache.get("a").unwrap().content, "edited");
        assert!(cache.apply(ChatEvent::Deleted("a".into())));
        assert!(cache.is_empty());
    }

    #[test]
    fn realtime_events_filtered_by_relationship() {
        let channel = "databases.db.collections.msgs.documents";
        let payload = serde_json::to_value(message("m1", "hey")).unwrap();

        let event = RealtimeEvent::for_document(channel, ChangeAction::Create, payload.clone());
        assert_eq!(
            ChatEvent::from_realtime(&event, "rel"),
            Some(ChatEvent::Created(message("m1", "hey")))
        );
        assert_eq!(ChatEvent::from_realtime(&event, "other"), None);

        let deleted = RealtimeEvent::for_document(channel, ChangeAction::Delete, json!({"$id": "m1"}));
        assert_eq!(
            ChatEvent::from_realtime(&deleted, "rel"),
            Some(ChatEvent::Deleted("m1".into()))
        );

        let junk = RealtimeEvent::for_document(channel, ChangeAction::Update, json!({"$id": "m1"}));
        assert_eq!(ChatEvent::from_realtime(&junk, "rel"), None);
    }
}
