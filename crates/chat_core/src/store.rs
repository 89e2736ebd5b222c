use std::collections::HashMap;

use shared::{
    domain::ConversationId,
    protocol::{ConversationSummary, MessagePayload},
};

/// Client-side cache for one participant. Consistency comes from wholesale
/// replacement on every successful fetch, never from patching: the most
/// recent completed fetch wins, and a late fetch for a deselected
/// conversation simply lands on the entry it was keyed against.
#[derive(Default)]
pub struct ConversationStore {
    conversations: Vec<ConversationSummary>,
    messages: HashMap<ConversationId, Vec<MessagePayload>>,
}

impl ConversationStore {
    /// Replaces the conversation list, newest activity first. Conversations
    /// that never received a message sort last.
    pub fn replace_conversations(&mut self, mut conversations: Vec<ConversationSummary>) {
        conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        self.conversations = conversations;
    }

    /// Replaces one conversation's message history in display order. The sort
    /// is stable, so messages created in the same instant keep the order the
    /// server returned them in.
    pub fn replace_messages(
        &mut self,
        conversation_id: ConversationId,
        mut messages: Vec<MessagePayload>,
    ) {
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        self.messages.insert(conversation_id, messages);
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    /// Message history for a conversation, empty until first fetched.
    /// Entries are retained when the selection moves elsewhere.
    pub fn messages(&self, conversation_id: &ConversationId) -> &[MessagePayload] {
        self.messages
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use shared::domain::{ConversationKind, ConversationStatus, MessageKind, ParticipantKind};

    use super::*;

    fn at(timestamp: &str) -> DateTime<Utc> {
        timestamp.parse().expect("timestamp")
    }

    fn conversation(id: &str, last_message_at: Option<&str>) -> ConversationSummary {
        ConversationSummary {
            conversation_id: id.into(),
            project_id: None,
            client_id: None,
            employee_id: None,
            kind: ConversationKind::Direct,
            status: ConversationStatus::Open,
            last_message_at: last_message_at.map(at),
        }
    }

    fn message(id: &str, created_at: &str) -> MessagePayload {
        MessagePayload {
            message_id: id.into(),
            conversation_id: "c-1".into(),
            sender_id: "u-1".into(),
            sender_type: ParticipantKind::Client,
            sender_name: "Avery".to_string(),
            content: format!("message {id}"),
            message_type: MessageKind::Text,
            attachment: None,
            read: false,
            created_at: at(created_at),
        }
    }

    #[test]
    fn conversations_order_by_latest_activity_with_idle_ones_last() {
        let mut store = ConversationStore::default();
        store.replace_conversations(vec![
            conversation("c-idle", None),
            conversation("c-old", Some("2026-03-01T09:00:00Z")),
            conversation("c-new", Some("2026-03-02T09:00:00Z")),
        ]);

        let ids: Vec<&str> = store
            .conversations()
            .iter()
            .map(|c| c.conversation_id.0.as_str())
            .collect();
        assert_eq!(ids, vec!["c-new", "c-old", "c-idle"]);
    }

    #[test]
    fn messages_order_by_creation_time_keeping_server_order_on_ties() {
        let mut store = ConversationStore::default();
        store.replace_messages(
            "c-1".into(),
            vec![
                message("m-3", "2026-03-01T10:00:05Z"),
                message("m-1", "2026-03-01T10:00:00Z"),
                message("m-2a", "2026-03-01T10:00:02Z"),
                message("m-2b", "2026-03-01T10:00:02Z"),
            ],
        );

        let ids: Vec<&str> = store
            .messages(&"c-1".into())
            .iter()
            .map(|m| m.message_id.0.as_str())
            .collect();
        assert_eq!(ids, vec!["m-1", "m-2a", "m-2b", "m-3"]);
    }

    #[test]
    fn replacement_is_wholesale_and_other_entries_are_retained() {
        let mut store = ConversationStore::default();
        store.replace_messages(
            "c-1".into(),
            vec![
                message("m-1", "2026-03-01T10:00:00Z"),
                message("m-2", "2026-03-01T10:00:01Z"),
            ],
        );
        store.replace_messages("c-2".into(), vec![message("m-9", "2026-03-01T11:00:00Z")]);

        // A refetch that no longer contains m-1 drops it; no merging.
        store.replace_messages("c-1".into(), vec![message("m-2", "2026-03-01T10:00:01Z")]);

        assert_eq!(store.messages(&"c-1".into()).len(), 1);
        assert_eq!(store.messages(&"c-2".into()).len(), 1);
        assert!(store.messages(&"c-3".into()).is_empty());
    }
}
