use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent over the WebSocket gateway.
///
/// Errand status changes are deliberately absent: viewers learn about them
/// by re-fetching. Only newly inserted chat messages are pushed, and only to
/// connections subscribed to the message's conversation. Clients keep their
/// message log keyed by `id`, so a duplicated delivery is a no-op append.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, display_name: String },

    /// A new message was posted to a conversation
    MessageCreate {
        id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_name: String,
        content: String,
        created_at: DateTime<Utc>,
    },
}

impl GatewayEvent {
    /// Returns the conversation_id if this event is scoped to a specific
    /// conversation. Events that return `None` are delivered unconditionally.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate {
                conversation_id, ..
            } => Some(*conversation_id),
            Self::Ready { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Replace the set of conversations this connection receives
    /// `MessageCreate` events for. Typically one id, the open chat view.
    Subscribe { conversation_ids: Vec<Uuid> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_create_is_conversation_scoped() {
        let event = GatewayEvent::MessageCreate {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            sender_name: "maria".into(),
            content: "hi".into(),
            created_at: Utc::now(),
        };
        assert!(event.conversation_id().is_some());

        let ready = GatewayEvent::Ready {
            user_id: Uuid::new_v4(),
            display_name: "maria".into(),
        };
        assert!(ready.conversation_id().is_none());
    }

    #[test]
    fn commands_deserialize_from_tagged_json() {
        let raw = r#"{"type":"Subscribe","data":{"conversation_ids":[]}}"#;
        let cmd: GatewayCommand = serde_json::from_str(raw).unwrap();
        assert!(matches!(cmd, GatewayCommand::Subscribe { conversation_ids } if conversation_ids.is_empty()));
    }
}
