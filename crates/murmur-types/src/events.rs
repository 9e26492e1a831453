use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, MessageStatus};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// The connection is now subscribed to a conversation
    Joined { conversation_id: Uuid },

    /// The connection is no longer subscribed to a conversation
    Left { conversation_id: Uuid },

    /// A message was persisted
    MessageCreate { message: Message },

    /// A batch of messages advanced to `status`
    MessageStatusUpdate {
        conversation_id: Uuid,
        status: MessageStatus,
        message_ids: Vec<Uuid>,
        count: usize,
        updated_by: Uuid,
    },

    /// A client command failed. `retryable` commands may be sent again as is.
    Error {
        code: String,
        message: String,
        retryable: bool,
    },
}

impl GatewayEvent {
    /// Returns the conversation this event is scoped to, if any. The fanout
    /// routes on it; unscoped events are never published.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { message } => Some(message.conversation_id),
            Self::MessageStatusUpdate { conversation_id, .. } => Some(*conversation_id),
            Self::Joined { conversation_id } | Self::Left { conversation_id } => {
                Some(*conversation_id)
            }
            Self::Ready { .. } | Self::Error { .. } => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start receiving events for a conversation
    Join { conversation_id: Uuid },

    /// Stop receiving events for a conversation
    Leave { conversation_id: Uuid },

    /// The client received everything addressed to it in this conversation
    MarkDelivered { conversation_id: Uuid },

    /// The client displayed the conversation
    MarkSeen { conversation_id: Uuid },
}
