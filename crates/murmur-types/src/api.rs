use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, Message, MessageKind};

// -- JWT Claims --

/// JWT claims issued by the identity service. Decoded by `crate::auth` for
/// both REST requests and gateway connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveConversationRequest {
    pub participant_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationResponse {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub counterpart_id: Uuid,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub attachment_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkDeliveredResponse {
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkSeenResponse {
    pub message_ids: Vec<Uuid>,
}

/// One conversation-list preview row: the counterpart and the latest
/// message exchanged with them.
#[derive(Debug, Serialize, Deserialize)]
pub struct LastMessageEntry {
    pub counterpart_id: Uuid,
    pub message: Message,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub retryable: bool,
}
