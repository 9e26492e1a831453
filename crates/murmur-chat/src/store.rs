use chrono::{SubsecRound, Utc};
use uuid::Uuid;

use murmur_db::Database;
use murmur_db::models::MessageRow;
use murmur_types::error::ChatError;
use murmur_types::models::{Message, MessageKind, MessageStatus};

use crate::resolver;

/// Content of a message about to be sent.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub body: String,
    pub kind: MessageKind,
    pub attachment_url: Option<String>,
}

impl NewMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }
}

/// Persist a message from `sender_id` into `conversation_id`.
///
/// The receiver is the other participant and the initial status is `sent`.
/// The conversation's `last_message_id` is advanced in the same transaction.
pub fn append(
    db: &Database,
    conversation_id: Uuid,
    sender_id: Uuid,
    new: NewMessage,
) -> Result<Message, ChatError> {
    if sender_id.is_nil() {
        return Err(ChatError::InvalidParticipant);
    }

    let attachment_url = new
        .attachment_url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());
    if new.body.trim().is_empty() && attachment_url.is_none() {
        return Err(ChatError::EmptyMessage);
    }

    let conversation = resolver::get(db, conversation_id)?;
    let receiver_id = conversation
        .counterpart(sender_id)
        .ok_or(ChatError::NotParticipant)?;

    let message = Message {
        id: Uuid::new_v4(),
        conversation_id,
        sender_id,
        receiver_id,
        body: new.body,
        attachment_url,
        kind: new.kind,
        status: MessageStatus::Sent,
        // storage keeps microseconds
        created_at: Utc::now().trunc_subsecs(6),
    };

    db.append_message(&MessageRow::from_model(&message))?;
    Ok(message)
}

/// All messages of a conversation, ascending by creation time. An existing
/// conversation without messages yields an empty list.
pub fn list_by_conversation(db: &Database, conversation_id: Uuid) -> Result<Vec<Message>, ChatError> {
    resolver::get(db, conversation_id)?;

    db.get_messages(&conversation_id.to_string())?
        .into_iter()
        .map(|row| row.into_model().map_err(ChatError::from))
        .collect()
}

pub fn get_message(db: &Database, message_id: Uuid) -> Result<Message, ChatError> {
    db.get_message(&message_id.to_string())?
        .ok_or(ChatError::NotFound)?
        .into_model()
        .map_err(ChatError::from)
}
