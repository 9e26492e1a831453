//! Delivery state machine: `sent -> delivered -> seen`, forward only.
//!
//! Transitions are applied in bulk by filter (conversation, receiver,
//! current status) rather than per message, so repeating a call is a no-op
//! and there is no read-then-write window. `seen` may be reached straight
//! from `sent` when the viewer already has the conversation open.

use uuid::Uuid;

use murmur_db::Database;
use murmur_types::error::ChatError;
use murmur_types::models::MessageStatus;

use crate::resolver;

/// Result of one bulk transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub conversation_id: Uuid,
    pub receiver_id: Uuid,
    pub status: MessageStatus,
    /// Ids that changed, oldest first. Empty when nothing matched.
    pub message_ids: Vec<Uuid>,
}

impl Transition {
    pub fn count(&self) -> usize {
        self.message_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.message_ids.is_empty()
    }
}

/// States a message may be in to move to `target`.
pub fn sources_for(target: MessageStatus) -> &'static [MessageStatus] {
    match target {
        MessageStatus::Sent => &[],
        MessageStatus::Delivered => &[MessageStatus::Sent],
        MessageStatus::Seen => &[MessageStatus::Sent, MessageStatus::Delivered],
    }
}

pub fn can_advance(from: MessageStatus, to: MessageStatus) -> bool {
    sources_for(to).contains(&from)
}

/// Move every message of the conversation addressed to `receiver_id` that
/// may legally advance to `target`.
///
/// Only the receiver may do this: `actor` must equal `receiver_id`.
pub fn advance(
    db: &Database,
    actor: Uuid,
    conversation_id: Uuid,
    receiver_id: Uuid,
    target: MessageStatus,
) -> Result<Transition, ChatError> {
    if receiver_id.is_nil() {
        return Err(ChatError::InvalidParticipant);
    }
    if actor != receiver_id {
        return Err(ChatError::Forbidden);
    }

    let conversation = resolver::get(db, conversation_id)?;
    if !conversation.has_participant(receiver_id) {
        return Err(ChatError::NotParticipant);
    }

    let from: Vec<&str> = sources_for(target).iter().map(MessageStatus::as_str).collect();
    let changed = db.transition_status(
        &conversation_id.to_string(),
        &receiver_id.to_string(),
        &from,
        target.as_str(),
    )?;

    let message_ids = changed
        .iter()
        .map(|id| id.parse::<Uuid>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ChatError::StorageFailure(format!("corrupt message id: {}", e)))?;

    Ok(Transition {
        conversation_id,
        receiver_id,
        status: target,
        message_ids,
    })
}

pub fn mark_delivered(
    db: &Database,
    actor: Uuid,
    conversation_id: Uuid,
    receiver_id: Uuid,
) -> Result<Transition, ChatError> {
    advance(db, actor, conversation_id, receiver_id, MessageStatus::Delivered)
}

pub fn mark_seen(
    db: &Database,
    actor: Uuid,
    conversation_id: Uuid,
    viewer_id: Uuid,
) -> Result<Transition, ChatError> {
    advance(db, actor, conversation_id, viewer_id, MessageStatus::Seen)
}
