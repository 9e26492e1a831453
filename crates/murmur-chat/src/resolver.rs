use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use murmur_db::Database;
use murmur_db::models::format_timestamp;
use murmur_types::error::ChatError;
use murmur_types::models::{Conversation, canonical_pair};

/// Parse a participant id coming from outside (request body, path).
pub fn parse_participant(raw: &str) -> Result<Uuid, ChatError> {
    match raw.trim().parse::<Uuid>() {
        Ok(id) if !id.is_nil() => Ok(id),
        _ => Err(ChatError::InvalidParticipant),
    }
}

/// Return the conversation between `a` and `b`, creating it on first use.
///
/// Creation is create-or-fetch: the canonical pair is UNIQUE in storage and
/// a losing concurrent insert reads back the winner, so every caller gets
/// the same conversation.
pub fn resolve(db: &Database, a: Uuid, b: Uuid) -> Result<Conversation, ChatError> {
    let (lo, hi) = canonical_pair(a, b)?;
    let (lo, hi) = (lo.to_string(), hi.to_string());

    if let Some(existing) = db.find_conversation_by_pair(&lo, &hi)? {
        return Ok(existing.into_model()?);
    }

    let id = Uuid::new_v4();
    let row = db.insert_conversation_or_fetch(
        &id.to_string(),
        &lo,
        &hi,
        &format_timestamp(&Utc::now()),
    )?;
    let conversation = row.into_model()?;
    if conversation.id != id {
        debug!("Lost creation race for {}:{}, using {}", lo, hi, conversation.id);
    }
    Ok(conversation)
}

pub fn get(db: &Database, conversation_id: Uuid) -> Result<Conversation, ChatError> {
    db.get_conversation(&conversation_id.to_string())?
        .ok_or(ChatError::NotFound)?
        .into_model()
        .map_err(ChatError::from)
}

/// Every conversation `principal` takes part in, most recent activity first.
pub fn conversations_for(db: &Database, principal: Uuid) -> Result<Vec<Conversation>, ChatError> {
    db.get_conversations_for(&principal.to_string())?
        .into_iter()
        .map(|row| row.into_model().map_err(ChatError::from))
        .collect()
}
