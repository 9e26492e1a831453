//! Database row types. These map directly to SQLite rows and stay stringly
//! typed; conversion into murmur-types models happens here so corrupt rows
//! surface as errors instead of default values.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use murmur_types::models::{Conversation, Message};

pub struct ConversationRow {
    pub id: String,
    pub participant_lo: String,
    pub participant_hi: String,
    pub last_message_id: Option<String>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub body: String,
    pub attachment_url: Option<String>,
    pub kind: String,
    pub status: String,
    pub created_at: String,
}

/// Timestamps are stored with fixed microsecond precision and a `Z` suffix
/// so that string order equals time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp '{}'", raw))?;
    Ok(ts.with_timezone(&Utc))
}

fn parse_id(raw: &str, field: &str) -> Result<Uuid> {
    raw.parse()
        .with_context(|| format!("corrupt {} '{}'", field, raw))
}

impl ConversationRow {
    pub fn into_model(self) -> Result<Conversation> {
        Ok(Conversation {
            id: parse_id(&self.id, "conversation id")?,
            participants: [
                parse_id(&self.participant_lo, "participant_lo")?,
                parse_id(&self.participant_hi, "participant_hi")?,
            ],
            last_message_id: self
                .last_message_id
                .as_deref()
                .map(|id| parse_id(id, "last_message_id"))
                .transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl MessageRow {
    pub fn from_model(message: &Message) -> Self {
        Self {
            id: message.id.to_string(),
            conversation_id: message.conversation_id.to_string(),
            sender_id: message.sender_id.to_string(),
            receiver_id: message.receiver_id.to_string(),
            body: message.body.clone(),
            attachment_url: message.attachment_url.clone(),
            kind: message.kind.as_str().to_string(),
            status: message.status.as_str().to_string(),
            created_at: format_timestamp(&message.created_at),
        }
    }

    pub fn into_model(self) -> Result<Message> {
        Ok(Message {
            id: parse_id(&self.id, "message id")?,
            conversation_id: parse_id(&self.conversation_id, "conversation_id")?,
            sender_id: parse_id(&self.sender_id, "sender_id")?,
            receiver_id: parse_id(&self.receiver_id, "receiver_id")?,
            kind: self.kind.parse().map_err(anyhow::Error::msg)?,
            status: self.status.parse().map_err(anyhow::Error::msg)?,
            created_at: parse_timestamp(&self.created_at)?,
            body: self.body,
            attachment_url: self.attachment_url,
        })
    }
}
