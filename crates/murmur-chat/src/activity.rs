use uuid::Uuid;

use murmur_db::Database;
use murmur_types::error::ChatError;
use murmur_types::models::Message;

/// Latest message exchanged with each counterpart of `principal`, one entry
/// per counterpart, newest first. Ties on `created_at` go to the message
/// stored last.
///
/// Derived on every call from the message table; nothing is cached, so the
/// result always reflects the last committed append.
pub fn last_messages_for(db: &Database, principal: Uuid) -> Result<Vec<(Uuid, Message)>, ChatError> {
    db.get_last_messages_for(&principal.to_string())?
        .into_iter()
        .map(|row| -> Result<(Uuid, Message), ChatError> {
            let message = row.into_model()?;
            let counterpart = if message.sender_id == principal {
                message.receiver_id
            } else {
                message.sender_id
            };
            Ok((counterpart, message))
        })
        .collect()
}
