use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use uuid::Uuid;

use murmur_types::error::ChatError;

use crate::error::ApiError;

/// `{conversation_id}` path segment. Anything that is not a UUID names no
/// conversation, so it is rejected as `NotFound`.
#[derive(Debug, Clone, Copy)]
pub struct ConversationPath(pub Uuid);

impl<S> FromRequestParts<S> for ConversationPath
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::from(ChatError::NotFound))?;
        raw.parse::<Uuid>()
            .map(Self)
            .map_err(|_| ApiError::from(ChatError::NotFound))
    }
}
