use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use murmur_chat::resolver::parse_participant;
use murmur_types::api::{Claims, ConversationResponse, ResolveConversationRequest};
use murmur_types::error::ChatError;
use murmur_types::models::Conversation;

use crate::error::ApiError;
use crate::extract::ConversationPath;
use crate::state::AppState;

fn respond(conversation: Conversation, principal: Uuid) -> Result<ConversationResponse, ApiError> {
    let counterpart_id = conversation
        .counterpart(principal)
        .ok_or(ChatError::NotParticipant)?;
    Ok(ConversationResponse {
        conversation,
        counterpart_id,
    })
}

/// Create or fetch the conversation between the caller and `participant_id`.
/// Always 200: callers cannot tell whether the row was just created. A body
/// without a usable `participant_id` is an invalid participant.
pub async fn resolve_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<ResolveConversationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|_| ChatError::InvalidParticipant)?;
    let participant = parse_participant(&req.participant_id)?;
    let conversation = state.chat.resolve(claims.sub, participant).await?;
    debug!("{} resolved conversation {}", claims.sub, conversation.id);
    Ok((StatusCode::OK, Json(respond(conversation, claims.sub)?)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.chat.conversations_for(claims.sub).await?;
    let body = conversations
        .into_iter()
        .map(|c| respond(c, claims.sub))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(body))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    ConversationPath(conversation_id): ConversationPath,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation = state.chat.get_conversation(claims.sub, conversation_id).await?;
    Ok(Json(respond(conversation, claims.sub)?))
}
