use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

use murmur_chat::NewMessage;
use murmur_types::api::{
    Claims, LastMessageEntry, MarkDeliveredResponse, MarkSeenResponse, SendMessageRequest,
};

use crate::error::ApiError;
use crate::extract::ConversationPath;
use crate::state::AppState;

pub async fn send_message(
    State(state): State<AppState>,
    ConversationPath(conversation_id): ConversationPath,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let new = NewMessage {
        body: req.body,
        kind: req.kind,
        attachment_url: req.attachment_url,
    };
    let message = state.chat.send_message(conversation_id, claims.sub, new).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Full history, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    ConversationPath(conversation_id): ConversationPath,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state.chat.list_messages(claims.sub, conversation_id).await?;
    Ok(Json(messages))
}

pub async fn mark_delivered(
    State(state): State<AppState>,
    ConversationPath(conversation_id): ConversationPath,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let count = state
        .chat
        .mark_delivered(claims.sub, conversation_id, claims.sub)
        .await?;
    Ok(Json(MarkDeliveredResponse { count }))
}

pub async fn mark_seen(
    State(state): State<AppState>,
    ConversationPath(conversation_id): ConversationPath,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let message_ids = state
        .chat
        .mark_seen(claims.sub, conversation_id, claims.sub)
        .await?;
    Ok(Json(MarkSeenResponse { message_ids }))
}

/// Conversation-list previews, newest activity first.
pub async fn last_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let entries: Vec<LastMessageEntry> = state
        .chat
        .last_messages_for(claims.sub)
        .await?
        .into_iter()
        .map(|(counterpart_id, message)| LastMessageEntry {
            counterpart_id,
            message,
        })
        .collect();
    Ok(Json(entries))
}
