pub mod conversations;
pub mod error;
pub mod extract;
pub mod messages;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post},
};

pub use state::{AppState, AppStateInner};

/// Authenticated REST routes. The gateway upgrade is mounted by the server.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::resolve_conversation),
        )
        .route("/conversations/{conversation_id}", get(conversations::get_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/conversations/{conversation_id}/delivered", post(messages::mark_delivered))
        .route("/conversations/{conversation_id}/seen", post(messages::mark_seen))
        .route("/messages/last", get(messages::last_messages))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state)
}
