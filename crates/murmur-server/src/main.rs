mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use murmur_api::{AppState, AppStateInner};
use murmur_chat::{ChatService, Dispatcher};
use murmur_gateway::connection;
use murmur_types::auth::decode_token;

use crate::config::Config;

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = murmur_db::Database::open(&config.db_path)?;
    let dispatcher = Dispatcher::new(config.subscriber_queue);
    let state: AppState = Arc::new(AppStateInner {
        chat: ChatService::new(Arc::new(db), dispatcher),
        jwt_secret: config.jwt_secret.clone(),
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(murmur_api::router(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Murmur server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// A token in `?token=` or the Authorization header authenticates at the
/// upgrade; without one the client must send `Identify` after connecting.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query.token.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
    });

    let chat = state.chat.clone();
    match token {
        Some(token) => match decode_token(&token, &state.jwt_secret) {
            Some(user_id) => ws
                .on_upgrade(move |socket| {
                    connection::handle_connection_authenticated(socket, chat, user_id)
                })
                .into_response(),
            None => StatusCode::UNAUTHORIZED.into_response(),
        },
        None => {
            let jwt_secret = state.jwt_secret.clone();
            ws.on_upgrade(move |socket| connection::handle_connection(socket, chat, jwt_secret))
                .into_response()
        }
    }
}
