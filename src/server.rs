use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::dashboard::{self, MemoryStats, ParticipantDetail, SystemStatus};
use crate::line::{parse_events, verify_signature, InboundMessage, ReplyChannel, SIGNATURE_HEADER};
use crate::memory::{FallbackKind, MemoryManager, MemoryStore, ModelVariant};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<MemoryManager>,
    pub replier: Arc<dyn ReplyChannel>,
    pub channel_secret: String,
    pub mention_name: String,
    pub premium: bool,
}

impl AppState {
    /// Answer one inbound message. Never fails: problems are logged and the
    /// user gets fallback text.
    pub async fn relay(&self, inbound: InboundMessage) {
        if !inbound.addressed_to(&self.mention_name) {
            tracing::debug!(participant_id = %inbound.participant_id, "not addressed to the bot, ignoring");
            return;
        }

        let variant = ModelVariant::from_premium_flag(self.premium);
        let reply = match self
            .manager
            .handle_message(&inbound.participant_id, &inbound.text, variant)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(
                    participant_id = %inbound.participant_id,
                    error = %e,
                    "exchange failed"
                );
                self.manager
                    .generator()
                    .fallback(FallbackKind::Internal)
                    .to_string()
            }
        };

        if let Err(e) = self.replier.reply(&inbound.reply_token, &reply).await {
            tracing::error!(
                participant_id = %inbound.participant_id,
                error = %e,
                "failed to deliver reply"
            );
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/line_webhook", post(line_webhook))
        .route("/api/status", get(status))
        .route("/api/memory-stats", get(memory_stats))
        .route("/api/participants/{id}", get(participant))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("adoka listening on http://{}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn home() -> &'static str {
    "adoka LINE bot is running!"
}

#[derive(serde::Serialize)]
struct Health {
    status: String,
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

async fn line_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        tracing::warn!("webhook without signature header");
        return (StatusCode::BAD_REQUEST, "Missing signature");
    };
    if !verify_signature(&state.channel_secret, &body, signature) {
        tracing::error!("Invalid signature. Check your channel secret.");
        return (StatusCode::BAD_REQUEST, "Invalid signature");
    }

    let messages = match parse_events(&body) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "unreadable webhook body");
            return (StatusCode::BAD_REQUEST, "Malformed body");
        }
    };

    for inbound in messages {
        state.relay(inbound).await;
    }
    (StatusCode::OK, "OK")
}

enum ApiError {
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "monitoring query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

async fn status(State(state): State<AppState>) -> Result<Json<SystemStatus>, ApiError> {
    let records = state.manager.store().list().await?;
    Ok(Json(dashboard::system_status(&records)))
}

async fn memory_stats(State(state): State<AppState>) -> Result<Json<Vec<MemoryStats>>, ApiError> {
    let records = state.manager.store().list().await?;
    Ok(Json(dashboard::memory_stats(&records)))
}

async fn participant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ParticipantDetail>, ApiError> {
    let record = state
        .manager
        .store()
        .fetch(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("participant {}", id)))?;
    Ok(Json(dashboard::participant_detail(&record)))
}
