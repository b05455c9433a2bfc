//! HTTP surface — the Twilio webhook and operational endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::router::MessageRouter;
use crate::store::ConversationStore;

/// Shared state for the HTTP routes.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<MessageRouter>,
    pub store: Arc<dyn ConversationStore>,
}

/// Twilio posts `application/x-www-form-urlencoded` with capitalized keys.
#[derive(Debug, Deserialize)]
pub struct InboundForm {
    #[serde(rename = "Body")]
    pub body: String,
    #[serde(rename = "From")]
    pub from: String,
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "msg": "up & running" }))
}

/// POST /message
///
/// The webhook reply body is the outbound text (possibly empty). Only
/// store failures surface as 500; user-level outcomes are always 200 so
/// the messaging provider does not retry-storm the endpoint.
async fn message(
    State(state): State<AppState>,
    Form(form): Form<InboundForm>,
) -> impl IntoResponse {
    match state.router.handle(&form.from, &form.body).await {
        Ok(reply) => (StatusCode::OK, reply).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to handle inbound message");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /users/{phone}/previous
///
/// Read-only archive listing for operators.
async fn previous_conversations(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> impl IntoResponse {
    let user = match state.store.get_user_by_phone(&phone).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": "unknown phone number" })),
            )
                .into_response();
        }
        Err(e) => {
            error!(error = %e, "Failed to look up user");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match state.store.list_previous(user.id).await {
        Ok(conversations) => Json(conversations).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list previous conversations");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Build the service router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/message", post(message))
        .route("/users/{phone}/previous", get(previous_conversations))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
