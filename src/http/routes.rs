//! Application routes.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use super::response::ApiError;
use super::AppState;
use crate::messages::{ListQuery, Message, NewMessage};

/// Liveness probe. Exempt from rate limiting by default.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "store": state.limiter.store_name().unwrap_or("disabled"),
    }))
}

pub async fn create_message(
    State(state): State<AppState>,
    payload: Result<Json<NewMessage>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let Json(new) = payload?;
    let message = state.messages.post(new)?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let Query(query) = query?;
    let messages = state.messages.list(&session_id, &query)?;
    Ok(Json(messages))
}
