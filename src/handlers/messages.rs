//! Sealed message queue: send, drain, delete.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthedAccount;
use crate::config::MAX_CIPHERTEXT_BYTES;
use crate::error::ApiError;
use crate::fabric::ServerFrame;
use crate::handlers::ApiJson;
use crate::state::AppState;

// -- Send --

#[derive(Deserialize)]
pub struct SendRequest {
    recipient_id: String,
    ciphertext: String,
    message_type: Option<i16>,
}

/// Queue opaque ciphertext for a recipient and wake their open sockets.
///
/// The caller's account handle is deliberately not passed to the store:
/// sealed sender is an architectural invariant of the queue row, not a
/// policy applied on the way in.
pub async fn send_handler(
    State(state): State<AppState>,
    AuthedAccount(_sender): AuthedAccount,
    ApiJson(req): ApiJson<SendRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let recipient_id =
        Uuid::try_parse(&req.recipient_id).map_err(|_| ApiError::RecipientNotFound)?;

    if req.ciphertext.is_empty() {
        return Err(ApiError::MissingFields);
    }
    let ciphertext = hex::decode(&req.ciphertext).map_err(|_| ApiError::MissingFields)?;
    if ciphertext.len() > MAX_CIPHERTEXT_BYTES {
        return Err(ApiError::MessageTooLarge);
    }

    let message_type = req.message_type.unwrap_or(1);
    if !(1..=2).contains(&message_type) {
        return Err(ApiError::MissingFields);
    }

    let message_id = state
        .db
        .enqueue_message(
            recipient_id,
            &ciphertext,
            message_type,
            state.config.message_ttl_days,
        )
        .await?;

    // Only after the row is committed; sockets that are gone are no-ops.
    state
        .fabric
        .notify(recipient_id, &ServerFrame::NewMessage { message_id })
        .await;

    Ok((StatusCode::CREATED, Json(json!({ "message_id": message_id }))))
}

// -- Drain --

#[derive(Serialize)]
struct QueuedMessageJson {
    id: Uuid,
    ciphertext: String,
    message_type: i16,
}

#[derive(Serialize)]
pub struct ReceiveResponse {
    messages: Vec<QueuedMessageJson>,
}

/// Return up to 100 queued envelopes for the authenticated account in
/// delivery order. No sender, no ingestion time, no expiry: id, ciphertext
/// and type tag only. The client decrypts locally, then deletes.
pub async fn receive_handler(
    State(state): State<AppState>,
    AuthedAccount(account_id): AuthedAccount,
) -> Result<Json<ReceiveResponse>, ApiError> {
    let rows = state.db.fetch_messages(account_id).await?;
    Ok(Json(ReceiveResponse {
        messages: rows
            .into_iter()
            .map(|row| QueuedMessageJson {
                id: row.id,
                ciphertext: hex::encode(&row.ciphertext),
                message_type: row.message_type,
            })
            .collect(),
    }))
}

// -- Delete --

/// Delete a drained envelope. The row must belong to the authenticated
/// account; anything else (wrong owner, malformed id, no such row) is
/// the same 404.
pub async fn delete_handler(
    State(state): State<AppState>,
    AuthedAccount(account_id): AuthedAccount,
    Path(message_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let message_id = Uuid::try_parse(&message_id).map_err(|_| ApiError::MessageNotFound)?;
    if state.db.delete_message(account_id, message_id).await? {
        Ok(Json(json!({ "deleted": true })))
    } else {
        Err(ApiError::MessageNotFound)
    }
}
