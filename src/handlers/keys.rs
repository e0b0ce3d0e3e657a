//! Prekey bundle publication and consumption.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthedAccount;
use crate::config::MAX_PREKEY_BATCH;
use crate::crypto;
use crate::db::{NewOneTimePrekey, NewSignedPrekey};
use crate::error::ApiError;
use crate::handlers::{ApiJson, OneTimePrekeyUpload, SignedPrekeyUpload};
use crate::state::AppState;

#[derive(Serialize)]
struct SignedPrekeyJson {
    key_id: i32,
    public_key: String,
    signature: String,
}

#[derive(Serialize)]
struct OneTimePrekeyJson {
    key_id: i32,
    public_key: String,
}

#[derive(Serialize)]
pub struct Bundle {
    identity_key: String,
    registration_id: i32,
    signed_prekey: SignedPrekeyJson,
    one_time_prekey: Option<OneTimePrekeyJson>,
}

#[derive(Serialize)]
pub struct BundleResponse {
    bundle: Bundle,
    prekey_count: i64,
    needs_prekey_refresh: bool,
}

/// Dispense a prekey bundle for the target account, consuming at most one
/// one-time prekey. An exhausted pool yields `one_time_prekey: null`; the
/// client can still start a session from the signed prekey alone, at a
/// lower forward-secrecy tier.
pub async fn fetch_bundle_handler(
    State(state): State<AppState>,
    AuthedAccount(_caller): AuthedAccount,
    Path(account_id): Path<String>,
) -> Result<Json<BundleResponse>, ApiError> {
    let account_id = Uuid::try_parse(&account_id).map_err(|_| ApiError::AccountNotFound)?;

    let account = state
        .db
        .get_account(account_id)
        .await?
        .ok_or(ApiError::AccountNotFound)?;
    let signed_prekey = state
        .db
        .get_signed_prekey(account_id)
        .await?
        .ok_or(ApiError::NoSignedPrekey)?;

    let one_time_prekey = state.db.take_one_time_prekey(account_id).await?;
    let remaining = state.db.count_one_time_prekeys(account_id).await?;

    Ok(Json(BundleResponse {
        bundle: Bundle {
            identity_key: hex::encode(&account.public_key),
            registration_id: account.registration_id,
            signed_prekey: SignedPrekeyJson {
                key_id: signed_prekey.key_id,
                public_key: hex::encode(&signed_prekey.public_key),
                signature: hex::encode(&signed_prekey.signature),
            },
            one_time_prekey: one_time_prekey.map(|prekey| OneTimePrekeyJson {
                key_id: prekey.key_id,
                public_key: hex::encode(&prekey.public_key),
            }),
        },
        prekey_count: remaining,
        needs_prekey_refresh: remaining < state.config.prekey_refill_threshold,
    }))
}

// -- Replenish --

#[derive(Deserialize)]
pub struct ReplenishRequest {
    one_time_prekeys: Vec<OneTimePrekeyUpload>,
}

/// Upload a batch of one-time prekeys. Key-id collisions with rows already
/// on file are silent no-ops, so retrying an upload is harmless.
pub async fn replenish_handler(
    State(state): State<AppState>,
    AuthedAccount(account_id): AuthedAccount,
    ApiJson(req): ApiJson<ReplenishRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.one_time_prekeys.is_empty() {
        return Err(ApiError::MissingFields);
    }
    if req.one_time_prekeys.len() > MAX_PREKEY_BATCH {
        return Err(ApiError::TooManyPrekeys);
    }

    let prekeys = req
        .one_time_prekeys
        .iter()
        .map(|prekey| {
            let public_key = crypto::decode_public_key_hex(&prekey.public_key)
                .map_err(|_| ApiError::InvalidKeyLength)?;
            Ok(NewOneTimePrekey {
                key_id: prekey.key_id,
                public_key: public_key.to_vec(),
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    let uploaded = state
        .db
        .insert_one_time_prekeys(account_id, &prekeys)
        .await?;
    let total = state.db.count_one_time_prekeys(account_id).await?;

    Ok(Json(json!({ "uploaded": uploaded, "total": total })))
}

// -- Rotate --

/// Replace the signed prekey in place. The new signature must verify under
/// the caller's identity key before anything is written.
pub async fn rotate_handler(
    State(state): State<AppState>,
    AuthedAccount(account_id): AuthedAccount,
    ApiJson(req): ApiJson<SignedPrekeyUpload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account = state
        .db
        .get_account(account_id)
        .await?
        .ok_or(ApiError::AccountNotFound)?;
    let identity_key: [u8; 32] = account
        .public_key
        .as_slice()
        .try_into()
        .map_err(|_| ApiError::Internal)?;

    let prekey_public =
        crypto::decode_public_key_hex(&req.public_key).map_err(|_| ApiError::InvalidKeyLength)?;
    let prekey_signature =
        crypto::decode_signature_hex(&req.signature).map_err(|_| ApiError::InvalidKeyLength)?;
    crypto::verify_detached(&identity_key, &prekey_public, &prekey_signature)
        .map_err(|_| ApiError::InvalidSignedPrekeySignature)?;

    state
        .db
        .upsert_signed_prekey(
            account_id,
            &NewSignedPrekey {
                key_id: req.key_id,
                public_key: prekey_public.to_vec(),
                signature: prekey_signature.to_vec(),
            },
        )
        .await?;

    Ok(Json(json!({ "updated": true })))
}
