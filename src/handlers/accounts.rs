//! Anonymous account registration and challenge–response authentication.

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth;
use crate::config::{CHALLENGE_TTL_SECS, MAX_PREKEY_BATCH};
use crate::crypto;
use crate::db::{NewOneTimePrekey, NewSignedPrekey};
use crate::error::ApiError;
use crate::handlers::{ApiJson, OneTimePrekeyUpload, SignedPrekeyUpload};
use crate::state::AppState;

fn challenge_key(identity_key: &[u8; 32]) -> String {
    format!("challenge:{}", hex::encode(identity_key))
}

// -- Register --

#[derive(Deserialize)]
pub struct RegisterRequest {
    public_key: String,
    registration_id: i32,
    signed_prekey: SignedPrekeyUpload,
    one_time_prekeys: Vec<OneTimePrekeyUpload>,
}

pub async fn register_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let identity_key =
        crypto::decode_public_key_hex(&req.public_key).map_err(|_| ApiError::InvalidKeyLength)?;

    let prekey_public = crypto::decode_public_key_hex(&req.signed_prekey.public_key)
        .map_err(|_| ApiError::InvalidKeyLength)?;
    let prekey_signature = crypto::decode_signature_hex(&req.signed_prekey.signature)
        .map_err(|_| ApiError::InvalidKeyLength)?;
    crypto::verify_detached(&identity_key, &prekey_public, &prekey_signature)
        .map_err(|_| ApiError::InvalidSignedPrekeySignature)?;

    if req.one_time_prekeys.len() > MAX_PREKEY_BATCH {
        return Err(ApiError::TooManyPrekeys);
    }
    let one_time_prekeys = req
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

    let signed_prekey = NewSignedPrekey {
        key_id: req.signed_prekey.key_id,
        public_key: prekey_public.to_vec(),
        signature: prekey_signature.to_vec(),
    };

    let account_id = state
        .db
        .create_account(
            &identity_key,
            req.registration_id,
            &signed_prekey,
            &one_time_prekeys,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "account_id": account_id }))))
}

// -- Challenge --

#[derive(Deserialize)]
pub struct ChallengeRequest {
    public_key: String,
}

/// Issue a fresh nonce. The response is identical whether or not the
/// identity key is registered; only registered keys get the nonce stored,
/// so probing for account existence learns nothing.
pub async fn challenge_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ChallengeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let identity_key =
        crypto::decode_public_key_hex(&req.public_key).map_err(|_| ApiError::InvalidKeyLength)?;

    let nonce_hex = hex::encode(crypto::generate_nonce());

    if state
        .db
        .account_id_by_public_key(&identity_key)
        .await?
        .is_some()
    {
        state
            .ephemeral
            .set(
                &challenge_key(&identity_key),
                &nonce_hex,
                Duration::from_secs(CHALLENGE_TTL_SECS),
            )
            .await?;
    }

    Ok(Json(json!({ "nonce": nonce_hex })))
}

// -- Verify --

#[derive(Deserialize)]
pub struct VerifyRequest {
    public_key: String,
    signature: String,
}

/// Consume the stored nonce (the read deletes it) and check the detached
/// signature over its raw bytes. Success mints a bearer token.
pub async fn verify_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let identity_key =
        crypto::decode_public_key_hex(&req.public_key).map_err(|_| ApiError::InvalidKeyLength)?;
    let signature =
        crypto::decode_signature_hex(&req.signature).map_err(|_| ApiError::InvalidKeyLength)?;

    let nonce_hex = state
        .ephemeral
        .get_and_delete(&challenge_key(&identity_key))
        .await?
        .ok_or(ApiError::InvalidOrExpiredChallenge)?;
    let nonce = hex::decode(&nonce_hex).map_err(|_| ApiError::Internal)?;

    crypto::verify_detached(&identity_key, &nonce, &signature)
        .map_err(|_| ApiError::InvalidSignature)?;

    let account_id = state
        .db
        .account_id_by_public_key(&identity_key)
        .await?
        .ok_or(ApiError::InvalidOrExpiredChallenge)?;

    let (token, _claims) = auth::mint_token(
        &state.token_secret,
        account_id,
        state.config.token_expiry_secs,
    );

    Ok(Json(json!({ "token": token, "account_id": account_id })))
}
