//! Bearer tokens and the authentication middleware.
//!
//! Token format: `{account_id hex}.{token_id hex}.{expiry unix secs}.{mac}`
//! where the MAC is HMAC-SHA256 under the server's symmetric secret,
//! base64url-encoded without padding. Rotating the secret invalidates every
//! outstanding token.
//!
//! Verification order: shape, MAC (constant-time), expiry, then the
//! revocation set. The revocation lookup happens on every authenticated
//! request, WebSocket auth frames included.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_CONTEXT: &str = "umbra-token";

/// Claims carried by a bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenClaims {
    pub account_id: Uuid,
    pub token_id: Uuid,
    pub expires_at: u64,
}

fn token_message(account_id: Uuid, token_id: Uuid, expires_at: u64) -> String {
    format!(
        "{TOKEN_CONTEXT}\n{}\n{}\n{}",
        account_id.simple(),
        token_id.simple(),
        expires_at
    )
}

fn mac_keyed(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret).expect("HMAC-SHA256 accepts keys of any length")
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Mint a bearer token for `account_id` with a fresh 128-bit token id.
pub fn mint_token(secret: &[u8], account_id: Uuid, ttl_secs: u64) -> (String, TokenClaims) {
    let claims = TokenClaims {
        account_id,
        token_id: Uuid::new_v4(),
        expires_at: now_secs() + ttl_secs,
    };
    let mut mac = mac_keyed(secret);
    mac.update(token_message(claims.account_id, claims.token_id, claims.expires_at).as_bytes());
    let tag = mac.finalize().into_bytes();
    let token = format!(
        "{}.{}.{}.{}",
        claims.account_id.simple(),
        claims.token_id.simple(),
        claims.expires_at,
        URL_SAFE_NO_PAD.encode(tag)
    );
    (token, claims)
}

/// Decode and verify a bearer token: shape, MAC, then expiry.
pub fn decode_token(secret: &[u8], token: &str) -> Result<TokenClaims, ApiError> {
    let parts: Vec<&str> = token.splitn(4, '.').collect();
    if parts.len() != 4 {
        return Err(ApiError::InvalidToken);
    }
    let account_id = Uuid::try_parse(parts[0]).map_err(|_| ApiError::InvalidToken)?;
    let token_id = Uuid::try_parse(parts[1]).map_err(|_| ApiError::InvalidToken)?;
    let expires_at: u64 = parts[2].parse().map_err(|_| ApiError::InvalidToken)?;
    let tag = URL_SAFE_NO_PAD
        .decode(parts[3])
        .map_err(|_| ApiError::InvalidToken)?;

    let mut mac = mac_keyed(secret);
    mac.update(token_message(account_id, token_id, expires_at).as_bytes());
    mac.verify_slice(&tag).map_err(|_| ApiError::InvalidToken)?;

    if expires_at <= now_secs() {
        return Err(ApiError::InvalidToken);
    }

    Ok(TokenClaims {
        account_id,
        token_id,
        expires_at,
    })
}

/// Extract the credential from an `Authorization: Bearer …` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Full gate: token validity plus the revocation set. Shared by the HTTP
/// middleware and the WebSocket auth frame.
pub async fn authenticate(state: &AppState, token: &str) -> Result<Uuid, ApiError> {
    let claims = decode_token(&state.token_secret, token)?;
    if state.db.is_token_revoked(claims.token_id).await? {
        return Err(ApiError::InvalidToken);
    }
    Ok(claims.account_id)
}

/// Middleware for bearer-protected routes. Attaches the opaque account
/// handle to the request; handlers take it as a plain extractor parameter.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())
        .ok_or(ApiError::Unauthorized)?
        .to_string();
    let account_id = authenticate(&state, &token).await?;
    req.extensions_mut().insert(AuthedAccount(account_id));
    Ok(next.run(req).await)
}

/// The authenticated account, as an opaque handle.
#[derive(Debug, Clone, Copy)]
pub struct AuthedAccount(pub Uuid);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthedAccount {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthedAccount>()
            .copied()
            .ok_or(ApiError::Unauthorized)
    }
}
