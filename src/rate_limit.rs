//! Privacy-preserving request limiter.
//!
//! Counts requests per credential, never per address: the counter key is the
//! SHA-256 of the bearer token, or the literal `anonymous` when no credential
//! is presented. The peer address is never read, so nothing here can leak
//! into a log or a store. `/health` is exempt so probes keep working while a
//! client is throttled.

use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::bearer_token;
use crate::config::RATE_WINDOW_SECS;
use crate::crypto::credential_hash;
use crate::error::ApiError;
use crate::state::AppState;

/// Counter key for a request: `ratelimit:` + credential hash or `anonymous`.
pub fn limiter_key(headers: &HeaderMap) -> String {
    match bearer_token(headers) {
        Some(credential) => format!("ratelimit:{}", credential_hash(credential)),
        None => "ratelimit:anonymous".to_string(),
    }
}

pub async fn limit_requests(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if req.uri().path().ends_with("/health") {
        return next.run(req).await;
    }

    let key = limiter_key(req.headers());
    let window = Duration::from_secs(RATE_WINDOW_SECS);
    match state.ephemeral.incr_with_window(&key, window).await {
        Ok(count) if count > state.config.max_requests_per_minute => {
            ApiError::RateLimitExceeded.into_response()
        }
        Ok(_) => next.run(req).await,
        Err(e) => ApiError::from(e).into_response(),
    }
}
