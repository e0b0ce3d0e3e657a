//! The stable error vocabulary exposed by the HTTP API.
//!
//! Handlers return `Result<_, ApiError>`; the `IntoResponse` impl renders
//! every failure as `{"error": "<machine_code>"}` with its mapped status.
//! Anything the vocabulary cannot name collapses to `internal_error`; the
//! response body never carries backend error text verbatim.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::db::DbError;
use crate::ulog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    Unauthorized,
    InvalidToken,
    MissingFields,
    InvalidKeyLength,
    InvalidSignedPrekeySignature,
    InvalidOrExpiredChallenge,
    InvalidSignature,
    AccountNotFound,
    NoSignedPrekey,
    RecipientNotFound,
    MessageNotFound,
    MessageTooLarge,
    TooManyPrekeys,
    AlreadyRegistered,
    RateLimitExceeded,
    Internal,
}

impl ApiError {
    /// Machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::InvalidToken => "invalid_token",
            ApiError::MissingFields => "missing_fields",
            ApiError::InvalidKeyLength => "invalid_key_length",
            ApiError::InvalidSignedPrekeySignature => "invalid_signed_prekey_signature",
            ApiError::InvalidOrExpiredChallenge => "invalid_or_expired_challenge",
            ApiError::InvalidSignature => "invalid_signature",
            ApiError::AccountNotFound => "account_not_found",
            ApiError::NoSignedPrekey => "no_signed_prekey",
            ApiError::RecipientNotFound => "recipient_not_found",
            ApiError::MessageNotFound => "message_not_found",
            ApiError::MessageTooLarge => "message_too_large",
            ApiError::TooManyPrekeys => "too_many_prekeys",
            ApiError::AlreadyRegistered => "already_registered",
            ApiError::RateLimitExceeded => "rate_limit_exceeded",
            ApiError::Internal => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized
            | ApiError::InvalidToken
            | ApiError::InvalidOrExpiredChallenge
            | ApiError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ApiError::MissingFields
            | ApiError::InvalidKeyLength
            | ApiError::InvalidSignedPrekeySignature => StatusCode::BAD_REQUEST,
            ApiError::AccountNotFound
            | ApiError::NoSignedPrekey
            | ApiError::RecipientNotFound
            | ApiError::MessageNotFound => StatusCode::NOT_FOUND,
            ApiError::MessageTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::TooManyPrekeys => StatusCode::BAD_REQUEST,
            ApiError::AlreadyRegistered => StatusCode::CONFLICT,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.code() });
        (self.status(), Json(body)).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::AlreadyRegistered => ApiError::AlreadyRegistered,
            DbError::RecipientUnknown => ApiError::RecipientNotFound,
            DbError::Sqlx(e) => {
                ulog!("database error: {e}");
                ApiError::Internal
            }
        }
    }
}

impl From<redis::RedisError> for ApiError {
    fn from(e: redis::RedisError) -> Self {
        ulog!("ephemeral store error: {e}");
        ApiError::Internal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses_are_stable() {
        let table = [
            (ApiError::Unauthorized, "unauthorized", 401),
            (ApiError::InvalidToken, "invalid_token", 401),
            (ApiError::MissingFields, "missing_fields", 400),
            (ApiError::InvalidKeyLength, "invalid_key_length", 400),
            (
                ApiError::InvalidSignedPrekeySignature,
                "invalid_signed_prekey_signature",
                400,
            ),
            (
                ApiError::InvalidOrExpiredChallenge,
                "invalid_or_expired_challenge",
                401,
            ),
            (ApiError::InvalidSignature, "invalid_signature", 401),
            (ApiError::AccountNotFound, "account_not_found", 404),
            (ApiError::NoSignedPrekey, "no_signed_prekey", 404),
            (ApiError::RecipientNotFound, "recipient_not_found", 404),
            (ApiError::MessageNotFound, "message_not_found", 404),
            (ApiError::MessageTooLarge, "message_too_large", 413),
            (ApiError::TooManyPrekeys, "too_many_prekeys", 400),
            (ApiError::AlreadyRegistered, "already_registered", 409),
            (ApiError::RateLimitExceeded, "rate_limit_exceeded", 429),
            (ApiError::Internal, "internal_error", 500),
        ];
        for (err, code, status) in table {
            assert_eq!(err.code(), code);
            assert_eq!(err.status().as_u16(), status);
        }
    }

    #[test]
    fn cross_account_access_is_indistinguishable_from_absence() {
        // Authorization failures on another account's rows answer 404, never
        // 403, so existence is not disclosed.
        assert_eq!(ApiError::MessageNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::AccountNotFound.status(), StatusCode::NOT_FOUND);
    }
}
