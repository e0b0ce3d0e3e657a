//! HTTP and WebSocket request handlers.

pub mod accounts;
pub mod health;
pub mod keys;
pub mod messages;
pub mod websocket;

use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ApiError;

/// Signed prekey as it appears in request bodies.
#[derive(Debug, Deserialize)]
pub struct SignedPrekeyUpload {
    pub key_id: i32,
    pub public_key: String,
    pub signature: String,
}

/// One-time prekey as it appears in request bodies.
#[derive(Debug, Deserialize)]
pub struct OneTimePrekeyUpload {
    pub key_id: i32,
    pub public_key: String,
}

/// JSON body extractor that keeps rejections inside the stable error
/// vocabulary: an over-cap body maps to `message_too_large`, everything
/// else that fails to parse into the typed schema maps to `missing_fields`.
/// Handlers past this point never see untyped values.
pub struct ApiJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => {
                if rejection.into_response().status() == StatusCode::PAYLOAD_TOO_LARGE {
                    Err(ApiError::MessageTooLarge)
                } else {
                    Err(ApiError::MissingFields)
                }
            }
        }
    }
}
