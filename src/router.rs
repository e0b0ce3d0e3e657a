//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::auth;
use crate::config::MAX_BODY_BYTES;
use crate::handlers;
use crate::rate_limit;
use crate::state::AppState;

/// Build the complete router: versioned API, WebSocket endpoint, rate
/// limiting, CORS, and the request body cap.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(handlers::health::health_handler))
        .route(
            "/accounts/register",
            post(handlers::accounts::register_handler),
        )
        .route(
            "/accounts/challenge",
            post(handlers::accounts::challenge_handler),
        )
        .route("/accounts/verify", post(handlers::accounts::verify_handler));

    let protected = Router::new()
        .route("/keys/prekeys", put(handlers::keys::replenish_handler))
        .route("/keys/signed", put(handlers::keys::rotate_handler))
        .route("/keys/:account_id", get(handlers::keys::fetch_bundle_handler))
        .route("/messages/send", post(handlers::messages::send_handler))
        .route(
            "/messages/receive",
            get(handlers::messages::receive_handler),
        )
        .route(
            "/messages/:message_id",
            delete(handlers::messages::delete_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .nest("/api/v1", public.merge(protected))
        .route("/ws", get(handlers::websocket::ws_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_requests,
        ))
        .layer(cors_layer(state.config.domain.as_deref()))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Production: exactly one origin, `https://<domain>`. Development (no
/// domain configured): permissive. Credentials are never combined with a
/// wildcard.
fn cors_layer(domain: Option<&str>) -> CorsLayer {
    match domain {
        Some(domain) => {
            let origin = format!("https://{domain}")
                .parse::<HeaderValue>()
                .expect("configured domain must form a valid origin");
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}
