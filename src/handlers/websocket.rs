//! WebSocket entry protocol and per-connection lifecycle.
//!
//! A socket is worthless until its first frame authenticates it:
//! `{"type":"auth","token":…}` or the connection closes with 4001 (no auth
//! frame) / 4002 (bad token). Once authenticated the socket joins the
//! fabric set for its account and stays registered until it closes or
//! errors; deregistration runs on every exit path. After auth the only
//! accepted frame is a ping; every other frame, malformed ones included,
//! is dropped silently, because even a log line about it would be metadata.

use std::borrow::Cow;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::mpsc;

use crate::auth;
use crate::fabric::{ClientFrame, ServerFrame, CLOSE_AUTH_REQUIRED, CLOSE_INVALID_TOKEN};
use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| ws_connection(socket, state))
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        })))
        .await;
}

async fn ws_connection(mut socket: WebSocket, state: AppState) {
    let first = match socket.recv().await {
        Some(Ok(Message::Text(text))) => text,
        _ => {
            close_with(socket, CLOSE_AUTH_REQUIRED, "auth required").await;
            return;
        }
    };
    let token = match serde_json::from_str::<ClientFrame>(&first) {
        Ok(ClientFrame::Auth { token }) => token,
        _ => {
            close_with(socket, CLOSE_AUTH_REQUIRED, "auth required").await;
            return;
        }
    };
    let account_id = match auth::authenticate(&state, &token).await {
        Ok(account_id) => account_id,
        Err(_) => {
            close_with(socket, CLOSE_INVALID_TOKEN, "invalid token").await;
            return;
        }
    };

    if let Ok(text) = serde_json::to_string(&ServerFrame::AuthOk) {
        if socket.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let session_id = state.fabric.register(account_id, tx).await;

    loop {
        tokio::select! {
            // Fabric fanout destined for this socket.
            outbound = rx.recv() => {
                match outbound {
                    Some(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(ClientFrame::Ping) = serde_json::from_str::<ClientFrame>(&text) {
                            if let Ok(pong) = serde_json::to_string(&ServerFrame::Pong) {
                                if socket.send(Message::Text(pong)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    state.fabric.deregister(account_id, session_id).await;
}
