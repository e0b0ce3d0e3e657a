//! Notification fabric: per-account sets of open WebSocket sessions.
//!
//! Each authenticated socket registers an unbounded sender; the socket task
//! owns the actual connection and forwards whatever arrives on its channel.
//! Fanout serializes a frame once and writes it to every session of the
//! target account. A session whose channel is gone is deregistered on the
//! spot; an account whose set empties is removed entirely.
//!
//! Frames are metadata envelopes only: new-message markers and pongs.
//! Ciphertext never traverses the fabric.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Frames a client may send after the connection opens.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth { token: String },
    Ping,
}

/// Frames the server emits.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AuthOk,
    Pong,
    NewMessage { message_id: Uuid },
}

/// Close codes for entry-protocol violations.
pub const CLOSE_AUTH_REQUIRED: u16 = 4001;
pub const CLOSE_INVALID_TOKEN: u16 = 4002;

pub struct Fabric {
    sessions: RwLock<HashMap<Uuid, HashMap<u64, mpsc::UnboundedSender<String>>>>,
    next_session_id: AtomicU64,
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_session_id: AtomicU64::new(0),
        }
    }

    /// Add a session to `account_id`'s set. Returns the handle to pass back
    /// to [`deregister`](Self::deregister).
    pub async fn register(&self, account_id: Uuid, tx: mpsc::UnboundedSender<String>) -> u64 {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.write().await;
        sessions.entry(account_id).or_default().insert(session_id, tx);
        session_id
    }

    /// Remove a session; drops the account's set once it empties. Safe to
    /// call for a session that was already pruned.
    pub async fn deregister(&self, account_id: Uuid, session_id: u64) {
        let mut sessions = self.sessions.write().await;
        if let Some(set) = sessions.get_mut(&account_id) {
            set.remove(&session_id);
            if set.is_empty() {
                sessions.remove(&account_id);
            }
        }
    }

    /// Serialize `frame` once and write it to every open session of
    /// `account_id`. Sessions whose channel is closed are deregistered;
    /// an absent account is a no-op.
    pub async fn notify(&self, account_id: Uuid, frame: &ServerFrame) {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(_) => return,
        };

        let dead: Vec<u64> = {
            let sessions = self.sessions.read().await;
            let Some(set) = sessions.get(&account_id) else {
                return;
            };
            set.iter()
                .filter(|(_, tx)| tx.send(text.clone()).is_err())
                .map(|(id, _)| *id)
                .collect()
        };

        for session_id in dead {
            self.deregister(account_id, session_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_text(frame: &ServerFrame) -> String {
        serde_json::to_string(frame).unwrap()
    }

    #[tokio::test]
    async fn fanout_reaches_every_session_of_the_account() {
        let fabric = Fabric::new();
        let account = Uuid::new_v4();
        let other = Uuid::new_v4();

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_other, mut rx_other) = mpsc::unbounded_channel();
        fabric.register(account, tx_a).await;
        fabric.register(account, tx_b).await;
        fabric.register(other, tx_other).await;

        let frame = ServerFrame::NewMessage {
            message_id: Uuid::now_v7(),
        };
        fabric.notify(account, &frame).await;

        assert_eq!(rx_a.recv().await.unwrap(), frame_text(&frame));
        assert_eq!(rx_b.recv().await.unwrap(), frame_text(&frame));
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn notify_for_offline_account_is_a_no_op() {
        let fabric = Fabric::new();
        fabric.notify(Uuid::new_v4(), &ServerFrame::Pong).await;
    }

    #[tokio::test]
    async fn dead_sessions_are_pruned_on_send_failure() {
        let fabric = Fabric::new();
        let account = Uuid::new_v4();

        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        fabric.register(account, tx_dead).await;
        fabric.register(account, tx_live).await;
        drop(rx_dead);

        fabric.notify(account, &ServerFrame::Pong).await;
        assert!(rx_live.recv().await.is_some());
        assert_eq!(fabric.sessions.read().await.get(&account).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn emptied_account_set_is_removed() {
        let fabric = Fabric::new();
        let account = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = fabric.register(account, tx).await;
        fabric.deregister(account, session).await;
        assert!(fabric.sessions.read().await.get(&account).is_none());
    }

    #[test]
    fn client_frames_parse_and_unknown_frames_do_not() {
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"ping"}"#),
            Ok(ClientFrame::Ping)
        ));
        assert!(matches!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"auth","token":"t"}"#),
            Ok(ClientFrame::Auth { .. })
        ));
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"subscribe"}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>("not json").is_err());
    }

    #[test]
    fn server_frames_carry_no_ciphertext_fields() {
        let text = frame_text(&ServerFrame::NewMessage {
            message_id: Uuid::now_v7(),
        });
        assert!(text.contains(r#""type":"new_message""#));
        assert!(text.contains("message_id"));
        assert!(!text.contains("ciphertext"));
        assert!(!text.contains("sender"));
    }
}
