//! Shared application state injected into every handler.

use std::sync::Arc;

use crate::config::Config;
use crate::db::Db;
use crate::ephemeral::Ephemeral;
use crate::fabric::Fabric;

/// Explicit handles for everything a request may touch. Built once at
/// startup; no ambient singletons. All fields are internally synchronized,
/// so the state clones per request.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub ephemeral: Ephemeral,
    pub fabric: Arc<Fabric>,
    pub token_secret: Arc<Vec<u8>>,
    pub config: Arc<Config>,
}
