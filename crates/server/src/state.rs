// Shared application state wiring the stores together.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    auth::token::AccessTokenService,
    config::ServerConfig,
    db::Db,
    metrics::ServerMetrics,
    rooms::{MessageRouter, PresenceStore, RoomRegistry},
};

pub struct AppState {
    pub db: Db,
    pub registry: Arc<RoomRegistry>,
    pub router: MessageRouter,
    pub presence: Arc<PresenceStore>,
    pub tokens: Arc<AccessTokenService>,
    pub metrics: Arc<ServerMetrics>,
}

impl AppState {
    pub fn from_config(config: &ServerConfig) -> Result<Arc<Self>> {
        let db = Db::open(&config.database_path)
            .with_context(|| format!("failed to open database `{}`", config.database_path))?;
        let tokens = Arc::new(
            AccessTokenService::new(&config.jwt_secret).context("invalid JWT secret")?,
        );

        let registry = Arc::new(RoomRegistry::default());
        let router = MessageRouter::new(registry.clone());
        let presence = Arc::new(PresenceStore::default());
        let metrics = Arc::new(ServerMetrics::default());

        Ok(Arc::new(Self { db, registry, router, presence, tokens, metrics }))
    }
}
