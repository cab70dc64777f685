// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Individual modules never read env vars themselves — this is
// the single place the environment is consulted.

use std::net::SocketAddr;

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT signing secret for access tokens.
    pub jwt_secret: String,
    /// SQLite database path (`:memory:` for an in-memory database).
    pub database_path: String,
    /// Log filter directive (e.g. `info`, `primal_server=debug`).
    pub log_filter: String,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `PRIMAL_HOST` | `0.0.0.0` |
    /// | `PRIMAL_PORT` | `3000` |
    /// | `PRIMAL_JWT_SECRET` | dev-only placeholder |
    /// | `PRIMAL_DB_PATH` | `primal_live.db` |
    /// | `PRIMAL_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("PRIMAL_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("PRIMAL_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(3000);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("PRIMAL_JWT_SECRET")
            .unwrap_or_else(|_| "primal_local_development_jwt_secret_must_be_32_chars".into());

        let database_path = env("PRIMAL_DB_PATH").unwrap_or_else(|_| "primal_live.db".into());

        let log_filter = env("PRIMAL_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, jwt_secret, database_path, log_filter }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == "primal_local_development_jwt_secret_must_be_32_chars"
    }
}
