//! Engine configuration, read from the environment (and `.env` via dotenvy
//! in `main`).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Address the HTTP/WebSocket server binds.
    pub listen_addr: SocketAddr,
    /// SQLite database URL, e.g. `sqlite://thornvale.db`.
    pub database_url: String,
    /// Directory containing `MODULES` and the script files.
    pub content_root: PathBuf,
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = std::env::var("THORNVALE_LISTEN")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("THORNVALE_LISTEN is not a socket address")?;
        let database_url =
            std::env::var("THORNVALE_DB").unwrap_or_else(|_| "sqlite://thornvale.db".to_string());
        let content_root = std::env::var("THORNVALE_CONTENT")
            .unwrap_or_else(|_| "content".to_string())
            .into();
        Ok(Self {
            listen_addr,
            database_url,
            content_root,
        })
    }
}
