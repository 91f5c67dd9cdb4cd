//! Thornvale Engine - server for a text-based multiplayer world.
//!
//! The engine:
//! - compiles and runs the lore-script world content
//! - serves players over WebSocket behind the `/game` endpoints
//! - persists avatars to SQLite

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thornvale_engine::{App, EngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thornvale_engine=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Thornvale Engine");

    let config = EngineConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Listen: {}", config.listen_addr);
    tracing::info!("  Database: {}", config.database_url);
    tracing::info!("  Content: {}", config.content_root.display());

    let app = App::start(&config).await?;
    tracing::info!("World loaded and running");

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!("Listening on {}", config.listen_addr);

    axum::serve(listener, app.router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    app.shutdown().await;
    tracing::info!("Goodbye");
    Ok(())
}
