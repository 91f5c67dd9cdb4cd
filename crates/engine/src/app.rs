//! Application composition.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::{self, ApiState};
use crate::config::EngineConfig;
use crate::session::auth::AuthKeys;
use crate::store::{SqliteStore, Store};
use crate::world::tick::{self, WorldMessage};
use crate::world::{World, WorldLoader};

/// The composed application: a running world task plus the API state the
/// HTTP layer serves from.
pub struct App {
    pub api: Arc<ApiState>,
    world_task: JoinHandle<World>,
    world_tx: mpsc::UnboundedSender<WorldMessage>,
}

impl App {
    /// Connect storage, load the world, and spawn the world task.
    pub async fn start(config: &EngineConfig) -> anyhow::Result<App> {
        let store = SqliteStore::connect(&config.database_url)
            .await
            .context("opening the database")?;
        let store: Arc<dyn Store> = Arc::new(store);

        let mut world = World::new(store.clone());
        WorldLoader::new(config.content_root.clone())
            .load(&mut world)
            .context("loading world content")?;

        let (world_tx, world_rx) = mpsc::unbounded_channel();
        let world_task = tokio::spawn(tick::run(world, world_rx));

        Ok(App {
            api: Arc::new(ApiState {
                store,
                world_tx: world_tx.clone(),
                auth: AuthKeys::random(),
            }),
            world_task,
            world_tx,
        })
    }

    pub fn router(&self) -> Router {
        api::router(self.api.clone())
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
    }

    /// Stop the world task, letting it fire `stop_world` and flush.
    pub async fn shutdown(self) {
        let _ = self.world_tx.send(WorldMessage::Shutdown);
        if let Err(e) = self.world_task.await {
            tracing::error!(error = %e, "world task ended abnormally");
        }
    }
}
