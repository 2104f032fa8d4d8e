use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;

use crate::api::server::AppState;
use crate::db::PgError;
use crate::db::store::PgStore;
use crate::engine::config::ConfigError;
use crate::engine::{Engine, EngineConfig, SystemClock};
use crate::util::env::{EnvErr, Var};
use crate::util::telemetry;

mod api;
mod db;
mod engine;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),

    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] PgError),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry_registry = telemetry::Telemetry::new().await?.register();

    tracing::info!("starting main application");

    let config = EngineConfig::from_env()?;
    let pool = db::db_pool().await?;
    db::migrate(pool).await?;

    let engine = Engine::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(SystemClock),
        config,
    );
    let state = Arc::new(AppState {
        engine,
        gateway_token: var!(Var::InternalToken).await?.to_string(),
    });

    let (tx_server_ready, rx_server_ready) = tokio::sync::mpsc::unbounded_channel::<SocketAddr>();
    let handles = api::server::start_server(state, tx_server_ready, rx_server_ready).await;

    _ = join_all(handles).await;

    telemetry_registry.shutdown();
    Ok(())
}
