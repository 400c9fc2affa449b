//! HTTP front end over the signed-in user's season data.
//!
//! No network remote is wired in: the session replicates to an in-process
//! [`MemoryServer`] that lives as long as the process, so the remote copy
//! is gone on exit and only the local SQLite cache persists. The API reads through the
//! controller's active store, which is that remote when
//! `database.remote_only` is set.

use std::{path::PathBuf, sync::Arc};

use csa_tool::{
    MemoryServer, Session,
    http_api::{self, AppState},
    settings, telemetry,
};
use tracing::warn;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_file = std::env::var_os("CSA_CONFIG_FILE").map(PathBuf::from);
    let settings = settings::load(config_file.as_deref())?;
    telemetry::init(&settings.logging)?;

    let user = std::env::var("CSA_USER").unwrap_or_else(|_| "demo".to_string());
    std::fs::create_dir_all(&settings.database.local_dir)?;
    let local = Session::open_local(&settings.database, &user)?;

    warn!("no remote server configured; replicating to an in-process server");
    let connector = Arc::new(MemoryServer::default());
    let mut session = Session::start(user, local, connector, settings.sync_options()).await?;
    session.controller_mut().set_app_active(true).await;
    session.controller_mut().set_network_connected(true).await;

    let store = session.controller().active_store()?;
    let state = AppState::new(store, session.controller().status());
    let served = http_api::serve(settings.http.addr, state).await;
    session.end().await?;
    served?;
    Ok(())
}
