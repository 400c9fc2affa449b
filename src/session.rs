use crate::calendar::{SEASON_DOCUMENT_TYPE, Season, SeasonDocument};
use crate::persistence::{Document, DocumentStore};
use crate::query::{IndexSpec, Selector};
use crate::sync::{LiveQuery, RemoteConnector, SyncController, SyncError, SyncOptions, SyncResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Name of the per-user database: `userdb-` followed by the hex-encoded user name.
pub fn database_name_for(user: &str) -> String {
    let encoded: String = user.bytes().map(|b| format!("{b:02x}")).collect();
    format!("userdb-{encoded}")
}

/// One logged-in user and the synchronization controller serving them.
pub struct Session {
    user: String,
    controller: SyncController,
}

impl Session {
    pub async fn start(
        user: impl Into<String>,
        local: Arc<dyn DocumentStore>,
        connector: Arc<dyn RemoteConnector>,
        options: SyncOptions,
    ) -> SyncResult<Self> {
        let user = user.into();
        let mut controller = SyncController::new(local, connector, database_name_for(&user), options);
        if !options.remote_only {
            controller
                .create_index(&IndexSpec::new(["type"]).named("by-type"))
                .await?;
        }
        controller.set_logged_in(true).await;
        Ok(Self { user, controller })
    }

    #[cfg(feature = "sqlite")]
    pub fn open_local(
        settings: &crate::settings::DatabaseSettings,
        user: &str,
    ) -> SyncResult<Arc<dyn DocumentStore>> {
        let database = database_name_for(user);
        let path = settings.local_dir.join(format!("{database}.sqlite3"));
        let store = crate::persistence::sqlite::SqliteStore::open(database, path)?;
        Ok(Arc::new(store))
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn controller(&self) -> &SyncController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut SyncController {
        &mut self.controller
    }

    /// All seasons, rebuilt whenever a season document changes. Documents
    /// that do not describe a valid season are logged and skipped.
    pub async fn live_seasons(&self) -> SyncResult<LiveQuery<HashMap<String, Arc<Season>>>> {
        self.controller
            .find_all(
                Selector::by_type(SEASON_DOCUMENT_TYPE),
                |doc| match Season::try_from(&doc) {
                    Ok(season) => Some(Arc::new(season)),
                    Err(err) => {
                        warn!(id = %doc.id, error = %err, "skipping malformed season");
                        None
                    }
                },
                |season| season.id().to_string(),
            )
            .await
    }

    pub async fn season(&self, id: &str) -> SyncResult<Option<Season>> {
        let live = self.controller.get(id).await?;
        let current = live.current();
        live.cancel();
        match current {
            Some(doc) => Ok(Some(Season::try_from(&doc)?)),
            None => Ok(None),
        }
    }

    /// Validates and stores a season document.
    pub async fn save_season(&self, season: &SeasonDocument) -> SyncResult<Document> {
        Season::from_document(season)?;
        let doc = season.to_document()?;
        self.controller.put(doc).await
    }

    pub async fn end(self) -> Result<(), SyncError> {
        self.controller.shutdown().await
    }
}
