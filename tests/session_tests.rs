use csa_tool::session::database_name_for;
use csa_tool::sync::RetryPolicy;
use csa_tool::{
    ControllerState, Document, DocumentStore, MemoryServer, MemoryStore, SeasonDocument, Session,
    SyncOptions,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn options() -> SyncOptions {
    SyncOptions {
        remote_only: false,
        retry: RetryPolicy {
            initial: Duration::from_millis(20),
            max: Duration::from_millis(100),
        },
    }
}

fn winter() -> SeasonDocument {
    serde_json::from_value(json!({
        "_id": "season:winter-2018",
        "name": "Winter 2018/19",
        "distributionDay": "tuesday",
        "weekCount": 24,
        "startWeek": [2018, 40],
        "endWeek": [2019, 13],
        "ignoredWeeks": [[2018, 52], [2019, 1]]
    }))
    .unwrap()
}

#[tokio::test]
async fn session_logs_in_and_opens_user_database_when_online() {
    let local = Arc::new(MemoryStore::new("local"));
    let server = Arc::new(MemoryServer::new());
    let mut session = Session::start("anna", local.clone(), server.clone(), options())
        .await
        .unwrap();
    assert_eq!(session.user(), "anna");
    assert_eq!(session.controller().state(), ControllerState::NoRemote);

    session.controller_mut().set_app_active(true).await;
    session.controller_mut().set_network_connected(true).await;
    assert_eq!(
        session.controller().state(),
        ControllerState::RemoteActive {
            database: database_name_for("anna")
        }
    );

    session.end().await.unwrap();
    assert_eq!(server.open_handles(), 0);
    assert!(local.is_closed());
}

#[tokio::test]
async fn live_seasons_skip_malformed_documents() {
    let local = Arc::new(MemoryStore::new("local"));
    let server = Arc::new(MemoryServer::new());
    let session = Session::start("anna", local.clone(), server, options())
        .await
        .unwrap();

    let mut seasons = session.live_seasons().await.unwrap();
    assert!(seasons.borrow().is_empty());

    session.save_season(&winter()).await.unwrap();
    assert!(seasons.changed().await);
    assert_eq!(seasons.borrow().len(), 1);

    local
        .put(
            Document::new("season:broken")
                .with_field("type", "season")
                .with_field("name", "Broken"),
        )
        .await
        .unwrap();
    assert!(seasons.changed().await);
    let current = seasons.current();
    assert_eq!(current.len(), 1);
    assert_eq!(current["season:winter-2018"].week_count(), 24);

    let season = session.season("season:winter-2018").await.unwrap().unwrap();
    assert_eq!(season.name(), "Winter 2018/19");
    assert!(session.season("season:none").await.unwrap().is_none());
}

#[tokio::test]
async fn invalid_seasons_are_not_saved() {
    let local = Arc::new(MemoryStore::new("local"));
    let session = Session::start("anna", local.clone(), Arc::new(MemoryServer::new()), options())
        .await
        .unwrap();

    let mut season = winter();
    season.week_count = 0;
    assert!(session.save_season(&season).await.is_err());
    assert!(local.get("season:winter-2018").await.unwrap().is_none());
}
