pub mod calendar;
#[cfg(feature = "http_api")]
pub mod http_api;
pub mod iso;
pub mod persistence;
pub mod query;
pub mod session;
pub mod settings;
pub mod sync;
pub mod telemetry;

pub use calendar::{DistributionDay, Season, SeasonDocument, SeasonError, SeasonWeek};
pub use iso::CalendarWeek;
#[cfg(feature = "sqlite")]
pub use persistence::sqlite::SqliteStore;
pub use persistence::{
    Document, DocumentStore, MemoryServer, MemoryStore, StoreError, load_season_from_json,
    save_weeks_to_csv,
};
pub use query::{IndexSpec, Selector};
pub use session::Session;
pub use sync::{ControllerState, LiveQuery, SyncController, SyncError, SyncOptions, SyncState, SyncStatus};
