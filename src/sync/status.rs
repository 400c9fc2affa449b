use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Push,
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Push => f.write_str("push"),
            Direction::Pull => f.write_str("pull"),
        }
    }
}

/// Events emitted by a running replication, in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationEvent {
    Active,
    Change {
        direction: Direction,
        docs_written: usize,
    },
    /// Caught up, or waiting to retry after `error`.
    Paused(Option<String>),
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    /// Nothing observed yet.
    #[default]
    Unknown,
    Complete,
    Active,
    Pushing,
    Pulling,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct SyncStatus {
    pub state: SyncState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncStatus {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl From<&ReplicationEvent> for SyncStatus {
    fn from(event: &ReplicationEvent) -> Self {
        let (state, error) = match event {
            ReplicationEvent::Active => (SyncState::Active, None),
            ReplicationEvent::Change {
                direction: Direction::Push,
                ..
            } => (SyncState::Pushing, None),
            ReplicationEvent::Change {
                direction: Direction::Pull,
                ..
            } => (SyncState::Pulling, None),
            ReplicationEvent::Paused(error) => (SyncState::Paused, error.clone()),
            ReplicationEvent::Complete => (SyncState::Complete, None),
        };
        Self { state, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_not_complete() {
        assert_eq!(SyncStatus::default().state, SyncState::Unknown);
        assert_ne!(SyncState::default(), SyncState::Complete);
    }

    #[test]
    fn events_map_onto_states() {
        let pull = ReplicationEvent::Change {
            direction: Direction::Pull,
            docs_written: 3,
        };
        assert_eq!(SyncStatus::from(&pull).state, SyncState::Pulling);
        let failed = SyncStatus::from(&ReplicationEvent::Paused(Some("offline".into())));
        assert_eq!(failed.state, SyncState::Paused);
        assert!(failed.is_error());
        assert_eq!(
            serde_json::to_value(SyncStatus::from(&ReplicationEvent::Complete)).unwrap(),
            serde_json::json!({ "state": "COMPLETE" })
        );
    }
}
