//! Notifications published by the indexer.

use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;

use crate::models::AccountType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IndexEvent {
    /// `(id, version)` accepted and its settlement timer started.
    Indexed { entity_id: String, version: u64 },
    Duplicate { entity_id: String, version: u64 },
    Stale {
        entity_id: String,
        version: u64,
        blocking_version: u64,
    },
    /// Older pending version stopped in favor of a newer one.
    Canceled {
        entity_id: String,
        canceled_version: u64,
        superseding_version: u64,
    },
    /// Settlement timer fired; tokens folded into the statistics.
    Ingested {
        entity_id: String,
        version: u64,
        account_type: AccountType,
        tokens: i64,
    },
    /// Still pending at shutdown after the grace period.
    Interrupted { entity_id: String, version: u64 },
}

impl IndexEvent {
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Indexed { entity_id, .. }
            | Self::Duplicate { entity_id, .. }
            | Self::Stale { entity_id, .. }
            | Self::Canceled { entity_id, .. }
            | Self::Ingested { entity_id, .. }
            | Self::Interrupted { entity_id, .. } => entity_id,
        }
    }
}

impl fmt::Display for IndexEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indexed { entity_id, version } => {
                write!(f, "Account (id={}, {}) has been indexed", entity_id, version)
            }
            Self::Duplicate { entity_id, version } => write!(
                f,
                "Duplicate index for account (id={}, {}); ignored",
                entity_id, version
            ),
            Self::Stale {
                entity_id,
                version,
                blocking_version,
            } => write!(
                f,
                "Account (id={}, {}) is older than version {}; ignored",
                entity_id, version, blocking_version
            ),
            Self::Canceled {
                entity_id,
                canceled_version,
                superseding_version,
            } => write!(
                f,
                "Canceled callback for account (id={}, {}) in favor of version {}",
                entity_id, canceled_version, superseding_version
            ),
            Self::Ingested {
                entity_id,
                version,
                account_type,
                tokens,
            } => write!(
                f,
                "Account (id={}, {}) has been ingested: {} with {} tokens",
                entity_id, version, account_type, tokens
            ),
            Self::Interrupted { entity_id, version } => write!(
                f,
                "Callback for account (id={}, {}) interrupted by shutdown",
                entity_id, version
            ),
        }
    }
}

/// Broadcast sender shared by the processor and the scheduler. Publishing
/// with no subscriber attached is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IndexEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: IndexEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.tx.subscribe()
    }
}
