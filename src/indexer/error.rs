//! Indexer error taxonomy.
//!
//! Stale and duplicate updates are not errors: they are reported through
//! [`IgnoreReason`](super::processor::IgnoreReason). Cancellation races are a
//! normal terminal outcome and never surface here either.

/// Errors surfaced to the caller of the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexerError {
    /// Account type outside the configured closed set.
    UnknownTypeTag { tag: String },
    /// Feed record that could not be read as an update.
    InvalidRecord { index: usize, reason: String },
    /// No settlement slot was available. The update was not recorded.
    SchedulerSaturation {
        entity_id: String,
        version: u64,
        limit: usize,
    },
    /// The processor no longer accepts work.
    ShuttingDown,
}

impl std::fmt::Display for IndexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTypeTag { tag } => write!(f, "Unknown account type '{}'", tag),
            Self::InvalidRecord { index, reason } => {
                write!(f, "Invalid feed record #{}: {}", index, reason)
            }
            Self::SchedulerSaturation {
                entity_id,
                version,
                limit,
            } => write!(
                f,
                "Settlement scheduler saturated ({} in flight); account {} v{} not scheduled",
                limit, entity_id, version
            ),
            Self::ShuttingDown => write!(f, "Indexer is shutting down"),
        }
    }
}

impl std::error::Error for IndexerError {}
