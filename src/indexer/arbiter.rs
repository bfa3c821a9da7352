//! Version Arbiter
//!
//! Newer wins by version number, never by arrival time. Equal versions are
//! duplicates. Holds no state of its own; callers evaluate against a record
//! they have locked.

use super::registry::EntityRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Record the version as pending; `cancel` is the older pending version
    /// it supersedes.
    Accept { cancel: Option<u64> },
    /// A settled or pending version at least as new blocks this one.
    IgnoreStale { blocking_version: u64 },
    /// This exact version is already known.
    IgnoreDuplicate,
}

pub fn evaluate(record: &EntityRecord, version: u64) -> Decision {
    if record.contains(version) {
        return Decision::IgnoreDuplicate;
    }

    if let Some(settled) = record.settled_version() {
        if version <= settled {
            return Decision::IgnoreStale {
                blocking_version: settled,
            };
        }
    }

    match record.pending_version() {
        Some(pending) if pending > version => Decision::IgnoreStale {
            blocking_version: pending,
        },
        Some(pending) => Decision::Accept {
            cancel: Some(pending),
        },
        None => Decision::Accept { cancel: None },
    }
}
