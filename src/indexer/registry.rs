//! Entity Version Registry
//!
//! One [`EntityRecord`] per account id, each behind its own lock. The outer
//! map is only write-locked to insert a first-seen id, so updates for
//! different accounts never wait on each other.

use parking_lot::{Mutex, RwLock}; // Short critical sections, never held across .await
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::arbiter::{self, Decision};

/// Lifecycle of one `(account, version)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    /// Accepted, settlement timer running.
    Pending,
    /// Timer fired uncanceled. At most one version per account is in this state.
    Settled,
    /// Was settled, then a newer version of the account settled.
    Superseded,
    /// Timer was stopped before it fired.
    Canceled,
}

/// Result of trying to move a version to [`UpdateState::Settled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled { superseded: Option<u64> },
    /// Lost the race against a cancellation.
    AlreadyCanceled,
    /// Not pending for some other reason (unknown version, already settled).
    NotPending,
}

/// Version history of a single account.
#[derive(Debug, Clone, Serialize)]
pub struct EntityRecord {
    entity_id: String,
    versions: BTreeMap<u64, UpdateState>,
    highest_accepted: Option<u64>,
    pending: Option<u64>,
    settled: Option<u64>,
}

impl EntityRecord {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            versions: BTreeMap::new(),
            highest_accepted: None,
            pending: None,
            settled: None,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn highest_accepted(&self) -> Option<u64> {
        self.highest_accepted
    }

    pub fn pending_version(&self) -> Option<u64> {
        self.pending
    }

    pub fn settled_version(&self) -> Option<u64> {
        self.settled
    }

    pub fn state(&self, version: u64) -> Option<UpdateState> {
        self.versions.get(&version).copied()
    }

    pub fn contains(&self, version: u64) -> bool {
        self.versions.contains_key(&version)
    }

    /// Known versions in ascending order.
    pub fn versions(&self) -> impl Iterator<Item = (u64, UpdateState)> + '_ {
        self.versions.iter().map(|(v, s)| (*v, *s))
    }

    /// Record `version` as pending, canceling the older pending version if
    /// there is one. Callers must have obtained [`Decision::Accept`] for this
    /// version from the arbiter under the same lock.
    pub(crate) fn accept(&mut self, version: u64) -> Option<u64> {
        debug_assert!(matches!(
            arbiter::evaluate(self, version),
            Decision::Accept { .. }
        ));

        let canceled = match self.pending {
            Some(previous) if previous < version => {
                self.versions.insert(previous, UpdateState::Canceled);
                Some(previous)
            }
            _ => None,
        };

        self.versions.insert(version, UpdateState::Pending);
        self.pending = Some(version);
        self.highest_accepted = Some(self.highest_accepted.map_or(version, |h| h.max(version)));
        canceled
    }

    pub(crate) fn settle(&mut self, version: u64) -> SettleOutcome {
        match self.versions.get(&version) {
            Some(UpdateState::Pending) => {}
            Some(UpdateState::Canceled) => return SettleOutcome::AlreadyCanceled,
            _ => return SettleOutcome::NotPending,
        }

        let superseded = self.settled.filter(|&s| s != version);
        if let Some(previous) = superseded {
            self.versions.insert(previous, UpdateState::Superseded);
        }
        self.versions.insert(version, UpdateState::Settled);
        self.settled = Some(version);
        if self.pending == Some(version) {
            self.pending = None;
        }
        SettleOutcome::Settled { superseded }
    }

    pub(crate) fn cancel(&mut self, version: u64) -> bool {
        if self.versions.get(&version) != Some(&UpdateState::Pending) {
            return false;
        }
        self.versions.insert(version, UpdateState::Canceled);
        if self.pending == Some(version) {
            self.pending = None;
        }
        true
    }
}

/// Per-account version state, safe for concurrent use.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: RwLock<HashMap<String, Arc<Mutex<EntityRecord>>>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, entity_id: &str) -> Option<Arc<Mutex<EntityRecord>>> {
        self.entities.read().get(entity_id).cloned()
    }

    fn get_or_create(&self, entity_id: &str) -> Arc<Mutex<EntityRecord>> {
        if let Some(entry) = self.get(entity_id) {
            return entry;
        }
        self.entities
            .write()
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(EntityRecord::new(entity_id))))
            .clone()
    }

    /// Run `f` with exclusive access to the account's record, creating the
    /// record on first sight. Every decision about one account goes through
    /// here, so they are serialized.
    pub fn with_entity<R>(&self, entity_id: &str, f: impl FnOnce(&mut EntityRecord) -> R) -> R {
        let entry = self.get_or_create(entity_id);
        let mut record = entry.lock();
        f(&mut record)
    }

    /// Evaluate `version` and record it as pending if accepted. Starts no
    /// timer: the caller owns scheduling the settlement.
    pub(crate) fn try_accept(&self, entity_id: &str, version: u64) -> Decision {
        self.with_entity(entity_id, |record| {
            let decision = arbiter::evaluate(record, version);
            if let Decision::Accept { .. } = decision {
                record.accept(version);
            }
            decision
        })
    }

    pub fn mark_settled(&self, entity_id: &str, version: u64) -> SettleOutcome {
        match self.get(entity_id) {
            Some(entry) => entry.lock().settle(version),
            None => SettleOutcome::NotPending,
        }
    }

    /// Pending -> Canceled. Returns false when the version was not pending
    /// (settlement already committed, or never accepted).
    pub fn mark_canceled(&self, entity_id: &str, version: u64) -> bool {
        match self.get(entity_id) {
            Some(entry) => entry.lock().cancel(version),
            None => false,
        }
    }

    pub fn state(&self, entity_id: &str, version: u64) -> Option<UpdateState> {
        self.get(entity_id)?.lock().state(version)
    }

    /// Point-in-time copy of one account's record.
    pub fn record(&self, entity_id: &str) -> Option<EntityRecord> {
        self.get(entity_id).map(|entry| entry.lock().clone())
    }

    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }
}
