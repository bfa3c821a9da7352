//! Statistics Aggregator
//!
//! Running maximum of `tokens` per account type, folded in lock-free as
//! settlements fire.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::models::AccountType;

#[derive(Debug)]
struct StatSlot {
    max_tokens: AtomicI64,
    settled: AtomicU64,
}

impl StatSlot {
    fn new() -> Self {
        Self {
            max_tokens: AtomicI64::new(i64::MIN),
            settled: AtomicU64::new(0),
        }
    }

    /// 0 until something settles; any `i64`, including `i64::MIN`, after.
    fn max(&self) -> i64 {
        if self.settled.load(Ordering::Acquire) == 0 {
            return 0;
        }
        self.max_tokens.load(Ordering::Acquire)
    }
}

/// Per-type maxima. The key set is fixed at construction, so reads and folds
/// never take a lock.
#[derive(Debug)]
pub struct StatsAggregator {
    slots: HashMap<AccountType, StatSlot>,
}

impl StatsAggregator {
    pub fn new(types: &[AccountType]) -> Self {
        Self {
            slots: types.iter().map(|t| (*t, StatSlot::new())).collect(),
        }
    }

    /// `max = max(max, tokens)`. Returns false for a type outside the tracked set.
    pub fn fold(&self, account_type: AccountType, tokens: i64) -> bool {
        let Some(slot) = self.slots.get(&account_type) else {
            return false;
        };
        slot.max_tokens.fetch_max(tokens, Ordering::AcqRel);
        // Published after the max so a non-zero count implies a real value.
        slot.settled.fetch_add(1, Ordering::Release);
        true
    }

    /// Highest settled token value for the type, 0 if nothing settled.
    pub fn query(&self, account_type: AccountType) -> i64 {
        self.slots.get(&account_type).map_or(0, StatSlot::max)
    }

    pub fn is_tracked(&self, account_type: AccountType) -> bool {
        self.slots.contains_key(&account_type)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut max_tokens = BTreeMap::new();
        let mut settled = BTreeMap::new();
        for (account_type, slot) in &self.slots {
            max_tokens.insert(*account_type, slot.max());
            settled.insert(*account_type, slot.settled.load(Ordering::Acquire));
        }
        StatsSnapshot {
            max_tokens,
            settled,
        }
    }
}

/// Read-only copy of the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub max_tokens: BTreeMap<AccountType, i64>,
    /// Number of settlements folded per type.
    pub settled: BTreeMap<AccountType, u64>,
}

impl StatsSnapshot {
    pub fn get(&self, account_type: AccountType) -> i64 {
        self.max_tokens.get(&account_type).copied().unwrap_or(0)
    }

    pub fn total_settled(&self) -> u64 {
        self.settled.values().sum()
    }
}
