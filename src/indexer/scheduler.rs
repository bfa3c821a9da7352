//! Settlement Scheduler
//!
//! One tokio task per accepted update: sleep for the update's callback time,
//! then settle it in the registry and fold its tokens into the statistics.
//! Task handles live in a side table keyed by `(account, version)`; the
//! update itself never points at its task.
//!
//! Who wins between a firing timer and a cancellation is decided by the
//! registry's Pending -> Settled / Pending -> Canceled check-and-set, never by
//! the abort. Aborting only frees the task early.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::IndexerError;
use super::events::{EventBus, IndexEvent};
use super::registry::{EntityRegistry, SettleOutcome};
use super::stats::StatsAggregator;
use crate::models::{AccountData, AccountType, Update};

/// Side-table key, and the handle returned by [`SettlementScheduler::schedule`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SettlementKey {
    pub entity_id: String,
    pub version: u64,
}

impl SettlementKey {
    pub fn new(entity_id: impl Into<String>, version: u64) -> Self {
        Self {
            entity_id: entity_id.into(),
            version,
        }
    }
}

impl fmt::Display for SettlementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.entity_id, self.version)
    }
}

/// Everything a settlement task needs once its timer fires.
#[derive(Debug, Clone)]
pub struct SettlementTicket {
    pub key: SettlementKey,
    pub account_type: AccountType,
    pub tokens: i64,
    pub delay: Duration,
    pub data: Option<AccountData>,
}

impl From<&Update> for SettlementTicket {
    fn from(update: &Update) -> Self {
        Self {
            key: SettlementKey::new(update.id.clone(), update.version),
            account_type: update.account_type,
            tokens: update.tokens,
            delay: update.settle_delay(),
            data: update.data.clone(),
        }
    }
}

/// Outcome of [`SettlementScheduler::stop_all`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct StopReport {
    /// Timers stopped before they fired; now `Canceled` in the registry.
    pub interrupted: Vec<SettlementKey>,
    /// Tasks still running when the stop timeout elapsed.
    pub unresponsive: usize,
}

#[derive(Default)]
struct SettlementTable {
    in_flight: HashMap<SettlementKey, JoinHandle<()>>,
    closed: bool,
}

struct Shared {
    registry: Arc<EntityRegistry>,
    stats: Arc<StatsAggregator>,
    events: EventBus,
    table: Mutex<SettlementTable>,
    idle: Notify,
}

impl Shared {
    async fn run_settlement(&self, ticket: SettlementTicket) {
        tokio::time::sleep(ticket.delay).await;

        // No .await past this point: an abort either lands during the sleep or
        // not at all.
        let key = &ticket.key;
        match self.registry.mark_settled(&key.entity_id, key.version) {
            SettleOutcome::Settled { superseded } => {
                self.stats.fold(ticket.account_type, ticket.tokens);
                debug!(
                    entity_id = %key.entity_id,
                    version = key.version,
                    account_type = %ticket.account_type,
                    tokens = ticket.tokens,
                    "Account has been ingested"
                );
                if let Some(previous) = superseded {
                    debug!(entity_id = %key.entity_id, previous, "Previous settlement superseded");
                }
                if let Some(data) = &ticket.data {
                    debug!(entity_id = %key.entity_id, schema = ?data.schema(), ?data, "Ingested payload");
                }
                self.events.publish(IndexEvent::Ingested {
                    entity_id: key.entity_id.clone(),
                    version: key.version,
                    account_type: ticket.account_type,
                    tokens: ticket.tokens,
                });
            }
            SettleOutcome::AlreadyCanceled => {
                debug!(
                    entity_id = %key.entity_id,
                    version = key.version,
                    "Timer fired after cancellation; settlement skipped"
                );
            }
            SettleOutcome::NotPending => {
                warn!(
                    entity_id = %key.entity_id,
                    version = key.version,
                    "Timer fired for a version that is not pending"
                );
            }
        }

        self.finish(key);
    }

    fn finish(&self, key: &SettlementKey) {
        let mut table = self.table.lock();
        table.in_flight.remove(key);
        if table.in_flight.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

/// Bounded pool of cancellable settlement timers.
pub struct SettlementScheduler {
    shared: Arc<Shared>,
    permits: Arc<Semaphore>,
    limit: usize,
}

impl SettlementScheduler {
    pub fn new(
        registry: Arc<EntityRegistry>,
        stats: Arc<StatsAggregator>,
        events: EventBus,
        max_in_flight: usize,
    ) -> Self {
        let limit = max_in_flight.max(1);
        Self {
            shared: Arc::new(Shared {
                registry,
                stats,
                events,
                table: Mutex::new(SettlementTable::default()),
                idle: Notify::new(),
            }),
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Start the settlement timer for `ticket`. Must be called from within a
    /// Tokio runtime. A zero delay still settles on the spawned task, never
    /// inline.
    pub fn schedule(&self, ticket: SettlementTicket) -> Result<SettlementKey, IndexerError> {
        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(IndexerError::ShuttingDown),
            Err(TryAcquireError::NoPermits) => {
                return Err(IndexerError::SchedulerSaturation {
                    entity_id: ticket.key.entity_id,
                    version: ticket.key.version,
                    limit: self.limit,
                })
            }
        };

        let mut table = self.shared.table.lock();
        if table.closed {
            return Err(IndexerError::ShuttingDown);
        }

        let key = ticket.key.clone();
        debug!(
            entity_id = %key.entity_id,
            version = key.version,
            delay_ms = ticket.delay.as_millis() as u64,
            "Scheduling settlement timer"
        );

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            shared.run_settlement(ticket).await;
        });
        table.in_flight.insert(key.clone(), handle);
        Ok(key)
    }

    /// Stop a timer before it fires. The registry must already have been
    /// moved to `Canceled` for this key; otherwise the task settles normally
    /// if it is past its sleep. Returns false if no such timer was running.
    pub fn cancel(&self, key: &SettlementKey) -> bool {
        let mut table = self.shared.table.lock();
        let Some(handle) = table.in_flight.remove(key) else {
            return false;
        };
        handle.abort();
        debug!(entity_id = %key.entity_id, version = key.version, "Settlement timer stopped");
        if table.in_flight.is_empty() {
            self.shared.idle.notify_waiters();
        }
        true
    }

    pub fn in_flight(&self) -> usize {
        self.shared.table.lock().in_flight.len()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_closed(&self) -> bool {
        self.shared.table.lock().closed
    }

    /// Wait until no timer is running. Returns false if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        let wait = async {
            loop {
                let notified = shared.idle.notified();
                let empty = shared.table.lock().in_flight.is_empty();
                if empty {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Refuse new timers and interrupt every running one. Interrupted
    /// versions are moved to `Canceled`; tasks that already committed their
    /// settlement are left to finish. Waits up to `timeout` for all of them.
    pub async fn stop_all(&self, timeout: Duration) -> StopReport {
        let drained: Vec<(SettlementKey, JoinHandle<()>)> = {
            let mut table = self.shared.table.lock();
            table.closed = true;
            table.in_flight.drain().collect()
        };
        self.permits.close();
        self.shared.idle.notify_waiters();

        let mut report = StopReport::default();
        let mut handles = Vec::with_capacity(drained.len());
        for (key, handle) in drained {
            if self
                .shared
                .registry
                .mark_canceled(&key.entity_id, key.version)
            {
                handle.abort();
                warn!(
                    entity_id = %key.entity_id,
                    version = key.version,
                    "⏹️ Settlement interrupted at shutdown"
                );
                self.shared.events.publish(IndexEvent::Interrupted {
                    entity_id: key.entity_id.clone(),
                    version: key.version,
                });
                report.interrupted.push(key);
            }
            handles.push(handle);
        }

        let join_all = async {
            for handle in handles.iter_mut() {
                let _ = handle.await;
            }
        };
        let _ = tokio::time::timeout(timeout, join_all).await;

        report.unresponsive = handles.iter().filter(|h| !h.is_finished()).count();
        report.interrupted.sort();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::registry::UpdateState;

    fn setup(limit: usize) -> (Arc<EntityRegistry>, Arc<StatsAggregator>, SettlementScheduler) {
        let registry = Arc::new(EntityRegistry::new());
        let stats = Arc::new(StatsAggregator::new(&AccountType::ALL));
        let scheduler =
            SettlementScheduler::new(registry.clone(), stats.clone(), EventBus::new(64), limit);
        (registry, stats, scheduler)
    }

    fn ticket(id: &str, version: u64, tokens: i64, delay_ms: u64) -> SettlementTicket {
        SettlementTicket::from(
            &Update::new(id, version, AccountType::Mint, tokens).with_callback_ms(delay_ms),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_settles_and_folds() {
        let (registry, stats, scheduler) = setup(16);
        registry.try_accept("E1", 1);
        scheduler.schedule(ticket("E1", 1, 500, 100)).unwrap();
        assert_eq!(scheduler.in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert_eq!(registry.state("E1", 1), Some(UpdateState::Pending));
        assert_eq!(stats.query(AccountType::Mint), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(registry.state("E1", 1), Some(UpdateState::Settled));
        assert_eq!(stats.query(AccountType::Mint), 500);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_settles_asynchronously() {
        let (registry, _stats, scheduler) = setup(16);
        registry.try_accept("E1", 0);
        scheduler.schedule(ticket("E1", 0, 1, 0)).unwrap();

        // Not settled inline.
        assert_eq!(registry.state("E1", 0), Some(UpdateState::Pending));

        assert!(scheduler.wait_idle(Duration::from_millis(10)).await);
        assert_eq!(registry.state("E1", 0), Some(UpdateState::Settled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fold() {
        let (registry, stats, scheduler) = setup(16);
        registry.try_accept("E1", 1);
        let key = scheduler.schedule(ticket("E1", 1, 700, 1_000)).unwrap();

        assert!(registry.mark_canceled("E1", 1));
        assert!(scheduler.cancel(&key));
        assert!(!scheduler.cancel(&key));

        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(registry.state("E1", 1), Some(UpdateState::Canceled));
        assert_eq!(stats.query(AccountType::Mint), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_cancellation_wins_without_abort() {
        let (registry, stats, scheduler) = setup(16);
        registry.try_accept("E1", 1);
        scheduler.schedule(ticket("E1", 1, 700, 50)).unwrap();

        // Cancel committed in the registry, abort signal never delivered.
        assert!(registry.mark_canceled("E1", 1));

        assert!(scheduler.wait_idle(Duration::from_millis(100)).await);
        assert_eq!(registry.state("E1", 1), Some(UpdateState::Canceled));
        assert_eq!(stats.query(AccountType::Mint), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturation_is_reported() {
        let (registry, _stats, scheduler) = setup(1);
        registry.try_accept("E1", 1);
        scheduler.schedule(ticket("E1", 1, 1, 1_000)).unwrap();

        let err = scheduler.schedule(ticket("E2", 4, 1, 1_000)).unwrap_err();
        assert_eq!(
            err,
            IndexerError::SchedulerSaturation {
                entity_id: "E2".to_string(),
                version: 4,
                limit: 1,
            }
        );

        // Permit comes back once the first timer is done.
        assert!(scheduler.wait_idle(Duration::from_millis(1_500)).await);
        registry.try_accept("E2", 4);
        assert!(scheduler.schedule(ticket("E2", 4, 1, 10)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_times_out() {
        let (registry, _stats, scheduler) = setup(16);
        registry.try_accept("E1", 1);
        scheduler.schedule(ticket("E1", 1, 1, 5_000)).unwrap();
        assert!(!scheduler.wait_idle(Duration::from_millis(100)).await);
        assert!(scheduler.wait_idle(Duration::from_millis(10_000)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_interrupts_and_closes() {
        let (registry, stats, scheduler) = setup(16);
        registry.try_accept("E1", 1);
        registry.try_accept("E2", 2);
        scheduler.schedule(ticket("E1", 1, 10, 60_000)).unwrap();
        scheduler.schedule(ticket("E2", 2, 20, 60_000)).unwrap();

        let report = scheduler.stop_all(Duration::from_millis(500)).await;
        assert_eq!(
            report.interrupted,
            vec![SettlementKey::new("E1", 1), SettlementKey::new("E2", 2)]
        );
        assert_eq!(report.unresponsive, 0);
        assert_eq!(registry.state("E1", 1), Some(UpdateState::Canceled));
        assert_eq!(scheduler.in_flight(), 0);
        assert!(scheduler.is_closed());

        registry.try_accept("E3", 1);
        assert_eq!(
            scheduler.schedule(ticket("E3", 1, 1, 1)).unwrap_err(),
            IndexerError::ShuttingDown
        );

        tokio::time::sleep(Duration::from_millis(70_000)).await;
        assert_eq!(stats.snapshot().total_settled(), 0);
    }
}
