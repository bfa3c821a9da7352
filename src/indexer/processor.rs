//! Indexing Processor
//!
//! Public entry point. Each update is decided, recorded and scheduled while
//! holding its account's lock, so concurrent updates for the same account
//! never observe a canceled-but-not-yet-replaced state.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::arbiter::{self, Decision};
use super::error::IndexerError;
use super::events::{EventBus, IndexEvent};
use super::registry::{EntityRecord, EntityRegistry, UpdateState};
use super::scheduler::{SettlementKey, SettlementScheduler, SettlementTicket};
use super::stats::{StatsAggregator, StatsSnapshot};
use crate::config::IndexerConfig;
use crate::models::{AccountType, Update};

/// Why an update was dropped without any state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IgnoreReason {
    /// A settled or pending version at least as new exists.
    Stale { blocking_version: u64 },
    /// This `(id, version)` was already seen.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HandleOutcome {
    /// Accepted and scheduled; `canceled` is the pending version it replaced.
    Indexed { canceled: Option<u64> },
    Ignored(IgnoreReason),
}

#[derive(Debug, Default)]
pub struct ProcessorCounters {
    pub received: AtomicU64,
    pub indexed: AtomicU64,
    pub duplicates: AtomicU64,
    pub stale: AtomicU64,
    pub canceled: AtomicU64,
    pub rejected: AtomicU64,
    pub saturated: AtomicU64,
}

impl ProcessorCounters {
    /// `settled` comes from the statistics; the processor never sees timers fire.
    pub fn snapshot(&self, settled: u64) -> ProcessorCountersSnapshot {
        ProcessorCountersSnapshot {
            received: self.received.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
            settled,
            rejected: self.rejected.load(Ordering::Relaxed),
            saturated: self.saturated.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorCountersSnapshot {
    pub received: u64,
    pub indexed: u64,
    pub duplicates: u64,
    pub stale: u64,
    pub canceled: u64,
    pub settled: u64,
    pub rejected: u64,
    pub saturated: u64,
}

/// Result of [`IndexingProcessor::shutdown`].
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub stats: StatsSnapshot,
    pub counters: ProcessorCountersSnapshot,
    /// Every pending settlement fired within the grace period.
    pub drained: bool,
    /// Settlements stopped at shutdown; their tokens are not in `stats`.
    pub interrupted: Vec<SettlementKey>,
    pub unresponsive: usize,
    pub degraded: bool,
    pub elapsed_ms: u64,
}

impl FinalReport {
    pub fn highest_tokens(&self, account_type: AccountType) -> i64 {
        self.stats.get(account_type)
    }
}

/// One line per tracked type, in type order.
impl fmt::Display for FinalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (account_type, tokens) in &self.stats.max_tokens {
            writeln!(f, "Account Type: {}, Highest Token Value: {}", account_type, tokens)?;
        }
        Ok(())
    }
}

pub struct IndexingProcessor {
    config: IndexerConfig,
    registry: Arc<EntityRegistry>,
    stats: Arc<StatsAggregator>,
    scheduler: SettlementScheduler,
    events: EventBus,
    counters: ProcessorCounters,
    accepting: AtomicBool,
}

impl IndexingProcessor {
    pub fn new(config: IndexerConfig) -> Self {
        let registry = Arc::new(EntityRegistry::new());
        let stats = Arc::new(StatsAggregator::new(&config.tracked_types));
        let events = EventBus::new(config.event_buffer);
        let scheduler = SettlementScheduler::new(
            registry.clone(),
            stats.clone(),
            events.clone(),
            config.max_in_flight,
        );

        Self {
            config,
            registry,
            stats,
            scheduler,
            events,
            counters: ProcessorCounters::default(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Decide, record and schedule one update. Returns as soon as the
    /// settlement timer is started; never waits on the delay itself.
    /// Must be called from within a Tokio runtime.
    pub fn handle_update(&self, update: &Update) -> Result<HandleOutcome, IndexerError> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        if !self.accepting.load(Ordering::SeqCst) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(IndexerError::ShuttingDown);
        }

        if !self.stats.is_tracked(update.account_type) {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                entity_id = %update.id,
                version = update.version,
                account_type = %update.account_type,
                "Rejected update with untracked account type"
            );
            return Err(IndexerError::UnknownTypeTag {
                tag: update.account_type.wire_name().to_string(),
            });
        }

        let result = self.registry.with_entity(
            &update.id,
            |record| -> Result<HandleOutcome, IndexerError> {
                match arbiter::evaluate(record, update.version) {
                    Decision::IgnoreDuplicate => {
                        Ok(HandleOutcome::Ignored(IgnoreReason::Duplicate))
                    }
                    Decision::IgnoreStale { blocking_version } => {
                        Ok(HandleOutcome::Ignored(IgnoreReason::Stale { blocking_version }))
                    }
                    Decision::Accept { .. } => {
                        // Schedule first: if no timer can be started nothing is recorded.
                        self.scheduler.schedule(SettlementTicket::from(update))?;
                        let canceled = record.accept(update.version);
                        if let Some(previous) = canceled {
                            self.scheduler
                                .cancel(&SettlementKey::new(update.id.clone(), previous));
                        }
                        Ok(HandleOutcome::Indexed { canceled })
                    }
                }
            },
        );

        match &result {
            Ok(outcome) => self.report(update, outcome),
            Err(e @ IndexerError::SchedulerSaturation { .. }) => {
                self.counters.saturated.fetch_add(1, Ordering::Relaxed);
                warn!(entity_id = %update.id, version = update.version, "{}", e);
            }
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(entity_id = %update.id, version = update.version, "{}", e);
            }
        }
        result
    }

    fn report(&self, update: &Update, outcome: &HandleOutcome) {
        let entity_id = update.id.clone();
        let version = update.version;
        match *outcome {
            HandleOutcome::Indexed { canceled } => {
                self.counters.indexed.fetch_add(1, Ordering::Relaxed);
                if let Some(canceled_version) = canceled {
                    self.counters.canceled.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        entity_id = %entity_id,
                        canceled_version,
                        superseding_version = version,
                        "Previous version not yet ingested; canceled in favor of the new one"
                    );
                    self.events.publish(IndexEvent::Canceled {
                        entity_id: entity_id.clone(),
                        canceled_version,
                        superseding_version: version,
                    });
                }
                debug!(entity_id = %entity_id, version, "Account has been indexed");
                self.events.publish(IndexEvent::Indexed { entity_id, version });
            }
            HandleOutcome::Ignored(IgnoreReason::Duplicate) => {
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(entity_id = %entity_id, version, "Duplicate index handled; update ignored");
                self.events.publish(IndexEvent::Duplicate { entity_id, version });
            }
            HandleOutcome::Ignored(IgnoreReason::Stale { blocking_version }) => {
                self.counters.stale.fetch_add(1, Ordering::Relaxed);
                debug!(
                    entity_id = %entity_id,
                    version,
                    blocking_version,
                    "Stale version; newer one already known, update ignored"
                );
                self.events.publish(IndexEvent::Stale {
                    entity_id,
                    version,
                    blocking_version,
                });
            }
        }
    }

    /// Highest settled token value for the type, 0 if none settled.
    pub fn highest_tokens(&self, account_type: AccountType) -> i64 {
        self.stats.query(account_type)
    }

    pub fn snapshot_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn entity_state(&self, entity_id: &str, version: u64) -> Option<UpdateState> {
        self.registry.state(entity_id, version)
    }

    pub fn entity_record(&self, entity_id: &str) -> Option<EntityRecord> {
        self.registry.record(entity_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    pub fn counters(&self) -> ProcessorCountersSnapshot {
        self.counters.snapshot(self.stats.snapshot().total_settled())
    }

    pub fn in_flight(&self) -> usize {
        self.scheduler.in_flight()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Stop accepting updates, give pending settlements the grace period to
    /// fire, interrupt whatever is left and report the final statistics.
    /// Never waits longer than grace + stop timeout.
    pub async fn shutdown(&self) -> FinalReport {
        let started = Instant::now();
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!(
                in_flight = self.scheduler.in_flight(),
                grace_ms = self.config.shutdown_grace_ms,
                "🛑 Shutdown requested; waiting for pending settlements"
            );
        }

        let drained = self.scheduler.wait_idle(self.config.shutdown_grace()).await;
        if !drained {
            warn!(
                outstanding = self.scheduler.in_flight(),
                grace_ms = self.config.shutdown_grace_ms,
                "Grace period elapsed with settlements outstanding"
            );
        }

        let stop = self.scheduler.stop_all(self.config.stop_timeout()).await;
        let degraded = !stop.interrupted.is_empty() || stop.unresponsive > 0;

        let stats = self.stats.snapshot();
        let counters = self.counters.snapshot(stats.total_settled());
        let report = FinalReport {
            stats,
            counters,
            drained,
            interrupted: stop.interrupted,
            unresponsive: stop.unresponsive,
            degraded,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        if report.degraded {
            warn!(
                interrupted = report.interrupted.len(),
                unresponsive = report.unresponsive,
                "⚠️ Degraded shutdown: some settlements never completed"
            );
        } else {
            info!(settled = report.stats.total_settled(), "Shutdown complete");
        }
        report
    }
}
