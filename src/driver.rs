//! Arrival simulation
//!
//! Feeds updates to the indexer one at a time, each after a uniformly random
//! delay, to mimic accounts arriving from the chain.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::indexer::{HandleOutcome, IndexerError, IndexingProcessor};
use crate::models::Update;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverReport {
    pub submitted: u64,
    pub indexed: u64,
    pub ignored: u64,
    pub failed: u64,
}

/// Jittered submitter
pub struct LoadDriver<'a> {
    indexer: &'a IndexingProcessor,
    config: DriverConfig,
    rng: ChaCha8Rng,
}

impl<'a> LoadDriver<'a> {
    pub fn new(indexer: &'a IndexingProcessor, config: DriverConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            indexer,
            config,
            rng,
        }
    }

    /// Next arrival gap, uniform in `[min_jitter_ms, max_jitter_ms]`.
    pub fn next_jitter(&mut self) -> Duration {
        let min = self.config.min_jitter_ms;
        let max = self.config.max_jitter_ms;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(self.rng.gen_range(min..=max))
    }

    /// Wait one arrival gap, then hand the update to the indexer.
    pub async fn submit(&mut self, update: &Update) -> Result<HandleOutcome, IndexerError> {
        let jitter = self.next_jitter();
        debug!(entity_id = %update.id, delay_ms = jitter.as_millis() as u64, "Delaying arrival");
        if !jitter.is_zero() {
            sleep(jitter).await;
        }

        info!(
            entity_id = %update.id,
            version = update.version,
            account_type = %update.account_type,
            tokens = update.tokens,
            callback_ms = update.callback_time_ms,
            "*** Handling account ***"
        );
        self.indexer.handle_update(update)
    }

    /// Submit every update in order. Failures are logged and counted; the run
    /// continues.
    pub async fn run(&mut self, updates: &[Update]) -> DriverReport {
        let mut report = DriverReport::default();
        for update in updates {
            report.submitted += 1;
            match self.submit(update).await {
                Ok(HandleOutcome::Indexed { .. }) => report.indexed += 1,
                Ok(HandleOutcome::Ignored(_)) => report.ignored += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(entity_id = %update.id, version = update.version, "Update failed: {}", e);
                }
            }
        }

        info!(
            submitted = report.submitted,
            indexed = report.indexed,
            ignored = report.ignored,
            failed = report.failed,
            "Load driver finished"
        );
        report
    }
}
