//! Account Indexer Core
//!
//! ```text
//!   Update ──▶ IndexingProcessor::handle_update
//!                    │  (per-account lock)
//!                    ▼
//!              arbiter::evaluate ──▶ EntityRegistry (Pending / Canceled)
//!                    │
//!                    ▼
//!           SettlementScheduler ── timer fires ──▶ EntityRegistry (Settled)
//!                                                  StatsAggregator (max tokens)
//! ```

pub mod arbiter;
pub mod error;
pub mod events;
pub mod processor;
pub mod registry;
pub mod scheduler;
pub mod stats;

pub use arbiter::Decision;
pub use error::IndexerError;
pub use events::{EventBus, IndexEvent};
pub use processor::{
    FinalReport, HandleOutcome, IgnoreReason, IndexingProcessor, ProcessorCountersSnapshot,
};
pub use registry::{EntityRecord, EntityRegistry, SettleOutcome, UpdateState};
pub use scheduler::{SettlementKey, SettlementScheduler, SettlementTicket, StopReport};
pub use stats::{StatsAggregator, StatsSnapshot};
