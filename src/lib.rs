//! Account Indexer Library
//!
//! Versioned account ingestion: newest version wins, superseded settlement
//! timers are canceled, and the highest token value per account type is
//! tracked as settlements fire.

pub mod config;
pub mod driver;
pub mod feed;
pub mod indexer;
pub mod models;

pub use config::{DriverConfig, IndexerConfig};
pub use indexer::{FinalReport, HandleOutcome, IndexEvent, IndexerError, IndexingProcessor};
pub use models::{AccountData, AccountType, Update};
