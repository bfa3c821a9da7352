//! JSON account feed
//!
//! The feed is a JSON array of account records. Records are validated one by
//! one so a bad record is reported without dropping the rest of the file.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

use crate::indexer::IndexerError;
use crate::models::{AccountType, Update};

/// A feed record that could not be turned into an [`Update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRecord {
    pub index: usize,
    pub id: Option<String>,
    #[serde(serialize_with = "serialize_error")]
    pub error: IndexerError,
}

fn serialize_error<S: serde::Serializer>(error: &IndexerError, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&error.to_string())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedBatch {
    pub updates: Vec<Update>,
    pub rejected: Vec<RejectedRecord>,
}

impl FeedBatch {
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

pub fn parse_feed(json: &str) -> Result<FeedBatch> {
    let records: Vec<Value> =
        serde_json::from_str(json).context("Feed is not a JSON array of account records")?;

    let mut batch = FeedBatch::default();
    for (index, record) in records.into_iter().enumerate() {
        let id = record.get("id").and_then(Value::as_str).map(str::to_string);
        match parse_record(index, record) {
            Ok(update) => batch.updates.push(update),
            Err(error) => {
                warn!(index, id = ?id, "Rejected feed record: {}", error);
                batch.rejected.push(RejectedRecord { index, id, error });
            }
        }
    }

    debug!(
        accepted = batch.updates.len(),
        rejected = batch.rejected.len(),
        "Parsed account feed"
    );
    Ok(batch)
}

fn parse_record(index: usize, record: Value) -> Result<Update, IndexerError> {
    // Checked up front so an unknown type is reported as such, not as a
    // generic deserialization failure.
    match record.get("accountType").and_then(Value::as_str) {
        Some(tag) => {
            tag.parse::<AccountType>()?;
        }
        None => {
            return Err(IndexerError::InvalidRecord {
                index,
                reason: "missing accountType".to_string(),
            })
        }
    }

    serde_json::from_value(record).map_err(|e| IndexerError::InvalidRecord {
        index,
        reason: e.to_string(),
    })
}

pub fn load_feed(path: impl AsRef<Path>) -> Result<FeedBatch> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read account feed {}", path.display()))?;
    parse_feed(&contents).with_context(|| format!("Failed to parse account feed {}", path.display()))
}
