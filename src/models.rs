use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::indexer::IndexerError;

/// Account types carried by the feed. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccountType {
    #[serde(rename = "mint")]
    Mint,
    #[serde(rename = "metadata")]
    MetaData,
    #[serde(rename = "masterEdition")]
    MasterEdition,
    #[serde(rename = "auction")]
    Auction,
    #[serde(rename = "auctionData")]
    AuctionData,
    #[serde(rename = "account")]
    Account,
    #[serde(rename = "escrow")]
    Escrow,
}

impl AccountType {
    pub const ALL: [AccountType; 7] = [
        AccountType::Mint,
        AccountType::MetaData,
        AccountType::MasterEdition,
        AccountType::Auction,
        AccountType::AuctionData,
        AccountType::Account,
        AccountType::Escrow,
    ];

    /// Name used in the JSON feed.
    pub fn wire_name(&self) -> &'static str {
        match self {
            AccountType::Mint => "mint",
            AccountType::MetaData => "metadata",
            AccountType::MasterEdition => "masterEdition",
            AccountType::Auction => "auction",
            AccountType::AuctionData => "auctionData",
            AccountType::Account => "account",
            AccountType::Escrow => "escrow",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Mint => "MINT",
            AccountType::MetaData => "META_DATA",
            AccountType::MasterEdition => "MASTER_EDITION",
            AccountType::Auction => "AUCTION",
            AccountType::AuctionData => "AUCTION_DATA",
            AccountType::Account => "ACCOUNT",
            AccountType::Escrow => "ESCROW",
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = IndexerError;

    /// Accepts either the feed name (`masterEdition`) or the display name
    /// (`MASTER_EDITION`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountType::ALL
            .iter()
            .copied()
            .find(|t| t.wire_name() == s || t.as_str() == s)
            .ok_or_else(|| IndexerError::UnknownTypeTag {
                tag: s.to_string(),
            })
    }
}

/// Shape of an [`AccountData`] payload. All accounts of one type share a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSchema {
    Mint,
    Image,
    Bid,
    Empty,
}

/// Account payload. Opaque to the indexer; only carried through to the
/// ingestion notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_bid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mint_id: Option<String>,
}

impl AccountData {
    pub fn schema(&self) -> DataSchema {
        if self.mint_id.is_some() {
            DataSchema::Mint
        } else if self.img.is_some() {
            DataSchema::Image
        } else if self.expiry.is_some() && self.current_bid.is_some() {
            DataSchema::Bid
        } else {
            DataSchema::Empty
        }
    }
}

/// A versioned account update as delivered by the feed.
///
/// Immutable once built. `(id, version)` identifies the logical update; a
/// missing `version` in the feed is read as 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub id: String,
    pub account_type: AccountType,
    pub tokens: i64,
    #[serde(default)]
    pub callback_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<AccountData>,
    #[serde(default, deserialize_with = "version_or_zero")]
    pub version: u64,
}

/// `"version": null` reads the same as a missing version.
fn version_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

impl Update {
    pub fn new(id: impl Into<String>, version: u64, account_type: AccountType, tokens: i64) -> Self {
        Self {
            id: id.into(),
            account_type,
            tokens,
            callback_time_ms: 0,
            data: None,
            version,
        }
    }

    pub fn with_callback_ms(mut self, callback_time_ms: u64) -> Self {
        self.callback_time_ms = callback_time_ms;
        self
    }

    pub fn with_data(mut self, data: AccountData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn settle_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.callback_time_ms)
    }
}
