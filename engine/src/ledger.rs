// SPDX-License-Identifier: Apache-2.0
//! The historical query layer the engine reads chain state through.

use async_trait::async_trait;
use definition_core::{Expr, FeedValue, Relation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The query layer could not answer. Never a negative answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("ledger query failed: {0}")]
    Backend(String),
}

/// Outcome of looking up the current definition of an address.
#[derive(Clone, Debug, PartialEq)]
pub enum DefinitionLookup {
    Found(Expr),
    /// Not revealed on chain yet; the unit itself may reveal a definition
    /// with this chash.
    NotFound { definition_chash: String },
}

/// `in data feed` / `in merkle` lookup.
#[derive(Clone, Copy, Debug)]
pub struct DataFeedQuery<'a> {
    pub oracles: &'a [String],
    pub feed_name: &'a str,
    pub relation: Relation,
    pub value: &'a FeedValue,
    pub min_mci: u64,
    pub max_mci: u64,
}

/// Coordinates of a previous output spent by a transfer input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputRef<'a> {
    pub unit: &'a str,
    pub message_index: u32,
    pub output_index: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOutput {
    pub address: String,
    pub amount: u64,
}

/// Read access to finalized chain state. Every query is answered as of
/// `last_ball_mci` (or the given bounds) so all nodes agree on the result.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn resolve_definition(
        &self,
        address: &str,
        last_ball_mci: u64,
    ) -> Result<DefinitionLookup, QueryError>;

    /// Has any good, stable unit authored by `address` been seen.
    async fn query_seen(&self, address: &str, last_ball_mci: u64) -> Result<bool, QueryError>;

    /// Has `address` changed its definition (to `definition_chash`, or to
    /// anything when `None`).
    async fn query_definition_change(
        &self,
        address: &str,
        definition_chash: Option<&str>,
        last_ball_mci: u64,
    ) -> Result<bool, QueryError>;

    async fn query_attested(
        &self,
        address: &str,
        attestors: &[String],
        last_ball_mci: u64,
    ) -> Result<bool, QueryError>;

    async fn query_data_feed(&self, query: &DataFeedQuery<'_>) -> Result<bool, QueryError>;

    /// Payload of a stable `definition_template` message posted in `unit`.
    async fn query_template(&self, unit: &str, last_ball_mci: u64) -> Result<Option<Value>, QueryError>;

    /// True when any of `assets` is private.
    async fn query_asset_privacy(&self, assets: &[String]) -> Result<bool, QueryError>;

    async fn query_output(&self, output: OutputRef<'_>) -> Result<Option<ResolvedOutput>, QueryError>;

    /// Main chain index of a stable unit.
    async fn query_unit_mci(&self, unit: &str, last_ball_mci: u64) -> Result<Option<u64>, QueryError>;
}
