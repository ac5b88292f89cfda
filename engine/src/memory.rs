// SPDX-License-Identifier: Apache-2.0
//! In-memory [`Ledger`] backed by plain collections.
//!
//! Used by the test suites and by the host binary, which loads one from a
//! JSON fixture. Every query honors the `last_ball_mci` bound so fixtures can
//! hold state "from the future" that must stay invisible.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use definition_core::{Expr, FeedValue, Relation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ledger::{DataFeedQuery, DefinitionLookup, Ledger, OutputRef, QueryError, ResolvedOutput};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionChangeRecord {
    pub address: String,
    pub definition_chash: String,
    pub mci: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationRecord {
    pub address: String,
    pub attestor: String,
    pub mci: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataFeedRecord {
    pub oracle: String,
    pub feed_name: String,
    pub value: FeedValue,
    pub mci: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub mci: u64,
    pub template: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub unit: String,
    pub message_index: u32,
    pub output_index: u32,
    pub address: String,
    pub amount: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryLedger {
    /// Current definition per address. Addresses missing here resolve to
    /// their own chash.
    pub definitions: BTreeMap<String, Expr>,
    pub definition_changes: Vec<DefinitionChangeRecord>,
    /// First main chain index at which each address authored a unit.
    pub authored: BTreeMap<String, u64>,
    pub attestations: Vec<AttestationRecord>,
    pub data_feeds: Vec<DataFeedRecord>,
    /// Keyed by the hash of the unit that posted the template.
    pub templates: BTreeMap<String, TemplateRecord>,
    pub private_assets: BTreeSet<String>,
    pub outputs: Vec<OutputRecord>,
    pub unit_mcis: BTreeMap<String, u64>,
    /// When set, every query fails with this message.
    #[serde(skip)]
    pub unavailable: Option<String>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_definition(mut self, address: impl Into<String>, definition: Expr) -> Self {
        self.definitions.insert(address.into(), definition);
        self
    }

    #[must_use]
    pub fn with_definition_change(
        mut self,
        address: impl Into<String>,
        definition_chash: impl Into<String>,
        mci: u64,
    ) -> Self {
        self.definition_changes.push(DefinitionChangeRecord {
            address: address.into(),
            definition_chash: definition_chash.into(),
            mci,
        });
        self
    }

    #[must_use]
    pub fn with_authored(mut self, address: impl Into<String>, mci: u64) -> Self {
        let first = self.authored.entry(address.into()).or_insert(mci);
        *first = (*first).min(mci);
        self
    }

    #[must_use]
    pub fn with_attestation(mut self, address: impl Into<String>, attestor: impl Into<String>, mci: u64) -> Self {
        self.attestations.push(AttestationRecord {
            address: address.into(),
            attestor: attestor.into(),
            mci,
        });
        self
    }

    #[must_use]
    pub fn with_data_feed(
        mut self,
        oracle: impl Into<String>,
        feed_name: impl Into<String>,
        value: FeedValue,
        mci: u64,
    ) -> Self {
        self.data_feeds.push(DataFeedRecord {
            oracle: oracle.into(),
            feed_name: feed_name.into(),
            value,
            mci,
        });
        self
    }

    #[must_use]
    pub fn with_template(mut self, unit: impl Into<String>, mci: u64, template: Value) -> Self {
        self.templates.insert(unit.into(), TemplateRecord { mci, template });
        self
    }

    #[must_use]
    pub fn with_private_asset(mut self, asset: impl Into<String>) -> Self {
        self.private_assets.insert(asset.into());
        self
    }

    #[must_use]
    pub fn with_output(
        mut self,
        unit: impl Into<String>,
        message_index: u32,
        output_index: u32,
        address: impl Into<String>,
        amount: u64,
    ) -> Self {
        self.outputs.push(OutputRecord {
            unit: unit.into(),
            message_index,
            output_index,
            address: address.into(),
            amount,
        });
        self
    }

    #[must_use]
    pub fn with_unit_mci(mut self, unit: impl Into<String>, mci: u64) -> Self {
        self.unit_mcis.insert(unit.into(), mci);
        self
    }

    /// A ledger whose every query fails.
    #[must_use]
    pub fn unavailable(mut self, reason: impl Into<String>) -> Self {
        self.unavailable = Some(reason.into());
        self
    }

    fn check_available(&self) -> Result<(), QueryError> {
        match &self.unavailable {
            Some(reason) => Err(QueryError::Backend(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Numbers compare numerically and strings lexically; a number never equals
/// a string.
fn feed_value_holds(posted: &FeedValue, relation: Relation, expected: &FeedValue) -> bool {
    match (posted, expected) {
        (FeedValue::Number(a), FeedValue::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => relation.holds(&a, &b),
            _ => false,
        },
        (FeedValue::Text(a), FeedValue::Text(b)) => relation.holds(a.as_str(), b.as_str()),
        _ => relation == Relation::Ne,
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn resolve_definition(&self, address: &str, last_ball_mci: u64) -> Result<DefinitionLookup, QueryError> {
        self.check_available()?;
        if let Some(definition) = self.definitions.get(address) {
            return Ok(DefinitionLookup::Found(definition.clone()));
        }
        let changed = self
            .definition_changes
            .iter()
            .filter(|c| c.address == address && c.mci <= last_ball_mci)
            .max_by_key(|c| c.mci);
        let definition_chash = changed.map_or_else(|| address.to_owned(), |c| c.definition_chash.clone());
        Ok(DefinitionLookup::NotFound { definition_chash })
    }

    async fn query_seen(&self, address: &str, last_ball_mci: u64) -> Result<bool, QueryError> {
        self.check_available()?;
        Ok(self.authored.get(address).is_some_and(|&mci| mci <= last_ball_mci))
    }

    async fn query_definition_change(
        &self,
        address: &str,
        definition_chash: Option<&str>,
        last_ball_mci: u64,
    ) -> Result<bool, QueryError> {
        self.check_available()?;
        Ok(self.definition_changes.iter().any(|c| {
            c.address == address
                && c.mci <= last_ball_mci
                && definition_chash.map_or(true, |chash| c.definition_chash == chash)
        }))
    }

    async fn query_attested(&self, address: &str, attestors: &[String], last_ball_mci: u64) -> Result<bool, QueryError> {
        self.check_available()?;
        Ok(self
            .attestations
            .iter()
            .any(|a| a.address == address && a.mci <= last_ball_mci && attestors.contains(&a.attestor)))
    }

    async fn query_data_feed(&self, query: &DataFeedQuery<'_>) -> Result<bool, QueryError> {
        self.check_available()?;
        Ok(self.data_feeds.iter().any(|feed| {
            query.oracles.contains(&feed.oracle)
                && feed.feed_name == query.feed_name
                && feed.mci >= query.min_mci
                && feed.mci <= query.max_mci
                && feed_value_holds(&feed.value, query.relation, query.value)
        }))
    }

    async fn query_template(&self, unit: &str, last_ball_mci: u64) -> Result<Option<Value>, QueryError> {
        self.check_available()?;
        Ok(self
            .templates
            .get(unit)
            .filter(|t| t.mci <= last_ball_mci)
            .map(|t| t.template.clone()))
    }

    async fn query_asset_privacy(&self, assets: &[String]) -> Result<bool, QueryError> {
        self.check_available()?;
        Ok(assets.iter().any(|a| self.private_assets.contains(a)))
    }

    async fn query_output(&self, output: OutputRef<'_>) -> Result<Option<ResolvedOutput>, QueryError> {
        self.check_available()?;
        Ok(self
            .outputs
            .iter()
            .find(|o| {
                o.unit == output.unit
                    && o.message_index == output.message_index
                    && o.output_index == output.output_index
            })
            .map(|o| ResolvedOutput {
                address: o.address.clone(),
                amount: o.amount,
            }))
    }

    async fn query_unit_mci(&self, unit: &str, last_ball_mci: u64) -> Result<Option<u64>, QueryError> {
        self.check_available()?;
        Ok(self.unit_mcis.get(unit).copied().filter(|&mci| mci <= last_ball_mci))
    }
}
