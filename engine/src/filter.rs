// SPDX-License-Identifier: Apache-2.0
//! Declarative filters over a unit's own payment messages, and the
//! augmentation that makes transfer inputs filterable.

use definition_core::{
    AddressSelector, AssetSelector, EqualField, EqualSearch, Filter, FilterTarget, InputKind,
    Message, SumCondition, Unit,
};
use tracing::debug;

use crate::ledger::{Ledger, OutputRef, QueryError};

/// Who "this address" and "this asset" refer to while filtering.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilterScope<'a> {
    pub address: Option<&'a str>,
    pub this_asset: Option<&'a str>,
}

impl FilterScope<'_> {
    fn is_this_address(&self, address: Option<&str>) -> bool {
        matches!((address, self.address), (Some(a), Some(b)) if a == b)
    }
}

/// One input or output that passed a filter, reduced to the fields
/// filters can compare.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// `None` is the base currency.
    pub asset: Option<String>,
    pub address: Option<String>,
    pub amount: Option<u64>,
    /// Always `None` for outputs.
    pub kind: Option<InputKind>,
}

impl Record {
    fn same(&self, other: &Record, field: EqualField) -> bool {
        match field {
            EqualField::Asset => self.asset == other.asset,
            EqualField::Address => self.address == other.address,
            EqualField::Amount => self.amount == other.amount,
            EqualField::Type => self.kind == other.kind,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    /// At least one match.
    Has,
    /// Exactly one match.
    HasOne,
}

/*───────────────────────────────────────────────────────────────────────────*
 * Augmentation                                                             *
 *───────────────────────────────────────────────────────────────────────────*/

/// Copies the unit's messages and resolves every transfer input against the
/// output it spends, attaching that output's `address` and `amount`. Issue
/// inputs without an address are attributed to the first author. The unit
/// itself is left untouched.
pub async fn augment(ledger: &dyn Ledger, unit: &Unit) -> Result<Vec<Message>, QueryError> {
    let mut messages = unit.messages.clone();
    let first_author = unit.first_author();
    for message in &mut messages {
        let Message::Payment(payment) = message else {
            continue;
        };
        for input in &mut payment.inputs {
            match input.kind() {
                InputKind::Issue => {
                    if input.address.is_none() {
                        input.address = first_author.map(str::to_owned);
                    }
                }
                InputKind::Transfer => {
                    input.kind = Some(InputKind::Transfer);
                    let (Some(src_unit), Some(message_index), Some(output_index)) =
                        (input.unit.as_deref(), input.message_index, input.output_index)
                    else {
                        continue;
                    };
                    let output = OutputRef {
                        unit: src_unit,
                        message_index,
                        output_index,
                    };
                    match ledger.query_output(output).await? {
                        Some(resolved) => {
                            input.amount = Some(resolved.amount);
                            input.address = Some(resolved.address);
                        }
                        None => debug!(
                            unit = src_unit,
                            message_index, output_index, "spent output not found"
                        ),
                    }
                }
                InputKind::HeadersCommission | InputKind::Witnessing => {}
            }
        }
    }
    debug!(messages = messages.len(), "augmented unit messages");
    Ok(messages)
}

/*───────────────────────────────────────────────────────────────────────────*
 * Matching                                                                 *
 *───────────────────────────────────────────────────────────────────────────*/

fn asset_matches(selector: Option<&AssetSelector>, asset: Option<&str>, this_asset: Option<&str>) -> bool {
    match selector {
        None => true,
        Some(AssetSelector::Base) => asset.is_none(),
        Some(AssetSelector::ThisAsset) => asset.is_some() && asset == this_asset,
        Some(AssetSelector::Asset(id)) => asset == Some(id.as_str()),
    }
}

fn address_matches(selector: Option<&AddressSelector>, address: Option<&str>, scope: &FilterScope<'_>) -> bool {
    match selector {
        None => true,
        Some(AddressSelector::ThisAddress) => scope.is_this_address(address),
        Some(AddressSelector::OtherAddress) => !scope.is_this_address(address),
        Some(AddressSelector::Address(a)) => address == Some(a.as_str()),
    }
}

fn amount_matches(filter: &Filter, amount: Option<u64>) -> bool {
    if !filter.restricts_amount() {
        return true;
    }
    let Some(amount) = amount else {
        return false;
    };
    filter.amount.map_or(true, |v| amount == v)
        && filter.amount_at_least.map_or(true, |v| amount >= v)
        && filter.amount_at_most.map_or(true, |v| amount <= v)
}

/// Every input or output of `messages` selected by `filter`, in message
/// order.
pub fn find_matches(filter: &Filter, messages: &[Message], scope: &FilterScope<'_>) -> Vec<Record> {
    let mut found = Vec::new();
    for payment in messages.iter().filter_map(Message::as_payment) {
        if !asset_matches(filter.asset.as_ref(), payment.asset.as_deref(), scope.this_asset) {
            continue;
        }
        match filter.what {
            FilterTarget::Input => {
                for input in &payment.inputs {
                    let kind = input.kind();
                    if kind.is_commission() {
                        continue;
                    }
                    if filter.kind.is_some_and(|k| k != kind) {
                        continue;
                    }
                    let address = input.address.as_deref();
                    if let Some(own_funds) = filter.own_funds {
                        if own_funds != scope.is_this_address(address) {
                            continue;
                        }
                    }
                    if !address_matches(filter.address.as_ref(), address, scope)
                        || !amount_matches(filter, input.amount)
                    {
                        continue;
                    }
                    found.push(Record {
                        asset: payment.asset.clone(),
                        address: input.address.clone(),
                        amount: input.amount,
                        kind: Some(kind),
                    });
                }
            }
            FilterTarget::Output => {
                for output in &payment.outputs {
                    if !address_matches(filter.address.as_ref(), Some(&output.address), scope)
                        || !amount_matches(filter, Some(output.amount))
                    {
                        continue;
                    }
                    found.push(Record {
                        asset: payment.asset.clone(),
                        address: Some(output.address.clone()),
                        amount: Some(output.amount),
                        kind: None,
                    });
                }
            }
        }
    }
    found
}

/// `has` / `has one`: the verdict and the matches it was based on.
pub fn evaluate_filter(
    kind: FilterKind,
    filter: &Filter,
    messages: &[Message],
    scope: &FilterScope<'_>,
) -> (bool, Vec<Record>) {
    let matches = find_matches(filter, messages, scope);
    let ok = match kind {
        FilterKind::Has => !matches.is_empty(),
        FilterKind::HasOne => matches.len() == 1,
    };
    (ok, matches)
}

/// Number of (first, second) pairs agreeing on every field of `fields`.
pub fn count_equal_pairs(fields: &[EqualField], first: &[Record], second: &[Record]) -> usize {
    first
        .iter()
        .flat_map(|a| second.iter().map(move |b| (a, b)))
        .filter(|(a, b)| fields.iter().all(|f| a.same(b, *f)))
        .count()
}

/// `has equal` (any pair) / `has one equal` (exactly one pair).
pub fn evaluate_equal(
    kind: FilterKind,
    search: &EqualSearch,
    messages: &[Message],
    scope: &FilterScope<'_>,
) -> bool {
    let first = find_matches(&search.search_criteria[0], messages, scope);
    if first.is_empty() {
        return false;
    }
    let second = find_matches(&search.search_criteria[1], messages, scope);
    if second.is_empty() {
        return false;
    }
    let pairs = count_equal_pairs(&search.equal_fields, &first, &second);
    match kind {
        FilterKind::Has => pairs > 0,
        FilterKind::HasOne => pairs == 1,
    }
}

/// `sum`: total amount of all matches (zero when nothing matches) against
/// the condition's bounds.
pub fn evaluate_sum(cond: &SumCondition, messages: &[Message], scope: &FilterScope<'_>) -> bool {
    let total = find_matches(&cond.filter, messages, scope)
        .iter()
        .filter_map(|r| r.amount)
        .fold(0u64, u64::saturating_add);
    cond.accepts(total)
}
