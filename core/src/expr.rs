// SPDX-License-Identifier: Apache-2.0
//! The definition tree.
//!
//! A definition is a nested `[op, args]` JSON array. [`Expr`] is its typed
//! form: one variant per operator, so anything that made it past
//! [`Expr::try_from`] has a known operator and well-shaped arguments. Checks
//! that depend on *where* the tree is used (asset conditions, negation,
//! protocol upgrades, complexity) are left to the validator.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use thiserror::Error;

use crate::unit::InputKind;

/// Failure at the parse boundary. The display strings are part of the
/// consensus surface and must stay stable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("unknown op: {0}")]
    UnknownOp(String),
    #[error("{0}")]
    Malformed(String),
}

/*───────────────────────────────────────────────────────────────────────────*
 * Argument types                                                           *
 *───────────────────────────────────────────────────────────────────────────*/

/// Comparison operator used by `mci`, `age`, `timestamp` and data feeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relation {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl Relation {
    pub const ALL: [Relation; 6] = [
        Relation::Eq,
        Relation::Ne,
        Relation::Gt,
        Relation::Ge,
        Relation::Lt,
        Relation::Le,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Relation::Eq => "=",
            Relation::Ne => "!=",
            Relation::Gt => ">",
            Relation::Ge => ">=",
            Relation::Lt => "<",
            Relation::Le => "<=",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == s)
    }

    /// Evaluates `left <relation> right`.
    pub fn holds<T: PartialOrd + ?Sized>(self, left: &T, right: &T) -> bool {
        match self {
            Relation::Eq => left == right,
            Relation::Ne => left != right,
            Relation::Gt => left > right,
            Relation::Ge => left >= right,
            Relation::Lt => left < right,
            Relation::Le => left <= right,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value posted by an oracle, or compared against one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedValue {
    Number(Number),
    Text(String),
}

impl FeedValue {
    pub fn is_integer(&self) -> bool {
        match self {
            FeedValue::Number(n) => n.is_i64() || n.is_u64(),
            FeedValue::Text(_) => false,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            FeedValue::Number(n) => Value::Number(n.clone()),
            FeedValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for FeedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedValue::Number(n) => write!(f, "{n}"),
            FeedValue::Text(s) => f.write_str(s),
        }
    }
}

/// One member of a `weighted and` set.
#[derive(Clone, Debug, PartialEq)]
pub struct Weighted {
    pub value: Expr,
    pub weight: u64,
}

/// An address argument that may point back at the evaluated address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubjectRef {
    ThisAddress,
    Address(String),
}

impl SubjectRef {
    /// Resolves `this address` against the address under evaluation.
    pub fn resolve<'a>(&'a self, this_address: Option<&'a str>) -> Option<&'a str> {
        match self {
            SubjectRef::ThisAddress => this_address,
            SubjectRef::Address(a) => Some(a),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            SubjectRef::ThisAddress => Value::from("this address"),
            SubjectRef::Address(a) => Value::from(a.as_str()),
        }
    }
}

/// The new definition chash expected by a definition-change predicate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChashRef {
    Any,
    ThisAddress,
    Chash(String),
}

impl ChashRef {
    fn to_value(&self) -> Value {
        match self {
            ChashRef::Any => Value::from("any"),
            ChashRef::ThisAddress => Value::from("this address"),
            ChashRef::Chash(c) => Value::from(c.as_str()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterTarget {
    Input,
    Output,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssetSelector {
    Base,
    ThisAsset,
    Asset(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressSelector {
    ThisAddress,
    OtherAddress,
    Address(String),
}

/// Search criteria over the payment messages of a unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub what: FilterTarget,
    pub asset: Option<AssetSelector>,
    /// Input type; only ever `Issue` or `Transfer`.
    pub kind: Option<InputKind>,
    pub own_funds: Option<bool>,
    pub address: Option<AddressSelector>,
    pub amount: Option<u64>,
    pub amount_at_least: Option<u64>,
    pub amount_at_most: Option<u64>,
}

impl Filter {
    pub fn targets_inputs(&self) -> bool {
        self.what == FilterTarget::Input
    }

    pub fn restricts_amount(&self) -> bool {
        self.amount.is_some() || self.amount_at_least.is_some() || self.amount_at_most.is_some()
    }

    /// The explicit asset id this filter selects, if any.
    pub fn asset_id(&self) -> Option<&str> {
        match &self.asset {
            Some(AssetSelector::Asset(id)) => Some(id),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        let mut obj = Map::new();
        let what = match self.what {
            FilterTarget::Input => "input",
            FilterTarget::Output => "output",
        };
        obj.insert("what".into(), what.into());
        if let Some(asset) = &self.asset {
            let asset = match asset {
                AssetSelector::Base => "base",
                AssetSelector::ThisAsset => "this asset",
                AssetSelector::Asset(id) => id.as_str(),
            };
            obj.insert("asset".into(), asset.into());
        }
        if let Some(kind) = self.kind {
            obj.insert("type".into(), kind.as_str().into());
        }
        if let Some(own) = self.own_funds {
            obj.insert("own_funds".into(), own.into());
        }
        if let Some(address) = &self.address {
            let address = match address {
                AddressSelector::ThisAddress => "this address",
                AddressSelector::OtherAddress => "other address",
                AddressSelector::Address(a) => a.as_str(),
            };
            obj.insert("address".into(), address.into());
        }
        if let Some(v) = self.amount {
            obj.insert("amount".into(), v.into());
        }
        if let Some(v) = self.amount_at_least {
            obj.insert("amount_at_least".into(), v.into());
        }
        if let Some(v) = self.amount_at_most {
            obj.insert("amount_at_most".into(), v.into());
        }
        Value::Object(obj)
    }
}

/// Field compared across the two result lists of `has equal`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EqualField {
    Asset,
    Address,
    Amount,
    Type,
}

impl EqualField {
    pub fn as_str(self) -> &'static str {
        match self {
            EqualField::Asset => "asset",
            EqualField::Address => "address",
            EqualField::Amount => "amount",
            EqualField::Type => "type",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asset" => Some(EqualField::Asset),
            "address" => Some(EqualField::Address),
            "amount" => Some(EqualField::Amount),
            "type" => Some(EqualField::Type),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EqualSearch {
    pub equal_fields: Vec<EqualField>,
    pub search_criteria: [Filter; 2],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SumCondition {
    pub filter: Filter,
    pub equals: Option<u64>,
    pub at_least: Option<u64>,
    pub at_most: Option<u64>,
}

impl SumCondition {
    pub fn accepts(&self, sum: u64) -> bool {
        if let Some(equals) = self.equals {
            return sum == equals;
        }
        self.at_least.map_or(true, |min| sum >= min) && self.at_most.map_or(true, |max| sum <= max)
    }
}

/*───────────────────────────────────────────────────────────────────────────*
 * The tree                                                                 *
 *───────────────────────────────────────────────────────────────────────────*/

/// A parsed definition. Serializes to, and parses from, the canonical
/// `[op, args]` array form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    ROfSet {
        required: u64,
        set: Vec<Expr>,
    },
    WeightedAnd {
        required: u64,
        set: Vec<Weighted>,
    },
    Sig {
        pubkey: String,
    },
    Hash {
        hash: String,
    },
    Address(String),
    DefinitionTemplate {
        unit: String,
        params: Map<String, Value>,
    },
    SeenAddress(String),
    SeenDefinitionChange {
        address: SubjectRef,
        definition_chash: ChashRef,
    },
    HasDefinitionChange {
        address: SubjectRef,
        definition_chash: ChashRef,
    },
    Attested {
        address: SubjectRef,
        attestors: Vec<String>,
    },
    CosignedBy(String),
    Not(Box<Expr>),
    InDataFeed {
        oracles: Vec<String>,
        feed_name: String,
        relation: Relation,
        value: FeedValue,
        min_mci: Option<u64>,
    },
    InMerkle {
        oracles: Vec<String>,
        feed_name: String,
        element: String,
        min_mci: Option<u64>,
    },
    Mci {
        relation: Relation,
        value: u64,
    },
    Age {
        relation: Relation,
        value: u64,
    },
    Timestamp {
        relation: Relation,
        value: u64,
    },
    Has(Filter),
    HasOne(Filter),
    HasEqual(EqualSearch),
    HasOneEqual(EqualSearch),
    Sum(SumCondition),
    Formula(String),
}

impl Expr {
    /// The operator tag as it appears on the wire.
    pub fn op(&self) -> &'static str {
        match self {
            Expr::Or(_) => "or",
            Expr::And(_) => "and",
            Expr::ROfSet { .. } => "r of set",
            Expr::WeightedAnd { .. } => "weighted and",
            Expr::Sig { .. } => "sig",
            Expr::Hash { .. } => "hash",
            Expr::Address(_) => "address",
            Expr::DefinitionTemplate { .. } => "definition template",
            Expr::SeenAddress(_) => "seen address",
            Expr::SeenDefinitionChange { .. } => "seen definition change",
            Expr::HasDefinitionChange { .. } => "has definition change",
            Expr::Attested { .. } => "attested",
            Expr::CosignedBy(_) => "cosigned by",
            Expr::Not(_) => "not",
            Expr::InDataFeed { .. } => "in data feed",
            Expr::InMerkle { .. } => "in merkle",
            Expr::Mci { .. } => "mci",
            Expr::Age { .. } => "age",
            Expr::Timestamp { .. } => "timestamp",
            Expr::Has(_) => "has",
            Expr::HasOne(_) => "has one",
            Expr::HasEqual(_) => "has equal",
            Expr::HasOneEqual(_) => "has one equal",
            Expr::Sum(_) => "sum",
            Expr::Formula(_) => "formula",
        }
    }

    /// Converts the tree back into its `[op, args]` JSON form.
    pub fn to_value(&self) -> Value {
        let args = match self {
            Expr::Or(items) | Expr::And(items) => {
                Value::Array(items.iter().map(Expr::to_value).collect())
            }
            Expr::ROfSet { required, set } => json!({
                "required": required,
                "set": set.iter().map(Expr::to_value).collect::<Vec<_>>(),
            }),
            Expr::WeightedAnd { required, set } => json!({
                "required": required,
                "set": set
                    .iter()
                    .map(|w| json!({ "value": w.value.to_value(), "weight": w.weight }))
                    .collect::<Vec<_>>(),
            }),
            Expr::Sig { pubkey } => json!({ "pubkey": pubkey }),
            Expr::Hash { hash } => json!({ "hash": hash }),
            Expr::Address(a) | Expr::SeenAddress(a) | Expr::CosignedBy(a) => Value::from(a.as_str()),
            Expr::DefinitionTemplate { unit, params } => {
                json!([unit, Value::Object(params.clone())])
            }
            Expr::SeenDefinitionChange {
                address,
                definition_chash,
            }
            | Expr::HasDefinitionChange {
                address,
                definition_chash,
            } => json!([address.to_value(), definition_chash.to_value()]),
            Expr::Attested { address, attestors } => json!([address.to_value(), attestors]),
            Expr::Not(inner) => inner.to_value(),
            Expr::InDataFeed {
                oracles,
                feed_name,
                relation,
                value,
                min_mci,
            } => {
                let mut args = vec![
                    json!(oracles),
                    json!(feed_name),
                    json!(relation.as_str()),
                    value.to_value(),
                ];
                if let Some(mci) = min_mci {
                    args.push(json!(mci));
                }
                Value::Array(args)
            }
            Expr::InMerkle {
                oracles,
                feed_name,
                element,
                min_mci,
            } => {
                let mut args = vec![json!(oracles), json!(feed_name), json!(element)];
                if let Some(mci) = min_mci {
                    args.push(json!(mci));
                }
                Value::Array(args)
            }
            Expr::Mci { relation, value }
            | Expr::Age { relation, value }
            | Expr::Timestamp { relation, value } => json!([relation.as_str(), value]),
            Expr::Has(filter) | Expr::HasOne(filter) => filter.to_value(),
            Expr::HasEqual(search) | Expr::HasOneEqual(search) => json!({
                "equal_fields": search.equal_fields.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
                "search_criteria": [
                    search.search_criteria[0].to_value(),
                    search.search_criteria[1].to_value(),
                ],
            }),
            Expr::Sum(cond) => {
                let mut obj = Map::new();
                obj.insert("filter".into(), cond.filter.to_value());
                if let Some(v) = cond.equals {
                    obj.insert("equals".into(), v.into());
                }
                if let Some(v) = cond.at_least {
                    obj.insert("at_least".into(), v.into());
                }
                if let Some(v) = cond.at_most {
                    obj.insert("at_most".into(), v.into());
                }
                Value::Object(obj)
            }
            Expr::Formula(src) => Value::from(src.as_str()),
        };
        json!([self.op(), args])
    }
}

impl TryFrom<Value> for Expr {
    type Error = ExprError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        crate::parse::parse_expr(&value)
    }
}

impl TryFrom<&Value> for Expr {
    type Error = ExprError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        crate::parse::parse_expr(value)
    }
}

impl From<Expr> for Value {
    fn from(expr: Expr) -> Self {
        expr.to_value()
    }
}

impl FromStr for Expr {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value = serde_json::from_str(s)
            .map_err(|e| ExprError::Malformed(format!("definition is not valid JSON: {e}")))?;
        Expr::try_from(value)
    }
}
