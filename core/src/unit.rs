// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::expr::Expr;

/// Kind of a payment input. Absent on the wire means `Transfer`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    Transfer,
    Issue,
    HeadersCommission,
    Witnessing,
}

impl InputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InputKind::Transfer => "transfer",
            InputKind::Issue => "issue",
            InputKind::HeadersCommission => "headers_commission",
            InputKind::Witnessing => "witnessing",
        }
    }

    /// Commission inputs carry no address/amount and are invisible to filters.
    pub fn is_commission(self) -> bool {
        matches!(self, InputKind::HeadersCommission | InputKind::Witnessing)
    }
}

/// A payment input. `amount`/`address` are only known for transfers after
/// the unit has been augmented against the outputs it spends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<InputKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Input {
    pub fn kind(&self) -> InputKind {
        self.kind.unwrap_or(InputKind::Transfer)
    }

    /// Input spending output `output_index` of message `message_index` in `unit`.
    pub fn transfer(unit: impl Into<String>, message_index: u32, output_index: u32) -> Self {
        Self {
            unit: Some(unit.into()),
            message_index: Some(message_index),
            output_index: Some(output_index),
            ..Self::default()
        }
    }

    /// Issue input; the address defaults to the first author when absent.
    pub fn issue(amount: u64, serial_number: u64) -> Self {
        Self {
            kind: Some(InputKind::Issue),
            serial_number: Some(serial_number),
            amount: Some(amount),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub address: String,
    pub amount: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPayload {
    /// `None` is the base currency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionChange {
    /// Defaults to the first author when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub definition_chash: String,
}

/// One message of a unit, tagged by its `app`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "app", content = "payload", rename_all = "snake_case")]
pub enum Message {
    Payment(PaymentPayload),
    AddressDefinitionChange(DefinitionChange),
    DefinitionTemplate(Value),
    DataFeed(BTreeMap<String, Value>),
    Data(Value),
    Text(String),
}

impl Message {
    pub fn as_payment(&self) -> Option<&PaymentPayload> {
        match self {
            Message::Payment(p) => Some(p),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub address: String,
    /// Present when the author reveals its definition in this unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Expr>,
    #[serde(default)]
    pub authentifiers: BTreeMap<String, String>,
}

impl Author {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            definition: None,
            authentifiers: BTreeMap::new(),
        }
    }
}

/// The enclosing transaction a definition is evaluated against.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub authors: Vec<Author>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Unit {
    pub fn first_author(&self) -> Option<&str> {
        self.authors.first().map(|a| a.address.as_str())
    }

    pub fn is_authored_by(&self, address: &str) -> bool {
        self.authors.iter().any(|a| a.address == address)
    }
}
