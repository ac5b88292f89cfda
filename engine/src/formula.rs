// SPDX-License-Identifier: Apache-2.0
//! Seam to the embedded formula language.

use async_trait::async_trait;
use definition_core::Message;
use serde_json::Value;
use thiserror::Error;

use crate::ledger::QueryError;

/// Complexity and op counters handed to the formula validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormulaBudget {
    pub complexity: u32,
    pub count_ops: u32,
}

/// Result of validating a formula: the counters after it, and an error if
/// the formula is not acceptable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormulaCheck {
    pub error: Option<String>,
    pub complexity: u32,
    pub count_ops: u32,
}

pub struct FormulaRequest<'a> {
    pub formula: &'a str,
    /// Messages of the enclosing unit, inputs resolved.
    pub messages: &'a [Message],
    pub trigger: Option<&'a Value>,
    pub address: Option<&'a str>,
    pub last_ball_mci: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FormulaValue {
    Bool(bool),
    Text(String),
    Number(f64),
}

impl FormulaValue {
    /// Non-zero numbers and non-empty strings are true.
    pub fn is_truthy(&self) -> bool {
        match self {
            FormulaValue::Bool(b) => *b,
            FormulaValue::Text(s) => !s.is_empty(),
            FormulaValue::Number(n) => *n != 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    /// The formula itself failed; the node evaluates to false.
    #[error("formula evaluation failed: {0}")]
    Evaluation(String),
    #[error(transparent)]
    Query(#[from] QueryError),
}

#[async_trait]
pub trait FormulaEvaluator: Send + Sync {
    fn validate(&self, formula: &str, budget: FormulaBudget) -> FormulaCheck;

    async fn evaluate(&self, request: FormulaRequest<'_>) -> Result<FormulaValue, FormulaError>;
}

/// Collaborator for deployments without a formula language: every formula
/// is rejected at validation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoFormulas;

#[async_trait]
impl FormulaEvaluator for NoFormulas {
    fn validate(&self, _formula: &str, budget: FormulaBudget) -> FormulaCheck {
        FormulaCheck {
            error: Some("formula support is not configured".to_owned()),
            complexity: budget.complexity,
            count_ops: budget.count_ops,
        }
    }

    async fn evaluate(&self, _request: FormulaRequest<'_>) -> Result<FormulaValue, FormulaError> {
        Err(FormulaError::Evaluation("formula support is not configured".to_owned()))
    }
}
