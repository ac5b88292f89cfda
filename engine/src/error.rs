// SPDX-License-Identifier: Apache-2.0
//! Error types for definition validation and authentifier evaluation.
//!
//! Three classes are kept apart: deterministic structural failures (the same
//! tree and context always produce the same message), fatal cryptographic
//! failures tied to a tree path, and query-layer failures, which are the only
//! retryable kind.

use definition_core::ExprError;
use thiserror::Error;

use crate::ledger::QueryError;

/// Failure while filling a definition template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// A `$name` placeholder has no matching parameter.
    #[error("variable {name} not specified")]
    MissingVariable {
        /// Placeholder name without the leading `$`.
        name: String,
    },

    /// The template holds a value that cannot appear in a definition.
    #[error("unsupported template value type: {kind}")]
    UnsupportedValueType {
        /// JSON type of the offending value.
        kind: &'static str,
    },
}

/// A supplied proof failed its cryptographic check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalError {
    #[error("bad signature at path {path}")]
    BadSignature { path: String },

    #[error("bad hash at path {path}")]
    BadHash { path: String },

    #[error("bad merkle proof at path {path}")]
    BadMerkleProof { path: String },
}

impl FatalError {
    pub fn path(&self) -> &str {
        match self {
            FatalError::BadSignature { path }
            | FatalError::BadHash { path }
            | FatalError::BadMerkleProof { path } => path,
        }
    }
}

/// Everything that can go wrong validating a definition or evaluating its
/// authentifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// Bad shape, illegal operator in this context, upgrade not yet active.
    #[error("{0}")]
    Invalid(String),

    #[error("complexity exceeded at {path}")]
    ComplexityExceeded { path: String },

    #[error("number of ops exceeded at {path}")]
    TooManyOps { path: String },

    /// An address definition has a branch that needs no signature.
    #[error("each branch must have a signature")]
    MissingSignature,

    #[error("template: {0}")]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Fatal(#[from] FatalError),

    #[error("some authentifiers are not used, used={used:?}, passed={passed:?}")]
    UnusedAuthentifiers {
        used: Vec<String>,
        passed: Vec<String>,
    },

    /// The query layer failed; the verdict is unknown, not negative.
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl DefinitionError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }

    /// Only query-layer failures may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Query(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<ExprError> for DefinitionError {
    fn from(err: ExprError) -> Self {
        Self::Invalid(err.to_string())
    }
}
