// SPDX-License-Identifier: Apache-2.0
//! Validation and evaluation of address and asset definitions.
//!
//! A definition is a tree of spending conditions (see
//! [`definition_core::Expr`]). [`Engine::validate_definition`] checks that a
//! tree is well formed for where it is used and cheap enough to evaluate;
//! [`Engine::validate_authentifiers`] decides whether a unit together with
//! its signatures and proofs satisfies it.
//!
//! Chain state is read through the [`Ledger`] trait, as of the
//! `last_ball_mci` of the [`ValidationContext`], so every node reaches the
//! same verdict. Query failures are returned as
//! [`DefinitionError::Query`] and never turn into a negative answer.

use std::collections::BTreeMap;

use definition_core::{Expr, Secp256k1Verifier, SignatureVerifier, Unit};

pub mod config;
pub mod context;
pub mod error;
mod evaluator;
pub mod filter;
pub mod formula;
pub mod ledger;
pub mod memory;
mod references;
pub mod resolve;
pub mod template;
mod validator;

pub use config::UpgradeSchedule;
pub use context::ValidationContext;
pub use error::{DefinitionError, FatalError, TemplateError};
pub use formula::{
    FormulaBudget, FormulaCheck, FormulaError, FormulaEvaluator, FormulaRequest, FormulaValue,
    NoFormulas,
};
pub use ledger::{DataFeedQuery, DefinitionLookup, Ledger, OutputRef, QueryError, ResolvedOutput};
pub use memory::MemoryLedger;
pub use references::has_references;

use evaluator::Evaluator;
use validator::Validator;

/// Entry point bundling the collaborators a definition is judged with.
#[derive(Clone, Copy)]
pub struct Engine<'a> {
    ledger: &'a dyn Ledger,
    formulas: &'a dyn FormulaEvaluator,
    signatures: &'a dyn SignatureVerifier,
}

impl<'a> Engine<'a> {
    /// secp256k1 signatures, no formula language.
    pub fn new(ledger: &'a dyn Ledger) -> Self {
        Self {
            ledger,
            formulas: &NoFormulas,
            signatures: &Secp256k1Verifier,
        }
    }

    #[must_use]
    pub fn with_formulas(mut self, formulas: &'a dyn FormulaEvaluator) -> Self {
        self.formulas = formulas;
        self
    }

    #[must_use]
    pub fn with_signature_verifier(mut self, signatures: &'a dyn SignatureVerifier) -> Self {
        self.signatures = signatures;
        self
    }

    /// Checks `definition` without looking at any authentifier.
    ///
    /// `signing_paths` are the authentifier paths that will accompany the
    /// definition, when known; nested addresses outside them are not
    /// resolved. Address definitions (`is_asset == false`) must guarantee a
    /// signature on every satisfying branch.
    pub async fn validate_definition(
        &self,
        definition: &Expr,
        unit: &Unit,
        ctx: &ValidationContext,
        signing_paths: Option<&[String]>,
        is_asset: bool,
    ) -> Result<(), DefinitionError> {
        Validator::new(self.ledger, self.formulas, unit, ctx, signing_paths, is_asset)
            .validate(definition)
            .await
    }

    /// Validates `definition` again, then evaluates it against `unit`.
    ///
    /// Address mode passes `address` and `authentifiers`; asset mode passes
    /// `this_asset` and no authentifiers. Every supplied authentifier must be
    /// consumed, and any failed signature, hash or Merkle proof fails the
    /// call even when the tree would otherwise be satisfied.
    pub async fn validate_authentifiers(
        &self,
        address: Option<&str>,
        this_asset: Option<&str>,
        definition: &Expr,
        unit: &Unit,
        ctx: &ValidationContext,
        authentifiers: Option<&BTreeMap<String, String>>,
    ) -> Result<bool, DefinitionError> {
        let is_asset = authentifiers.is_none();
        let mode_matches = if is_asset {
            address.is_none() && this_asset.is_some()
        } else {
            address.is_some() && this_asset.is_none()
        };
        if !mode_matches {
            return Err(DefinitionError::Invalid("incompatible params".to_owned()));
        }
        let signing_paths: Option<Vec<String>> = authentifiers.map(|a| a.keys().cloned().collect());
        self.validate_definition(definition, unit, ctx, signing_paths.as_deref(), is_asset)
            .await?;
        Evaluator::new(
            self.ledger,
            self.formulas,
            self.signatures,
            unit,
            ctx,
            address,
            this_asset,
            authentifiers,
            signing_paths.as_deref(),
        )
        .evaluate(definition)
        .await
    }
}
