// SPDX-License-Identifier: Apache-2.0
//! Authentifier evaluator: computes whether a validated definition is
//! satisfied by a unit and the proofs supplied with it.

use std::collections::{BTreeMap, BTreeSet};

use definition_core::constants::ROOT_PATH;
use definition_core::{
    sha256_b64, verify_merkle_proof, ChashRef, Expr, FeedValue, InputKind, Message, MerkleProof,
    Relation, SignatureVerifier, Unit,
};
use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::context::ValidationContext;
use crate::error::{DefinitionError, FatalError};
use crate::filter::{augment, evaluate_equal, evaluate_filter, evaluate_sum, FilterKind, FilterScope};
use crate::formula::{FormulaError, FormulaEvaluator, FormulaRequest};
use crate::ledger::{DataFeedQuery, Ledger, QueryError};
use crate::resolve::{load_template, needs_nested_evaluation, resolve_inner_definition};
use crate::validator::child_path;

/// Mutable state of one evaluation call.
#[derive(Debug, Default)]
pub(crate) struct EvalState {
    used_paths: BTreeSet<String>,
    /// First cryptographic failure; later ones are ignored.
    fatal: Option<FatalError>,
    /// Unit messages with transfer inputs resolved, computed on first use.
    augmented: Option<Vec<Message>>,
}

pub(crate) struct Evaluator<'a> {
    ledger: &'a dyn Ledger,
    formulas: &'a dyn FormulaEvaluator,
    signatures: &'a dyn SignatureVerifier,
    unit: &'a Unit,
    ctx: &'a ValidationContext,
    address: Option<&'a str>,
    this_asset: Option<&'a str>,
    authentifiers: Option<&'a BTreeMap<String, String>>,
    signing_paths: Option<&'a [String]>,
    state: EvalState,
}

impl<'a> Evaluator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        ledger: &'a dyn Ledger,
        formulas: &'a dyn FormulaEvaluator,
        signatures: &'a dyn SignatureVerifier,
        unit: &'a Unit,
        ctx: &'a ValidationContext,
        address: Option<&'a str>,
        this_asset: Option<&'a str>,
        authentifiers: Option<&'a BTreeMap<String, String>>,
        signing_paths: Option<&'a [String]>,
    ) -> Self {
        Self {
            ledger,
            formulas,
            signatures,
            unit,
            ctx,
            address,
            this_asset,
            authentifiers,
            signing_paths,
            state: EvalState::default(),
        }
    }

    pub(crate) async fn evaluate(mut self, expr: &Expr) -> Result<bool, DefinitionError> {
        let satisfied = self.eval(expr, ROOT_PATH.to_owned()).await?;
        if let Some(fatal) = self.state.fatal {
            return Err(fatal.into());
        }
        if let Some(authentifiers) = self.authentifiers {
            if !authentifiers.keys().eq(self.state.used_paths.iter()) {
                let used: Vec<String> = self.state.used_paths.into_iter().collect();
                let passed: Vec<String> = authentifiers.keys().cloned().collect();
                warn!(?used, ?passed, "some authentifiers are not used");
                return Err(DefinitionError::UnusedAuthentifiers { used, passed });
            }
        }
        debug!(satisfied, address = ?self.address, "authentifiers evaluated");
        Ok(satisfied)
    }

    /// Non-empty authentifier supplied for `path`.
    fn authentifier(&self, path: &str) -> Option<&'a str> {
        self.authentifiers?
            .get(path)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    fn fail(&mut self, fatal: FatalError) {
        warn!(path = fatal.path(), error = %fatal, "cryptographic check failed");
        if self.state.fatal.is_none() {
            self.state.fatal = Some(fatal);
        }
    }

    fn scope(&self) -> FilterScope<'a> {
        FilterScope {
            address: self.address,
            this_asset: self.this_asset,
        }
    }

    async fn prepare_messages(&mut self, needs_inputs: bool) -> Result<(), QueryError> {
        if needs_inputs && self.state.augmented.is_none() {
            self.state.augmented = Some(augment(self.ledger, self.unit).await?);
        }
        Ok(())
    }

    /// Augmented messages when they were prepared, the raw ones otherwise.
    fn messages(&self, needs_inputs: bool) -> &[Message] {
        match &self.state.augmented {
            Some(augmented) if needs_inputs => augmented,
            _ => &self.unit.messages,
        }
    }

    fn eval<'s>(&'s mut self, expr: &'s Expr, path: String) -> BoxFuture<'s, Result<bool, DefinitionError>> {
        Box::pin(async move {
            let last_ball_mci = self.ctx.last_ball_mci;
            match expr {
                // every branch is evaluated so no bad proof goes unchecked
                Expr::Or(set) => {
                    let mut any = false;
                    for (i, child) in set.iter().enumerate() {
                        any |= self.eval(child, child_path(&path, i)).await?;
                    }
                    Ok(any)
                }
                Expr::And(set) => {
                    let mut all = true;
                    for (i, child) in set.iter().enumerate() {
                        all &= self.eval(child, child_path(&path, i)).await?;
                    }
                    Ok(all)
                }
                Expr::ROfSet { required, set } => {
                    let mut satisfied = 0u64;
                    for (i, child) in set.iter().enumerate() {
                        if self.eval(child, child_path(&path, i)).await? {
                            satisfied += 1;
                        }
                    }
                    Ok(satisfied >= *required)
                }
                Expr::WeightedAnd { required, set } => {
                    let mut weight = 0u64;
                    for (i, member) in set.iter().enumerate() {
                        if self.eval(&member.value, child_path(&path, i)).await? {
                            weight = weight.saturating_add(member.weight);
                        }
                    }
                    Ok(weight >= *required)
                }
                Expr::Sig { pubkey } => {
                    let Some(signature) = self.authentifier(&path) else {
                        return Ok(false);
                    };
                    self.state.used_paths.insert(path.clone());
                    if self.ctx.unsigned && signature.bytes().all(|b| b == b'-') {
                        return Ok(true);
                    }
                    if self.signatures.verify(&self.ctx.unit_hash_to_sign, signature, pubkey) {
                        return Ok(true);
                    }
                    self.fail(FatalError::BadSignature { path });
                    Ok(false)
                }
                Expr::Hash { hash } => {
                    let Some(preimage) = self.authentifier(&path) else {
                        return Ok(false);
                    };
                    self.state.used_paths.insert(path.clone());
                    if sha256_b64(preimage) == *hash {
                        return Ok(true);
                    }
                    self.fail(FatalError::BadHash { path });
                    Ok(false)
                }
                Expr::Address(address) => {
                    if !needs_nested_evaluation(self.signing_paths, &path, self.ctx) {
                        debug!(address = %address, path = %path, "nested address not signed, skipped");
                        return Ok(false);
                    }
                    let Some(inner) = resolve_inner_definition(self.ledger, self.unit, address, last_ball_mci).await?
                    else {
                        return Ok(false);
                    };
                    let satisfied = self.eval(&inner, path).await?;
                    Ok(satisfied)
                }
                Expr::DefinitionTemplate { unit, params } => {
                    let inner = load_template(self.ledger, unit, params, last_ball_mci).await?;
                    let satisfied = self.eval(&inner, path).await?;
                    Ok(satisfied)
                }
                Expr::SeenAddress(address) => Ok(self.ledger.query_seen(address, last_ball_mci).await?),
                Expr::SeenDefinitionChange {
                    address,
                    definition_chash,
                } => {
                    let Some(changed) = address.resolve(self.address) else {
                        return Ok(false);
                    };
                    let new_chash = match definition_chash {
                        ChashRef::Any => None,
                        ChashRef::ThisAddress => match self.address {
                            Some(a) => Some(a),
                            None => return Ok(false),
                        },
                        ChashRef::Chash(c) => Some(c.as_str()),
                    };
                    Ok(self
                        .ledger
                        .query_definition_change(changed, new_chash, last_ball_mci)
                        .await?)
                }
                Expr::HasDefinitionChange {
                    address,
                    definition_chash,
                } => {
                    let Some(changed) = address.resolve(self.address) else {
                        return Ok(false);
                    };
                    let first_author = self.unit.first_author();
                    Ok(self.unit.messages.iter().any(|message| {
                        let Message::AddressDefinitionChange(change) = message else {
                            return false;
                        };
                        let chash_matches = match definition_chash {
                            ChashRef::Any => true,
                            ChashRef::ThisAddress => Some(change.definition_chash.as_str()) == self.address,
                            ChashRef::Chash(c) => change.definition_chash == *c,
                        };
                        change.address.as_deref().or(first_author) == Some(changed) && chash_matches
                    }))
                }
                Expr::Attested { address, attestors } => {
                    let Some(attested) = address.resolve(self.address) else {
                        return Ok(false);
                    };
                    Ok(self.ledger.query_attested(attested, attestors, last_ball_mci).await?)
                }
                Expr::CosignedBy(address) => Ok(self.unit.is_authored_by(address)),
                Expr::Not(inner) => Ok(!self.eval(inner, path).await?),
                Expr::InDataFeed {
                    oracles,
                    feed_name,
                    relation,
                    value,
                    min_mci,
                } => {
                    let query = DataFeedQuery {
                        oracles,
                        feed_name,
                        relation: *relation,
                        value,
                        min_mci: min_mci.unwrap_or(0),
                        max_mci: last_ball_mci,
                    };
                    Ok(self.ledger.query_data_feed(&query).await?)
                }
                Expr::InMerkle {
                    oracles,
                    feed_name,
                    element,
                    min_mci,
                } => {
                    let Some(serialized) = self.authentifier(&path) else {
                        return Ok(false);
                    };
                    self.state.used_paths.insert(path.clone());
                    let proof = match serialized.parse::<MerkleProof>() {
                        Ok(proof) if verify_merkle_proof(element, &proof) => proof,
                        _ => {
                            self.fail(FatalError::BadMerkleProof { path });
                            return Ok(false);
                        }
                    };
                    let root = FeedValue::Text(proof.root);
                    let query = DataFeedQuery {
                        oracles,
                        feed_name,
                        relation: Relation::Eq,
                        value: &root,
                        min_mci: min_mci.unwrap_or(0),
                        max_mci: last_ball_mci,
                    };
                    Ok(self.ledger.query_data_feed(&query).await?)
                }
                Expr::Mci { relation, value } => Ok(relation.holds(&last_ball_mci, value)),
                Expr::Timestamp { relation, value } => Ok(relation.holds(&self.ctx.last_ball_timestamp, value)),
                Expr::Age { relation, value } => self.eval_age(*relation, *value).await,
                Expr::Has(filter) | Expr::HasOne(filter) => {
                    let kind = if matches!(expr, Expr::Has(_)) {
                        FilterKind::Has
                    } else {
                        FilterKind::HasOne
                    };
                    let needs_inputs = filter.targets_inputs();
                    self.prepare_messages(needs_inputs).await?;
                    let (satisfied, _) = evaluate_filter(kind, filter, self.messages(needs_inputs), &self.scope());
                    Ok(satisfied)
                }
                Expr::HasEqual(search) | Expr::HasOneEqual(search) => {
                    let kind = if matches!(expr, Expr::HasEqual(_)) {
                        FilterKind::Has
                    } else {
                        FilterKind::HasOne
                    };
                    let needs_inputs = search.search_criteria.iter().any(|f| f.targets_inputs());
                    self.prepare_messages(needs_inputs).await?;
                    Ok(evaluate_equal(kind, search, self.messages(needs_inputs), &self.scope()))
                }
                Expr::Sum(cond) => {
                    let needs_inputs = cond.filter.targets_inputs();
                    self.prepare_messages(needs_inputs).await?;
                    Ok(evaluate_sum(cond, self.messages(needs_inputs), &self.scope()))
                }
                Expr::Formula(formula) => self.eval_formula(formula, &path).await,
            }
        })
    }

    /// True when any unit funding this address's own inputs has been stable
    /// for the given number of main chain indexes.
    async fn eval_age(&mut self, relation: Relation, age: u64) -> Result<bool, DefinitionError> {
        let Some(address) = self.address else {
            return Ok(false);
        };
        self.prepare_messages(true).await?;
        let source_units: BTreeSet<&str> = self
            .messages(true)
            .iter()
            .filter_map(Message::as_payment)
            .flat_map(|payment| &payment.inputs)
            .filter(|input| input.kind() == InputKind::Transfer && input.address.as_deref() == Some(address))
            .filter_map(|input| input.unit.as_deref())
            .collect();
        if source_units.is_empty() {
            return Ok(false);
        }
        let last_ball_mci = self.ctx.last_ball_mci;
        let mut satisfied = false;
        for unit in source_units {
            if let Some(mci) = self.ledger.query_unit_mci(unit, last_ball_mci).await? {
                satisfied |= relation.holds(&last_ball_mci, &mci.saturating_add(age));
            }
        }
        Ok(satisfied)
    }

    async fn eval_formula(&mut self, formula: &str, path: &str) -> Result<bool, DefinitionError> {
        self.prepare_messages(true).await?;
        let request = FormulaRequest {
            formula,
            messages: self.messages(true),
            trigger: self.ctx.trigger.as_ref(),
            address: self.address,
            last_ball_mci: self.ctx.last_ball_mci,
        };
        match self.formulas.evaluate(request).await {
            Ok(value) => Ok(value.is_truthy()),
            Err(FormulaError::Evaluation(reason)) => {
                debug!(path, reason = %reason, "formula evaluation failed");
                Ok(false)
            }
            Err(FormulaError::Query(err)) => Err(err.into()),
        }
    }
}
