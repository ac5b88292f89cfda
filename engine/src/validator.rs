// SPDX-License-Identifier: Apache-2.0
//! Static definition validator.
//!
//! Walks the tree once, enforcing the rules that depend on where and when a
//! definition is used (negation, asset conditions, references, upgrade
//! heights, asset privacy) and the complexity/op budgets. Returns whether
//! the tree structurally guarantees a signature.

use definition_core::constants::{MAX_COMPLEXITY, MAX_OPS, ROOT_PATH};
use definition_core::{
    AddressSelector, AssetSelector, ChashRef, Expr, FeedValue, Filter, SubjectRef, Unit,
};
use futures::future::BoxFuture;
use tracing::debug;

use crate::context::ValidationContext;
use crate::error::DefinitionError;
use crate::formula::{FormulaBudget, FormulaEvaluator};
use crate::ledger::Ledger;
use crate::resolve::{load_template, needs_nested_evaluation, resolve_inner_definition};

pub(crate) fn child_path(path: &str, index: usize) -> String {
    format!("{path}.{index}")
}

pub(crate) struct Validator<'a> {
    ledger: &'a dyn Ledger,
    formulas: &'a dyn FormulaEvaluator,
    unit: &'a Unit,
    ctx: &'a ValidationContext,
    signing_paths: Option<&'a [String]>,
    is_asset: bool,
    complexity: u32,
    count_ops: u32,
}

impl<'a> Validator<'a> {
    pub(crate) fn new(
        ledger: &'a dyn Ledger,
        formulas: &'a dyn FormulaEvaluator,
        unit: &'a Unit,
        ctx: &'a ValidationContext,
        signing_paths: Option<&'a [String]>,
        is_asset: bool,
    ) -> Self {
        Self {
            ledger,
            formulas,
            unit,
            ctx,
            signing_paths,
            is_asset,
            complexity: 0,
            count_ops: 0,
        }
    }

    pub(crate) async fn validate(mut self, expr: &Expr) -> Result<(), DefinitionError> {
        let has_sig = self.check(expr, ROOT_PATH.to_owned(), false).await?;
        debug!(
            complexity = self.complexity,
            count_ops = self.count_ops,
            has_sig,
            "definition validated"
        );
        if !self.is_asset && !has_sig {
            return Err(DefinitionError::MissingSignature);
        }
        Ok(())
    }

    fn enforce_limits(&self, path: &str) -> Result<(), DefinitionError> {
        if self.complexity > MAX_COMPLEXITY {
            return Err(DefinitionError::ComplexityExceeded { path: path.to_owned() });
        }
        if self.count_ops > MAX_OPS {
            return Err(DefinitionError::TooManyOps { path: path.to_owned() });
        }
        Ok(())
    }

    /// Extra complexity for a node standing for `n` equivalent lookups.
    fn charge_fan_out(&mut self, n: usize, path: &str) -> Result<(), DefinitionError> {
        let extra = u32::try_from(n.saturating_sub(1)).unwrap_or(u32::MAX);
        self.complexity = self.complexity.saturating_add(extra);
        self.enforce_limits(path)
    }

    fn forbid_negation(expr: &Expr, in_negation: bool) -> Result<(), DefinitionError> {
        if in_negation {
            return Err(DefinitionError::invalid(format!("{} cannot be negated", expr.op())));
        }
        Ok(())
    }

    fn forbid_in_asset(&self, expr: &Expr) -> Result<(), DefinitionError> {
        if self.is_asset {
            return Err(DefinitionError::invalid(format!(
                "asset condition cannot have {}",
                expr.op()
            )));
        }
        Ok(())
    }

    fn forbid_references(&self) -> Result<(), DefinitionError> {
        if self.ctx.no_references {
            return Err(DefinitionError::invalid("no references allowed in address definition"));
        }
        Ok(())
    }

    fn forbid_this_address_in_asset(&self, refers_to_this: bool) -> Result<(), DefinitionError> {
        if self.is_asset && refers_to_this {
            return Err(DefinitionError::invalid("asset condition cannot reference this address"));
        }
        Ok(())
    }

    fn check<'s>(
        &'s mut self,
        expr: &'s Expr,
        path: String,
        in_negation: bool,
    ) -> BoxFuture<'s, Result<bool, DefinitionError>> {
        Box::pin(async move {
            self.complexity += 1;
            self.count_ops += 1;
            self.enforce_limits(&path)?;

            match expr {
                Expr::Or(set) => {
                    let mut all = true;
                    for (i, child) in set.iter().enumerate() {
                        all &= self.check(child, child_path(&path, i), in_negation).await?;
                    }
                    Ok(all)
                }
                Expr::And(set) => {
                    let mut any = false;
                    for (i, child) in set.iter().enumerate() {
                        any |= self.check(child, child_path(&path, i), in_negation).await?;
                    }
                    Ok(any)
                }
                Expr::ROfSet { required, set } => {
                    let mut without_sig = 0u64;
                    for (i, child) in set.iter().enumerate() {
                        if !self.check(child, child_path(&path, i), in_negation).await? {
                            without_sig += 1;
                        }
                    }
                    Ok(*required > without_sig)
                }
                Expr::WeightedAnd { required, set } => {
                    let mut weight_without_sig = 0u64;
                    for (i, member) in set.iter().enumerate() {
                        if !self.check(&member.value, child_path(&path, i), in_negation).await? {
                            weight_without_sig = weight_without_sig.saturating_add(member.weight);
                        }
                    }
                    Ok(*required > weight_without_sig)
                }
                Expr::Sig { .. } => {
                    Self::forbid_negation(expr, in_negation)?;
                    self.forbid_in_asset(expr)?;
                    Ok(true)
                }
                Expr::Hash { .. } => {
                    Self::forbid_negation(expr, in_negation)?;
                    self.forbid_in_asset(expr)?;
                    Ok(false)
                }
                Expr::Address(address) => {
                    Self::forbid_negation(expr, in_negation)?;
                    self.forbid_in_asset(expr)?;
                    self.forbid_references()?;
                    if !needs_nested_evaluation(self.signing_paths, &path, self.ctx) {
                        debug!(address = %address, path = %path, "nested address not signed, skipped");
                        return Ok(true);
                    }
                    let inner = resolve_inner_definition(self.ledger, self.unit, address, self.ctx.last_ball_mci)
                        .await?
                        .ok_or_else(|| {
                            DefinitionError::invalid(format!("definition of inner address {address} not found"))
                        })?;
                    debug!(address = %address, path = %path, "validating nested address");
                    let has_sig = self.check(&inner, path, in_negation).await?;
                    Ok(has_sig)
                }
                Expr::DefinitionTemplate { unit, params } => {
                    self.forbid_references()?;
                    let inner = load_template(self.ledger, unit, params, self.ctx.last_ball_mci).await?;
                    let has_sig = self.check(&inner, path, in_negation).await?;
                    Ok(has_sig)
                }
                Expr::SeenAddress(_) => {
                    self.forbid_references()?;
                    Ok(false)
                }
                Expr::SeenDefinitionChange {
                    address,
                    definition_chash,
                }
                | Expr::HasDefinitionChange {
                    address,
                    definition_chash,
                } => {
                    self.forbid_references()?;
                    self.forbid_this_address_in_asset(
                        *address == SubjectRef::ThisAddress || *definition_chash == ChashRef::ThisAddress,
                    )?;
                    Ok(false)
                }
                Expr::Attested { address, attestors } => {
                    self.forbid_references()?;
                    self.forbid_this_address_in_asset(*address == SubjectRef::ThisAddress)?;
                    self.charge_fan_out(attestors.len(), &path)?;
                    Ok(false)
                }
                Expr::CosignedBy(_) => {
                    Self::forbid_negation(expr, in_negation)?;
                    Ok(false)
                }
                // once negated, a subtree stays negated
                Expr::Not(inner) => self.check(inner, path, true).await,
                Expr::InDataFeed { oracles, value, .. } => {
                    self.forbid_references()?;
                    self.charge_fan_out(oracles.len(), &path)?;
                    if matches!(value, FeedValue::Number(_))
                        && !value.is_integer()
                        && !self.ctx.upgrades.formula_active(self.ctx.last_ball_mci)
                    {
                        return Err(DefinitionError::invalid("fractional numbers not allowed in data feeds"));
                    }
                    Ok(false)
                }
                Expr::InMerkle { oracles, .. } => {
                    Self::forbid_negation(expr, in_negation)?;
                    self.forbid_references()?;
                    self.charge_fan_out(oracles.len(), &path)?;
                    Ok(false)
                }
                Expr::Mci { .. } | Expr::Age { .. } => Ok(false),
                Expr::Timestamp { .. } => {
                    if !self.ctx.upgrades.timestamp_active(self.ctx.last_ball_mci) {
                        return Err(DefinitionError::invalid("timestamp not activated yet"));
                    }
                    Ok(false)
                }
                Expr::Has(filter) | Expr::HasOne(filter) => {
                    self.forbid_references()?;
                    self.check_filters(&[filter]).await?;
                    Ok(false)
                }
                Expr::HasEqual(search) | Expr::HasOneEqual(search) => {
                    self.forbid_references()?;
                    let [first, second] = &search.search_criteria;
                    self.check_filters(&[first, second]).await?;
                    Ok(false)
                }
                Expr::Sum(cond) => {
                    self.forbid_references()?;
                    self.check_filters(&[&cond.filter]).await?;
                    Ok(false)
                }
                Expr::Formula(formula) => {
                    self.check_formula(formula, &path)?;
                    Ok(false)
                }
            }
        })
    }

    async fn check_filters(&self, filters: &[&Filter]) -> Result<(), DefinitionError> {
        for filter in filters {
            let selects_this_asset = filter.asset == Some(AssetSelector::ThisAsset);
            if self.is_asset {
                if matches!(
                    filter.address,
                    Some(AddressSelector::ThisAddress | AddressSelector::OtherAddress)
                ) {
                    return Err(DefinitionError::invalid(
                        "asset condition cannot reference this/other address",
                    ));
                }
                if filter.own_funds.is_some() {
                    return Err(DefinitionError::invalid("asset condition cannot have own_funds"));
                }
                if selects_this_asset && self.ctx.defining_private_asset {
                    return Err(DefinitionError::invalid("private asset cannot filter by this asset"));
                }
            } else if selects_this_asset {
                return Err(DefinitionError::invalid("this asset is only allowed in asset conditions"));
            }
        }

        let assets: Vec<String> = filters
            .iter()
            .filter_map(|f| f.asset_id())
            .map(str::to_owned)
            .collect();
        if !assets.is_empty() && self.ledger.query_asset_privacy(&assets).await? {
            return Err(DefinitionError::invalid("asset must be public"));
        }
        Ok(())
    }

    fn check_formula(&mut self, formula: &str, path: &str) -> Result<(), DefinitionError> {
        if !self.ctx.upgrades.formula_active(self.ctx.last_ball_mci) {
            return Err(DefinitionError::invalid("formula not activated yet"));
        }
        let budget = FormulaBudget {
            complexity: self.complexity,
            count_ops: self.count_ops,
        };
        let check = self.formulas.validate(formula, budget);
        self.complexity = check.complexity;
        self.count_ops = check.count_ops;
        if let Some(error) = check.error {
            return Err(DefinitionError::invalid(format!("formula validation failed: {error}")));
        }
        self.enforce_limits(path)
    }
}
