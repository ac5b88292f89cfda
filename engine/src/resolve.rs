// SPDX-License-Identifier: Apache-2.0
//! Loading the definitions that `address` and `definition template` nodes
//! point at.

use definition_core::{definition_chash, Expr, Unit};
use serde_json::{Map, Value};
use tracing::debug;

use crate::context::ValidationContext;
use crate::error::DefinitionError;
use crate::ledger::{DefinitionLookup, Ledger};
use crate::template;

/// Current definition of a nested address, falling back to the definition
/// revealed by that address's own author entry in the unit. `None` when
/// neither exists.
pub async fn resolve_inner_definition(
    ledger: &dyn Ledger,
    unit: &Unit,
    address: &str,
    last_ball_mci: u64,
) -> Result<Option<Expr>, DefinitionError> {
    let definition_chash_expected = match ledger.resolve_definition(address, last_ball_mci).await? {
        DefinitionLookup::Found(expr) => return Ok(Some(expr)),
        DefinitionLookup::NotFound { definition_chash } => definition_chash,
    };
    let mut revealed = unit
        .authors
        .iter()
        .filter(|author| author.address == address)
        .filter_map(|author| author.definition.as_ref())
        .filter(|definition| definition_chash(definition) == definition_chash_expected);
    match (revealed.next(), revealed.next()) {
        (None, _) => {
            debug!(address, "inner address definition not found");
            Ok(None)
        }
        (Some(definition), None) => Ok(Some(definition.clone())),
        (Some(_), Some(_)) => Err(DefinitionError::invalid("more than 1 address definition")),
    }
}

/// Template stored in `unit_hash`, filled with `params` and parsed.
pub async fn load_template(
    ledger: &dyn Ledger,
    unit_hash: &str,
    params: &Map<String, Value>,
    last_ball_mci: u64,
) -> Result<Expr, DefinitionError> {
    let Some(stored) = ledger.query_template(unit_hash, last_ball_mci).await? else {
        return Err(DefinitionError::invalid("template not found or too many"));
    };
    let filled = template::fill(&stored, params)?;
    debug!(unit = unit_hash, "filled definition template");
    Ok(Expr::try_from(filled)?)
}

/// Whether a nested address at `path` has to be looked at. Once the
/// upgrade is active and authentifiers are known, a nested address with no
/// authentifier under its path is assumed to hold.
pub fn needs_nested_evaluation(
    signing_paths: Option<&[String]>,
    path: &str,
    ctx: &ValidationContext,
) -> bool {
    let Some(paths) = signing_paths else {
        return true;
    };
    if !ctx.upgrades.skips_unused_nested_addresses(ctx.last_ball_mci) {
        return true;
    }
    paths.iter().any(|p| p.starts_with(path))
}
