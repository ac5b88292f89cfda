// SPDX-License-Identifier: Apache-2.0
use definition_core::Expr;

/// Whether evaluating `expr` can depend on anything beyond the unit and its
/// own authentifiers. Definitions without references can be judged once and
/// cached.
pub fn has_references(expr: &Expr) -> bool {
    match expr {
        Expr::Sig { .. } | Expr::Hash { .. } | Expr::CosignedBy(_) => false,
        Expr::Or(set) | Expr::And(set) | Expr::ROfSet { set, .. } => set.iter().any(has_references),
        Expr::WeightedAnd { set, .. } => set.iter().any(|w| has_references(&w.value)),
        Expr::Not(inner) => has_references(inner),
        _ => true,
    }
}
