mod common;

use async_trait::async_trait;
use definition_core::{Expr, Relation, Unit};
use definition_engine::template::fill;
use definition_engine::{
    has_references, DefinitionError, Engine, FormulaBudget, FormulaCheck, FormulaError,
    FormulaEvaluator, FormulaRequest, FormulaValue, MemoryLedger,
};
use serde_json::{json, Value};

use common::*;

async fn validate(definition: Value, is_asset: bool) -> Result<(), DefinitionError> {
    let ledger = MemoryLedger::new();
    Engine::new(&ledger)
        .validate_definition(&expr(definition), &Unit::default(), &ctx(), None, is_asset)
        .await
}

fn or_of_sigs(n: usize) -> Value {
    let set: Vec<Value> = (0..n).map(|_| sig(1)).collect();
    json!(["or", set])
}

#[tokio::test]
async fn complexity_limit_is_inclusive() {
    // the or node plus 99 sigs is exactly the limit
    assert_eq!(validate(or_of_sigs(99), false).await, Ok(()));
    assert_eq!(
        validate(or_of_sigs(100), false).await,
        Err(DefinitionError::ComplexityExceeded { path: "r.99".into() })
    );
}

#[tokio::test]
async fn negated_signature_is_rejected() {
    let err = validate(json!(["and", [sig(1), ["not", sig(2)]]]), false).await.unwrap_err();
    assert_eq!(err, DefinitionError::Invalid("sig cannot be negated".into()));
    assert!(err.to_string().contains("sig"));
}

#[tokio::test]
async fn asset_conditions_cannot_hold_address_operators() {
    assert_eq!(
        validate(sig(1), true).await,
        Err(DefinitionError::Invalid("asset condition cannot have sig".into()))
    );
    assert_eq!(
        validate(json!(["address", STRANGER]), true).await,
        Err(DefinitionError::Invalid("asset condition cannot have address".into()))
    );
}

#[tokio::test]
async fn address_definitions_need_a_signature() {
    assert_eq!(
        validate(json!(["or", [sig(1), ["mci", [">", 10]]]]), false).await,
        Err(DefinitionError::MissingSignature)
    );
    // an asset condition does not
    assert_eq!(validate(json!(["mci", [">", 10]]), true).await, Ok(()));
}

#[tokio::test]
async fn shape_errors_surface_at_parse() {
    let err = Expr::try_from(json!(["xor", []])).unwrap_err();
    assert_eq!(err.to_string(), "unknown op: xor");
    let err = Expr::try_from(json!(["or", [sig(1)]])).unwrap_err();
    assert_eq!(err.to_string(), "or must have at least 2 options");
}

struct Expensive;

#[async_trait]
impl FormulaEvaluator for Expensive {
    fn validate(&self, _formula: &str, budget: FormulaBudget) -> FormulaCheck {
        FormulaCheck {
            error: None,
            complexity: budget.complexity,
            count_ops: budget.count_ops + 2_000,
        }
    }

    async fn evaluate(&self, _request: FormulaRequest<'_>) -> Result<FormulaValue, FormulaError> {
        Ok(FormulaValue::Bool(true))
    }
}

#[tokio::test]
async fn formula_ops_are_bounded() {
    let ledger = MemoryLedger::new();
    let definition = expr(json!(["and", [sig(1), ["formula", "loop()"]]]));
    let err = Engine::new(&ledger)
        .with_formulas(&Expensive)
        .validate_definition(&definition, &Unit::default(), &ctx(), None, false)
        .await
        .unwrap_err();
    assert_eq!(err, DefinitionError::TooManyOps { path: "r.1".into() });
}

#[test]
fn template_round_trip() {
    let template = json!(["and", [["sig", {"pubkey": "$owner"}], ["mci", [">=", "$after"]]]]);
    let original = template.clone();
    let params = json!({"owner": pubkey(1), "after": 500});

    let filled = fill(&template, params.as_object().unwrap()).unwrap();
    assert_eq!(template, original);

    let parsed = expr(filled);
    assert_eq!(
        parsed,
        expr(json!(["and", [sig(1), ["mci", [">=", 500]]]]))
    );
    match parsed {
        Expr::And(items) => assert_eq!(
            items[1],
            Expr::Mci {
                relation: Relation::Ge,
                value: 500
            }
        ),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn references_scan() {
    assert!(!has_references(&expr(json!(["or", [sig(1), ["cosigned by", STRANGER]]]))));
    assert!(has_references(&expr(json!(["and", [sig(1), ["mci", [">", 1]]]]))));
    assert!(has_references(&expr(json!(["address", STRANGER]))));
}
