mod common;

use std::collections::BTreeMap;

use async_trait::async_trait;
use definition_core::{
    definition_chash, merkle_proof, merkle_root, sha256_b64, Author, DefinitionChange, FeedValue,
    Input, Message, Output, PaymentPayload, Unit,
};
use definition_engine::{
    DefinitionError, Engine, FatalError, FormulaBudget, FormulaCheck, FormulaError,
    FormulaEvaluator, FormulaRequest, FormulaValue, MemoryLedger, QueryError, UpgradeSchedule,
    ValidationContext,
};
use serde_json::json;

use common::*;

#[tokio::test]
async fn single_sig_end_to_end() {
    let definition = expr(sig(1));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new();
    let engine = Engine::new(&ledger);

    let signed = authentifiers([("r", sign(1))]);
    let result = engine
        .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&signed))
        .await;
    assert_eq!(result, Ok(true));

    let unsigned = BTreeMap::new();
    let result = engine
        .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&unsigned))
        .await;
    assert_eq!(result, Ok(false));
}

#[tokio::test]
async fn every_authentifier_must_be_used() {
    let definition = expr(sig(1));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new();

    let extra = authentifiers([("r", sign(1)), ("r.0", sign(1))]);
    let err = Engine::new(&ledger)
        .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&extra))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DefinitionError::UnusedAuthentifiers {
            used: vec!["r".into()],
            passed: vec!["r".into(), "r.0".into()],
        }
    );
}

#[tokio::test]
async fn bad_signature_on_a_dead_branch_is_fatal() {
    let definition = expr(json!(["or", [sig(1), sig(2)]]));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new();

    // r.0 alone satisfies the or, but r.1 carries a signature by the wrong key
    let auth = authentifiers([("r.0", sign(1)), ("r.1", sign(3))]);
    let err = Engine::new(&ledger)
        .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
        .await
        .unwrap_err();
    assert_eq!(err, DefinitionError::Fatal(FatalError::BadSignature { path: "r.1".into() }));
}

#[tokio::test]
async fn first_fatal_error_wins() {
    let definition = expr(json!(["and", [sig(1), sig(2)]]));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new();

    let auth = authentifiers([("r.0", sign(9)), ("r.1", sign(9))]);
    let err = Engine::new(&ledger)
        .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
        .await
        .unwrap_err();
    assert_eq!(err, DefinitionError::Fatal(FatalError::BadSignature { path: "r.0".into() }));
}

#[tokio::test]
async fn two_of_three() {
    let definition = expr(json!(["r of set", {"required": 2, "set": [sig(1), sig(2), sig(3)]}]));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new();
    let engine = Engine::new(&ledger);

    assert_eq!(
        engine.validate_definition(&definition, &unit, &ctx(), None, false).await,
        Ok(())
    );

    let two = authentifiers([("r.0", sign(1)), ("r.2", sign(3))]);
    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&two))
            .await,
        Ok(true)
    );

    let one = authentifiers([("r.1", sign(2))]);
    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&one))
            .await,
        Ok(false)
    );
}

#[tokio::test]
async fn weighted_members() {
    let definition = expr(json!(["weighted and", {"required": 3, "set": [
        {"value": sig(1), "weight": 2},
        {"value": sig(2), "weight": 1},
        {"value": sig(3), "weight": 1}
    ]}]));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new();
    let engine = Engine::new(&ledger);

    let heavy = authentifiers([("r.0", sign(1)), ("r.2", sign(3))]);
    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&heavy))
            .await,
        Ok(true)
    );
    let light = authentifiers([("r.1", sign(2)), ("r.2", sign(3))]);
    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&light))
            .await,
        Ok(false)
    );
}

#[tokio::test]
async fn hash_preimages() {
    let definition = expr(json!(["and", [sig(1), ["hash", {"hash": sha256_b64("open sesame")}]]]));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new();
    let engine = Engine::new(&ledger);

    let good = authentifiers([("r.0", sign(1)), ("r.1", "open sesame".to_owned())]);
    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&good))
            .await,
        Ok(true)
    );

    let bad = authentifiers([("r.0", sign(1)), ("r.1", "open barley".to_owned())]);
    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&bad))
            .await,
        Err(DefinitionError::Fatal(FatalError::BadHash { path: "r.1".into() }))
    );
}

#[tokio::test]
async fn placeholder_signatures_only_while_composing() {
    let definition = expr(sig(1));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new();
    let engine = Engine::new(&ledger);
    let placeholder = authentifiers([("r", "-".repeat(88))]);

    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx().unsigned(), Some(&placeholder))
            .await,
        Ok(true)
    );
    assert!(engine
        .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&placeholder))
        .await
        .unwrap_err()
        .is_fatal());
}

#[tokio::test]
async fn nested_address_keeps_the_outer_path() {
    let inner = expr(sig(2));
    let inner_address = definition_chash(&inner);
    let definition = expr(json!(["or", [sig(1), ["address", inner_address]]]));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new().with_definition(inner_address.clone(), inner);
    let engine = Engine::new(&ledger);

    let auth = authentifiers([("r.1", sign(2))]);
    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
            .await,
        Ok(true)
    );
}

#[tokio::test]
async fn unused_nested_address_before_and_after_the_upgrade() {
    let inner = expr(json!(["cosigned by", STRANGER]));
    let inner_address = definition_chash(&inner);
    let definition = expr(json!(["or", [sig(1), ["address", inner_address]]]));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new().with_definition(inner_address, inner);
    let engine = Engine::new(&ledger);
    let nothing = BTreeMap::new();

    // skipped: assumed to hold while validating, unsatisfied when evaluated
    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&nothing))
            .await,
        Ok(false)
    );

    // before the upgrade the nested definition is looked at and has no sig
    let before = ValidationContext::new(LAST_BALL_MCI, HASH_TO_SIGN).with_upgrades(UpgradeSchedule::default());
    assert!(!before.upgrades.skips_unused_nested_addresses(LAST_BALL_MCI));
    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &before, Some(&nothing))
            .await,
        Err(DefinitionError::MissingSignature)
    );
}

#[tokio::test]
async fn nested_definition_revealed_in_the_unit() {
    let inner = expr(sig(2));
    let inner_address = definition_chash(&inner);
    let definition = expr(json!(["and", [sig(1), ["address", inner_address]]]));
    let (address, mut unit) = unit_for(&definition);
    let mut cosigner = Author::new(inner_address);
    cosigner.definition = Some(inner);
    unit.authors.push(cosigner);

    let ledger = MemoryLedger::new();
    let auth = authentifiers([("r.0", sign(1)), ("r.1", sign(2))]);
    assert_eq!(
        Engine::new(&ledger)
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
            .await,
        Ok(true)
    );
}

#[tokio::test]
async fn cosigners_and_negated_history() {
    let definition = expr(json!(["and", [
        sig(1),
        ["cosigned by", STRANGER],
        ["not", ["seen address", STRANGER]]
    ]]));
    let (address, mut unit) = unit_for(&definition);
    let auth = authentifiers([("r.0", sign(1))]);

    let fresh = MemoryLedger::new();
    assert_eq!(
        Engine::new(&fresh)
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
            .await,
        Ok(false)
    );

    unit.authors.push(Author::new(STRANGER));
    assert_eq!(
        Engine::new(&fresh)
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
            .await,
        Ok(true)
    );

    let seen = MemoryLedger::new().with_authored(STRANGER, 10);
    assert_eq!(
        Engine::new(&seen)
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
            .await,
        Ok(false)
    );
}

#[tokio::test]
async fn definition_change_in_the_unit_versus_history() {
    let new_chash = definition_chash(&expr(sig(5)));
    let has = expr(json!(["and", [sig(1), ["has definition change", ["this address", new_chash]]]]));
    let seen = expr(json!(["and", [sig(1), ["seen definition change", ["this address", new_chash]]]]));
    let auth = authentifiers([("r.0", sign(1))]);
    let ledger = MemoryLedger::new();
    let engine = Engine::new(&ledger);

    // the address is the chash of `has`; both definitions are judged for it
    let (address, mut unit) = unit_for(&has);
    unit.messages.push(Message::AddressDefinitionChange(DefinitionChange {
        address: None,
        definition_chash: new_chash.clone(),
    }));

    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &has, &unit, &ctx(), Some(&auth))
            .await,
        Ok(true)
    );
    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &seen, &unit, &ctx(), Some(&auth))
            .await,
        Ok(false)
    );

    let history = MemoryLedger::new().with_definition_change(address.clone(), new_chash, 900);
    assert_eq!(
        Engine::new(&history)
            .validate_authentifiers(Some(&address), None, &seen, &Unit::default(), &ctx(), Some(&auth))
            .await,
        Ok(true)
    );
}

#[tokio::test]
async fn data_feeds_and_attestations() {
    let definition = expr(json!(["and", [
        sig(1),
        ["in data feed", [[ORACLE], "BTC_USD", ">", 20000]],
        ["attested", ["this address", [ORACLE]]]
    ]]));
    let (address, unit) = unit_for(&definition);
    let auth = authentifiers([("r.0", sign(1))]);

    let ledger = MemoryLedger::new()
        .with_data_feed(ORACLE, "BTC_USD", FeedValue::Number(30_000.into()), 999)
        .with_attestation(address.clone(), ORACLE, 500);
    assert_eq!(
        Engine::new(&ledger)
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
            .await,
        Ok(true)
    );

    // posted after the last ball
    let late = MemoryLedger::new()
        .with_data_feed(ORACLE, "BTC_USD", FeedValue::Number(30_000.into()), 1_001)
        .with_attestation(address.clone(), ORACLE, 500);
    assert_eq!(
        Engine::new(&late)
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
            .await,
        Ok(false)
    );
}

#[tokio::test]
async fn merkle_membership() {
    let members = ["alice", "bob", "carol"];
    let root = merkle_root(&members).unwrap();
    let proof = merkle_proof(&members, 1).unwrap();

    let definition = expr(json!(["and", [sig(1), ["in merkle", [[ORACLE], "members", "bob"]]]]));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new().with_data_feed(ORACLE, "members", FeedValue::Text(root), 10);
    let engine = Engine::new(&ledger);

    let good = authentifiers([("r.0", sign(1)), ("r.1", proof.to_string())]);
    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&good))
            .await,
        Ok(true)
    );

    let garbage = authentifiers([("r.0", sign(1)), ("r.1", "not a proof".to_owned())]);
    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&garbage))
            .await,
        Err(DefinitionError::Fatal(FatalError::BadMerkleProof { path: "r.1".into() }))
    );

    // a valid proof for somebody else
    let other = authentifiers([("r.0", sign(1)), ("r.1", merkle_proof(&members, 2).unwrap().to_string())]);
    assert!(engine
        .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&other))
        .await
        .unwrap_err()
        .is_fatal());
}

fn spending_unit(address: &str) -> Unit {
    Unit {
        unit: None,
        authors: vec![Author::new(address)],
        messages: vec![Message::Payment(PaymentPayload {
            asset: None,
            inputs: vec![Input::transfer("FUNDING", 0, 0)],
            outputs: vec![Output {
                address: STRANGER.into(),
                amount: 900,
            }],
        })],
    }
}

#[tokio::test]
async fn age_of_spent_outputs() {
    let definition = expr(json!(["and", [sig(1), ["age", [">", 500]]]]));
    let address = definition_chash(&definition);
    let unit = spending_unit(&address);
    let auth = authentifiers([("r.0", sign(1))]);

    let old_funds = MemoryLedger::new()
        .with_output("FUNDING", 0, 0, address.clone(), 1_000)
        .with_unit_mci("FUNDING", 100);
    assert_eq!(
        Engine::new(&old_funds)
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
            .await,
        Ok(true)
    );

    let young_funds = MemoryLedger::new()
        .with_output("FUNDING", 0, 0, address.clone(), 1_000)
        .with_unit_mci("FUNDING", 700);
    assert_eq!(
        Engine::new(&young_funds)
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
            .await,
        Ok(false)
    );
}

#[tokio::test]
async fn payment_filters() {
    let definition = expr(json!(["and", [
        sig(1),
        ["has one", {"what": "output", "address": "other address", "amount_at_least": 500}],
        ["has", {"what": "input", "own_funds": true}],
        ["sum", {"filter": {"what": "output", "asset": "base"}, "equals": 900}]
    ]]));
    let address = definition_chash(&definition);
    let unit = spending_unit(&address);
    let auth = authentifiers([("r.0", sign(1))]);
    let ledger = MemoryLedger::new().with_output("FUNDING", 0, 0, address.clone(), 1_000);

    assert_eq!(
        Engine::new(&ledger)
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
            .await,
        Ok(true)
    );

    // the funds were somebody else's
    let foreign = MemoryLedger::new().with_output("FUNDING", 0, 0, STRANGER, 1_000);
    assert_eq!(
        Engine::new(&foreign)
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
            .await,
        Ok(false)
    );
}

#[tokio::test]
async fn asset_condition_mode() {
    let asset = sha256_b64("some asset");
    let condition = expr(json!(["has", {"what": "output", "asset": "this asset", "address": STRANGER}]));
    let unit = Unit {
        unit: None,
        authors: vec![Author::new(ORACLE)],
        messages: vec![Message::Payment(PaymentPayload {
            asset: Some(asset.clone()),
            inputs: vec![],
            outputs: vec![Output {
                address: STRANGER.into(),
                amount: 1,
            }],
        })],
    };
    let ledger = MemoryLedger::new();
    let engine = Engine::new(&ledger);

    assert_eq!(
        engine
            .validate_authentifiers(None, Some(&asset), &condition, &unit, &ctx(), None)
            .await,
        Ok(true)
    );
    assert_eq!(
        engine
            .validate_authentifiers(None, Some(&sha256_b64("another asset")), &condition, &unit, &ctx(), None)
            .await,
        Ok(false)
    );
}

#[tokio::test]
async fn modes_cannot_be_mixed() {
    let definition = expr(sig(1));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new();
    let engine = Engine::new(&ledger);
    let incompatible = Err(DefinitionError::Invalid("incompatible params".into()));

    assert_eq!(
        engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), None)
            .await,
        incompatible
    );
    assert_eq!(
        engine
            .validate_authentifiers(None, Some("ASSET"), &definition, &unit, &ctx(), Some(&BTreeMap::new()))
            .await,
        incompatible
    );
    // one of the two has to be named
    assert_eq!(
        engine
            .validate_authentifiers(None, None, &definition, &unit, &ctx(), Some(&BTreeMap::new()))
            .await,
        incompatible
    );
    assert_eq!(
        engine
            .validate_authentifiers(None, None, &definition, &unit, &ctx(), None)
            .await,
        incompatible
    );
}

#[tokio::test]
async fn query_failures_are_not_negative_answers() {
    let definition = expr(json!(["and", [sig(1), ["seen address", STRANGER]]]));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new().unavailable("connection reset");
    let auth = authentifiers([("r.0", sign(1))]);

    let err = Engine::new(&ledger)
        .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
        .await
        .unwrap_err();
    assert_eq!(err, DefinitionError::Query(QueryError::Backend("connection reset".into())));
    assert!(err.is_retryable());
}

/// Formulas of the form `"true"`, `"false"`, `"error"` or `"offline"`.
struct ScriptedFormulas;

#[async_trait]
impl FormulaEvaluator for ScriptedFormulas {
    fn validate(&self, _formula: &str, budget: FormulaBudget) -> FormulaCheck {
        FormulaCheck {
            error: None,
            complexity: budget.complexity + 1,
            count_ops: budget.count_ops + 1,
        }
    }

    async fn evaluate(&self, request: FormulaRequest<'_>) -> Result<FormulaValue, FormulaError> {
        assert!(request.address.is_some());
        match request.formula {
            "true" => Ok(FormulaValue::Text("yes".into())),
            "false" => Ok(FormulaValue::Number(0.0)),
            "offline" => Err(QueryError::Backend("aa state unavailable".into()).into()),
            other => Err(FormulaError::Evaluation(format!("cannot evaluate {other}"))),
        }
    }
}

#[tokio::test]
async fn formula_results_are_coerced() {
    let ledger = MemoryLedger::new();
    let engine = Engine::new(&ledger).with_formulas(&ScriptedFormulas);
    let auth = authentifiers([("r.0", sign(1))]);

    for (formula, expected) in [
        ("true", Ok(true)),
        ("false", Ok(false)),
        ("error", Ok(false)),
        ("offline", Err(DefinitionError::Query(QueryError::Backend("aa state unavailable".into())))),
    ] {
        let definition = expr(json!(["and", [sig(1), ["formula", formula]]]));
        let (address, unit) = unit_for(&definition);
        assert_eq!(
            engine
                .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
                .await,
            expected,
            "formula {formula}"
        );
    }
}

#[tokio::test]
async fn evaluation_is_deterministic() {
    let definition = expr(json!(["r of set", {"required": 2, "set": [
        sig(1),
        sig(2),
        ["and", [sig(3), ["in data feed", [[ORACLE], "rain", "=", "yes"]]]]
    ]}]));
    let (address, unit) = unit_for(&definition);
    let ledger = MemoryLedger::new().with_data_feed(ORACLE, "rain", FeedValue::Text("yes".into()), 3);
    let engine = Engine::new(&ledger);
    let auth = authentifiers([("r.0", sign(1)), ("r.2.0", sign(3))]);

    let first = engine
        .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
        .await;
    for _ in 0..5 {
        let again = engine
            .validate_authentifiers(Some(&address), None, &definition, &unit, &ctx(), Some(&auth))
            .await;
        assert_eq!(again, first);
    }
    assert_eq!(first, Ok(true));
}
