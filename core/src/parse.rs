// SPDX-License-Identifier: Apache-2.0
//! JSON -> [`Expr`] with the context-free shape rules.

use serde_json::{Map, Value};

use crate::constants::{
    HASH_LENGTH, MAX_DATA_FEED_NAME_LENGTH, MAX_DATA_FEED_VALUE_LENGTH, PUBKEY_LENGTH,
};
use crate::expr::{
    AddressSelector, AssetSelector, ChashRef, EqualField, EqualSearch, Expr, ExprError, FeedValue,
    Filter, FilterTarget, Relation, SubjectRef, SumCondition, Weighted,
};
use crate::hash::{is_valid_address, is_valid_base64};
use crate::unit::InputKind;

const FILTER_FIELDS: &[&str] = &[
    "what",
    "asset",
    "type",
    "own_funds",
    "address",
    "amount",
    "amount_at_least",
    "amount_at_most",
];

/*───────────────────────────────────────────────────────────────────────────*
 * Helper utilities                                                         *
 *───────────────────────────────────────────────────────────────────────────*/

fn malformed(msg: impl Into<String>) -> ExprError {
    ExprError::Malformed(msg.into())
}

/// Renders a JSON value for an error message (strings without quotes).
fn describe(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_owned(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

fn as_object<'a>(value: &'a Value, op: &str) -> Result<&'a Map<String, Value>, ExprError> {
    value
        .as_object()
        .ok_or_else(|| malformed(format!("{op} args must be object")))
}

fn ensure_known_fields(obj: &Map<String, Value>, allowed: &[&str], what: &str) -> Result<(), ExprError> {
    if obj.keys().any(|k| !allowed.contains(&k.as_str())) {
        return Err(malformed(format!("unknown fields in {what}")));
    }
    Ok(())
}

fn positive_int(value: Option<&Value>) -> Option<u64> {
    nonnegative_int(value).filter(|v| *v > 0)
}

/// Integers may also arrive as whole floats (`5.0`).
fn nonnegative_int(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u64)
    })
}

fn pair<'a>(args: &'a Value, op: &str) -> Result<(&'a Value, &'a Value), ExprError> {
    match args.as_array().map(Vec::as_slice) {
        Some([a, b]) => Ok((a, b)),
        _ => Err(malformed(format!("{op} must have 2 args"))),
    }
}

fn address_arg(value: &Value, err: &str) -> Result<String, ExprError> {
    match value.as_str() {
        Some(s) if is_valid_address(s) => Ok(s.to_owned()),
        _ => Err(malformed(err)),
    }
}

fn subject(value: &Value, err: &str) -> Result<SubjectRef, ExprError> {
    match value.as_str() {
        Some("this address") => Ok(SubjectRef::ThisAddress),
        Some(s) if is_valid_address(s) => Ok(SubjectRef::Address(s.to_owned())),
        _ => Err(malformed(err)),
    }
}

fn oracles(value: &Value, op: &str) -> Result<Vec<String>, ExprError> {
    let list = match value.as_array() {
        Some(list) if !list.is_empty() => list,
        _ => return Err(malformed(format!("no addresses in {op}"))),
    };
    list.iter()
        .map(|a| match a.as_str() {
            Some(s) if is_valid_address(s) => Ok(s.to_owned()),
            _ => Err(malformed(format!("address {} not valid", describe(Some(a))))),
        })
        .collect()
}

fn feed_name(value: &Value) -> Result<String, ExprError> {
    let name = match value.as_str() {
        Some(s) if !s.is_empty() => s,
        _ => return Err(malformed("no feed_name")),
    };
    if name.len() > MAX_DATA_FEED_NAME_LENGTH {
        return Err(malformed("feed_name too long"));
    }
    if name.contains('\n') {
        return Err(malformed(format!("feed_name {name} contains \\n")));
    }
    Ok(name.to_owned())
}

fn relation(value: &Value) -> Result<Relation, ExprError> {
    value
        .as_str()
        .and_then(Relation::parse)
        .ok_or_else(|| malformed(format!("invalid relation: {}", describe(Some(value)))))
}

fn min_mci(value: Option<&Value>, op: &str) -> Result<Option<u64>, ExprError> {
    match value {
        None => Ok(None),
        Some(v) => nonnegative_int(Some(v))
            .map(Some)
            .ok_or_else(|| malformed(format!("{op}: invalid min_mci"))),
    }
}

fn children(items: &[Value]) -> Result<Vec<Expr>, ExprError> {
    items.iter().map(parse_expr).collect()
}

/*───────────────────────────────────────────────────────────────────────────*
 * Operators                                                                *
 *───────────────────────────────────────────────────────────────────────────*/

pub(crate) fn parse_expr(value: &Value) -> Result<Expr, ExprError> {
    let (op, args) = match value.as_array().map(Vec::as_slice) {
        Some([op, args]) => (op, args),
        _ => return Err(malformed("expression must be 2-element array")),
    };
    let op = op.as_str().ok_or_else(|| malformed("op must be string"))?;

    match op {
        "or" | "and" => {
            let items = args
                .as_array()
                .ok_or_else(|| malformed(format!("{op} args must be array")))?;
            if items.len() < 2 {
                return Err(malformed(format!("{op} must have at least 2 options")));
            }
            let items = children(items)?;
            Ok(if op == "or" { Expr::Or(items) } else { Expr::And(items) })
        }
        "r of set" => {
            let obj = as_object(args, op)?;
            ensure_known_fields(obj, &["required", "set"], op)?;
            let required =
                positive_int(obj.get("required")).ok_or_else(|| malformed("required must be positive"))?;
            let set = obj
                .get("set")
                .and_then(Value::as_array)
                .ok_or_else(|| malformed("set must be array"))?;
            if set.len() < 2 {
                return Err(malformed("set must have at least 2 options"));
            }
            if required > set.len() as u64 {
                return Err(malformed("required must be <= than set length"));
            }
            Ok(Expr::ROfSet {
                required,
                set: children(set)?,
            })
        }
        "weighted and" => {
            let obj = as_object(args, op)?;
            ensure_known_fields(obj, &["required", "set"], op)?;
            let required =
                positive_int(obj.get("required")).ok_or_else(|| malformed("required must be positive"))?;
            let raw_set = obj
                .get("set")
                .and_then(Value::as_array)
                .ok_or_else(|| malformed("set must be array"))?;
            if raw_set.len() < 2 {
                return Err(malformed("set must have at least 2 options"));
            }
            let mut total_weight = 0u64;
            let mut set = Vec::with_capacity(raw_set.len());
            for member in raw_set {
                let member = member
                    .as_object()
                    .ok_or_else(|| malformed("weighted set element must be object"))?;
                ensure_known_fields(member, &["value", "weight"], "weighted set element")?;
                let weight = positive_int(member.get("weight"))
                    .ok_or_else(|| malformed("weight must be positive int"))?;
                total_weight = total_weight.saturating_add(weight);
                let value = member
                    .get("value")
                    .ok_or_else(|| malformed("weighted set element has no value"))?;
                set.push(Weighted {
                    value: parse_expr(value)?,
                    weight,
                });
            }
            if required > total_weight {
                return Err(malformed("required must be <= than total weight"));
            }
            Ok(Expr::WeightedAnd { required, set })
        }
        "sig" => {
            let obj = as_object(args, op)?;
            ensure_known_fields(obj, &["algo", "pubkey"], op)?;
            check_algo(obj, "secp256k1", "unsupported sig algo")?;
            match obj.get("pubkey").and_then(Value::as_str) {
                Some(pubkey) if pubkey.len() == PUBKEY_LENGTH => Ok(Expr::Sig {
                    pubkey: pubkey.to_owned(),
                }),
                _ => Err(malformed("wrong pubkey length")),
            }
        }
        "hash" => {
            let obj = as_object(args, op)?;
            ensure_known_fields(obj, &["algo", "hash"], op)?;
            check_algo(obj, "sha256", "unsupported hash algo")?;
            match obj.get("hash").and_then(Value::as_str) {
                Some(hash) if is_valid_base64(hash, HASH_LENGTH) => Ok(Expr::Hash {
                    hash: hash.to_owned(),
                }),
                _ => Err(malformed("wrong base64 hash")),
            }
        }
        "address" => Ok(Expr::Address(address_arg(args, "invalid address")?)),
        "seen address" => Ok(Expr::SeenAddress(address_arg(args, "invalid seen address")?)),
        "cosigned by" => Ok(Expr::CosignedBy(address_arg(args, "invalid cosigner address")?)),
        "definition template" => {
            let (unit, params) = match args.as_array().map(Vec::as_slice) {
                Some([unit, params]) => (unit, params),
                _ => return Err(malformed(format!("{op} must be 2-element array"))),
            };
            let unit = match unit.as_str() {
                Some(u) if u.len() == HASH_LENGTH => u.to_owned(),
                _ => return Err(malformed("invalid template unit")),
            };
            let params = params
                .as_object()
                .ok_or_else(|| malformed("template params must be object"))?
                .clone();
            Ok(Expr::DefinitionTemplate { unit, params })
        }
        "seen definition change" | "has definition change" => {
            let (changed, chash) = pair(args, op)?;
            let address = subject(changed, "invalid changed address")?;
            let definition_chash = match chash.as_str() {
                Some("any") => ChashRef::Any,
                Some("this address") if op == "seen definition change" => ChashRef::ThisAddress,
                Some(c) if is_valid_address(c) => ChashRef::Chash(c.to_owned()),
                _ => return Err(malformed("invalid new definition chash")),
            };
            Ok(if op == "seen definition change" {
                Expr::SeenDefinitionChange {
                    address,
                    definition_chash,
                }
            } else {
                Expr::HasDefinitionChange {
                    address,
                    definition_chash,
                }
            })
        }
        "attested" => {
            let (attested, attestors) = pair(args, op)?;
            let address = subject(attested, "invalid attested address")?;
            let attestors = match attestors.as_array() {
                Some(list) if !list.is_empty() => list,
                _ => return Err(malformed("no attestors")),
            };
            let attestors = attestors
                .iter()
                .map(|a| match a.as_str() {
                    Some(s) if is_valid_address(s) => Ok(s.to_owned()),
                    _ => Err(malformed(format!("invalid attestor address {}", describe(Some(a))))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::Attested { address, attestors })
        }
        "not" => Ok(Expr::Not(Box::new(parse_expr(args)?))),
        "in data feed" => {
            let items = args
                .as_array()
                .ok_or_else(|| malformed(format!("{op} arguments must be array")))?;
            if items.len() != 4 && items.len() != 5 {
                return Err(malformed(format!("{op} must have 4 or 5 args")));
            }
            let value = match &items[3] {
                Value::String(s) => {
                    if s.is_empty() {
                        return Err(malformed("empty data feed value"));
                    }
                    if s.len() > MAX_DATA_FEED_VALUE_LENGTH {
                        return Err(malformed("data feed value too long"));
                    }
                    if s.contains('\n') {
                        return Err(malformed(format!("value {s} contains \\n")));
                    }
                    FeedValue::Text(s.clone())
                }
                Value::Number(n) => FeedValue::Number(n.clone()),
                _ => return Err(malformed("data feed value must be string or number")),
            };
            Ok(Expr::InDataFeed {
                oracles: oracles(&items[0], op)?,
                feed_name: feed_name(&items[1])?,
                relation: relation(&items[2])?,
                value,
                min_mci: min_mci(items.get(4), op)?,
            })
        }
        "in merkle" => {
            let items = args
                .as_array()
                .ok_or_else(|| malformed(format!("{op} arguments must be array")))?;
            if items.len() != 3 && items.len() != 4 {
                return Err(malformed(format!("{op} must have 3 or 4 args")));
            }
            let element = match items[2].as_str() {
                Some(e) if !e.is_empty() && !e.contains('\n') => e.to_owned(),
                _ => return Err(malformed("element must be a nonempty single-line string")),
            };
            Ok(Expr::InMerkle {
                oracles: oracles(&items[0], op)?,
                feed_name: feed_name(&items[1])?,
                element,
                min_mci: min_mci(items.get(3), op)?,
            })
        }
        "mci" | "age" | "timestamp" => {
            let (rel, value) = pair(args, op)?;
            let relation = relation(rel)?;
            let value = nonnegative_int(Some(value))
                .ok_or_else(|| malformed(format!("{op} must be a non-neg number")))?;
            Ok(match op {
                "mci" => Expr::Mci { relation, value },
                "age" => Expr::Age { relation, value },
                _ => Expr::Timestamp { relation, value },
            })
        }
        "has" | "has one" => {
            let filter = parse_filter(Some(args))?;
            Ok(if op == "has" {
                Expr::Has(filter)
            } else {
                Expr::HasOne(filter)
            })
        }
        "has equal" | "has one equal" => {
            let search = parse_equal_search(args, op)?;
            Ok(if op == "has equal" {
                Expr::HasEqual(search)
            } else {
                Expr::HasOneEqual(search)
            })
        }
        "sum" => {
            let obj = as_object(args, op)?;
            ensure_known_fields(obj, &["filter", "equals", "at_least", "at_most"], op)?;
            let filter = parse_filter(obj.get("filter"))?;
            if filter.restricts_amount() {
                return Err(malformed("sum filter cannot restrict amounts"));
            }
            let equals = match obj.get("equals") {
                None => None,
                Some(v) => Some(
                    nonnegative_int(Some(v)).ok_or_else(|| malformed("equals must be nonnegative int"))?,
                ),
            };
            let at_least = match obj.get("at_least") {
                None => None,
                Some(v) => Some(positive_int(Some(v)).ok_or_else(|| malformed("at_least must be positive int"))?),
            };
            let at_most = match obj.get("at_most") {
                None => None,
                Some(v) => Some(positive_int(Some(v)).ok_or_else(|| malformed("at_most must be positive int"))?),
            };
            if equals.is_some() && (at_least.is_some() || at_most.is_some()) {
                return Err(malformed("can't have equals and at_least/at_most at the same time"));
            }
            if equals.is_none() && at_least.is_none() && at_most.is_none() {
                return Err(malformed("at least one of equals, at_least, at_most must be specified"));
            }
            Ok(Expr::Sum(SumCondition {
                filter,
                equals,
                at_least,
                at_most,
            }))
        }
        "formula" => match args.as_str() {
            Some(src) => Ok(Expr::Formula(src.to_owned())),
            None => Err(malformed("formula must be string")),
        },
        other => Err(ExprError::UnknownOp(other.to_owned())),
    }
}

/// The default algorithm is implied and may not be spelled out.
fn check_algo(obj: &Map<String, Value>, default: &str, unsupported: &str) -> Result<(), ExprError> {
    match obj.get("algo") {
        None => Ok(()),
        Some(Value::String(a)) if a == default => {
            Err(malformed("default algo must not be explicitly specified"))
        }
        Some(_) => Err(malformed(unsupported)),
    }
}

/*───────────────────────────────────────────────────────────────────────────*
 * Filters                                                                  *
 *───────────────────────────────────────────────────────────────────────────*/

fn parse_filter(value: Option<&Value>) -> Result<Filter, ExprError> {
    let obj = value
        .and_then(Value::as_object)
        .ok_or_else(|| malformed("no filter"))?;
    ensure_known_fields(obj, FILTER_FIELDS, "filter")?;

    let what = match obj.get("what").and_then(Value::as_str) {
        Some("input") => FilterTarget::Input,
        Some("output") => FilterTarget::Output,
        _ => return Err(malformed(format!("invalid what={}", describe(obj.get("what"))))),
    };

    let asset = match obj.get("asset") {
        None => None,
        Some(v) => Some(match v.as_str() {
            Some("base") => AssetSelector::Base,
            Some("this asset") => AssetSelector::ThisAsset,
            Some(id) if is_valid_base64(id, HASH_LENGTH) => AssetSelector::Asset(id.to_owned()),
            _ => return Err(malformed(format!("invalid asset: {}", describe(Some(v))))),
        }),
    };

    let kind = match obj.get("type") {
        None => None,
        Some(_) if what == FilterTarget::Output => {
            return Err(malformed("output cannot have type"));
        }
        Some(v) => Some(match v.as_str() {
            Some("issue") => InputKind::Issue,
            Some("transfer") => InputKind::Transfer,
            _ => return Err(malformed(format!("invalid type: {}", describe(Some(v))))),
        }),
    };

    let own_funds = match obj.get("own_funds") {
        None => None,
        Some(_) if what == FilterTarget::Output => {
            return Err(malformed("output cannot have own_funds"));
        }
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => return Err(malformed("own_funds must be boolean")),
    };

    let address = match obj.get("address") {
        None => None,
        Some(v) => Some(match v.as_str() {
            Some("this address") => AddressSelector::ThisAddress,
            Some("other address") => AddressSelector::OtherAddress,
            Some(a) if is_valid_address(a) => AddressSelector::Address(a.to_owned()),
            _ => return Err(malformed(format!("invalid address: {}", describe(Some(v))))),
        }),
    };

    let mut amounts = [None; 3];
    for (slot, field) in amounts
        .iter_mut()
        .zip(["amount", "amount_at_least", "amount_at_most"])
    {
        if let Some(v) = obj.get(field) {
            *slot = Some(
                positive_int(Some(v)).ok_or_else(|| malformed(format!("{field} must be positive int")))?,
            );
        }
    }
    let [amount, amount_at_least, amount_at_most] = amounts;
    if amount.is_some() && (amount_at_least.is_some() || amount_at_most.is_some()) {
        return Err(malformed(
            "can't have amount and amount_at_least/most at the same time",
        ));
    }

    Ok(Filter {
        what,
        asset,
        kind,
        own_funds,
        address,
        amount,
        amount_at_least,
        amount_at_most,
    })
}

fn parse_equal_search(args: &Value, op: &str) -> Result<EqualSearch, ExprError> {
    let obj = as_object(args, op)?;
    ensure_known_fields(obj, &["equal_fields", "search_criteria"], op)?;

    let raw_fields = match obj.get("equal_fields").and_then(Value::as_array) {
        Some(list) if !list.is_empty() => list,
        _ => return Err(malformed("no equal_fields")),
    };
    let mut equal_fields = Vec::with_capacity(raw_fields.len());
    for raw in raw_fields {
        let field = raw
            .as_str()
            .and_then(EqualField::parse)
            .ok_or_else(|| malformed(format!("unknown field: {}", describe(Some(raw)))))?;
        if equal_fields.contains(&field) {
            return Err(malformed(format!("duplicate {}", field.as_str())));
        }
        equal_fields.push(field);
    }

    let (first, second) = match obj.get("search_criteria").and_then(Value::as_array).map(Vec::as_slice) {
        Some([a, b]) => (a, b),
        _ => return Err(malformed("search_criteria must be 2-element array")),
    };
    let search_criteria = [parse_filter(Some(first))?, parse_filter(Some(second))?];
    if equal_fields.contains(&EqualField::Type)
        && search_criteria.iter().any(|f| f.what == FilterTarget::Output)
    {
        return Err(malformed("outputs cannot have type"));
    }

    Ok(EqualSearch {
        equal_fields,
        search_criteria,
    })
}
