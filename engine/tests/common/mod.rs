#![allow(dead_code)]

use std::collections::BTreeMap;

use definition_core::sig::{encode_pubkey, encode_signature};
use definition_core::{definition_chash, Author, Expr, Unit};
use definition_engine::{UpgradeSchedule, ValidationContext};
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};

/// What every test unit is signed over.
pub const HASH_TO_SIGN: [u8; 32] = [0x5a; 32];
pub const LAST_BALL_MCI: u64 = 1_000;

pub const ORACLE: &str = "ORACLEORACLEORACLEORACLEORACLE22";
pub const STRANGER: &str = "STRANGERSTRANGERSTRANGERSTRANGER";

pub fn key(secret: u8) -> SigningKey {
    SigningKey::from_slice(&[secret; 32]).unwrap()
}

pub fn pubkey(secret: u8) -> String {
    encode_pubkey(key(secret).verifying_key())
}

pub fn sign(secret: u8) -> String {
    let (sig, _) = key(secret).sign_prehash_recoverable(&HASH_TO_SIGN).unwrap();
    encode_signature(&sig)
}

pub fn sig(secret: u8) -> Value {
    json!(["sig", {"pubkey": pubkey(secret)}])
}

pub fn expr(v: Value) -> Expr {
    Expr::try_from(v).unwrap()
}

pub fn ctx() -> ValidationContext {
    ValidationContext::new(LAST_BALL_MCI, HASH_TO_SIGN).with_upgrades(UpgradeSchedule::all_active())
}

pub fn authentifiers<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
}

/// A unit authored by the address of `definition`.
pub fn unit_for(definition: &Expr) -> (String, Unit) {
    let address = definition_chash(definition);
    let unit = Unit {
        authors: vec![Author::new(address.clone())],
        ..Unit::default()
    };
    (address, unit)
}
