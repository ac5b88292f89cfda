// SPDX-License-Identifier: Apache-2.0
//! Shared data model for address and asset definitions.
//!
//! Everything in here is pure: the definition tree and its parse boundary,
//! the unit/message model the definitions are evaluated against, and the
//! hashing, Merkle and signature primitives the evaluator leans on.

pub mod expr;
pub mod hash;
pub mod merkle;
mod parse;
pub mod sig;
pub mod unit;

pub use expr::{
    AddressSelector, AssetSelector, ChashRef, EqualField, EqualSearch, Expr, ExprError, FeedValue,
    Filter, FilterTarget, Relation, SubjectRef, SumCondition, Weighted,
};
pub use hash::{definition_chash, is_valid_address, is_valid_base64, sha256_b64};
pub use merkle::{merkle_proof, merkle_root, verify_merkle_proof, MerkleProof, MerkleProofError};
pub use sig::{Secp256k1Verifier, SignatureVerifier};
pub use unit::{
    Author, DefinitionChange, Input, InputKind, Message, Output, PaymentPayload, Unit,
};

////////////////////////////////////////////////////////////////
//  Public constants (grouped so callers can use `constants::*`)
////////////////////////////////////////////////////////////////
pub mod constants {
    //! Values that both the engine and its callers need.

    /// Upper bound on the abstract cost of one validation or evaluation.
    pub const MAX_COMPLEXITY: u32 = 100;
    /// Upper bound on the number of recursive steps, formulas included.
    pub const MAX_OPS: u32 = 2000;

    /// base64 of a 33-byte compressed secp256k1 point
    pub const PUBKEY_LENGTH: usize = 44;
    /// base64 of a 32-byte digest
    pub const HASH_LENGTH: usize = 44;
    /// base32 of a 160-bit chash
    pub const ADDRESS_LENGTH: usize = 32;

    pub const MAX_DATA_FEED_NAME_LENGTH: usize = 64;
    pub const MAX_DATA_FEED_VALUE_LENGTH: usize = 64;

    /// Path of the root node in the authentifier map.
    pub const ROOT_PATH: &str = "r";
}
