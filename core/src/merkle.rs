// SPDX-License-Identifier: Apache-2.0
//! Merkle proofs over oracle-posted element lists.
//!
//! Hashes are base64 strings: a leaf is `sha256_b64(element)` and a parent
//! is `sha256_b64(left ++ right)` over the two base64 strings. An odd node
//! at the end of a level is paired with itself. Proofs travel as
//! `index-sibling1-…-siblingN-root`.

use core::fmt;
use core::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rs_merkle::{Hasher as MerkleHasher, MerkleTree};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::hash::sha256_b64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleProofError {
    #[error("merkle proof must have at least an index and a root")]
    TooShort,
    #[error("bad merkle proof index: {0}")]
    BadIndex(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    /// 0-based position of the leaf from the left
    pub index: u64,
    /// sibling hashes from bottom to top
    pub siblings: Vec<String>,
    pub root: String,
}

impl FromStr for MerkleProof {
    type Err = MerkleProofError;

    fn from_str(serialized: &str) -> Result<Self, Self::Err> {
        let mut parts: Vec<&str> = serialized.split('-').collect();
        if parts.len() < 2 {
            return Err(MerkleProofError::TooShort);
        }
        let root = parts.pop().unwrap_or_default().to_owned();
        let index = parts[0]
            .parse::<u64>()
            .map_err(|_| MerkleProofError::BadIndex(parts[0].to_owned()))?;
        let siblings = parts[1..].iter().map(|s| (*s).to_owned()).collect();
        Ok(Self {
            index,
            siblings,
            root,
        })
    }
}

impl fmt::Display for MerkleProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)?;
        for sibling in &self.siblings {
            write!(f, "-{sibling}")?;
        }
        write!(f, "-{}", self.root)
    }
}

fn hash_pair(left: &str, right: &str) -> String {
    let mut joined = String::with_capacity(left.len() + right.len());
    joined.push_str(left);
    joined.push_str(right);
    sha256_b64(&joined)
}

/// Verifies that `element` sits at `proof.index` under `proof.root`.
pub fn verify_merkle_proof(element: &str, proof: &MerkleProof) -> bool {
    let mut computed = sha256_b64(element);
    let mut index = proof.index;
    for sibling in &proof.siblings {
        computed = if index % 2 == 0 {
            hash_pair(&computed, sibling) // left child + right sibling
        } else {
            hash_pair(sibling, &computed) // left sibling + right child
        };
        index /= 2;
    }
    computed == proof.root
}

////////////////////////////////////////////////////////////////
//  Tree building (rs_merkle)
////////////////////////////////////////////////////////////////

/// rs_merkle hasher for this tree shape: a parent hashes the base64 text of
/// its children, and an odd node at the end of a level is paired with itself.
#[derive(Clone)] // rs-merkle requires Hasher to be Clone
pub struct Base64Sha256Hasher;

impl MerkleHasher for Base64Sha256Hasher {
    type Hash = [u8; 32];

    fn hash(data: &[u8]) -> Self::Hash {
        Sha256::digest(data).into()
    }

    fn concat_and_hash(left: &Self::Hash, right: Option<&Self::Hash>) -> Self::Hash {
        let mut joined = STANDARD.encode(left);
        joined.push_str(&STANDARD.encode(right.unwrap_or(left)));
        Self::hash(joined.as_bytes())
    }
}

fn build_tree<S: AsRef<str>>(elements: &[S]) -> MerkleTree<Base64Sha256Hasher> {
    let hashed_leaves: Vec<[u8; 32]> = elements
        .iter()
        .map(|e| Base64Sha256Hasher::hash(e.as_ref().as_bytes()))
        .collect();
    MerkleTree::from_leaves(&hashed_leaves)
}

/// Root over `elements`, or `None` for an empty list.
pub fn merkle_root<S: AsRef<str>>(elements: &[S]) -> Option<String> {
    build_tree(elements).root().map(|root| STANDARD.encode(root))
}

/// Proof for the element at `index`, or `None` when out of range.
///
/// rs_merkle leaves out the sibling of a node that was paired with itself,
/// while the serialized proof carries one entry per level, so those entries
/// are filled in from the running hash.
pub fn merkle_proof<S: AsRef<str>>(elements: &[S], index: usize) -> Option<MerkleProof> {
    let element = elements.get(index)?;
    let tree = build_tree(elements);
    let root = tree.root()?;
    let proof = tree.proof(&[index]);
    let mut provided = proof.proof_hashes().iter();

    let mut computed = Base64Sha256Hasher::hash(element.as_ref().as_bytes());
    let mut siblings = Vec::new();
    let (mut pos, mut width) = (index, elements.len());
    while width > 1 {
        let sibling = if pos % 2 == 0 && pos + 1 == width {
            computed
        } else {
            *provided.next()?
        };
        computed = if pos % 2 == 0 {
            Base64Sha256Hasher::concat_and_hash(&computed, Some(&sibling))
        } else {
            Base64Sha256Hasher::concat_and_hash(&sibling, Some(&computed))
        };
        siblings.push(STANDARD.encode(sibling));
        pos /= 2;
        width = width.div_ceil(2);
    }
    (computed == root).then(|| MerkleProof {
        index: index as u64,
        siblings,
        root: STANDARD.encode(root),
    })
}
