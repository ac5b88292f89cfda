// SPDX-License-Identifier: Apache-2.0
//! secp256k1 signatures over the 32-byte hash a unit is signed by.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature, VerifyingKey};

/// Checks a base64 signature against a base64 public key.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, hash_to_sign: &[u8; 32], signature: &str, pubkey: &str) -> bool;
}

/// Compressed-point keys, compact `r‖s` signatures, low-S only.
#[derive(Clone, Copy, Debug, Default)]
pub struct Secp256k1Verifier;

impl SignatureVerifier for Secp256k1Verifier {
    fn verify(&self, hash_to_sign: &[u8; 32], signature: &str, pubkey: &str) -> bool {
        let Ok(pk) = STANDARD.decode(pubkey) else {
            return false;
        };
        let Ok(sig) = STANDARD.decode(signature) else {
            return false;
        };
        let Ok(vk) = VerifyingKey::from_sec1_bytes(&pk) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(&sig) else {
            return false;
        };
        vk.verify_prehash(hash_to_sign, &sig).is_ok()
    }
}

/// base64 of the compressed SEC1 encoding (44 characters).
pub fn encode_pubkey(key: &VerifyingKey) -> String {
    STANDARD.encode(key.to_encoded_point(true).as_bytes())
}

/// base64 of the 64-byte `r‖s` form.
pub fn encode_signature(sig: &Signature) -> String {
    STANDARD.encode(sig.to_bytes())
}

#[cfg(test)]
mod tests {
    use k256::ecdsa::SigningKey;

    use super::*;
    use crate::constants::PUBKEY_LENGTH;

    fn key(byte: u8) -> SigningKey {
        SigningKey::from_slice(&[byte; 32]).unwrap()
    }

    fn sign(sk: &SigningKey, hash: &[u8; 32]) -> String {
        let (sig, _recovery_id) = sk.sign_prehash_recoverable(hash).unwrap();
        encode_signature(&sig)
    }

    #[test]
    fn pubkeys_are_44_chars() {
        assert_eq!(encode_pubkey(key(7).verifying_key()).len(), PUBKEY_LENGTH);
    }

    #[test]
    fn verifies_own_signature_only() {
        let hash = [42u8; 32];
        let alice = key(1);
        let bob = key(2);
        let sig = sign(&alice, &hash);

        let verifier = Secp256k1Verifier;
        assert!(verifier.verify(&hash, &sig, &encode_pubkey(alice.verifying_key())));
        assert!(!verifier.verify(&hash, &sig, &encode_pubkey(bob.verifying_key())));
        assert!(!verifier.verify(&[0u8; 32], &sig, &encode_pubkey(alice.verifying_key())));
    }

    #[test]
    fn garbage_is_rejected_not_panicking() {
        let verifier = Secp256k1Verifier;
        let pk = encode_pubkey(key(1).verifying_key());
        assert!(!verifier.verify(&[0u8; 32], "not base64!", &pk));
        assert!(!verifier.verify(&[0u8; 32], "AAAA", &pk));
        assert!(!verifier.verify(&[0u8; 32], &"A".repeat(88), "AAAA"));
    }
}
