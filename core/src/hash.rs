// SPDX-License-Identifier: Apache-2.0
//! Digests and address derivation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::constants::ADDRESS_LENGTH;
use crate::expr::Expr;

/// RFC 4648 base32 alphabet.
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// base64 of SHA-256 over the UTF-8 bytes of `text`.
pub fn sha256_b64(text: &str) -> String {
    STANDARD.encode(Sha256::digest(text.as_bytes()))
}

/// Chash of a definition: SHA-256 of its canonical JSON, truncated to 160
/// bits and base32-encoded. An address is the chash of its first definition.
pub fn definition_chash(expr: &Expr) -> String {
    // serde_json keeps object keys sorted, which makes this canonical
    let canonical = expr.to_value().to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    base32_encode(&digest[..20])
}

/// 32 characters of the base32 alphabet.
pub fn is_valid_address(s: &str) -> bool {
    s.len() == ADDRESS_LENGTH && s.bytes().all(|b| BASE32_ALPHABET.contains(&b))
}

/// `len` characters that decode as standard base64.
pub fn is_valid_base64(s: &str, len: usize) -> bool {
    s.len() == len && STANDARD.decode(s).is_ok()
}

fn base32_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u16 = 0;
    let mut bits = 0u32;
    for &b in bytes {
        buffer = (buffer << 8) | u16::from(b);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[usize::from((buffer >> bits) & 0x1f)] as char);
        }
        buffer &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[usize::from((buffer << (5 - bits)) & 0x1f)] as char);
    }
    out
}
