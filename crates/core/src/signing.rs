//! HMAC-SHA256 request signing shared by the adapter endpoint and its client.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// Request header carrying the hex HMAC-SHA256 of the raw body bytes.
pub const SIGNATURE_HEADER: &str = "X-Entangled-Signature";

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 over `payload`. The signature must be computed
/// over the exact bytes that go on the wire.
pub fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return sha256_hex(payload),
    };
    mac.update(payload);
    encode_hex(mac.finalize().into_bytes().as_slice())
}

/// Constant-time verification of a hex signature against `payload`.
pub fn verify_hmac_hex(secret: &[u8], payload: &[u8], provided: &str) -> bool {
    let Some(provided_bytes) = decode_hex(provided) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&provided_bytes).is_ok()
}

pub fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    encode_hex(digest.as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    let mut output = Vec::with_capacity(input.len() / 2);
    let digits = input.as_bytes();
    for pair in digits.chunks(2) {
        let high = hex_value(pair[0])?;
        let low = hex_value(pair[1])?;
        output.push((high << 4) | low);
    }
    Some(output)
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}
