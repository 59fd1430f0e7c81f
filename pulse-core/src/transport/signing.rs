//! HMAC-SHA256 request and response signatures.

use crate::error::{PulseError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Header carrying the hex-encoded signature of the uncompressed body.
pub const HEADER_SIGNATURE: &str = "HashSHA256";

type HmacSha256 = Hmac<Sha256>;

fn mac(key: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| PulseError::SignatureInvalid { reason: e.to_string() })
}

/// Hex-encoded HMAC-SHA256 of `body` under `key`.
pub fn sign(body: &[u8], key: &str) -> Result<String> {
    let mut mac = mac(key)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature against `body`.
pub fn verify(signature: &str, body: &[u8], key: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = mac(key) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
