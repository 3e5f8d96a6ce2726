//! Webhook signature verification
//!
//! The commerce processor signs each webhook delivery with HMAC-SHA256 over
//! the raw request body and sends the hex digest in a header. Verification
//! must run over the exact bytes received; re-serializing the parsed JSON
//! changes whitespace and key order and breaks the digest.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify a webhook signature against the raw payload bytes.
///
/// Returns `false` on any mismatch, missing secret, missing signature, or
/// malformed hex. Never errors; the caller decides whether a failure is a
/// 401 or a warn-and-continue.
pub fn verify(payload: &[u8], signature: &str, secret: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        return false;
    }

    let provided = match hex::decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    let computed = mac.finalize().into_bytes();

    // ct_eq handles unequal lengths by returning false
    computed.as_slice().ct_eq(provided.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::Mac;

    fn sign(payload: &[u8], secret: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = br#"{"event":{"type":"charge:confirmed","data":{"id":"ch_1"}}}"#;
        let sig = sign(payload, "whsec_test");
        assert!(verify(payload, &sig, "whsec_test"));
    }

    #[test]
    fn test_any_flipped_byte_rejected() {
        let payload = br#"{"event":{"type":"charge:confirmed","data":{"id":"ch_1"}}}"#.to_vec();
        let sig = sign(&payload, "whsec_test");

        for i in 0..payload.len() {
            let mut tampered = payload.clone();
            tampered[i] ^= 0x01;
            assert!(
                !verify(&tampered, &sig, "whsec_test"),
                "flipping byte {} should invalidate the signature",
                i
            );
        }
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = b"payload";
        let sig = sign(payload, "secret-a");
        assert!(!verify(payload, &sig, "secret-b"));
    }

    #[test]
    fn test_missing_material_rejected() {
        let payload = b"payload";
        let sig = sign(payload, "secret");
        assert!(!verify(payload, "", "secret"));
        assert!(!verify(payload, &sig, ""));
        assert!(!verify(payload, "not-hex!", "secret"));
    }

    #[test]
    fn test_truncated_signature_rejected() {
        let payload = b"payload";
        let sig = sign(payload, "secret");
        assert!(!verify(payload, &sig[..32], "secret"));
    }
}
