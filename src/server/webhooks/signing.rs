//! HMAC-SHA256 signatures for webhook payloads

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Sent as `X-Webhook-Signature`; header names are case-insensitive
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Lowercase hex HMAC-SHA256 of `payload` keyed by `secret`
pub fn sign(secret: &str, payload: &[u8]) -> Option<String> {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return None;
    };
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Random signing secret handed out when a webhook is created without one
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("whsec_{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            sign("Jefe", b"what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_any_key_length_signs() {
        for secret in [String::new(), "k".repeat(1024)] {
            let signature = sign(&secret, b"{}").unwrap();
            assert_eq!(signature.len(), 64);
            assert!(verify(&secret, b"{}", &signature));
        }
    }

    #[test]
    fn test_verify_accepts_own_signature() {
        let body = br#"{"event":"call.ended","timestamp":"2025-01-01T00:00:00Z","data":{}}"#;
        let signature = sign("s3cret", body).unwrap();
        assert!(verify("s3cret", body, &signature));
        assert!(verify("s3cret", body, &signature.to_uppercase()));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let signature = sign("s3cret", b"original").unwrap();
        assert!(!verify("s3cret", b"tampered", &signature));
        assert!(!verify("other", b"original", &signature));
        assert!(!verify("s3cret", b"original", "not-hex"));
        assert!(!verify("s3cret", b"original", ""));
    }

    #[test]
    fn test_generated_secrets_differ() {
        let a = generate_secret();
        assert!(a.starts_with("whsec_"));
        assert_eq!(a.len(), "whsec_".len() + 48);
        assert_ne!(a, generate_secret());
    }
}
