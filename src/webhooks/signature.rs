//! Webhook signature verification using HMAC-SHA256.
//!
//! Deliveries are signed with a shared secret and carry the signature in
//! the `X-Hub-Signature-256` header as `sha256=<hex>`. A target may define its
//! own secret; otherwise the global secret applies. With no secret at all,
//! verification is disabled.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Parses a signature header (e.g. `sha256=abc123...`) into raw bytes.
///
/// Returns `None` for malformed headers. Never panics.
///
/// ```
/// use pages_builder::webhooks::parse_signature_header;
///
/// assert!(parse_signature_header("sha256=abcd1234").is_some());
/// assert!(parse_signature_header("abcd1234").is_none());
/// assert!(parse_signature_header("sha1=abcd1234").is_none());
/// assert!(parse_signature_header("sha256=xyz").is_none());
/// ```
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("sha256=")?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 signature of a payload.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as a `sha256=<hex>` header value.
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Verifies a signature header against the payload and secret.
///
/// Uses constant-time comparison.
///
/// ```
/// use pages_builder::webhooks::{compute_signature, format_signature_header, verify_signature};
///
/// let header = format_signature_header(&compute_signature(b"payload", b"secret"));
/// assert!(verify_signature(b"payload", &header, b"secret"));
/// assert!(!verify_signature(b"payload", &header, b"wrong"));
/// ```
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected_signature) = parse_signature_header(signature_header) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);

    mac.verify_slice(&expected_signature).is_ok()
}

/// Secrets loaded at startup: the global one plus one slot per target,
/// indexed like `Config::builders`.
#[derive(Debug, Clone, Default)]
pub struct WebhookSecrets {
    default: Option<Vec<u8>>,
    per_target: Vec<Option<Vec<u8>>>,
}

impl WebhookSecrets {
    pub fn new(default: Option<Vec<u8>>, per_target: Vec<Option<Vec<u8>>>) -> Self {
        WebhookSecrets {
            default,
            per_target,
        }
    }

    /// True if no secret is configured anywhere.
    pub fn is_disabled(&self) -> bool {
        self.default.is_none() && self.per_target.iter().all(Option::is_none)
    }

    /// Picks the key for a delivery matching the given target indices.
    ///
    /// The first matched target with its own secret wins; otherwise the
    /// global secret is used.
    pub fn key_for(&self, matched_targets: &[usize]) -> Option<&[u8]> {
        matched_targets
            .iter()
            .find_map(|&i| self.per_target.get(i).and_then(|s| s.as_deref()))
            .or(self.default.as_deref())
    }

    /// Checks a delivery. Always passes when no key applies.
    pub fn verify(&self, payload: &[u8], header: Option<&str>, matched_targets: &[usize]) -> bool {
        match self.key_for(matched_targets) {
            None => true,
            Some(key) => header.is_some_and(|h| verify_signature(payload, h, key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_signature_header_valid() {
        assert_eq!(
            parse_signature_header("sha256=1234abcd"),
            Some(vec![0x12, 0x34, 0xab, 0xcd])
        );
    }

    #[test]
    fn parse_signature_header_odd_length_hex() {
        assert_eq!(parse_signature_header("sha256=abc"), None);
    }

    #[test]
    fn verify_signature_malformed_header_returns_false() {
        for header in ["", "sha256=", "sha256=invalid", "sha1=abc123", "not-a-header"] {
            assert!(!verify_signature(b"test", header, b"secret"));
        }
    }

    #[test]
    fn format_signature_header_is_lowercase_hex() {
        assert_eq!(
            format_signature_header(&[0x12, 0x34, 0xab, 0xcd]),
            "sha256=1234abcd"
        );
    }

    #[test]
    fn secrets_disabled_accepts_anything() {
        let secrets = WebhookSecrets::default();
        assert!(secrets.is_disabled());
        assert!(secrets.verify(b"payload", None, &[0]));
    }

    #[test]
    fn target_secret_overrides_default() {
        let secrets = WebhookSecrets::new(
            Some(b"default".to_vec()),
            vec![None, Some(b"pages".to_vec())],
        );
        assert_eq!(secrets.key_for(&[]), Some(&b"default"[..]));
        assert_eq!(secrets.key_for(&[0]), Some(&b"default"[..]));
        assert_eq!(secrets.key_for(&[1]), Some(&b"pages"[..]));
        assert_eq!(secrets.key_for(&[0, 1]), Some(&b"pages"[..]));

        let signed_with_pages = format_signature_header(&compute_signature(b"body", b"pages"));
        assert!(secrets.verify(b"body", Some(&signed_with_pages), &[1]));
        assert!(!secrets.verify(b"body", Some(&signed_with_pages), &[0]));
    }

    #[test]
    fn missing_header_fails_when_key_applies() {
        let secrets = WebhookSecrets::new(Some(b"default".to_vec()), vec![]);
        assert!(!secrets.is_disabled());
        assert!(!secrets.verify(b"body", None, &[]));
    }

    #[test]
    fn target_only_secret_leaves_other_targets_open() {
        let secrets = WebhookSecrets::new(None, vec![None, Some(b"pages".to_vec())]);
        assert!(secrets.verify(b"body", None, &[0]));
        assert!(!secrets.verify(b"body", None, &[1]));
    }

    proptest! {
        #[test]
        fn prop_sign_verify_roundtrip(payload: Vec<u8>, secret: Vec<u8>) {
            let header = format_signature_header(&compute_signature(&payload, &secret));
            prop_assert!(verify_signature(&payload, &header, &secret));
        }

        #[test]
        fn prop_modified_payload_fails(original: Vec<u8>, modified: Vec<u8>, secret: Vec<u8>) {
            prop_assume!(original != modified);
            let header = format_signature_header(&compute_signature(&original, &secret));
            prop_assert!(!verify_signature(&modified, &header, &secret));
        }

        #[test]
        fn prop_malformed_header_no_panic(header: String, payload: Vec<u8>, secret: Vec<u8>) {
            let _ = verify_signature(&payload, &header, &secret);
        }
    }
}
