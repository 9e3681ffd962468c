//! `client_signature` generation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{SessionError, SessionResult};

type HmacSha256 = Hmac<Sha256>;

/// Fields sent with a `client_signature` grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureData {
    pub client_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub nonce: String,
    pub data: String,
    pub signature: String,
}

/// Signs authentication requests with the client secret.
///
/// Nonces come from a counter seeded once from the OS RNG, so two signers
/// never start from the same value and one signer never repeats itself.
pub struct RequestSigner {
    client_id: String,
    client_secret: String,
    nonce: AtomicU64,
}

impl RequestSigner {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        // Headroom so the counter cannot wrap in practice.
        let seed = OsRng.next_u64() / 8;
        Self::with_seed(client_id, client_secret, seed)
    }

    pub fn with_seed(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        seed: u64,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            nonce: AtomicU64::new(seed),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Sign `data` with the current time and a fresh nonce.
    pub fn sign(&self, data: &str) -> SessionResult<SignatureData> {
        let timestamp = Utc::now().timestamp_millis();
        let nonce = self.next_nonce().to_string();
        let signature = signature(&self.client_secret, timestamp, &nonce, data)?;
        Ok(SignatureData {
            client_id: self.client_id.clone(),
            timestamp,
            nonce,
            data: data.to_string(),
            signature,
        })
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSigner")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Hex HMAC-SHA256 of `"{timestamp}\n{nonce}\n{data}"` keyed by `secret`.
pub fn signature(secret: &str, timestamp: i64, nonce: &str, data: &str) -> SessionResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SessionError::Config(format!("invalid client secret: {}", e)))?;
    mac.update(format!("{}\n{}\n{}", timestamp, nonce, data).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_deterministic_hex() {
        let a = signature("secret", 1_576_074_319_000, "1iqt2wls", "").unwrap();
        let b = signature("secret", 1_576_074_319_000, "1iqt2wls", "").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_signature_depends_on_every_field() {
        let base = signature("secret", 1, "n", "d").unwrap();
        assert_ne!(base, signature("other", 1, "n", "d").unwrap());
        assert_ne!(base, signature("secret", 2, "n", "d").unwrap());
        assert_ne!(base, signature("secret", 1, "m", "d").unwrap());
        assert_ne!(base, signature("secret", 1, "n", "e").unwrap());
    }

    #[test]
    fn test_nonce_monotonic_from_seed() {
        let signer = RequestSigner::with_seed("id", "secret", 41);
        assert_eq!(signer.next_nonce(), 42);
        assert_eq!(signer.next_nonce(), 43);
    }

    #[test]
    fn test_random_seeds_differ() {
        let a = RequestSigner::new("id", "secret");
        let b = RequestSigner::new("id", "secret");
        assert_ne!(a.next_nonce(), b.next_nonce());
    }

    #[test]
    fn test_sign_fills_fields() {
        let signer = RequestSigner::with_seed("client", "secret", 0);
        let signed = signer.sign("payload").unwrap();
        assert_eq!(signed.client_id, "client");
        assert_eq!(signed.nonce, "1");
        assert_eq!(signed.data, "payload");
        assert_eq!(
            signed.signature,
            signature("secret", signed.timestamp, "1", "payload").unwrap()
        );
    }

    #[test]
    fn test_debug_hides_secret() {
        let signer = RequestSigner::new("client", "super-secret");
        assert!(!format!("{:?}", signer).contains("super-secret"));
    }
}
