//! HMAC-SHA256 body signatures carried in the `HashSHA256` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex signature of the body as sent.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("signature header is missing")]
    Missing,

    #[error("signature is not valid hex")]
    Malformed,

    #[error("signature does not match body")]
    Mismatch,

    #[error("HMAC error: {0}")]
    Key(String),
}

/// Signs and verifies bodies with a shared secret.
///
/// # Examples
///
/// ```
/// use metrika_common::secure::Signer;
///
/// let signer = Signer::new("secret");
/// let sig = signer.sign(b"payload").unwrap();
/// assert_eq!(sig.len(), 64);
/// assert!(signer.verify(b"payload", &sig).is_ok());
/// assert!(Signer::new("other").verify(b"payload", &sig).is_err());
/// ```
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("key", &"***").finish()
    }
}

impl Signer {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: key.as_ref().to_vec(),
        }
    }

    /// Returns a signer only when a non-empty key is configured.
    pub fn from_key(key: Option<&str>) -> Option<Self> {
        key.filter(|k| !k.is_empty()).map(Self::new)
    }

    fn mac(&self, body: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|e| SignatureError::Key(e.to_string()))?;
        mac.update(body);
        Ok(mac)
    }

    /// Hex-encoded HMAC-SHA256 of `body`.
    pub fn sign(&self, body: &[u8]) -> Result<String, SignatureError> {
        Ok(hex::encode(self.mac(body)?.finalize().into_bytes()))
    }

    /// Constant-time comparison of `signature` against the HMAC of `body`.
    pub fn verify(&self, body: &[u8], signature: &str) -> Result<(), SignatureError> {
        let expected = hex::decode(signature.trim()).map_err(|_| SignatureError::Malformed)?;
        self.mac(body)?
            .verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_matches_known_vector() {
        // RFC 4231 test case 2
        let signer = Signer::new("Jefe");
        let sig = signer.sign(b"what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let signer = Signer::new("k");
        let sig = signer.sign(b"body").unwrap();
        assert!(matches!(
            signer.verify(b"b0dy", &sig),
            Err(SignatureError::Mismatch)
        ));
    }

    #[test]
    fn verify_rejects_non_hex() {
        let signer = Signer::new("k");
        assert!(matches!(
            signer.verify(b"body", "zz"),
            Err(SignatureError::Malformed)
        ));
    }

    #[test]
    fn empty_key_means_no_signer() {
        assert!(Signer::from_key(Some("")).is_none());
        assert!(Signer::from_key(None).is_none());
        assert!(Signer::from_key(Some("k")).is_some());
    }
}
