// src/crypto.rs
use anyhow::{anyhow, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::hmac;

/// HMAC-SHA256 sealing of opaque payloads into `payload.signature` strings.
#[derive(Clone)]
pub struct Signer {
    key: hmac::Key,
}

impl Signer {
    pub fn new(secret: &[u8]) -> Self {
        Signer {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    pub fn seal(&self, payload: &[u8]) -> String {
        let body = URL_SAFE_NO_PAD.encode(payload);
        let tag = hmac::sign(&self.key, body.as_bytes());
        format!("{}.{}", body, URL_SAFE_NO_PAD.encode(tag.as_ref()))
    }

    /// Checks the signature (constant time) and returns the payload bytes.
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>> {
        let (body, signature) = sealed
            .split_once('.')
            .ok_or_else(|| anyhow!("malformed token"))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| anyhow!("invalid signature encoding: {}", e))?;

        hmac::verify(&self.key, body.as_bytes(), &signature)
            .map_err(|_| anyhow!("signature mismatch"))?;

        URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| anyhow!("invalid payload encoding: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_returns_sealed_payload() {
        let signer = Signer::new(b"secret");
        let sealed = signer.seal(b"{\"sub\":1}");
        assert_eq!(signer.open(&sealed).unwrap(), b"{\"sub\":1}".to_vec());
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let sealed = Signer::new(b"secret").seal(b"payload");
        assert!(Signer::new(b"other").open(&sealed).is_err());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let signer = Signer::new(b"secret");
        let sealed = signer.seal(b"payload");
        let (_, sig) = sealed.split_once('.').unwrap();
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode(b"admin"), sig);
        assert!(signer.open(&forged).is_err());
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        let signer = Signer::new(b"secret");
        assert!(signer.open("no-dot-here").is_err());
        assert!(signer.open("abc.!!!").is_err());
        assert!(signer.open("").is_err());
    }
}
