//! Manifest Verification
//!
//! Fetches the channel manifest and checks its signature before anything
//! else is allowed to look at it. Signatures are ED25519 or RSA PKCS#1 v1.5
//! over SHA-256, depending on the configured key type.

use super::canonical::signed_payload;
use super::download::{manifest_request_url, Transport};
use super::error::{Result, UpdateError};
use super::manifest::{Channel, Manifest, TrustedManifest};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use rsa::pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier as _;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Signature scheme of the configured public key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum KeyType {
    /// Hex-encoded 32-byte key
    #[default]
    #[serde(rename = "ed25519")]
    #[value(name = "ed25519")]
    Ed25519,
    /// PEM SubjectPublicKeyInfo; PKCS#1 v1.5 signatures over SHA-256
    #[serde(rename = "rsa-pkcs1-sha256")]
    #[value(name = "rsa-pkcs1-sha256")]
    RsaPkcs1Sha256,
}

/// Parsed manifest signing key
pub enum PublicKey {
    Ed25519(VerifyingKey),
    Rsa {
        key: RsaVerifyingKey<Sha256>,
        /// Modulus length, which is also the signature length
        size: usize,
    },
}

impl PublicKey {
    pub fn parse(key_type: KeyType, encoded: &str) -> Result<Self> {
        match key_type {
            KeyType::Ed25519 => ManifestVerifier::public_key_from_hex(encoded).map(Self::Ed25519),
            KeyType::RsaPkcs1Sha256 => {
                let key = RsaPublicKey::from_public_key_pem(encoded.trim())
                    .map_err(|e| UpdateError::Trust(format!("invalid RSA public key: {}", e)))?;
                let size = key.size();
                Ok(Self::Rsa {
                    key: RsaVerifyingKey::new(key),
                    size,
                })
            }
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Ed25519(_) => KeyType::Ed25519,
            Self::Rsa { .. } => KeyType::RsaPkcs1Sha256,
        }
    }

    fn verify(&self, message: &[u8], encoded_signature: &str) -> Result<()> {
        let invalid = || UpdateError::Trust("invalid manifest signature".to_string());
        match self {
            Self::Ed25519(key) => {
                let bytes: [u8; 64] = decode_signature(encoded_signature, 64)?
                    .try_into()
                    .map_err(|_| UpdateError::Trust("invalid signature length".to_string()))?;
                key.verify(message, &Signature::from_bytes(&bytes))
                    .map_err(|_| invalid())
            }
            Self::Rsa { key, size } => {
                let bytes = decode_signature(encoded_signature, *size)?;
                if bytes.len() != *size {
                    return Err(UpdateError::Trust("invalid signature length".to_string()));
                }
                let signature = RsaSignature::try_from(bytes.as_slice()).map_err(|_| invalid())?;
                key.verify(message, &signature).map_err(|_| invalid())
            }
        }
    }
}

impl From<VerifyingKey> for PublicKey {
    fn from(key: VerifyingKey) -> Self {
        Self::Ed25519(key)
    }
}

/// Fetches and verifies signed manifests
pub struct ManifestVerifier {
    transport: Arc<dyn Transport>,
    manifest_url: String,
    /// Embedded public key for signature verification
    public_key: Option<PublicKey>,
    /// Accept manifests without a signature (developer builds)
    allow_unsigned: bool,
}

impl ManifestVerifier {
    pub fn new(
        transport: Arc<dyn Transport>,
        manifest_url: impl Into<String>,
        public_key: Option<PublicKey>,
        allow_unsigned: bool,
    ) -> Self {
        Self {
            transport,
            manifest_url: manifest_url.into(),
            public_key,
            allow_unsigned,
        }
    }

    /// Parse a hex-encoded 32-byte ED25519 public key
    pub fn public_key_from_hex(key_hex: &str) -> Result<VerifyingKey> {
        let bytes = hex::decode(key_hex.trim())
            .map_err(|e| UpdateError::Trust(format!("invalid public key encoding: {}", e)))?;
        let key_bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| UpdateError::Trust("public key must be 32 bytes".to_string()))?;
        VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| UpdateError::Trust("invalid public key".to_string()))
    }

    /// Fetch the manifest for `channel` and verify it.
    ///
    /// Neither network nor trust failures are retried here.
    pub async fn fetch_and_verify(&self, channel: Channel) -> Result<TrustedManifest> {
        let url = manifest_request_url(&self.manifest_url, channel.as_str())?;
        let body = self.transport.get(&url, &mut |_: u64| {}).await?;
        debug!(bytes = body.len(), "Fetched manifest");

        let manifest = self.verify_document(&body)?;
        if manifest.channel != channel {
            warn!(
                requested = %channel,
                received = %manifest.channel,
                "Manifest channel does not match the requested channel"
            );
        }
        Ok(manifest)
    }

    /// Verify a raw manifest document
    pub fn verify_document(&self, body: &[u8]) -> Result<TrustedManifest> {
        let document: Value = serde_json::from_slice(body)
            .map_err(|e| UpdateError::Trust(format!("malformed manifest JSON: {}", e)))?;

        let signature = match document.get("signature") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(UpdateError::Trust("signature must be a string".to_string()));
            }
        };

        let signed = match signature {
            Some(signature) => {
                self.verify_signature(&document, &signature)?;
                true
            }
            None if self.allow_unsigned => {
                warn!("Manifest carries no signature; accepting it as an unsigned developer build");
                false
            }
            None => {
                return Err(UpdateError::Trust("manifest is not signed".to_string()));
            }
        };

        let manifest: Manifest = serde_json::from_value(document)
            .map_err(|e| UpdateError::Trust(format!("malformed manifest: {}", e)))?;
        manifest.check_unique_paths()?;

        info!(version = %manifest.version, files = manifest.files.len(), signed, "Manifest trusted");
        Ok(TrustedManifest::new(manifest, signed))
    }

    /// Check the signature over the canonical `{version, files}` payload
    fn verify_signature(&self, document: &Value, signature: &str) -> Result<()> {
        let Some(public_key) = &self.public_key else {
            return Err(UpdateError::Trust(
                "manifest is signed but no public key is configured".to_string(),
            ));
        };

        let (Some(version), Some(files)) = (document.get("version"), document.get("files")) else {
            return Err(UpdateError::Trust("manifest lacks version or files".to_string()));
        };

        let message = signed_payload(version, files)
            .map_err(|e| UpdateError::Trust(format!("cannot serialize signed payload: {}", e)))?;
        public_key.verify(&message, signature)
    }
}

/// Signatures are base64; a hex string of exactly `expected_len` bytes is accepted too
fn decode_signature(encoded: &str, expected_len: usize) -> Result<Vec<u8>> {
    let encoded = encoded.trim();
    if encoded.len() == expected_len * 2 && encoded.bytes().all(|b| b.is_ascii_hexdigit()) {
        return hex::decode(encoded).map_err(|e| UpdateError::Trust(e.to_string()));
    }
    STANDARD
        .decode(encoded)
        .map_err(|e| UpdateError::Trust(format!("invalid signature encoding: {}", e)))
}
