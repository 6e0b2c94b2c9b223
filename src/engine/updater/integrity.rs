//! Integrity checking of downloaded files

use super::digest::ContentDigest;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityValidator;

impl IntegrityValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check `bytes` against an algorithm-tagged digest.
    ///
    /// A mismatch, an unknown algorithm or a malformed digest all yield false.
    pub fn verify(&self, bytes: &[u8], declared: &str) -> bool {
        let expected = match ContentDigest::parse(declared) {
            Ok(digest) => digest,
            Err(e) => {
                warn!(declared, error = %e, "Cannot verify against declared digest");
                return false;
            }
        };

        ContentDigest::compute(expected.algorithm, bytes) == expected
    }

    /// Digest of `bytes` using the algorithm named by `declared`, for error reports
    pub fn actual_digest(&self, bytes: &[u8], declared: &str) -> String {
        match ContentDigest::parse(declared) {
            Ok(expected) => ContentDigest::compute(expected.algorithm, bytes).to_string(),
            Err(_) => ContentDigest::sha256(bytes).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::updater::digest::DigestAlgorithm;

    const HELLO: &str = "sha256-b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_checksum_verification_success() {
        assert!(IntegrityValidator::new().verify(b"hello world", HELLO));
        assert!(IntegrityValidator::new().verify(b"hello world", &HELLO.to_uppercase()));
    }

    #[test]
    fn test_checksum_verification_failure() {
        let validator = IntegrityValidator::new();
        assert!(!validator.verify(b"hello world!", HELLO));
        assert!(!validator.verify(b"hello world", "wrongchecksum"));
        assert!(!validator.verify(b"hello world", "crc32-0000"));
    }

    #[test]
    fn test_single_bit_mutation_detected() {
        let validator = IntegrityValidator::new();
        let original: Vec<u8> = (0u8..=255).collect();
        let declared = ContentDigest::compute(DigestAlgorithm::Sha512, &original).to_string();
        assert!(validator.verify(&original, &declared));

        for byte in 0..original.len() {
            for bit in 0..8 {
                let mut mutated = original.clone();
                mutated[byte] ^= 1 << bit;
                assert!(!validator.verify(&mutated, &declared));
            }
        }
    }

    #[test]
    fn test_actual_digest() {
        assert_eq!(IntegrityValidator::new().actual_digest(b"hello world", HELLO), HELLO);
    }
}
