//! Checksum utilities for source provenance

use crate::error::{Result, StageloadError};
use crate::types::ChecksumAlgorithm;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

/// Compute checksum for an in-memory buffer
pub fn compute_bytes_checksum(data: &[u8], algorithm: ChecksumAlgorithm) -> String {
    match algorithm {
        ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
    }
}

/// Verify that a buffer matches an expected checksum (case-insensitive hex)
pub fn verify_bytes_checksum(
    data: &[u8],
    expected: &str,
    algorithm: ChecksumAlgorithm,
) -> Result<()> {
    let actual = compute_bytes_checksum(data, algorithm);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(StageloadError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// A published digest, written `<algorithm>:<hex>` (e.g. `sha256:9f86…`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedChecksum {
    pub algorithm: ChecksumAlgorithm,
    pub hex: String,
}

impl ExpectedChecksum {
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        verify_bytes_checksum(data, &self.hex, self.algorithm)
    }
}

impl FromStr for ExpectedChecksum {
    type Err = StageloadError;

    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, hex) = s.split_once(':').ok_or_else(|| {
            StageloadError::Config(format!("checksum must be '<algorithm>:<hex>', got '{}'", s))
        })?;
        let algorithm: ChecksumAlgorithm = algorithm.parse()?;

        let hex = hex.trim();
        let expected_len = match algorithm {
            ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Sha512 => 128,
        };
        if hex.len() != expected_len || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StageloadError::Config(format!(
                "{} checksum must be {} hex characters",
                algorithm, expected_len
            )));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }
}

impl fmt::Display for ExpectedChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_compute_bytes_checksum() {
        assert_eq!(
            compute_bytes_checksum(b"hello world", ChecksumAlgorithm::Sha256),
            HELLO_SHA256
        );
        assert_eq!(
            compute_bytes_checksum(b"hello world", ChecksumAlgorithm::Sha512),
            "309ecc489c12d6eb4cc40f50c902f2b4d0ed77ee511a7c7a9bcd3ca86d4cd86f989dd35bc5ff499670da34255b45b0cfd830e81f605dcf7dc5542e93ae9cd76f"
        );
    }

    #[test]
    fn test_verify_bytes_checksum() {
        assert!(verify_bytes_checksum(
            b"hello world",
            &HELLO_SHA256.to_uppercase(),
            ChecksumAlgorithm::Sha256
        )
        .is_ok());

        let err = verify_bytes_checksum(b"hello", HELLO_SHA256, ChecksumAlgorithm::Sha256)
            .unwrap_err();
        assert!(matches!(err, StageloadError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_expected_checksum_parsing() {
        let expected: ExpectedChecksum = format!("SHA256:{}", HELLO_SHA256.to_uppercase())
            .parse()
            .unwrap();
        assert_eq!(expected.algorithm, ChecksumAlgorithm::Sha256);
        assert_eq!(expected.to_string(), format!("sha256:{}", HELLO_SHA256));
        assert!(expected.verify(b"hello world").is_ok());
        assert!(expected.verify(b"hello").is_err());

        let sha512 = format!(
            "sha512:{}",
            compute_bytes_checksum(b"hello world", ChecksumAlgorithm::Sha512)
        );
        let expected: ExpectedChecksum = sha512.parse().unwrap();
        assert!(expected.verify(b"hello world").is_ok());

        assert!(HELLO_SHA256.parse::<ExpectedChecksum>().is_err());
        assert!("md5:abcd".parse::<ExpectedChecksum>().is_err());
        assert!("sha256:abcd".parse::<ExpectedChecksum>().is_err());
        assert!(format!("sha512:{}", HELLO_SHA256).parse::<ExpectedChecksum>().is_err());
    }
}
