// src/hash.rs

//! Configurable hashing for fileId computation and trove-info digests.
//!
//! This module provides a unified interface over the two digest
//! algorithms the store uses:
//! - **SHA-1**: `fileId` and other legacy digests that predate SHA-256
//!   and must stay byte-compatible with what is already on disk.
//! - **SHA-256**: trove-info and changeset content digests.
//!
//! # Use Cases
//!
//! | Use Case | Algorithm | Why |
//! |----------|-----------|-----|
//! | `fileId` (pathId + fileStream digest) | SHA-1 | Matches existing on-disk identifiers |
//! | Trove-info / signature digest | SHA-256 | Newer, larger digest space |
//! | Changeset content-archive checksum | SHA-256 | Collision resistance for large payloads |

use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

/// Hash algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-1 (160-bit). Used for `fileId` and other legacy digests.
    Sha1,

    /// SHA-256 (256-bit). Used for trove-info and changeset digests.
    #[default]
    Sha256,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes.
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Get the hash output length as a hex string.
    #[inline]
    pub const fn hex_len(&self) -> usize {
        self.output_len() * 2
    }

    /// Get the algorithm name as a string.
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Hash computation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Unknown hash algorithm name.
    UnknownAlgorithm(String),
    /// Hash string has wrong length for algorithm.
    InvalidLength { expected: usize, got: usize },
    /// Hash string contains invalid hex characters.
    InvalidHex(String),
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAlgorithm(name) => write!(f, "unknown hash algorithm: {}", name),
            Self::InvalidLength { expected, got } => {
                write!(f, "invalid hash length: expected {}, got {}", expected, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in hash: {}", s),
        }
    }
}

impl std::error::Error for HashError {}

/// A hash value with its algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hash {
    pub algorithm: HashAlgorithm,
    pub value: String,
}

impl Hash {
    /// Create a new hash value, validating length and hex encoding.
    pub fn new(algorithm: HashAlgorithm, value: impl Into<String>) -> Result<Self, HashError> {
        let value = value.into();
        let expected_len = algorithm.hex_len();

        if value.len() != expected_len {
            return Err(HashError::InvalidLength {
                expected: expected_len,
                got: value.len(),
            });
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex(value));
        }

        Ok(Self {
            algorithm,
            value: value.to_lowercase(),
        })
    }

    fn new_unchecked(algorithm: HashAlgorithm, value: String) -> Self {
        Self { algorithm, value }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        hex::decode(&self.value).expect("hash value is always valid hex")
    }

    /// Parse a prefixed hash string (e.g. "sha1:abc123..." or "sha256:abc123...").
    pub fn parse_prefixed(s: &str) -> Result<Self, HashError> {
        if let Some((algo, hash)) = s.split_once(':') {
            let algorithm = algo.parse()?;
            Self::new(algorithm, hash)
        } else {
            Self::new(HashAlgorithm::Sha256, s)
        }
    }

    pub fn to_prefixed_string(&self) -> String {
        format!("{}:{}", self.algorithm.name(), self.value)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Incremental hasher over either supported algorithm.
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha1 => HasherState::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
        };
        Self { algorithm, state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha1(hasher) => hasher.update(data),
            HasherState::Sha256(hasher) => hasher.update(data),
        }
    }

    pub fn finalize(self) -> Hash {
        let value = match self.state {
            HasherState::Sha1(hasher) => format!("{:x}", hasher.finalize()),
            HasherState::Sha256(hasher) => format!("{:x}", hasher.finalize()),
        };
        Hash::new_unchecked(self.algorithm, value)
    }

    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Compute hash of a byte slice.
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Hash {
    let value = match algorithm {
        HashAlgorithm::Sha1 => {
            let mut hasher = Sha1::new();
            hasher.update(data);
            format!("{:x}", hasher.finalize())
        }
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(data);
            format!("{:x}", hasher.finalize())
        }
    };
    Hash::new_unchecked(algorithm, value)
}

/// Compute hash of data from a reader, streaming in fixed-size chunks.
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<Hash> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Compute the `fileId`: SHA-1 over `pathId || frozen fileStream`.
pub fn file_id(path_id: &[u8], frozen_stream: &[u8]) -> Hash {
    let mut hasher = Hasher::new(HashAlgorithm::Sha1);
    hasher.update(path_id);
    hasher.update(frozen_stream);
    hasher.finalize()
}

/// Compute SHA-256 hash as a bare hex string (convenience function).
#[inline]
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data).value
}

/// Compute SHA-1 hash as a bare hex string (convenience function).
#[inline]
pub fn sha1(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha1, data).value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hash() {
        let data = b"Hello, World!";
        let hash = hash_bytes(HashAlgorithm::Sha256, data);

        assert_eq!(hash.algorithm, HashAlgorithm::Sha256);
        assert_eq!(
            hash.value,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
        assert_eq!(hash.value.len(), 64);
    }

    #[test]
    fn test_sha1_hash() {
        let data = b"Hello, World!";
        let hash = hash_bytes(HashAlgorithm::Sha1, data);

        assert_eq!(hash.algorithm, HashAlgorithm::Sha1);
        assert_eq!(hash.value.len(), 40);
    }

    #[test]
    fn test_convenience_functions() {
        let data = b"test data";
        let sha = sha256(data);
        let sh1 = sha1(data);

        assert_eq!(sha.len(), 64);
        assert_eq!(sh1.len(), 40);
    }

    #[test]
    fn test_hasher_incremental() {
        let data = b"Hello, World!";

        let full_hash = hash_bytes(HashAlgorithm::Sha256, data);

        let mut hasher = Hasher::new(HashAlgorithm::Sha256);
        hasher.update(b"Hello, ");
        hasher.update(b"World!");
        let incremental_hash = hasher.finalize();

        assert_eq!(full_hash, incremental_hash);
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("sha256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("SHA-256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);
        assert_eq!("sha1".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha1);
        assert!("unknown".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_hash_validation() {
        let hash = Hash::new(
            HashAlgorithm::Sha256,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f",
        );
        assert!(hash.is_ok());

        let hash = Hash::new(HashAlgorithm::Sha256, "abc123");
        assert!(matches!(hash, Err(HashError::InvalidLength { .. })));

        let hash = Hash::new(
            HashAlgorithm::Sha256,
            "gggg6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f",
        );
        assert!(matches!(hash, Err(HashError::InvalidHex(_))));
    }

    #[test]
    fn test_prefixed_hash() {
        let hash = Hash::parse_prefixed(
            "sha256:dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f",
        )
        .unwrap();
        assert_eq!(hash.algorithm, HashAlgorithm::Sha256);

        let hash = Hash::parse_prefixed("sha1:0000000000000000000000000000000000000000").unwrap();
        assert_eq!(hash.algorithm, HashAlgorithm::Sha1);

        let hash = Hash::parse_prefixed(
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f",
        )
        .unwrap();
        assert_eq!(hash.algorithm, HashAlgorithm::Sha256);
    }

    #[test]
    fn test_hash_display() {
        let hash = hash_bytes(HashAlgorithm::Sha256, b"test");
        let display = format!("{}", hash);
        assert_eq!(display, hash.value);

        let prefixed = hash.to_prefixed_string();
        assert!(prefixed.starts_with("sha256:"));
    }

    #[test]
    fn test_hash_reader() {
        let data = b"Hello, World!";
        let mut cursor = std::io::Cursor::new(data);

        let hash = hash_reader(HashAlgorithm::Sha256, &mut cursor).unwrap();
        let expected = hash_bytes(HashAlgorithm::Sha256, data);

        assert_eq!(hash, expected);
    }

    #[test]
    fn test_file_id_changes_with_path_id() {
        let stream = b"inode-and-contents-info";
        let a = file_id(b"pathid-a", stream);
        let b = file_id(b"pathid-b", stream);
        assert_ne!(a, b);
        assert_eq!(a.algorithm, HashAlgorithm::Sha1);
    }

    #[test]
    fn test_default_algorithm() {
        let algo = HashAlgorithm::default();
        assert_eq!(algo, HashAlgorithm::Sha256);
    }
}
