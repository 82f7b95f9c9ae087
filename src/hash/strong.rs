//! Strong hash selection for confirming weak-checksum candidates
//!
//! The weak rolling checksum collides routinely; every candidate match
//! is confirmed by digesting the window with one of these algorithms.
//! SHA-256 is the default. BLAKE3 is the fast non-negotiated choice,
//! MD5 exists for peers that only speak it.

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

/// Strong-hash algorithm used for block confirmation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrongHash {
    /// SHA-256 (default)
    #[default]
    Sha256,
    /// SHA-512
    Sha512,
    /// MD5
    Md5,
    /// BLAKE3
    Blake3,
}

impl StrongHash {
    /// Digest a block in one shot
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            StrongHash::Sha256 => Sha256::digest(data).to_vec(),
            StrongHash::Sha512 => Sha512::digest(data).to_vec(),
            StrongHash::Md5 => Md5::digest(data).to_vec(),
            StrongHash::Blake3 => blake3::hash(data).as_bytes().to_vec(),
        }
    }

    /// Length of the digest in bytes
    pub const fn digest_len(&self) -> usize {
        match self {
            StrongHash::Sha256 => 32,
            StrongHash::Sha512 => 64,
            StrongHash::Md5 => 16,
            StrongHash::Blake3 => 32,
        }
    }

    /// Canonical lowercase name
    pub const fn name(&self) -> &'static str {
        match self {
            StrongHash::Sha256 => "sha256",
            StrongHash::Sha512 => "sha512",
            StrongHash::Md5 => "md5",
            StrongHash::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for StrongHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrongHash {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(StrongHash::Sha256),
            "sha512" | "sha-512" => Ok(StrongHash::Sha512),
            "md5" => Ok(StrongHash::Md5),
            "blake3" => Ok(StrongHash::Blake3),
            other => Err(crate::error::Error::config(format!(
                "unknown strong hash: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_lengths() {
        for hash in [
            StrongHash::Sha256,
            StrongHash::Sha512,
            StrongHash::Md5,
            StrongHash::Blake3,
        ] {
            assert_eq!(hash.digest(b"block").len(), hash.digest_len());
        }
    }

    #[test]
    fn test_deterministic_and_content_sensitive() {
        let hash = StrongHash::default();
        assert_eq!(hash.digest(b"same"), hash.digest(b"same"));
        assert_ne!(hash.digest(b"same"), hash.digest(b"different"));
    }

    #[test]
    fn test_default_is_sha256() {
        assert_eq!(StrongHash::default(), StrongHash::Sha256);
    }

    #[test]
    fn test_from_str_round_trip() {
        for hash in [
            StrongHash::Sha256,
            StrongHash::Sha512,
            StrongHash::Md5,
            StrongHash::Blake3,
        ] {
            assert_eq!(hash.name().parse::<StrongHash>().unwrap(), hash);
        }
        assert!("crc32".parse::<StrongHash>().is_err());
    }
}
