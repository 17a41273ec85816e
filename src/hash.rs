//! Content hashes, computed over the uncompressed payload at write
//! time and recorded in the object metadata. Deduplication compares
//! these digests.

use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha512};

use crate::{err_at, Error, Result};

/// Configurable content-hash algorithms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HashAlgo {
    Sha1,
    Sha256,
    Sha512,
}

impl Default for HashAlgo {
    fn default() -> HashAlgo {
        HashAlgo::Sha1
    }
}

impl HashAlgo {
    pub fn from_name(name: &str) -> Result<HashAlgo> {
        match name {
            "sha1" => Ok(HashAlgo::Sha1),
            "sha256" => Ok(HashAlgo::Sha256),
            "sha512" => Ok(HashAlgo::Sha512),
            name => err_at!(FailConfig, msg: "unknown content hash {:?}", name),
        }
    }

    /// Name as configured, also the tail of the metadata key
    /// `X-Aostor-Content-<name>`.
    pub fn to_name(&self) -> &'static str {
        match self {
            HashAlgo::Sha1 => "sha1",
            HashAlgo::Sha256 => "sha256",
            HashAlgo::Sha512 => "sha512",
        }
    }

    pub fn hasher(&self) -> ContentHasher {
        match self {
            HashAlgo::Sha1 => ContentHasher::Sha1(Sha1::new()),
            HashAlgo::Sha256 => ContentHasher::Sha256(Sha256::new()),
            HashAlgo::Sha512 => ContentHasher::Sha512(Sha512::new()),
        }
    }
}

/// Streaming digest state for one payload.
pub enum ContentHasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl ContentHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Sha1(h) => h.update(data),
            ContentHasher::Sha256(h) => h.update(data),
            ContentHasher::Sha512(h) => h.update(data),
        }
    }

    /// Lowercase hex digest.
    pub fn finalize(self) -> String {
        match self {
            ContentHasher::Sha1(h) => hex::encode(h.finalize()),
            ContentHasher::Sha256(h) => hex::encode(h.finalize()),
            ContentHasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

#[cfg(test)]
#[path = "hash_test.rs"]
mod hash_test;
