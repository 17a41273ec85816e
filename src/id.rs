//! Object identifiers, 16 uniformly random bytes with two string forms.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use uuid::Uuid;

use std::{convert::TryFrom, fmt, result, str::FromStr};

use crate::{err_at, Error, Result};

/// Number of random bytes in an identifier.
pub const ID_LENGTH: usize = 16;

/// Object identifier.
///
/// The canonical string form is 22 characters of url-safe base64 without
/// padding. A 32 character lowercase hex form is also accepted on input.
/// Identifiers are globally unique with overwhelming probability, the
/// staging writer still detects collisions and retries with a fresh one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; ID_LENGTH]);

impl Id {
    /// Generate a fresh random identifier.
    pub fn generate() -> Id {
        Id(*Uuid::new_v4().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Canonical form, 22 characters of url-safe base64 without padding.
    pub fn to_canonical(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// Alternate form, 32 characters of lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First two characters of the canonical form, names the shard
    /// directory holding this identifier's files.
    pub fn to_shard(&self) -> String {
        let mut s = self.to_canonical();
        s.truncate(2);
        s
    }
}

impl TryFrom<&[u8]> for Id {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Id> {
        match <[u8; ID_LENGTH]>::try_from(bytes) {
            Ok(bytes) => Ok(Id(bytes)),
            Err(_) => err_at!(InvalidInput, msg: "id needs {} bytes, got {}", ID_LENGTH, bytes.len()),
        }
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id> {
        let bytes = match s.len() {
            22 => err_at!(InvalidInput, URL_SAFE_NO_PAD.decode(s), "id {:?}", s)?,
            32 => err_at!(InvalidInput, hex::decode(s), "id {:?}", s)?,
            n => err_at!(InvalidInput, msg: "id {:?} has bad length {}", s, n)?,
        };
        Id::try_from(bytes.as_slice())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.to_canonical())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "Id<{}>", self.to_canonical())
    }
}

#[cfg(test)]
#[path = "id_test.rs"]
mod id_test;
