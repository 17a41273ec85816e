//! Metadata records attached to stored objects.
//!
//! A record is an ordered map of HTTP-canonical header keys to trimmed
//! string values, wire-encoded as one `Key: Value\n` line per entry. The
//! record is self-terminating by length, never by sentinel: whoever holds
//! the bytes knows how many there are (file size, tar entry size, cdb
//! value length). A small reserved set of `X-Aostor-` keys carries
//! structural data and is parsed eagerly into typed fields.

use std::{convert::TryFrom, str::FromStr};

use crate::{err_at, id::Id, Error, Result};

/// Reserved header prefix, keys under it carry structural book-keeping.
pub const INFO_PREFIX: &str = "X-Aostor-";

/// Identifier of the object, canonical form.
pub const KEY_ID: &str = "X-Aostor-Id";
/// Byte offset of the object's info entry inside its tar archive.
pub const KEY_IPOS: &str = "X-Aostor-Ipos";
/// Byte offset of the object's data entry inside its tar archive.
pub const KEY_DPOS: &str = "X-Aostor-Dpos";
/// Filename supplied by the uploader, when any.
pub const KEY_ORIGINAL_FILENAME: &str = "X-Aostor-Original-Filename";
/// Uncompressed payload size in bytes.
pub const KEY_ORIGINAL_SIZE: &str = "X-Aostor-Original-Size";
/// Compressed payload size in bytes.
pub const KEY_STORED_SIZE: &str = "X-Aostor-Stored-Size";
/// Prefix for content digests, completed by the hash algorithm name.
pub const KEY_CONTENT_PREFIX: &str = "X-Aostor-Content-";

/// Compression method applied to the payload, mirrored HTTP header.
pub const KEY_CONTENT_ENCODING: &str = "Content-Encoding";

/// Metadata record for one stored object.
#[derive(Clone, Debug, Default)]
pub struct Info {
    /// Identifier, from `X-Aostor-Id`.
    pub id: Option<Id>,
    /// Tar offset of the info entry, from `X-Aostor-Ipos`, zero while
    /// the object is still staged.
    pub ipos: u64,
    /// Tar offset of the data entry, from `X-Aostor-Dpos`, zero while
    /// the object is still staged.
    pub dpos: u64,
    headers: Vec<(String, String)>,
}

impl Info {
    /// Insert `(key, value)`, canonicalizing the key and trimming the
    /// value. The reserved id/ipos/dpos keys update the typed fields
    /// instead of the map. An existing key is overwritten in place.
    pub fn add(&mut self, key: &str, value: &str) {
        let key = canonical_key(key);
        let value = value.trim();
        match key.as_str() {
            KEY_ID => self.id = value.parse().ok(),
            KEY_IPOS => self.ipos = value.parse().unwrap_or(0),
            KEY_DPOS => self.dpos = value.parse().unwrap_or(0),
            _ => match self.headers.iter_mut().find(|(k, _)| *k == key) {
                Some((_, v)) => *v = value.to_string(),
                None => self.headers.push((key, value.to_string())),
            },
        }
    }

    /// Fetch the value stored under `key`, canonicalizing it first.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = canonical_key(key);
        self.headers
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Headers in insertion order, reserved id/ipos/dpos excluded.
    pub fn as_headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn to_original_size(&self) -> Option<u64> {
        self.get(KEY_ORIGINAL_SIZE).and_then(|v| v.parse().ok())
    }

    pub fn to_stored_size(&self) -> Option<u64> {
        self.get(KEY_STORED_SIZE).and_then(|v| v.parse().ok())
    }

    /// Content digest recorded for `algo`, e.g. `sha1`.
    pub fn to_content_hash(&self, algo: &str) -> Option<&str> {
        let key = format!("{}{}", KEY_CONTENT_PREFIX, algo);
        self.get(&key)
    }

    /// Wire encode, one `Key: Value\n` line per entry. The structural
    /// keys come first, offsets are elided while zero.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut text = String::new();
        if let Some(id) = &self.id {
            text.push_str(&format!("{}: {}\n", KEY_ID, id));
        }
        if self.ipos > 0 {
            text.push_str(&format!("{}: {}\n", KEY_IPOS, self.ipos));
        }
        if self.dpos > 0 {
            text.push_str(&format!("{}: {}\n", KEY_DPOS, self.dpos));
        }
        for (key, value) in self.headers.iter() {
            text.push_str(&format!("{}: {}\n", key, value));
        }
        text.into_bytes()
    }
}

impl TryFrom<&[u8]> for Info {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Info> {
        let text = err_at!(InvalidInput, std::str::from_utf8(bytes))?;
        let mut info = Info::default();
        for line in text.split('\n') {
            if line.is_empty() {
                continue;
            }
            match line.find(':') {
                Some(n) => info.add(&line[..n], &line[n + 1..]),
                None => err_at!(InvalidInput, msg: "bad info line {:?}", line)?,
            }
        }
        Ok(info)
    }
}

impl FromStr for Info {
    type Err = Error;

    fn from_str(s: &str) -> Result<Info> {
        Info::try_from(s.as_bytes())
    }
}

/// HTTP canonical form of a header key: the first letter of each `-`
/// separated token upper-cased, the rest lowered.
pub fn canonical_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, tok) in key.trim().split('-').enumerate() {
        if i > 0 {
            out.push('-');
        }
        let mut chars = tok.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            for c in chars {
                out.extend(c.to_lowercase());
            }
        }
    }
    out
}

#[cfg(test)]
#[path = "info_test.rs"]
mod info_test;
