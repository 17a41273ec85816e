//! Compression methods applied to object payloads.
//!
//! Payloads are compressed once, at staging time, and the compressed
//! bytes travel unchanged into the tar packs. The method is recorded in
//! the object's `Content-Encoding` header and as the suffix of its tar
//! entry name, so readers on either tier can pick the right decoder.

use bzip2::{read::BzDecoder, write::BzEncoder};
use flate2::{read::GzDecoder, write::GzEncoder};
use xz2::{read::XzDecoder, write::XzEncoder};

use std::io::{self, Read, Write};

use crate::{err_at, Error, Result};

/// Supported payload compression methods. `Plain` stores the payload
/// byte for byte.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Method {
    Gzip,
    Bzip2,
    Xz,
    Plain,
}

impl Default for Method {
    fn default() -> Method {
        Method::Gzip
    }
}

impl Method {
    /// Parse a configured method name. The empty string selects
    /// `Plain`, the short suffix forms are accepted as aliases.
    pub fn from_name(name: &str) -> Result<Method> {
        match name {
            "gzip" | "gz" => Ok(Method::Gzip),
            "bzip2" | "bz2" => Ok(Method::Bzip2),
            "xz" => Ok(Method::Xz),
            "" => Ok(Method::Plain),
            name => err_at!(FailConfig, msg: "unknown compress method {:?}", name),
        }
    }

    /// Method for a tar entry name suffix. Unknown suffixes read as
    /// `Plain`, the entry is streamed byte for byte.
    pub fn from_suffix(suffix: &str) -> Method {
        match suffix {
            "gz" => Method::Gzip,
            "bz2" => Method::Bzip2,
            "xz" => Method::Xz,
            _ => Method::Plain,
        }
    }

    pub fn to_name(&self) -> &'static str {
        match self {
            Method::Gzip => "gzip",
            Method::Bzip2 => "bzip2",
            Method::Xz => "xz",
            Method::Plain => "",
        }
    }

    /// Short form appended to tar data entry names.
    pub fn to_suffix(&self) -> &'static str {
        match self {
            Method::Gzip => "gz",
            Method::Bzip2 => "bz2",
            Method::Xz => "xz",
            Method::Plain => "",
        }
    }

    /// Wrap `w` in a streaming encoder for this method, best
    /// compression level throughout.
    pub fn encoder<W: Write>(self, w: W) -> Encoder<W> {
        match self {
            Method::Gzip => Encoder::Gzip(GzEncoder::new(w, flate2::Compression::best())),
            Method::Bzip2 => Encoder::Bzip2(BzEncoder::new(w, bzip2::Compression::best())),
            Method::Xz => Encoder::Xz(XzEncoder::new(w, 9)),
            Method::Plain => Encoder::Plain(w),
        }
    }

    /// Wrap `r` in a streaming decoder for this method.
    pub fn decoder(self, r: Box<dyn Read>) -> Box<dyn Read> {
        match self {
            Method::Gzip => Box::new(GzDecoder::new(r)),
            Method::Bzip2 => Box::new(BzDecoder::new(r)),
            Method::Xz => Box::new(XzDecoder::new(r)),
            Method::Plain => r,
        }
    }
}

/// Streaming encoder over an inner writer. [Encoder::finish] must be
/// called to flush the trailing compressed blocks and recover the
/// inner writer.
pub enum Encoder<W: Write> {
    Gzip(GzEncoder<W>),
    Bzip2(BzEncoder<W>),
    Xz(XzEncoder<W>),
    Plain(W),
}

impl<W: Write> Encoder<W> {
    pub fn finish(self) -> Result<W> {
        match self {
            Encoder::Gzip(enc) => err_at!(IOError, enc.finish()),
            Encoder::Bzip2(enc) => err_at!(IOError, enc.finish()),
            Encoder::Xz(enc) => err_at!(IOError, enc.finish()),
            Encoder::Plain(w) => Ok(w),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Gzip(enc) => enc.write(buf),
            Encoder::Bzip2(enc) => enc.write(buf),
            Encoder::Xz(enc) => enc.write(buf),
            Encoder::Plain(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Gzip(enc) => enc.flush(),
            Encoder::Bzip2(enc) => enc.flush(),
            Encoder::Xz(enc) => enc.flush(),
            Encoder::Plain(w) => w.flush(),
        }
    }
}

#[cfg(test)]
#[path = "compress_test.rs"]
mod compress_test;
