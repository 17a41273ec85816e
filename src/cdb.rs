//! Constant database files, the immutable hash maps indexing every tier.
//!
//! The on-disk format is the classic cdb layout: a 2048 byte table of
//! contents (256 buckets, each a `(position, slot-count)` pair of 32-bit
//! little-endian words), followed by `(klen, vlen, key, value)` records
//! in insertion order, followed by the open-addressed slot tables. Files
//! are written once through [Writer] and never mutated, [Cdb] handles
//! are read-only and safe to open concurrently.

use std::{convert::TryFrom, convert::TryInto, ffi, fs, io, io::Read, io::Seek, io::Write};

use crate::{err_at, read_file, util, Error, Result};

/// Size of the table of contents, also the size of an empty cdb file.
pub const TOC_SIZE: u64 = 2048;

fn hash(key: &[u8]) -> u32 {
    let mut h: u32 = 5381;
    for byte in key.iter() {
        h = h.wrapping_shl(5).wrapping_add(h) ^ (*byte as u32);
    }
    h
}

/// Single-use writer for one cdb file. Records go to disk as they are
/// added, the hash tables and the table of contents are emitted by
/// [Writer::close]. A writer that is dropped without close leaves an
/// unfinished file behind.
pub struct Writer {
    path: ffi::OsString,
    buf: io::BufWriter<fs::File>,
    pos: u64,
    slots: Vec<(u32, u32)>,
}

impl Writer {
    /// Create `path` and reserve the table of contents. Parent
    /// directories are created as needed, an existing file is an error.
    pub fn create(path: &ffi::OsStr) -> Result<Writer> {
        let fd = util::create_file_w(path)?;
        let mut buf = io::BufWriter::new(fd);
        err_at!(IOError, buf.write_all(&[0; TOC_SIZE as usize]))?;
        Ok(Writer {
            path: path.to_os_string(),
            buf,
            pos: TOC_SIZE,
            slots: Vec::default(),
        })
    }

    /// Add one record. Keys need not be unique, lookups return the
    /// first record added under a key.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let (klen, vlen) = (key.len() as u64, value.len() as u64);
        let end = self.pos + 8 + klen + vlen;
        if u32::try_from(end).is_err() {
            return err_at!(Fatal, msg: "cdb overflow {:?} at {}", self.path, self.pos);
        }
        let rpos = self.pos as u32;

        err_at!(IOError, self.buf.write_all(&(klen as u32).to_le_bytes()))?;
        err_at!(IOError, self.buf.write_all(&(vlen as u32).to_le_bytes()))?;
        err_at!(IOError, self.buf.write_all(key))?;
        err_at!(IOError, self.buf.write_all(value))?;

        self.slots.push((hash(key), rpos));
        self.pos = end;
        Ok(())
    }

    /// Emit the hash tables and the table of contents, then sync the
    /// file. The record count is returned.
    pub fn close(mut self) -> Result<usize> {
        let count = self.slots.len();

        let mut buckets: Vec<Vec<(u32, u32)>> = vec![vec![]; 256];
        for (h, rpos) in self.slots.drain(..) {
            buckets[(h & 0xff) as usize].push((h, rpos));
        }

        let mut toc = Vec::with_capacity(256);
        for bucket in buckets.iter() {
            let nslots = (bucket.len() * 2) as u32;
            if u32::try_from(self.pos).is_err() {
                return err_at!(Fatal, msg: "cdb overflow {:?} at {}", self.path, self.pos);
            }
            toc.push((self.pos as u32, nslots));
            if nslots == 0 {
                continue;
            }
            let mut table = vec![(0_u32, 0_u32); nslots as usize];
            for (h, rpos) in bucket.iter() {
                let mut slot = ((h >> 8) % nslots) as usize;
                while table[slot].1 != 0 {
                    slot = (slot + 1) % (nslots as usize);
                }
                table[slot] = (*h, *rpos);
            }
            for (h, rpos) in table.into_iter() {
                err_at!(IOError, self.buf.write_all(&h.to_le_bytes()))?;
                err_at!(IOError, self.buf.write_all(&rpos.to_le_bytes()))?;
            }
            self.pos += (nslots as u64) * 8;
        }

        err_at!(IOError, self.buf.seek(io::SeekFrom::Start(0)))?;
        for (tpos, nslots) in toc.into_iter() {
            err_at!(IOError, self.buf.write_all(&tpos.to_le_bytes()))?;
            err_at!(IOError, self.buf.write_all(&nslots.to_le_bytes()))?;
        }
        err_at!(IOError, self.buf.flush())?;

        let fd = err_at!(IOError, self.buf.into_inner())?;
        err_at!(IOError, fd.sync_all())?;
        Ok(count)
    }
}

/// Read-only handle over one cdb file, point lookups only. Clone-free,
/// open as many handles as needed.
pub struct Cdb {
    path: ffi::OsString,
    fd: fs::File,
    toc: Vec<(u32, u32)>,
}

impl Cdb {
    pub fn open(path: &ffi::OsStr) -> Result<Cdb> {
        let mut fd = util::open_file_r(path)?;
        let buf = read_file!(fd, io::SeekFrom::Start(0), TOC_SIZE, "cdb toc")?;
        let mut toc = Vec::with_capacity(256);
        for chunk in buf.chunks(8) {
            let tpos = u32::from_le_bytes(chunk[..4].try_into().unwrap());
            let nslots = u32::from_le_bytes(chunk[4..].try_into().unwrap());
            toc.push((tpos, nslots));
        }
        Ok(Cdb {
            path: path.to_os_string(),
            fd,
            toc,
        })
    }

    pub fn as_path(&self) -> &ffi::OsStr {
        &self.path
    }

    /// Point lookup. A missing key is `Ok(None)`.
    pub fn lookup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let h = hash(key);
        let (tpos, nslots) = self.toc[(h & 0xff) as usize];
        if nslots == 0 {
            return Ok(None);
        }
        let start = (h >> 8) % nslots;
        for i in 0..nslots {
            let slot = ((start + i) % nslots) as u64;
            let at = io::SeekFrom::Start((tpos as u64) + slot * 8);
            let buf = read_file!(self.fd, at, 8_u64, "cdb slot")?;
            let sh = u32::from_le_bytes(buf[..4].try_into().unwrap());
            let rpos = u32::from_le_bytes(buf[4..].try_into().unwrap());
            if rpos == 0 {
                return Ok(None);
            } else if sh != h {
                continue;
            }
            let at = io::SeekFrom::Start(rpos as u64);
            let buf = read_file!(self.fd, at, 8_u64, "cdb record")?;
            let klen = u32::from_le_bytes(buf[..4].try_into().unwrap()) as u64;
            let vlen = u32::from_le_bytes(buf[4..].try_into().unwrap()) as u64;
            if klen as usize != key.len() {
                continue;
            }
            let at = io::SeekFrom::Start(rpos as u64 + 8);
            let k = read_file!(self.fd, at, klen, "cdb key")?;
            if k == key {
                let at = io::SeekFrom::Start(rpos as u64 + 8 + klen);
                let v = read_file!(self.fd, at, vlen, "cdb value")?;
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    /// Consume the handle into an iterator over all records, in the
    /// order they were added. This is the `dump` surface the index
    /// compactor merges from.
    pub fn iter(self) -> Result<IterCdb> {
        // records end where the first slot table begins.
        let end = self.toc.iter().map(|(tpos, _)| *tpos).min().unwrap_or(0);
        Ok(IterCdb {
            fd: self.fd,
            pos: TOC_SIZE,
            end: end as u64,
        })
    }
}

/// Lazy sequence of `(key, value)` records of one cdb file.
pub struct IterCdb {
    fd: fs::File,
    pos: u64,
    end: u64,
}

impl Iterator for IterCdb {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        let item = || -> Result<(Vec<u8>, Vec<u8>)> {
            let at = io::SeekFrom::Start(self.pos);
            let buf = read_file!(self.fd, at, 8_u64, "cdb record")?;
            let klen = u32::from_le_bytes(buf[..4].try_into().unwrap()) as u64;
            let vlen = u32::from_le_bytes(buf[4..].try_into().unwrap()) as u64;
            let at = io::SeekFrom::Start(self.pos + 8);
            let key = read_file!(self.fd, at, klen, "cdb key")?;
            let at = io::SeekFrom::Start(self.pos + 8 + klen);
            let value = read_file!(self.fd, at, vlen, "cdb value")?;
            self.pos += 8 + klen + vlen;
            Ok((key, value))
        }();
        match item {
            Ok(item) => Some(Ok(item)),
            Err(err) => {
                self.pos = self.end; // poison further iteration
                Some(Err(err))
            }
        }
    }
}
#[cfg(test)]
#[path = "cdb_test.rs"]
mod cdb_test;
