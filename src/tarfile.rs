//! Append and seek-read support for the pack tar archives.
//!
//! Packs are plain POSIX ustar files, grown by seeking to the position
//! of the end-of-archive marker and writing entries over it. Byte
//! offsets handed out while appending are published in the paired cdb
//! and must stay valid forever, so this module owns the offset
//! arithmetic itself and uses the `tar` crate only to encode and decode
//! the 512 byte headers.

use lazy_static::lazy_static;
use tar::{EntryType, Header};

use std::{
    collections::HashMap,
    env, ffi, fs,
    io::{self, Read, Seek, Write},
    path, time,
};

use crate::{compress, err_at, read_file, staging, util, Error, Result};

/// Tar block size. Headers occupy one block, entry data is padded up
/// to a block boundary.
pub const BLOCK_SIZE: u64 = 512;

lazy_static! {
    // Last known end-of-archive offset per tar path, saves re-walking
    // the headers on the next append.
    static ref END_OFFSETS: std::sync::Mutex<HashMap<ffi::OsString, u64>> =
        std::sync::Mutex::new(HashMap::new());
}

/// One tar archive opened for appending. Entries land at the cached
/// end-of-archive position, [TarFile::close] writes the two zero
/// blocks back and records the new end.
pub struct TarFile {
    path: ffi::OsString,
    fd: fs::File,
    pos: u64,
}

impl TarFile {
    /// Open `path` for appending, creating it (and parent directories)
    /// when missing. The insertion point is the cached end offset when
    /// one is known, otherwise two blocks short of the file size,
    /// validated by walking headers up to the end-of-archive marker.
    pub fn open_for_append(path: &ffi::OsStr) -> Result<TarFile> {
        if let Some(parent) = path::Path::new(path).parent() {
            err_at!(IOError, fs::create_dir_all(parent))?;
        }
        let mut fd = {
            let mut opts = fs::OpenOptions::new();
            err_at!(
                IOError,
                opts.read(true).write(true).create(true).open(path),
                "{:?}",
                path
            )?
        };
        let size = err_at!(IOError, fd.metadata())?.len();
        let pos = if size < 2 * BLOCK_SIZE {
            0
        } else {
            let cached = {
                let cache = END_OFFSETS.lock().unwrap();
                cache.get(path).copied()
            };
            let from = match cached {
                Some(n) if n <= size - 2 * BLOCK_SIZE => n,
                _ => size - 2 * BLOCK_SIZE,
            };
            match find_end(&mut fd, from, size) {
                Ok(pos) => pos,
                // stale cache or odd tail, walk from the start once.
                Err(Error::InvalidFile(_, _)) => find_end(&mut fd, 0, size)?,
                Err(err) => return Err(err),
            }
        };
        Ok(TarFile {
            path: path.to_os_string(),
            fd,
            pos,
        })
    }

    /// Next insertion offset, where the next appended header lands.
    pub fn to_pos(&self) -> u64 {
        self.pos
    }

    /// Append one regular entry, `size` bytes read from `data`.
    /// Returns the offset of the entry's header.
    pub fn append_data(&mut self, name: &str, data: &mut dyn Read, size: u64) -> Result<u64> {
        let mut header = Header::new_ustar();
        err_at!(InvalidInput, header.set_path(name), "{:?}", name)?;
        header.set_size(size);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        fill_header(&mut header);

        let entry_pos = self.pos;
        err_at!(IOError, self.fd.seek(io::SeekFrom::Start(self.pos)))?;
        err_at!(IOError, self.fd.write_all(header.as_bytes()))?;
        let n = err_at!(IOError, io::copy(data, &mut self.fd))?;
        if n != size {
            return err_at!(Fatal, msg: "short append {:?} {}/{}", name, n, size);
        }
        let pad = (BLOCK_SIZE - (size % BLOCK_SIZE)) % BLOCK_SIZE;
        if pad > 0 {
            err_at!(IOError, self.fd.write_all(&vec![0; pad as usize]))?;
        }
        self.pos += BLOCK_SIZE + size + pad;
        Ok(entry_pos)
    }

    /// Append one symbolic-link entry, zero payload bytes. Returns the
    /// offset of the entry's header.
    pub fn append_symlink(&mut self, name: &str, linkname: &str) -> Result<u64> {
        let mut header = Header::new_ustar();
        err_at!(InvalidInput, header.set_path(name), "{:?}", name)?;
        err_at!(InvalidInput, header.set_link_name(linkname), "{:?}", linkname)?;
        header.set_size(0);
        header.set_mode(0o777);
        header.set_entry_type(EntryType::Symlink);
        fill_header(&mut header);

        let entry_pos = self.pos;
        err_at!(IOError, self.fd.seek(io::SeekFrom::Start(self.pos)))?;
        err_at!(IOError, self.fd.write_all(header.as_bytes()))?;
        self.pos += BLOCK_SIZE;
        Ok(entry_pos)
    }

    /// Write the end-of-archive marker, sync, and remember the end
    /// offset for the next append.
    pub fn close(mut self) -> Result<()> {
        err_at!(IOError, self.fd.seek(io::SeekFrom::Start(self.pos)))?;
        err_at!(IOError, self.fd.write_all(&[0; 2 * BLOCK_SIZE as usize]))?;
        err_at!(IOError, self.fd.sync_all())?;

        let mut cache = END_OFFSETS.lock().unwrap();
        cache.insert(self.path, self.pos);
        Ok(())
    }
}

/// One entry read back from a tar archive at a known offset.
pub enum Item {
    /// Regular entry. `data` is bounded to the entry and already
    /// wrapped in the decoder matching the entry name's suffix.
    Data {
        name: String,
        size: u64,
        data: Box<dyn Read>,
    },
    /// Symbolic-link entry, `linkname` is the basename of the origin
    /// entry. The caller retries with the origin.
    Symlink { linkname: String },
}

/// Seek-read exactly one entry at `pos`.
pub fn read_item(path: &ffi::OsStr, pos: u64) -> Result<Item> {
    let mut fd = util::open_file_r(path)?;
    let size = err_at!(IOError, fd.metadata())?.len();
    if pos + BLOCK_SIZE > size {
        return err_at!(Corruption, msg: "offset {} outside tar {:?} ({})", pos, path, size);
    }
    let buf = read_file!(fd, io::SeekFrom::Start(pos), BLOCK_SIZE, "tar header")?;
    if buf.iter().all(|b| *b == 0) {
        return err_at!(Corruption, msg: "offset {} at end-of-archive in {:?}", pos, path);
    }
    let mut header = Header::new_old();
    header.as_mut_bytes().copy_from_slice(&buf);

    match header.entry_type() {
        EntryType::Symlink => {
            let linkname = match err_at!(InvalidFile, header.link_name())? {
                Some(linkname) => linkname.to_string_lossy().to_string(),
                None => {
                    err_at!(InvalidFile, msg: "symlink without linkname at {} in {:?}", pos, path)?
                }
            };
            Ok(Item::Symlink { linkname })
        }
        typ if typ.is_file() => {
            let esize = err_at!(InvalidFile, header.entry_size())?;
            if pos + BLOCK_SIZE + esize > size {
                return err_at!(Corruption, msg: "entry at {} runs past tar {:?}", pos, path);
            }
            let name = err_at!(InvalidFile, header.path())?
                .to_string_lossy()
                .to_string();
            let method = match name.rfind(staging::SUFF_DATA) {
                Some(n) => compress::Method::from_suffix(&name[n + staging::SUFF_DATA.len()..]),
                None => compress::Method::Plain,
            };
            let data = method.decoder(Box::new(fd.take(esize)));
            Ok(Item::Data {
                name,
                size: esize,
                data,
            })
        }
        typ => err_at!(InvalidFile, msg: "entry {:?} at {} in {:?} is not regular", typ, pos, path),
    }
}

// Walk headers from `from` until the end-of-archive marker or the end
// of the file, returning the insertion offset.
fn find_end(fd: &mut fs::File, from: u64, size: u64) -> Result<u64> {
    let mut pos = from;
    loop {
        if pos + BLOCK_SIZE > size {
            return Ok(pos);
        }
        let buf = read_file!(fd, io::SeekFrom::Start(pos), BLOCK_SIZE, "tar header")?;
        if buf.iter().all(|b| *b == 0) {
            return Ok(pos);
        }
        let mut header = Header::new_old();
        header.as_mut_bytes().copy_from_slice(&buf);
        let esize = err_at!(InvalidFile, header.entry_size(), "at {}", pos)?;
        let pad = (BLOCK_SIZE - (esize % BLOCK_SIZE)) % BLOCK_SIZE;
        pos += BLOCK_SIZE + esize + pad;
    }
}

// uid/gid/uname/gname from the current process, mtime from the wall
// clock.
fn fill_header(header: &mut Header) {
    let mtime = match time::SystemTime::now().duration_since(time::UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs(),
        Err(_) => 0,
    };
    header.set_mtime(mtime);
    header.set_uid(unsafe { libc::getuid() } as u64);
    header.set_gid(unsafe { libc::getgid() } as u64);
    if let Ok(user) = env::var("USER") {
        header.set_username(&user).ok();
        header.set_groupname(&user).ok();
    }
    header.set_cksum();
}

#[cfg(test)]
#[path = "tarfile_test.rs"]
mod tarfile_test;
