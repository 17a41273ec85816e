//! Advisory directory locks, serializing the mutating passes.
//!
//! The deduplicator, pack builder and index compactor take an exclusive
//! lock on every directory they mutate. The staging writer appends to
//! unique filenames and does not lock. To stay deadlock free, holders
//! always acquire in the same order: staging directory before index
//! directory. Locks release on drop, so every exit path of the holding
//! function gives them up.

use fs2::FileExt;

use std::{ffi, fs, io, path};

use crate::{err_at, Error, Result};

// Lock file created inside the locked directory. The suffix driven
// directory listers never match it.
const LOCK_FILE: &str = ".lock";

/// Exclusive advisory lock over one directory.
pub struct DirLock {
    dir: ffi::OsString,
    fd: fs::File,
}

impl DirLock {
    /// Acquire without blocking. A lock held elsewhere surfaces as
    /// `LockHeld`, the caller decides whether to retry.
    pub fn exclusive(dir: &ffi::OsStr) -> Result<DirLock> {
        let lock_file: path::PathBuf = [dir, ffi::OsStr::new(LOCK_FILE)].iter().collect();
        let fd = {
            let mut opts = fs::OpenOptions::new();
            err_at!(
                IOError,
                opts.write(true).create(true).open(&lock_file),
                "{:?}",
                lock_file
            )?
        };
        match fd.try_lock_exclusive() {
            Ok(()) => Ok(DirLock {
                dir: dir.to_os_string(),
                fd,
            }),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                err_at!(LockHeld, msg: "directory {:?}", dir)
            }
            Err(err) => err_at!(IOError, Err(err)),
        }
    }

    pub fn as_dir(&self) -> &ffi::OsStr {
        &self.dir
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        self.fd.unlock().ok(); // NOTE: ignore unlock errors.
    }
}

#[cfg(test)]
#[path = "flock_test.rs"]
mod flock_test;
