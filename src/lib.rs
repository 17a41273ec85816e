//! Aostor implement an append-only object store. Clients upload opaque
//! blobs under a realm and receive an immutable identifier, clients later
//! retrieve blobs by identifier. Updates and deletes are out of scope,
//! durability and read availability are the primary contracts.
//!
//! Objects move through a three-tier pipeline:
//!
//! * **Staging**, one info file and one data carrier per object, sharded
//!   by the identifier prefix. Refer to [staging] module.
//! * **Packs**, immutable tar archives draining many staged objects at a
//!   time, each paired with a cdb index carrying the byte offsets of its
//!   entries. Refer to [pack] and [tarfile] modules.
//! * **Leveled indices**, per-pack cdb files merged into a tower of
//!   higher-level cdb files so that lookups stay cheap as the corpus
//!   grows. Refer to [merge] module.
//!
//! Retrieval walks staging first, then level-0, then the higher levels
//! with one book indirection per level. Refer to [retrieve] module.
//!
//! Between writers, compactors and readers the file system is the sole
//! shared mutable resource. Immutable artifacts (tars, cdb files) are
//! read concurrently without locks, mutable directories are serialized
//! by advisory locks. Refer to [flock] module.

use std::{
    error, fmt, result,
    sync::atomic::{AtomicBool, Ordering},
};

/// Type alias for Result return type, used by this package.
pub type Result<T> = result::Result<T, Error>;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Ask long-running compactions to wind down. They are not cancellable
/// mid-file, the flag is honored between files.
pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

pub(crate) fn is_shutdown() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Error variants that can be returned by this package's API.
///
/// Each variant carries a prefix, typically the `file!():line!()` of the
/// call site, and a printable message.
#[derive(Clone, PartialEq)]
pub enum Error {
    Fatal(String, String),
    IOError(String, String),
    FailConvert(String, String),
    FailConfig(String, String),
    InvalidFile(String, String),
    InvalidInput(String, String),
    KeyNotFound(String, String),
    EmptyPayload(String, String),
    LockHeld(String, String),
    Corruption(String, String),
    InconsistentDedup(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            Fatal(p, m) => write!(f, "{} Fatal: {}", p, m),
            IOError(p, m) => write!(f, "{} IOError: {}", p, m),
            FailConvert(p, m) => write!(f, "{} FailConvert: {}", p, m),
            FailConfig(p, m) => write!(f, "{} FailConfig: {}", p, m),
            InvalidFile(p, m) => write!(f, "{} InvalidFile: {}", p, m),
            InvalidInput(p, m) => write!(f, "{} InvalidInput: {}", p, m),
            KeyNotFound(p, m) => write!(f, "{} KeyNotFound: {}", p, m),
            EmptyPayload(p, m) => write!(f, "{} EmptyPayload: {}", p, m),
            LockHeld(p, m) => write!(f, "{} LockHeld: {}", p, m),
            Corruption(p, m) => write!(f, "{} Corruption: {}", p, m),
            InconsistentDedup(p, m) => write!(f, "{} InconsistentDedup: {}", p, m),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self)
    }
}

impl error::Error for Error {}

impl Error {
    /// Map the error taxonomy onto the exit codes of the operational
    /// command: 1 configuration, 2 I/O or corruption, 3 lock contention,
    /// 4 anything else.
    pub fn to_exit_code(&self) -> i32 {
        use Error::*;

        match self {
            FailConfig(_, _) => 1,
            IOError(_, _) | InvalidFile(_, _) | Corruption(_, _) => 2,
            InconsistentDedup(_, _) => 2,
            LockHeld(_, _) => 3,
            _ => 4,
        }
    }
}

#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        Err(Error::$v(prefix, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err(Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err(Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

pub mod cache;
pub mod cdb;
pub mod compress;
pub mod config;
pub mod dedup;
pub mod flock;
pub mod hash;
pub mod id;
pub mod info;
pub mod merge;
pub mod pack;
pub mod retrieve;
pub mod staging;
pub mod store;
pub mod tarfile;
pub mod util;

pub use crate::config::Config;
pub use crate::id::Id;
pub use crate::info::Info;
pub use crate::store::Store;
