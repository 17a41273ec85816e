//! Configuration for the store, one value per realm.
//!
//! Configuration lives in a toml file with flat sections. Directory
//! values may carry the `#(base)s` and `#(realm)s` placeholders, both
//! expanded at read time:
//!
//! ```text
//! [dirs]
//! base = "/srv/aostor"
//! staging = "#(base)s/#(realm)s/staging"
//! index = "#(base)s/#(realm)s/ndx"
//! tar = "#(base)s/#(realm)s/store"
//!
//! [threshold]
//! index = 10
//! tar = 1048576000
//!
//! [hash]
//! content = "sha1"
//!
//! [compress]
//! method = "gzip"
//!
//! [http]
//! hostport = "0.0.0.0:8341"
//! realms = "test,prod"
//! ```
//!
//! Reading a configuration creates the realm's directories, including
//! the `L00..L09` index levels.

use std::{ffi, fs, path};

use crate::{compress, err_at, hash, Error, Result};

/// Default configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "aostor.toml";

/// Default minimum live staging size, in bytes, that triggers pack
/// emission.
pub const DEFAULT_TAR_THRESHOLD: u64 = 1000 * (1 << 20);

/// Default cdb count that triggers merging an index level into the
/// next one.
pub const DEFAULT_INDEX_THRESHOLD: usize = 10;

/// Deepest index level produced by compaction.
pub const MAX_LEVEL: usize = 9;

/// Per-realm configuration: directory set, thresholds, content hash and
/// compression choice.
#[derive(Clone, Debug)]
pub struct Config {
    pub realm: String,
    pub staging_dir: ffi::OsString,
    pub index_dir: ffi::OsString,
    pub tar_dir: ffi::OsString,
    pub index_threshold: usize,
    pub tar_threshold: u64,
    pub content_hash: hash::HashAlgo,
    pub compress_method: compress::Method,
    /// `host:port` for the http collaborator, passed through.
    pub hostport: String,
    /// Realms served by the http collaborator, passed through.
    pub realms: Vec<String>,
}

impl Config {
    /// Read `file` and expand it for `realm`. Realm directories are
    /// created as a side effect.
    pub fn from_file(file: &ffi::OsStr, realm: &str) -> Result<Config> {
        let text = err_at!(IOError, fs::read_to_string(file), "{:?}", file)?;
        let value: toml::Value = err_at!(FailConfig, text.parse(), "{:?}", file)?;
        let config = Config::from_toml(&value, realm)?;
        config.init_dirs()?;
        Ok(config)
    }

    /// Expand a parsed toml document for `realm`. Directories are not
    /// touched, call [Config::init_dirs] before using the value.
    pub fn from_toml(value: &toml::Value, realm: &str) -> Result<Config> {
        let base = match to_str(value, "dirs", "base") {
            Some(base) => expand(&base, "", realm),
            None => "".to_string(),
        };
        let dir = |key: &str, def: &str| -> Result<ffi::OsString> {
            let path = match to_str(value, "dirs", key) {
                Some(path) => path,
                None if base.len() > 0 => def.to_string(),
                None => return err_at!(FailConfig, msg: "missing dirs.{} and dirs.base", key),
            };
            Ok(expand(&path, &base, realm).into())
        };

        let index_threshold = match to_int(value, "threshold", "index")? {
            Some(n) => n as usize,
            None => DEFAULT_INDEX_THRESHOLD,
        };
        let tar_threshold = match to_int(value, "threshold", "tar")? {
            Some(n) => n as u64,
            None => DEFAULT_TAR_THRESHOLD,
        };

        let content_hash = match to_str(value, "hash", "content") {
            Some(name) => hash::HashAlgo::from_name(&name)?,
            None => hash::HashAlgo::default(),
        };
        let compress_method = match to_str(value, "compress", "method") {
            Some(name) => compress::Method::from_name(&name)?,
            None => compress::Method::default(),
        };

        let hostport = to_str(value, "http", "hostport").unwrap_or_default();
        let realms = match to_str(value, "http", "realms") {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| s.len() > 0)
                .collect(),
            None => vec![],
        };

        Ok(Config {
            realm: realm.to_string(),
            staging_dir: dir("staging", "#(base)s/#(realm)s/staging")?,
            index_dir: dir("index", "#(base)s/#(realm)s/ndx")?,
            tar_dir: dir("tar", "#(base)s/#(realm)s/store")?,
            index_threshold,
            tar_threshold,
            content_hash,
            compress_method,
            hostport,
            realms,
        })
    }

    /// Default configuration rooted under `base`, mostly for tests and
    /// embedders that manage their own directories.
    pub fn new_under(base: &path::Path, realm: &str) -> Config {
        let dir = |leaf: &str| base.join(realm).join(leaf).into_os_string();
        Config {
            realm: realm.to_string(),
            staging_dir: dir("staging"),
            index_dir: dir("ndx"),
            tar_dir: dir("store"),
            index_threshold: DEFAULT_INDEX_THRESHOLD,
            tar_threshold: DEFAULT_TAR_THRESHOLD,
            content_hash: hash::HashAlgo::default(),
            compress_method: compress::Method::default(),
            hostport: "".to_string(),
            realms: vec![realm.to_string()],
        }
    }

    /// Create the staging, store and index directories, the latter with
    /// its `L00..L09` levels.
    pub fn init_dirs(&self) -> Result<()> {
        err_at!(IOError, fs::create_dir_all(&self.staging_dir))?;
        err_at!(IOError, fs::create_dir_all(&self.tar_dir))?;
        for level in 0..=MAX_LEVEL {
            err_at!(IOError, fs::create_dir_all(self.to_level_dir(level)))?;
        }
        Ok(())
    }

    /// Index directory holding level `level` cdb files.
    pub fn to_level_dir(&self, level: usize) -> ffi::OsString {
        let dir: path::PathBuf = [
            self.index_dir.clone(),
            format!("L{:02}", level).into(),
        ]
        .iter()
        .collect();
        dir.into_os_string()
    }
}

fn to_str(value: &toml::Value, section: &str, key: &str) -> Option<String> {
    let field = value.get(section)?.get(key)?;
    Some(field.as_str()?.to_string())
}

fn to_int(value: &toml::Value, section: &str, key: &str) -> Result<Option<i64>> {
    let field = match value.get(section).and_then(|s| s.get(key)) {
        Some(field) => field,
        None => return Ok(None),
    };
    match field.as_integer() {
        Some(n) if n > 0 => Ok(Some(n)),
        _ => err_at!(FailConfig, msg: "malformed threshold.{} {:?}", key, field),
    }
}

fn expand(path: &str, base: &str, realm: &str) -> String {
    path.replace("#(base)s", base).replace("#(realm)s", realm)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
