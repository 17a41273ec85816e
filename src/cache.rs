//! Process-wide file-list caches, one snapshot per realm.
//!
//! The retriever works off read-only snapshots of the index and pack
//! directories instead of re-walking them per lookup. Snapshots are
//! refreshed by [fill] with `force`, dropped wholesale by
//! [invalidate] (the pack builder and the index compactor do so on
//! every successful output), and read under a shared lock.

use lazy_static::lazy_static;
use log::debug;

use std::{collections::HashMap, ffi, fs, path, sync::RwLock};

use crate::{
    config::{self, Config},
    err_at, Error, Result,
};

lazy_static! {
    static ref CACHES: RwLock<HashMap<String, RealmFiles>> = RwLock::new(HashMap::new());
}

/// Read-only snapshot of one realm's on-disk artifacts.
#[derive(Clone, Default)]
pub struct RealmFiles {
    /// cdb files per index level, name sorted. Level 0 lists the L00
    /// symlinks to the paired pack indexes.
    pub cdb_files: Vec<Vec<ffi::OsString>>,
    /// Pack tar basename to full path, the pack id maps there too.
    pub tar_files: HashMap<String, ffi::OsString>,
}

/// The realm's snapshot, scanned on first use.
pub fn snapshot(config: &Config) -> Result<RealmFiles> {
    {
        let caches = CACHES.read().unwrap();
        if let Some(files) = caches.get(&config.realm) {
            return Ok(files.clone());
        }
    }
    fill(config, false)?;
    let caches = CACHES.read().unwrap();
    match caches.get(&config.realm) {
        Some(files) => Ok(files.clone()),
        None => err_at!(Fatal, msg: "cache fill lost realm {:?}", config.realm),
    }
}

/// Scan the realm's directories into a fresh snapshot. Without
/// `force` an existing snapshot is left alone.
pub fn fill(config: &Config, force: bool) -> Result<()> {
    if !force {
        let caches = CACHES.read().unwrap();
        if caches.contains_key(&config.realm) {
            return Ok(());
        }
    }
    let files = scan(config)?;
    debug!(
        target: "cache",
        "filled realm {:?}, {} packs", config.realm, files.tar_files.len()
    );
    let mut caches = CACHES.write().unwrap();
    caches.insert(config.realm.clone(), files);
    Ok(())
}

/// Drop every realm snapshot, the next reader re-scans.
pub fn invalidate() {
    let mut caches = CACHES.write().unwrap();
    caches.clear();
}

fn scan(config: &Config) -> Result<RealmFiles> {
    let mut cdb_files = vec![];
    for level in 0..=config::MAX_LEVEL {
        let dir = config.to_level_dir(level);
        let mut files = vec![];
        for item in err_at!(IOError, fs::read_dir(&dir), "{:?}", dir)? {
            let name = err_at!(IOError, item)?.file_name();
            match name.to_str() {
                Some(s) if s.ends_with(".cdb") => {
                    let file: path::PathBuf = [dir.as_os_str(), &name].iter().collect();
                    files.push(file.into_os_string());
                }
                _ => continue,
            }
        }
        files.sort();
        cdb_files.push(files);
    }

    let mut tar_files = HashMap::new();
    let tar_dir = path::Path::new(&config.tar_dir);
    for item in err_at!(IOError, fs::read_dir(tar_dir), "{:?}", tar_dir)? {
        let item = err_at!(IOError, item)?;
        if !err_at!(IOError, item.file_type())?.is_dir() {
            continue;
        }
        for item in err_at!(IOError, fs::read_dir(item.path()))? {
            let item = err_at!(IOError, item)?;
            let name = match item.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if !name.ends_with(".tar") {
                continue;
            }
            let file = item.path().into_os_string();
            // `<realm>-<ts>-<id>.tar`, index by basename and by id.
            // canonical ids are a fixed 22 characters and may contain
            // `-`, so take the stem's tail rather than splitting.
            let stem = name.strip_suffix(".tar").unwrap_or(&name);
            if stem.len() > 22 {
                if let Some(id) = stem.get(stem.len() - 22..) {
                    tar_files.insert(id.to_string(), file.clone());
                }
            }
            tar_files.insert(name.clone(), file);
        }
    }

    Ok(RealmFiles {
        cdb_files,
        tar_files,
    })
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;
