//! Deduplication of staged payloads.
//!
//! Byte-identical payloads are detected by their recorded content
//! digest and collapsed into one regular data file plus symlinks. The
//! pass never unlinks a file that is the target of a surviving symlink,
//! and it is idempotent: run again with no new writes it replaces zero
//! files.

use log::{debug, warn};

use std::{collections::HashMap, ffi, fs, os::unix::fs::MetadataExt, path};

use crate::{
    err_at,
    flock::DirLock,
    hash::HashAlgo,
    staging::{self, Carrier, Entry},
    Error, Result,
};

/// Deduplicate the staging directory under its advisory lock. Returns
/// the number of data files replaced with symlinks.
pub fn dedup(dir: &ffi::OsStr, algo: HashAlgo) -> Result<usize> {
    let _lock = DirLock::exclusive(dir)?;
    run(dir, algo)
}

// Lock-free worker, the pack builder calls this while already holding
// the staging lock.
pub(crate) fn run(dir: &ffi::OsStr, algo: HashAlgo) -> Result<usize> {
    let entries = staging::list(dir, Some(algo))?;

    // primals: digest -> origin data file already shared by a symlink.
    // groups: digest -> every entry observed with that digest.
    let mut primals: HashMap<String, ffi::OsString> = HashMap::new();
    let mut groups: HashMap<String, Vec<Entry>> = HashMap::new();

    for entry in entries.into_iter() {
        let digest = match &entry.content_hash {
            Some(digest) => digest.clone(),
            None => continue,
        };
        if let Carrier::LinkTarget { path, origin_path } = &entry.carrier {
            match primals.get(&digest) {
                None => {
                    primals.insert(digest.clone(), origin_path.clone());
                }
                Some(primal) => {
                    if !same_file(origin_path, primal)? {
                        // divergent origin for the same digest, rewrite
                        // the symlink at the kept primal.
                        warn!(
                            target: "dedup",
                            "divergent origin {:?} for {:?}, keeping {:?}",
                            origin_path, path, primal
                        );
                        let primal = primal.clone();
                        err_at!(IOError, fs::remove_file(path))?;
                        symlink(&link_target(path, &primal), path)?;
                    }
                }
            }
        }
        groups.entry(digest).or_insert_with(Vec::new).push(entry);
    }

    let mut replaced = 0;
    for (digest, group) in groups.iter() {
        let mut primal = primals.get(digest).cloned();
        for entry in group.iter() {
            let data_file = entry.carrier.to_path();
            if primal.is_none() {
                // first of the group becomes the primal.
                primal = Some(match &entry.carrier {
                    Carrier::Regular(path) => path.clone(),
                    Carrier::LinkTarget { origin_path, .. } => origin_path.clone(),
                });
                continue;
            }
            let primal_path = primal.as_ref().unwrap().clone();
            if entry.carrier.is_link() || data_file == primal_path {
                continue;
            }
            err_at!(IOError, fs::remove_file(&data_file), "{:?}", data_file)?;
            let link_file = link_file_for(&data_file);
            symlink(&link_target(&link_file, &primal_path), &link_file)?;
            debug!(target: "dedup", "linked {:?} -> {:?}", link_file, primal_path);
            replaced += 1;
        }
    }

    Ok(replaced)
}

// `<id>#` data file replaced, the symlink takes the `<id>@` name.
fn link_file_for(data_file: &ffi::OsStr) -> ffi::OsString {
    let file = data_file.to_string_lossy();
    match file.rfind(staging::SUFF_DATA) {
        Some(n) => ffi::OsString::from(format!("{}{}", &file[..n], staging::SUFF_LINK)),
        None => data_file.to_os_string(),
    }
}

// Basename when the origin shares the shard directory, absolute path
// otherwise.
fn link_target(link_file: &ffi::OsStr, origin: &ffi::OsStr) -> ffi::OsString {
    let (link, origin_p) = (path::Path::new(link_file), path::Path::new(origin));
    match (link.parent(), origin_p.parent()) {
        (Some(a), Some(b)) if a == b => match origin_p.file_name() {
            Some(name) => name.to_os_string(),
            None => origin.to_os_string(),
        },
        _ => origin.to_os_string(),
    }
}

fn symlink(target: &ffi::OsStr, link_file: &ffi::OsStr) -> Result<()> {
    err_at!(
        IOError,
        std::os::unix::fs::symlink(target, link_file),
        "{:?} -> {:?}",
        link_file,
        target
    )
}

// Same inode, or the same path. A missing conflicting origin makes the
// dedup pass inconsistent, nothing has been unlinked at that point.
fn same_file(a: &ffi::OsStr, b: &ffi::OsStr) -> Result<bool> {
    if a == b {
        return Ok(true);
    }
    let md_a = match fs::metadata(a) {
        Ok(md) => md,
        Err(_) => err_at!(InconsistentDedup, msg: "missing origin {:?}", a)?,
    };
    let md_b = match fs::metadata(b) {
        Ok(md) => md,
        Err(_) => err_at!(InconsistentDedup, msg: "missing origin {:?}", b)?,
    };
    Ok(md_a.dev() == md_b.dev() && md_a.ino() == md_b.ino())
}

#[cfg(test)]
#[path = "dedup_test.rs"]
mod dedup_test;
