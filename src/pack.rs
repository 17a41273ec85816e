//! Pack builder, drains staging into immutable tar + cdb pairs.
//!
//! One pack is a tar archive of `(info, data)` entry pairs and a
//! sibling cdb mapping each id to its serialized metadata, offsets
//! included. The paired cdb is symlinked into the `L00` index level
//! once durable, and only then are the staged inputs removed. Tars are
//! append-only and never deleted, published offsets stay valid forever.

use log::{info, warn};

use std::{collections::HashMap, ffi, fs, path};

use crate::{
    cache, cdb,
    compress::Method,
    config::Config,
    dedup, err_at,
    flock::DirLock,
    id::Id,
    info::KEY_CONTENT_ENCODING,
    staging::{self, Carrier, Entry, SUFF_DATA, SUFF_INFO, SUFF_LINK},
    tarfile::{TarFile, BLOCK_SIZE},
    util, Error, Result,
};

/// Drain the staging tier into packs while its live content exceeds
/// the configured tar threshold. Runs the deduplicator first, under
/// the joint staging and index locks.
pub fn compact_staging(config: &Config) -> Result<()> {
    let _staging_lock = DirLock::exclusive(&config.staging_dir)?;
    let _index_lock = DirLock::exclusive(&config.index_dir)?;

    let replaced = dedup::run(&config.staging_dir, config.content_hash)?;
    info!(target: "pack", "dedup replaced {} staged files", replaced);

    loop {
        if crate::is_shutdown() {
            break;
        }
        let entries = staging::list(&config.staging_dir, None)?;
        let live: u64 = entries.iter().map(estimate).sum();
        if live < config.tar_threshold {
            break;
        }
        let packed = emit_pack(config, &entries)?;
        if packed == 0 {
            break;
        }
    }

    cache::invalidate();
    Ok(())
}

// Tar footprint estimate: one block of header per file, payload
// rounded up to the block size, symlink entries are a lone header.
fn estimate(entry: &Entry) -> u64 {
    let info_size = util::file_size(&entry.info_file).unwrap_or(0);
    let data_size = match &entry.carrier {
        Carrier::Regular(path) => in_blocks(util::file_size(path).unwrap_or(0)),
        Carrier::LinkTarget { .. } => BLOCK_SIZE,
    };
    in_blocks(info_size) + data_size
}

fn in_blocks(size: u64) -> u64 {
    (size / BLOCK_SIZE + 1) * BLOCK_SIZE
}

// Emit one pack from the listed entries. Regular entries are appended
// until the pack reaches the tar threshold, symlink entries ride with
// their origin, or are written with a best-effort origin lookup at the
// end. Returns the number of ids published into the paired cdb.
fn emit_pack(config: &Config, entries: &[Entry]) -> Result<usize> {
    let pack_id = Id::generate();
    let tar_name = format!("{}-{}-{}.tar", config.realm, util::strnow(), pack_id);
    let tar_path = path::Path::new(&config.tar_dir)
        .join(pack_id.to_shard())
        .join(&tar_name);
    let cdb_path = {
        let mut path = tar_path.clone().into_os_string();
        path.push(".cdb");
        path
    };

    // symlinks keyed by origin, written inline once the origin lands.
    let mut deferred: HashMap<ffi::OsString, Vec<&Entry>> = HashMap::new();
    for entry in entries.iter() {
        if let Carrier::LinkTarget { origin_path, .. } = &entry.carrier {
            deferred
                .entry(origin_path.clone())
                .or_insert_with(Vec::new)
                .push(entry);
        }
    }

    let mut tf = TarFile::open_for_append(tar_path.as_os_str())?;
    let mut cw = cdb::Writer::create(&cdb_path)?;
    let mut links: HashMap<ffi::OsString, u64> = HashMap::new();
    let start = tf.to_pos();
    let mut published = 0;

    for entry in entries.iter().filter(|e| !e.carrier.is_link()) {
        if tf.to_pos() - start >= config.tar_threshold {
            break;
        }
        let data_path = entry.carrier.to_path();

        let mut info = entry.info.clone();
        info.ipos = tf.to_pos();
        append_info(&mut tf, entry)?;
        info.dpos = tf.to_pos();
        links.insert(data_path.clone(), info.dpos);
        append_payload(&mut tf, entry, &data_path)?;
        cw.put(entry.id.to_canonical().as_bytes(), &info.to_bytes())?;
        published += 1;

        for link in deferred.remove(&data_path).unwrap_or_default() {
            let mut linfo = link.info.clone();
            linfo.ipos = tf.to_pos();
            append_info(&mut tf, link)?;
            linfo.dpos = links[&data_path];
            let linkname = util::basename(&data_path).unwrap_or_default();
            tf.append_symlink(&format!("{}{}", link.id, SUFF_LINK), &linkname)?;
            cw.put(link.id.to_canonical().as_bytes(), &linfo.to_bytes())?;
            published += 1;
        }
    }

    // origin not in this pack: the symlink still resolves on disk,
    // append the payload it points at as a regular entry.
    for (origin, waiting) in deferred.into_iter() {
        for link in waiting {
            warn!(
                target: "pack",
                "origin {:?} not packed, copying payload of {}", origin, link.id
            );
            let mut linfo = link.info.clone();
            linfo.ipos = tf.to_pos();
            append_info(&mut tf, link)?;
            linfo.dpos = tf.to_pos();
            append_payload(&mut tf, link, &link.carrier.to_path())?;
            cw.put(link.id.to_canonical().as_bytes(), &linfo.to_bytes())?;
            published += 1;
        }
    }

    tf.close()?;
    cw.close()?;

    // pair is durable, publish it into L00.
    let cdb_abs = err_at!(IOError, path::Path::new(&cdb_path).canonicalize())?;
    let l00_link: path::PathBuf = [
        config.to_level_dir(0),
        format!("{}.cdb", tar_name).into(),
    ]
    .iter()
    .collect();
    err_at!(
        IOError,
        std::os::unix::fs::symlink(&cdb_abs, &l00_link),
        "{:?}",
        l00_link
    )?;

    // only ids present in the new cdb may leave staging; info files
    // first so readers never see a carrier-less entry.
    let staging_dir = path::Path::new(&config.staging_dir);
    let mut removed = 0;
    for item in cdb::Cdb::open(&cdb_path)?.iter()? {
        let (key, _) = item?;
        let id: Id = match std::str::from_utf8(&key).ok().and_then(|s| s.parse().ok()) {
            Some(id) => id,
            None => continue,
        };
        let shard_dir = staging_dir.join(id.to_shard());
        fs::remove_file(shard_dir.join(format!("{}{}", id, SUFF_INFO))).ok();
        fs::remove_file(shard_dir.join(format!("{}{}", id, SUFF_DATA))).ok();
        fs::remove_file(shard_dir.join(format!("{}{}", id, SUFF_LINK))).ok();
        removed += 1;
    }

    info!(
        target: "pack",
        "packed {} entries into {:?}, cleared {} staged ids", published, tar_name, removed
    );
    Ok(published)
}

// The tar info entry carries the staging info file bytes as written at
// put time, the offsets live only in the paired cdb.
fn append_info(tf: &mut TarFile, entry: &Entry) -> Result<()> {
    let bytes = err_at!(IOError, fs::read(&entry.info_file), "{:?}", entry.info_file)?;
    let name = format!("{}{}", entry.id, SUFF_INFO);
    tf.append_data(&name, &mut bytes.as_slice(), bytes.len() as u64)?;
    Ok(())
}

// Append the compressed payload under `<id>#<suffix>`. Opening the
// path follows symlinks, so a link carrier appends its origin's bytes.
fn append_payload(tf: &mut TarFile, entry: &Entry, data_path: &ffi::OsStr) -> Result<()> {
    let method = entry
        .info
        .get(KEY_CONTENT_ENCODING)
        .and_then(|name| Method::from_name(name).ok())
        .unwrap_or(Method::Plain);
    let name = format!("{}{}{}", entry.id, SUFF_DATA, method.to_suffix());
    let size = util::file_size(data_path)?;
    let mut fd = util::open_file_r(data_path)?;
    tf.append_data(&name, &mut fd, size)?;
    Ok(())
}

#[cfg(test)]
#[path = "pack_test.rs"]
mod pack_test;
