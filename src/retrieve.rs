//! Retriever, resolves an identifier into metadata and a payload
//! stream.
//!
//! Lookup order is staging, then the level-0 pack indexes, then the
//! higher levels with one book indirection each. A miss forces a cache
//! reload and a one second backoff, up to three attempts, before
//! surfacing `KeyNotFound`. Reads run against immutable artifacts and
//! need no locks; a compaction finishing mid-lookup is absorbed by the
//! reload.

use log::{debug, warn};

use std::{convert::TryFrom, ffi, fs, io, path, thread, time};

use crate::{
    cache::{self, RealmFiles},
    cdb::Cdb,
    compress::Method,
    config::Config,
    err_at,
    id::Id,
    info::{Info, KEY_CONTENT_ENCODING},
    staging::{self, SUFF_DATA, SUFF_INFO, SUFF_LINK},
    tarfile, util, Error, Result,
};

// Longest tolerated chain of tar symlink entries while resolving a
// payload.
const MAX_LINK_HOPS: usize = 4;

/// Look up `id`: metadata plus a streaming reader over the
/// uncompressed payload.
pub fn get(config: &Config, id: &Id) -> Result<(Info, Box<dyn io::Read>)> {
    for attempt in 0..3 {
        if attempt > 0 {
            cache::fill(config, true)?;
            thread::sleep(time::Duration::from_secs(1));
        }
        match lookup(config, id) {
            Ok(Some(found)) => return Ok(found),
            Ok(None) => debug!(target: "retrieve", "{} miss, attempt {}", id, attempt),
            // transient read failures get one more go after a reload.
            Err(Error::IOError(_, _)) if attempt == 0 => (),
            Err(err) => return Err(err),
        }
    }
    err_at!(KeyNotFound, msg: "{}", id)
}

fn lookup(config: &Config, id: &Id) -> Result<Option<(Info, Box<dyn io::Read>)>> {
    if let Some(found) = lookup_staging(config, id)? {
        return Ok(Some(found));
    }
    let snap = cache::snapshot(config)?;
    let (info, tar_file) = match lookup_record(&snap, id)? {
        Some(found) => found,
        None => return Ok(None),
    };
    let data = open_payload(&snap, &tar_file, &info, MAX_LINK_HOPS)?;
    Ok(Some((info, data)))
}

// Staging probe: `<staging>/<ab>/<id>!` plus its carrier. A symlink
// carrier resolves to the origin's data file, and the payload encoding
// is re-read from the origin's info file when it is still around.
fn lookup_staging(config: &Config, id: &Id) -> Result<Option<(Info, Box<dyn io::Read>)>> {
    let shard_dir = path::Path::new(&config.staging_dir).join(id.to_shard());
    let info_file = shard_dir.join(format!("{}{}", id, SUFF_INFO));
    if !info_file.is_file() {
        return Ok(None);
    }
    let info = staging::read_info(info_file.as_os_str())?;

    let data_file = shard_dir.join(format!("{}{}", id, SUFF_DATA));
    let link_file = shard_dir.join(format!("{}{}", id, SUFF_LINK));
    let (payload, method) = if data_file.is_file() {
        (data_file, encoding_of(&info))
    } else {
        match fs::read_link(&link_file) {
            Ok(target) => {
                let origin = match target.is_absolute() {
                    true => target,
                    false => shard_dir.join(target),
                };
                (origin.clone(), origin_encoding(&origin, &info))
            }
            Err(_) => {
                warn!(target: "retrieve", "staged {} has no data carrier", id);
                return Ok(None);
            }
        }
    };

    let fd = util::open_file_r(payload.as_os_str())?;
    Ok(Some((info, method.decoder(Box::new(fd)))))
}

// Find the full metadata record of `id` and the pack tar holding its
// payload, walking level 0 first, then the higher levels.
fn lookup_record(snap: &RealmFiles, id: &Id) -> Result<Option<(Info, ffi::OsString)>> {
    let key = id.to_canonical().into_bytes();

    for cdb_file in snap.cdb_files.first().map(|v| v.as_slice()).unwrap_or(&[]) {
        let mut cdb = match Cdb::open(cdb_file) {
            Ok(cdb) => cdb,
            Err(err) => {
                // merged away since the snapshot, reload will catch up.
                debug!(target: "retrieve", "skipping {:?}: {}", cdb_file, err);
                continue;
            }
        };
        if let Some(value) = cdb.lookup(&key)? {
            let info = Info::try_from(value.as_slice())?;
            let tar_file = pack_of_l0(cdb_file, snap)?;
            return Ok(Some((info, tar_file)));
        }
    }

    for level in 1..snap.cdb_files.len() {
        for cdb_file in snap.cdb_files[level].iter() {
            let mut cdb = match Cdb::open(cdb_file) {
                Ok(cdb) => cdb,
                Err(err) => {
                    debug!(target: "retrieve", "skipping {:?}: {}", cdb_file, err);
                    continue;
                }
            };
            let book_key = match cdb.lookup(&key)? {
                Some(book_key) => book_key,
                None => continue,
            };
            // the book names a level-0 pack basename, transitively.
            let book_val = match cdb.lookup(&book_key)? {
                Some(book_val) => book_val,
                None => err_at!(
                    Corruption,
                    msg: "unknown book {:?} in {:?}",
                    String::from_utf8_lossy(&book_key),
                    cdb_file
                )?,
            };
            let base = err_at!(FailConvert, String::from_utf8(book_val))?;
            let tar_file = match snap.tar_files.get(&base) {
                Some(tar_file) => tar_file.clone(),
                None => {
                    warn!(target: "retrieve", "pack {:?} not in cache", base);
                    continue;
                }
            };
            let mut paired = tar_file.clone();
            paired.push(".cdb");
            let mut paired = Cdb::open(&paired)?;
            match paired.lookup(&key)? {
                Some(value) => {
                    let info = Info::try_from(value.as_slice())?;
                    return Ok(Some((info, tar_file)));
                }
                None => {
                    return err_at!(
                        Corruption,
                        msg: "{} indexed at L{:02} but absent from pack {:?}",
                        id,
                        level,
                        base
                    )
                }
            }
        }
    }

    Ok(None)
}

// Seek-read the payload at its recorded offset, chasing tar symlink
// entries through their origin's record, bounded by `hops`.
fn open_payload(
    snap: &RealmFiles,
    tar_file: &ffi::OsStr,
    info: &Info,
    hops: usize,
) -> Result<Box<dyn io::Read>> {
    match tarfile::read_item(tar_file, info.dpos)? {
        tarfile::Item::Data { data, .. } => Ok(data),
        tarfile::Item::Symlink { linkname } => {
            if hops == 0 {
                return err_at!(Corruption, msg: "symlink chain too deep in {:?}", tar_file);
            }
            let origin_id = parse_entry_id(&linkname)?;
            match lookup_record(snap, &origin_id)? {
                Some((origin_info, origin_tar)) => {
                    open_payload(snap, &origin_tar, &origin_info, hops - 1)
                }
                None => err_at!(
                    Corruption,
                    msg: "origin {} of symlink entry not indexed", origin_id
                ),
            }
        }
    }
}

// The L0 cdb is a symlink beside the pack tar; its target, shorn of
// `.cdb`, is the tar path. Fall back to the pack cache for a plain
// file.
fn pack_of_l0(cdb_file: &ffi::OsStr, snap: &RealmFiles) -> Result<ffi::OsString> {
    if let Ok(target) = fs::read_link(cdb_file) {
        if let Some(tar) = target.to_str().and_then(|s| s.strip_suffix(".cdb")) {
            return Ok(ffi::OsString::from(tar));
        }
    }
    let base = util::basename(cdb_file).and_then(|s| s.strip_suffix(".cdb").map(String::from));
    match base.and_then(|b| snap.tar_files.get(&b)) {
        Some(tar) => Ok(tar.clone()),
        None => err_at!(InvalidFile, msg: "no pack for index {:?}", cdb_file),
    }
}

// `<id>#gz`, `<id>@` and friends: the id is the run before the suffix
// marker.
fn parse_entry_id(name: &str) -> Result<Id> {
    let end = name
        .find(|ch| ch == '#' || ch == '@' || ch == '!')
        .unwrap_or(name.len());
    match name[..end].parse() {
        Ok(id) => Ok(id),
        Err(_) => err_at!(Corruption, msg: "bad entry name {:?}", name),
    }
}

// Payload encoding of a staged symlink: prefer the origin's info file,
// the origin may have been re-encoded.
fn origin_encoding(origin: &path::Path, own: &Info) -> Method {
    let origin_str = origin.to_string_lossy();
    let origin_info = origin_str
        .rfind(SUFF_DATA)
        .map(|n| format!("{}{}", &origin_str[..n], SUFF_INFO));
    if let Some(file) = origin_info {
        if let Ok(info) = staging::read_info(ffi::OsStr::new(&file)) {
            return encoding_of(&info);
        }
    }
    encoding_of(own)
}

fn encoding_of(info: &Info) -> Method {
    info.get(KEY_CONTENT_ENCODING)
        .and_then(|name| Method::from_name(name).ok())
        .unwrap_or(Method::Plain)
}

#[cfg(test)]
#[path = "retrieve_test.rs"]
mod retrieve_test;
