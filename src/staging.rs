//! Staging tier, the per-object area in front of the packs.
//!
//! A staged object is an info file `<id>!` plus exactly one data
//! carrier: a regular file `<id>#` holding the compressed payload, or a
//! symlink `<id>@` pointing at another entry's data file. Entries live
//! in shard directories named by the first two characters of the id.
//! The info file is written after the data carrier, a reader that sees
//! an info file can rely on the carrier being present.

use log::{debug, warn};

use std::{
    convert::TryFrom,
    ffi, fs,
    io::{self, Write},
    path,
};

use crate::{
    config::Config,
    err_at,
    hash::HashAlgo,
    id::Id,
    info::{self, Info},
    util, Error, Result,
};

/// Suffix of info files.
pub const SUFF_INFO: &str = "!";
/// Suffix of regular data files, compressed payload bytes.
pub const SUFF_DATA: &str = "#";
/// Suffix of symlink data carriers.
pub const SUFF_LINK: &str = "@";

/// Data carrier of a staged object. Deduplication turns byte-identical
/// payloads into a graph of data nodes and link nodes, link nodes carry
/// the origin path they resolve to.
#[derive(Clone, Debug)]
pub enum Carrier {
    /// Regular data file `<id>#`.
    Regular(ffi::OsString),
    /// Symlink `<id>@` and the resolved path of its origin data file.
    LinkTarget {
        path: ffi::OsString,
        origin_path: ffi::OsString,
    },
}

impl Carrier {
    pub fn to_path(&self) -> ffi::OsString {
        match self {
            Carrier::Regular(path) => path.clone(),
            Carrier::LinkTarget { path, .. } => path.clone(),
        }
    }

    pub fn is_link(&self) -> bool {
        match self {
            Carrier::Regular(_) => false,
            Carrier::LinkTarget { .. } => true,
        }
    }
}

/// One staged object, as found on disk by [list].
#[derive(Clone, Debug)]
pub struct Entry {
    pub id: Id,
    pub info: Info,
    pub info_file: ffi::OsString,
    pub carrier: Carrier,
    /// Content digest from the metadata, when a hash algorithm was
    /// asked for.
    pub content_hash: Option<String>,
}

/// List the staged objects under `dir`, regular carriers before
/// symlinks. Entries with unreadable metadata or without a carrier are
/// skipped with a warning. When `algo` is given, each entry's content
/// digest is picked out of its metadata.
pub fn list(dir: &ffi::OsStr, algo: Option<HashAlgo>) -> Result<Vec<Entry>> {
    let dir = err_at!(IOError, path::Path::new(dir).canonicalize(), "{:?}", dir)?;

    let mut shards = vec![];
    for item in err_at!(IOError, fs::read_dir(&dir))? {
        let item = err_at!(IOError, item)?;
        let is_dir = err_at!(IOError, item.file_type())?.is_dir();
        if is_dir && item.file_name().len() == 2 {
            shards.push(item.file_name());
        }
    }
    shards.sort();

    let (mut entries, mut links) = (vec![], vec![]);
    for shard in shards.into_iter() {
        let shard_dir = dir.join(&shard);
        let mut names = vec![];
        for item in err_at!(IOError, fs::read_dir(&shard_dir))? {
            let name = err_at!(IOError, item)?.file_name();
            if let Some(name) = name.to_str() {
                if name.ends_with(SUFF_INFO) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        for name in names.into_iter() {
            let id_str = &name[..name.len() - SUFF_INFO.len()];
            let id: Id = match id_str.parse() {
                Ok(id) => id,
                Err(_) => {
                    warn!(target: "staging", "skipping alien file {:?}", name);
                    continue;
                }
            };
            let info_file = shard_dir.join(&name);
            let info = match read_info(info_file.as_os_str()) {
                Ok(info) => info,
                Err(err) => {
                    warn!(target: "staging", "cannot read info {:?}: {}", info_file, err);
                    continue;
                }
            };
            let carrier = match find_carrier(&shard_dir, id_str) {
                Ok(Some(carrier)) => carrier,
                Ok(None) => {
                    warn!(target: "staging", "no data carrier for {:?}", info_file);
                    continue;
                }
                Err(err) => {
                    warn!(target: "staging", "bad data carrier for {:?}: {}", info_file, err);
                    continue;
                }
            };
            let content_hash = match algo {
                Some(algo) => info
                    .to_content_hash(algo.to_name())
                    .map(|digest| digest.to_string()),
                None => None,
            };
            let entry = Entry {
                id,
                info,
                info_file: info_file.into_os_string(),
                carrier,
                content_hash,
            };
            match entry.carrier.is_link() {
                false => entries.push(entry),
                true => links.push(entry),
            }
        }
    }

    entries.extend(links.into_iter());
    Ok(entries)
}

/// Read and parse the info file of one staged object.
pub fn read_info(file: &ffi::OsStr) -> Result<Info> {
    let bytes = err_at!(IOError, fs::read(file), "{:?}", file)?;
    Info::try_from(bytes.as_slice())
}

/// Store one object: stream `data` through the content hash, the byte
/// counters and the configured compressor into a fresh staging entry.
/// Returns the generated identifier.
pub fn put(config: &Config, mut info: Info, data: &mut dyn io::Read) -> Result<Id> {
    let staging = path::Path::new(&config.staging_dir);

    // fresh id, retrying the rare collision with an existing entry.
    let (id, info_file, data_file) = loop {
        let id = Id::generate();
        let shard_dir = staging.join(id.to_shard());
        let info_file = shard_dir.join(format!("{}{}", id, SUFF_INFO));
        if !info_file.exists() {
            let data_file = shard_dir.join(format!("{}{}", id, SUFF_DATA));
            break (id, info_file, data_file);
        }
        debug!(target: "staging", "id collision on {}, retrying", id);
    };

    match write_entry(config, &mut info, id, &info_file, &data_file, data) {
        Ok(id) => Ok(id),
        Err(err) => {
            // best effort cleanup, nothing under this id must survive.
            fs::remove_file(&data_file).ok();
            fs::remove_file(&info_file).ok();
            Err(err)
        }
    }
}

fn write_entry(
    config: &Config,
    info: &mut Info,
    id: Id,
    info_file: &path::Path,
    data_file: &path::Path,
    data: &mut dyn io::Read,
) -> Result<Id> {
    let fd = util::create_file_w(data_file.as_os_str())?;
    let mut encoder = config.compress_method.encoder(util::CountWriter::new(fd));
    let mut hasher = config.content_hash.hasher();

    let mut n_original = 0_u64;
    let mut buf = vec![0; 8 * 1024];
    loop {
        let n = err_at!(IOError, data.read(&mut buf))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        n_original += n as u64;
        err_at!(IOError, encoder.write_all(&buf[..n]))?;
    }
    let counter = encoder.finish()?;
    let n_stored = counter.to_count();
    err_at!(IOError, counter.into_inner().sync_all())?;

    if n_original == 0 || n_stored == 0 {
        return err_at!(EmptyPayload, msg: "{} original:{} stored:{}", id, n_original, n_stored);
    }

    info.id = Some(id);
    info.ipos = 0;
    info.dpos = 0;
    info.add(info::KEY_ORIGINAL_SIZE, &n_original.to_string());
    info.add(info::KEY_STORED_SIZE, &n_stored.to_string());
    let content_key = format!("{}{}", info::KEY_CONTENT_PREFIX, config.content_hash.to_name());
    info.add(&content_key, &hasher.finalize());
    if config.compress_method.to_name().len() > 0 {
        info.add(info::KEY_CONTENT_ENCODING, config.compress_method.to_name());
    }

    // the data carrier is durable, the info file may now appear.
    let mut fd = util::create_file_w(info_file.as_os_str())?;
    err_at!(IOError, fd.write_all(&info.to_bytes()))?;
    err_at!(IOError, fd.sync_all())?;

    debug!(target: "staging", "put {} original:{} stored:{}", id, n_original, n_stored);
    Ok(id)
}

fn find_carrier(shard_dir: &path::Path, id_str: &str) -> Result<Option<Carrier>> {
    let link_file = shard_dir.join(format!("{}{}", id_str, SUFF_LINK));
    match fs::symlink_metadata(&link_file) {
        Ok(md) if md.file_type().is_symlink() => {
            let target = err_at!(IOError, fs::read_link(&link_file))?;
            let origin_path = match target.is_absolute() {
                true => target,
                false => shard_dir.join(target),
            };
            if fs::symlink_metadata(&origin_path).is_err() {
                // dangling symlinks are illegal in staging.
                return err_at!(InvalidFile, msg: "dangling symlink {:?} -> {:?}", link_file, origin_path);
            }
            return Ok(Some(Carrier::LinkTarget {
                path: link_file.into_os_string(),
                origin_path: origin_path.into_os_string(),
            }));
        }
        _ => (),
    }

    let data_file = shard_dir.join(format!("{}{}", id_str, SUFF_DATA));
    match data_file.is_file() {
        true => Ok(Some(Carrier::Regular(data_file.into_os_string()))),
        false => Ok(None),
    }
}

#[cfg(test)]
#[path = "staging_test.rs"]
mod staging_test;
