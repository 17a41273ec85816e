//! Index compactor, merges per-level cdb files into the next level.
//!
//! A merged cdb holds two kinds of records. *Book* entries key a small
//! decimal alias `/<N>` to the basename (without `.cdb`) of a level-0
//! pack index, *forward* entries key an id to the book alias of the
//! file holding its real record. Lookups pay one book indirection per
//! level, so the tower stays O(levels · log per-level) as packs pile
//! up. Inputs are removed only after the merged output is durable, a
//! reader holding the old files keeps a consistent view.

use log::info;

use std::{ffi, fs, path};

use crate::{
    cache, cdb,
    config::{self, Config},
    err_at,
    flock::DirLock,
    id::Id,
    util, Error, Result,
};

/// Merged cdb files stay below this, 2^31 - 1.
pub const MAX_CDB_SIZE: u64 = (1 << 31) - 1;

/// Candidates at or below this size hold no records (a bare table of
/// contents) and are left out of merges.
pub const MIN_MERGE_SIZE: u64 = cdb::TOC_SIZE;

/// Merge index levels from `start_level` upwards while a level holds
/// at least `threshold.index` candidate files. The deepest output
/// level is `L09`.
pub fn compact_indices(config: &Config, start_level: usize) -> Result<()> {
    let _lock = DirLock::exclusive(&config.index_dir)?;

    for level in start_level..config::MAX_LEVEL {
        if crate::is_shutdown() {
            break;
        }
        let merged = compact_level(config, level)?;
        if merged == 0 {
            break;
        }
    }

    cache::invalidate();
    Ok(())
}

// Merge one level into the next. Candidates are taken largest first,
// greedily, up to `threshold.index` files per output while the batch
// stays below MAX_CDB_SIZE; oversized candidates advance a skip
// pointer and wait for the next pass. Returns the number of files
// merged away.
fn compact_level(config: &Config, level: usize) -> Result<usize> {
    let mut files = list_cdbs(&config.to_level_dir(level))?;
    if files.len() < config.index_threshold {
        return Ok(0);
    }
    files.sort_by(|(_, a), (_, b)| b.cmp(a));

    let dest_dir = config.to_level_dir(level + 1);
    let (mut merged, mut skip) = (0, 0);
    while skip < files.len() {
        let mut batch = vec![];
        let mut size = 0;
        let mut askip = 0;
        for (i, (file, fsize)) in files[skip..].iter().enumerate() {
            if size + fsize < MAX_CDB_SIZE {
                batch.push(file.clone());
                size += fsize;
                if batch.len() >= config.index_threshold {
                    break;
                }
            } else if askip == 0 {
                askip = i;
            }
        }
        if batch.is_empty() {
            skip += 1;
            continue;
        }
        if askip == 0 {
            askip = batch.len();
        }
        skip += askip;

        let dest: path::PathBuf = [
            dest_dir.clone(),
            format!("{}-{}.cdb", util::strnow(), Id::generate()).into(),
        ]
        .iter()
        .collect();
        merge_cdbs(dest.as_os_str(), &batch, level)?;
        info!(
            target: "merge",
            "L{:02} merged {} files into {:?}", level, batch.len(), dest
        );
        merged += batch.len();
    }
    Ok(merged)
}

fn list_cdbs(dir: &ffi::OsStr) -> Result<Vec<(ffi::OsString, u64)>> {
    let mut files = vec![];
    for item in err_at!(IOError, fs::read_dir(dir), "{:?}", dir)? {
        let item = err_at!(IOError, item)?;
        let name = item.file_name();
        match name.to_str() {
            Some(name) if name.ends_with(".cdb") => (),
            _ => continue,
        }
        let file: path::PathBuf = [dir, &name].iter().collect();
        let size = util::file_size(file.as_os_str()).unwrap_or(0);
        if size > MIN_MERGE_SIZE {
            files.push((file.into_os_string(), size));
        }
    }
    files.sort();
    Ok(files)
}

// Merge the source files into `dest`. Books are renumbered into the
// output's namespace, forward entries are rewritten through the
// translation; an unknown book reference is a corruption. Sources are
// unlinked once the output is verified on disk: at level 0 the sources
// are the L00 symlinks, their paired targets stay behind forever.
fn merge_cdbs(dest: &ffi::OsStr, sources: &[ffi::OsString], level: usize) -> Result<()> {
    let mut cw = cdb::Writer::create(dest)?;
    let mut booknum = 0_usize;

    for source in sources.iter() {
        if level == 0 {
            let book_key = format!("/{}", booknum);
            booknum += 1;
            let book_val = match util::basename(source).and_then(strip_cdb) {
                Some(name) => name,
                None => err_at!(InvalidFile, msg: "bad index file name {:?}", source)?,
            };
            cw.put(book_key.as_bytes(), book_val.as_bytes())?;
            for item in cdb::Cdb::open(source)?.iter()? {
                let (key, _) = item?;
                cw.put(&key, book_key.as_bytes())?;
            }
        } else {
            // book translation is local to each source file.
            let mut books: Vec<(Vec<u8>, Vec<u8>)> = vec![];
            for item in cdb::Cdb::open(source)?.iter()? {
                let (key, value) = item?;
                if key.first() == Some(&b'/') {
                    let book_key = format!("/{}", booknum).into_bytes();
                    booknum += 1;
                    cw.put(&book_key, &value)?;
                    books.push((key, book_key));
                } else {
                    let book = books.iter().find(|(old, _)| *old == value);
                    match book {
                        Some((_, book_key)) => cw.put(&key, book_key)?,
                        None => err_at!(
                            Corruption,
                            msg: "unknown book {:?} in {:?}",
                            String::from_utf8_lossy(&value),
                            source
                        )?,
                    }
                }
            }
        }
    }

    cw.close()?;
    if !path::Path::new(dest).is_file() {
        return err_at!(Fatal, msg: "merged index {:?} did not land", dest);
    }
    for source in sources.iter() {
        err_at!(IOError, fs::remove_file(source), "{:?}", source)?;
    }
    Ok(())
}

fn strip_cdb(name: String) -> Option<String> {
    name.strip_suffix(".cdb").map(|s| s.to_string())
}

#[cfg(test)]
#[path = "merge_test.rs"]
mod merge_test;
