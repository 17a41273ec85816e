use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{fs, io::Read};

use super::*;
use crate::{info::Info, pack, retrieve, staging::put};

fn scratch_config(name: &str, seed: u64) -> Config {
    let base = std::env::temp_dir().join(format!("{}-{}", name, seed));
    fs::remove_dir_all(&base).ok();
    let mut config = Config::new_under(&base, &format!("r{}", seed));
    config.index_threshold = 2;
    config.tar_threshold = 512;
    config.init_dirs().unwrap();
    config
}

fn level_files(config: &Config, level: usize) -> Vec<ffi::OsString> {
    let dir = config.to_level_dir(level);
    let mut files: Vec<ffi::OsString> = fs::read_dir(&dir)
        .unwrap()
        .map(|item| item.unwrap().path().into_os_string())
        .filter(|p| p.to_str().unwrap().ends_with(".cdb"))
        .collect();
    files.sort();
    files
}

fn put_batch(config: &Config, rng: &mut SmallRng, n: usize) -> Vec<(Id, Vec<u8>)> {
    let mut staged = vec![];
    for _i in 0..n {
        let mut payload = vec![0_u8; 64 + rng.gen::<usize>() % 512];
        rng.fill(payload.as_mut_slice());
        let id = put(config, Info::default(), &mut payload.as_slice()).unwrap();
        staged.push((id, payload));
    }
    staged
}

fn assert_readable(config: &Config, objects: &[(Id, Vec<u8>)]) {
    for (id, payload) in objects.iter() {
        let (_, mut data) = retrieve::get(config, id).unwrap();
        let mut out = vec![];
        data.read_to_end(&mut out).unwrap();
        assert_eq!(&out, payload, "{}", id);
    }
}

#[test]
fn test_compact_two_levels() {
    let seed: u64 = random();
    let mut rng = SmallRng::seed_from_u64(seed);
    println!("test_compact_two_levels {}", seed);

    let config = scratch_config("aostor-merge", seed);

    // two packs, two L00 entries.
    let mut objects = put_batch(&config, &mut rng, 3);
    pack::compact_staging(&config).unwrap();
    objects.extend(put_batch(&config, &mut rng, 3));
    pack::compact_staging(&config).unwrap();
    assert_eq!(level_files(&config, 0).len(), 2);

    compact_indices(&config, 0).unwrap();

    // both sources merged away into one L01 file.
    assert_eq!(level_files(&config, 0).len(), 0);
    let l01 = level_files(&config, 1);
    assert_eq!(l01.len(), 1);

    // the merged index carries two books naming the pack basenames,
    // and one forward entry per id.
    let mut books = 0;
    let mut forwards = 0;
    for item in cdb::Cdb::open(&l01[0]).unwrap().iter().unwrap() {
        let (key, value) = item.unwrap();
        if key.first() == Some(&b'/') {
            let name = String::from_utf8(value).unwrap();
            assert!(name.ends_with(".tar"), "{:?}", name);
            books += 1;
        } else {
            let alias = String::from_utf8(value).unwrap();
            assert!(alias.starts_with('/'), "{:?}", alias);
            forwards += 1;
        }
    }
    assert_eq!(books, 2);
    assert_eq!(forwards, objects.len());

    // every id resolves through the merged level.
    assert_readable(&config, &objects);

    // nothing left to merge, L01 is below the threshold.
    compact_indices(&config, 0).unwrap();
    assert_eq!(level_files(&config, 1).len(), 1);
    assert_eq!(level_files(&config, 2).len(), 0);
}

#[test]
fn test_compact_reaches_l2() {
    let seed: u64 = random();
    let mut rng = SmallRng::seed_from_u64(seed);
    println!("test_compact_reaches_l2 {}", seed);

    let config = scratch_config("aostor-merge-l2", seed);

    let mut objects = vec![];
    for _round in 0..2 {
        // two packs per round, then merge: each round adds one L01 file.
        for _pack in 0..2 {
            objects.extend(put_batch(&config, &mut rng, 2));
            pack::compact_staging(&config).unwrap();
        }
        compact_indices(&config, 0).unwrap();
    }

    // the second merge found two L01 files and rebooked them into L02.
    assert_eq!(level_files(&config, 0).len(), 0);
    assert_eq!(level_files(&config, 1).len(), 0);
    assert_eq!(level_files(&config, 2).len(), 1);

    // books at L02 still transitively name level-0 pack files.
    for item in cdb::Cdb::open(&level_files(&config, 2)[0]).unwrap().iter().unwrap() {
        let (key, value) = item.unwrap();
        if key.first() == Some(&b'/') {
            assert!(String::from_utf8(value).unwrap().ends_with(".tar"));
        }
    }

    assert_readable(&config, &objects);
}

#[test]
fn test_small_indices_ignored() {
    let seed: u64 = random();
    println!("test_small_indices_ignored {}", seed);

    let config = scratch_config("aostor-merge-small", seed);

    // two empty cdb files, records hold nothing but the toc.
    for i in 0..2 {
        let file: path::PathBuf = [
            config.to_level_dir(1),
            format!("2000{}-empty.cdb", i).into(),
        ]
        .iter()
        .collect();
        cdb::Writer::create(file.as_os_str()).unwrap().close().unwrap();
    }

    compact_indices(&config, 1).unwrap();
    // too small to merge, both stay put.
    assert_eq!(level_files(&config, 1).len(), 2);
    assert_eq!(level_files(&config, 2).len(), 0);
}
