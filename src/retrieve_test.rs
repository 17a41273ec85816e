use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{fs, io::Read};

use super::*;
use crate::{pack, staging::put};

fn scratch_config(name: &str, seed: u64) -> Config {
    let base = std::env::temp_dir().join(format!("{}-{}", name, seed));
    fs::remove_dir_all(&base).ok();
    let config = Config::new_under(&base, &format!("r{}", seed));
    config.init_dirs().unwrap();
    config
}

#[test]
fn test_get_staged() {
    let seed: u64 = random();
    let mut rng = SmallRng::seed_from_u64(seed);
    println!("test_get_staged {}", seed);

    let config = scratch_config("aostor-retrieve-staged", seed);

    let mut payload = vec![0_u8; 10_000];
    rng.fill(payload.as_mut_slice());
    let mut meta = Info::default();
    meta.add("Content-Type", "text/plain");
    meta.add("Content-Disposition", "attachment");
    let id = put(&config, meta, &mut payload.as_slice()).unwrap();

    let (info, mut data) = get(&config, &id).unwrap();
    let mut out = vec![];
    data.read_to_end(&mut out).unwrap();
    assert_eq!(out, payload);
    assert_eq!(info.id, Some(id));
    assert_eq!(info.get("Content-Type"), Some("text/plain"));
    assert_eq!(info.get("Content-Disposition"), Some("attachment"));
    assert_eq!(info.to_original_size(), Some(10_000));
}

#[test]
fn test_get_not_found() {
    let seed: u64 = random();
    println!("test_get_not_found {}", seed);

    let config = scratch_config("aostor-retrieve-missing", seed);
    put(&config, Info::default(), &mut &[9_u8, 9, 9][..]).unwrap();

    // a random id was never written, misses surface after the forced
    // cache reloads.
    let missing = Id::generate();
    match get(&config, &missing) {
        Err(Error::KeyNotFound(_, _)) => (),
        Err(err) => panic!("unexpected err: {}", err),
        Ok(_) => panic!("unexpected hit for {}", missing),
    }
}

#[test]
fn test_monotone_durability() {
    let seed: u64 = random();
    let mut rng = SmallRng::seed_from_u64(seed);
    println!("test_monotone_durability {}", seed);

    let mut config = scratch_config("aostor-retrieve-durable", seed);
    config.tar_threshold = 512;

    let mut payload = vec![0_u8; 700];
    rng.fill(payload.as_mut_slice());
    let id = put(&config, Info::default(), &mut payload.as_slice()).unwrap();

    // readable while staged, across packing, and across index merges.
    for round in 0..3 {
        let (_, mut data) = get(&config, &id).unwrap();
        let mut out = vec![];
        data.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload, "round {}", round);
        if round == 0 {
            pack::compact_staging(&config).unwrap();
        }
    }
}
