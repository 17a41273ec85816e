use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{fs, io::Read};

use super::*;
use crate::{config::Config, info::Info, retrieve, staging::put};

fn scratch_config(name: &str, seed: u64) -> Config {
    let base = std::env::temp_dir().join(format!("{}-{}", name, seed));
    fs::remove_dir_all(&base).ok();
    let config = Config::new_under(&base, &format!("r{}", seed));
    config.init_dirs().unwrap();
    config
}

#[test]
fn test_dedup_pairs() {
    let seed: u64 = random();
    println!("test_dedup_pairs {}", seed);

    let config = scratch_config("aostor-dedup-pairs", seed);
    let payload = [0x0a, 0x0a, 0x0a, 0x0a, 0x0a];

    let id1 = put(&config, Info::default(), &mut &payload[..]).unwrap();
    let id2 = put(&config, Info::default(), &mut &payload[..]).unwrap();
    assert_ne!(id1, id2);

    let replaced = dedup(&config.staging_dir, config.content_hash).unwrap();
    assert_eq!(replaced, 1);

    // one regular survives as the link target of the other.
    let entries = staging::list(&config.staging_dir, Some(config.content_hash)).unwrap();
    assert_eq!(entries.len(), 2);
    let regulars: Vec<&Entry> = entries.iter().filter(|e| !e.carrier.is_link()).collect();
    let links: Vec<&Entry> = entries.iter().filter(|e| e.carrier.is_link()).collect();
    assert_eq!(regulars.len(), 1);
    assert_eq!(links.len(), 1);
    match &links[0].carrier {
        Carrier::LinkTarget { origin_path, .. } => {
            assert_eq!(origin_path, &regulars[0].carrier.to_path());
        }
        Carrier::Regular(path) => panic!("unexpected regular {:?}", path),
    }

    // reads are preserved for both ids.
    for id in [id1, id2].iter() {
        let (info, mut data) = retrieve::get(&config, id).unwrap();
        let mut out = vec![];
        data.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload, "{}", id);
        assert_eq!(info.to_original_size(), Some(5));
    }
}

#[test]
fn test_dedup_idempotent() {
    let seed: u64 = random();
    let mut rng = SmallRng::seed_from_u64(seed);
    println!("test_dedup_idempotent {}", seed);

    let config = scratch_config("aostor-dedup-idem", seed);

    let mut shared = vec![0_u8; 500];
    rng.fill(shared.as_mut_slice());
    for _i in 0..5 {
        put(&config, Info::default(), &mut shared.as_slice()).unwrap();
    }
    let mut unique = vec![0_u8; 500];
    rng.fill(unique.as_mut_slice());
    put(&config, Info::default(), &mut unique.as_slice()).unwrap();

    assert_eq!(dedup(&config.staging_dir, config.content_hash).unwrap(), 4);
    // a second invocation with no new writes replaces nothing.
    assert_eq!(dedup(&config.staging_dir, config.content_hash).unwrap(), 0);

    let entries = staging::list(&config.staging_dir, None).unwrap();
    assert_eq!(entries.len(), 6);
    assert_eq!(entries.iter().filter(|e| e.carrier.is_link()).count(), 4);
}

#[test]
fn test_dedup_distinct_untouched() {
    let seed: u64 = random();
    let mut rng = SmallRng::seed_from_u64(seed);
    println!("test_dedup_distinct_untouched {}", seed);

    let config = scratch_config("aostor-dedup-distinct", seed);
    for i in 0..8_u8 {
        let mut payload = vec![i; 64];
        rng.fill(&mut payload[..32]);
        put(&config, Info::default(), &mut payload.as_slice()).unwrap();
    }

    assert_eq!(dedup(&config.staging_dir, config.content_hash).unwrap(), 0);
    let entries = staging::list(&config.staging_dir, None).unwrap();
    assert_eq!(entries.iter().filter(|e| e.carrier.is_link()).count(), 0);
}
