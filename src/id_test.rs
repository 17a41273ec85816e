use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{collections::HashSet, convert::TryFrom};

use super::*;

#[test]
fn test_id_forms() {
    let seed: u64 = random();
    let mut rng = SmallRng::seed_from_u64(seed);
    println!("test_id_forms {}", seed);

    for _i in 0..1000 {
        let id = Id::generate();
        let canonical = id.to_canonical();
        let hex_form = id.to_hex();

        assert_eq!(canonical.len(), 22);
        assert_eq!(hex_form.len(), 32);
        assert_eq!(canonical.parse::<Id>().unwrap(), id);
        assert_eq!(hex_form.parse::<Id>().unwrap(), id);
        assert_eq!(id.to_shard(), canonical[..2].to_string());
    }

    for _i in 0..100 {
        let bytes = rng.gen::<[u8; 16]>();
        let id = Id::try_from(&bytes[..]).unwrap();
        assert_eq!(id.as_bytes(), &bytes[..]);
        assert_eq!(id.to_hex().parse::<Id>().unwrap(), id);
    }
}

#[test]
fn test_id_bad_input() {
    assert!("".parse::<Id>().is_err());
    assert!("short".parse::<Id>().is_err());
    // right length, wrong alphabet.
    assert!("!!!!!!!!!!!!!!!!!!!!!!".parse::<Id>().is_err());
    assert!("zz".repeat(16).parse::<Id>().is_err());
    assert!(Id::try_from(&[0_u8; 15][..]).is_err());
}

#[test]
fn test_id_uniqueness() {
    let mut seen = HashSet::new();
    for _i in 0..10_000 {
        assert!(seen.insert(Id::generate()));
    }
}
