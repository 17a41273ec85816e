use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::io::{Cursor, Read, Write};

use super::*;

#[test]
fn test_roundtrip() {
    let seed: u64 = random();
    let mut rng = SmallRng::seed_from_u64(seed);
    println!("test_roundtrip {}", seed);

    let mut data = vec![0_u8; 64 * 1024];
    rng.fill(data.as_mut_slice());
    // a compressible tail.
    data.extend(std::iter::repeat(0x5a).take(32 * 1024));

    for method in [Method::Gzip, Method::Bzip2, Method::Xz, Method::Plain].iter() {
        let mut encoder = method.encoder(Vec::new());
        encoder.write_all(&data).unwrap();
        let compressed = encoder.finish().unwrap();
        if *method == Method::Plain {
            assert_eq!(compressed, data);
        }

        let mut decoder = method.decoder(Box::new(Cursor::new(compressed)));
        let mut out = vec![];
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data, "{:?}", method);
    }
}

#[test]
fn test_names_and_suffixes() {
    assert_eq!(Method::from_name("gzip").unwrap(), Method::Gzip);
    assert_eq!(Method::from_name("gz").unwrap(), Method::Gzip);
    assert_eq!(Method::from_name("bzip2").unwrap(), Method::Bzip2);
    assert_eq!(Method::from_name("xz").unwrap(), Method::Xz);
    assert_eq!(Method::from_name("").unwrap(), Method::Plain);
    assert!(Method::from_name("zstd").is_err());

    assert_eq!(Method::Gzip.to_suffix(), "gz");
    assert_eq!(Method::Bzip2.to_suffix(), "bz2");
    assert_eq!(Method::Xz.to_suffix(), "xz");
    assert_eq!(Method::Plain.to_suffix(), "");

    assert_eq!(Method::from_suffix("gz"), Method::Gzip);
    assert_eq!(Method::from_suffix("bz2"), Method::Bzip2);
    assert_eq!(Method::from_suffix("xz"), Method::Xz);
    // unknown suffixes stream byte for byte.
    assert_eq!(Method::from_suffix("txt"), Method::Plain);

    assert_eq!(Method::default(), Method::Gzip);
}
