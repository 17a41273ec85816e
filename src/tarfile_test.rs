use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{fs, io::Read, io::Write};

use super::*;

fn scratch_tar(name: &str, seed: u64) -> ffi::OsString {
    let mut file = std::env::temp_dir();
    file.push(format!("{}-{}.tar", name, seed));
    fs::remove_file(&file).ok();
    file.into_os_string()
}

#[test]
fn test_append_then_parse() {
    let seed: u64 = random();
    let mut rng = SmallRng::seed_from_u64(seed);
    println!("test_append_then_parse {}", seed);

    let file = scratch_tar("test-append-then-parse", seed);

    let mut items: Vec<(String, Vec<u8>, u64)> = vec![];
    let mut tf = TarFile::open_for_append(&file).unwrap();
    assert_eq!(tf.to_pos(), 0);
    for i in 0..7 {
        let name = format!("entry-{}", i);
        let mut data = vec![0_u8; 1 + rng.gen::<usize>() % 3000];
        rng.fill(data.as_mut_slice());
        let pos = tf.append_data(&name, &mut data.as_slice(), data.len() as u64).unwrap();
        items.push((name, data, pos));
    }
    tf.close().unwrap();

    // reopen appends after the existing entries, not over them.
    let mut tf = TarFile::open_for_append(&file).unwrap();
    {
        let name = "entry-7".to_string();
        let data = b"last one".to_vec();
        let pos = tf.append_data(&name, &mut data.as_slice(), data.len() as u64).unwrap();
        items.push((name, data, pos));
    }
    tf.close().unwrap();

    // parsing from the start yields exactly the appended sequence.
    let mut archive = tar::Archive::new(fs::File::open(&file).unwrap());
    let mut n = 0;
    for (entry, (name, data, pos)) in archive.entries().unwrap().zip(items.iter()) {
        let mut entry = entry.unwrap();
        assert_eq!(entry.path().unwrap().to_str().unwrap(), name);
        assert_eq!(entry.raw_header_position(), *pos);
        let mut out = vec![];
        entry.read_to_end(&mut out).unwrap();
        assert_eq!(&out, data, "{}", name);
        n += 1;
    }
    assert_eq!(n, items.len());

    fs::remove_file(&file).ok();
}

#[test]
fn test_append_to_foreign_tar() {
    let seed: u64 = random();
    println!("test_append_to_foreign_tar {}", seed);

    let file = scratch_tar("test-append-foreign", seed);

    // a tar written by somebody else entirely.
    {
        let mut builder = tar::Builder::new(fs::File::create(&file).unwrap());
        for i in 0..2 {
            let data = format!("payload {}", i).into_bytes();
            let mut header = Header::new_ustar();
            header.set_path(format!("foreign-{}", i)).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, data.as_slice()).unwrap();
        }
        builder.into_inner().unwrap().sync_all().unwrap();
    }

    let mut tf = TarFile::open_for_append(&file).unwrap();
    let data = b"appended".to_vec();
    tf.append_data("appended", &mut data.as_slice(), data.len() as u64).unwrap();
    tf.close().unwrap();

    let mut archive = tar::Archive::new(fs::File::open(&file).unwrap());
    let names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|entry| {
            entry.unwrap().path().unwrap().to_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(names, vec!["foreign-0", "foreign-1", "appended"]);

    fs::remove_file(&file).ok();
}

#[test]
fn test_read_item() {
    let seed: u64 = random();
    let mut rng = SmallRng::seed_from_u64(seed);
    println!("test_read_item {}", seed);

    let file = scratch_tar("test-read-item", seed);

    let mut payload = vec![0_u8; 4096];
    rng.fill(payload.as_mut_slice());
    let compressed = {
        let mut encoder = compress::Method::Gzip.encoder(Vec::new());
        encoder.write_all(&payload).unwrap();
        encoder.finish().unwrap()
    };

    let mut tf = TarFile::open_for_append(&file).unwrap();
    let dpos = tf
        .append_data("abc123#gz", &mut compressed.as_slice(), compressed.len() as u64)
        .unwrap();
    let lpos = tf.append_symlink("def456@", "abc123#gz").unwrap();
    let end = tf.to_pos();
    tf.close().unwrap();

    // regular entry comes back decompressed.
    match read_item(&file, dpos).unwrap() {
        Item::Data { name, size, mut data } => {
            assert_eq!(name, "abc123#gz");
            assert_eq!(size, compressed.len() as u64);
            let mut out = vec![];
            data.read_to_end(&mut out).unwrap();
            assert_eq!(out, payload);
        }
        Item::Symlink { linkname } => panic!("unexpected symlink {:?}", linkname),
    }

    // symlink entries surface their linkname for the caller to chase.
    match read_item(&file, lpos).unwrap() {
        Item::Symlink { linkname } => assert_eq!(linkname, "abc123#gz"),
        Item::Data { name, .. } => panic!("unexpected data {:?}", name),
    }

    // offsets outside the archive, or at the end marker, are corrupt.
    assert!(read_item(&file, end).is_err());
    assert!(read_item(&file, 1 << 30).is_err());

    fs::remove_file(&file).ok();
}
