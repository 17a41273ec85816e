use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{fs, io::Read, path, thread};

use super::*;

// Config file with test-sized thresholds under a scratch tree, realms
// expand through the `#(realm)s` placeholder.
fn scratch_store(name: &str, seed: u64, tar_threshold: u64) -> (Store, String, path::PathBuf) {
    let base = std::env::temp_dir().join(format!("{}-{}", name, seed));
    fs::remove_dir_all(&base).ok();
    fs::create_dir_all(&base).unwrap();

    let realm = format!("r{}", seed);
    let text = format!(
        r##"
[dirs]
base = {base:?}
staging = "#(base)s/#(realm)s/staging"
index = "#(base)s/#(realm)s/ndx"
tar = "#(base)s/#(realm)s/store"

[threshold]
index = 2
tar = {tar_threshold}

[http]
hostport = "127.0.0.1:8341"
realms = {realm:?}
"##,
        base = base.to_str().unwrap(),
        tar_threshold = tar_threshold,
        realm = realm,
    );
    let file = base.join("aostor.toml");
    fs::write(&file, text).unwrap();

    let store = Store::open(Some(file.as_os_str()));
    (store, realm, file)
}

fn read_all(data: &mut dyn Read) -> Vec<u8> {
    let mut out = vec![];
    data.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn test_put_get_roundtrip() {
    let seed: u64 = random();
    println!("test_put_get_roundtrip {}", seed);

    let (store, realm, _) = scratch_store("aostor-store-roundtrip", seed, 1 << 20);

    let payload = [0x01, 0x02, 0x03, 0x04, 0x05];
    let id = store.put(&realm, Info::default(), &mut &payload[..]).unwrap();
    assert_eq!(id.to_canonical().len(), 22);

    let (meta, mut data) = store.get(&realm, &id).unwrap();
    assert_eq!(read_all(&mut data), payload);
    assert_eq!(meta.to_original_size(), Some(5));
    assert_eq!(
        meta.to_content_hash("sha1"),
        Some("11966ab9c099f8fabefac54c08d5be2bd8c903af")
    );
}

#[test]
fn test_compact_preserves_reads() {
    let seed: u64 = random();
    println!("test_compact_preserves_reads {}", seed);

    let (store, realm, _) = scratch_store("aostor-store-compact", seed, 512);

    let payload = [0x01, 0x02, 0x03, 0x04, 0x05];
    let mut ids = vec![];
    for _i in 0..10 {
        ids.push(store.put(&realm, Info::default(), &mut &payload[..]).unwrap());
    }

    let notified = std::sync::atomic::AtomicUsize::new(0);
    let bump = || {
        notified.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    };
    store.compact(&realm, Some(&bump)).unwrap();
    assert_eq!(notified.load(std::sync::atomic::Ordering::SeqCst), 1);

    let config = store.to_config(&realm).unwrap();
    assert_eq!(
        crate::staging::list(&config.staging_dir, None).unwrap().len(),
        0
    );
    for id in ids.iter() {
        let (meta, mut data) = store.get(&realm, id).unwrap();
        assert_eq!(read_all(&mut data), payload, "{}", id);
        assert_eq!(meta.to_original_size(), Some(5));
    }
}

#[test]
fn test_parallel_puts() {
    let seed: u64 = random();
    println!("test_parallel_puts {}", seed);

    let (store, realm, file) = scratch_store("aostor-store-parallel", seed, 200_000);
    store.fill_caches(true).unwrap();

    let n_threads = 4;
    let per_thread = 250;

    let mut writers = vec![];
    for t in 0..n_threads {
        let file = file.clone();
        let realm = realm.clone();
        let thread_seed = seed.wrapping_add(t as u64);
        writers.push(thread::spawn(move || {
            let store = Store::open(Some(file.as_os_str()));
            let mut rng = SmallRng::seed_from_u64(thread_seed);
            let mut staged = vec![];
            for _i in 0..per_thread {
                let payload = rng.gen::<[u8; 8]>();
                let id = store.put(&realm, Info::default(), &mut &payload[..]).unwrap();
                staged.push((id, payload.to_vec()));
            }
            staged
        }));
    }

    let mut objects = vec![];
    for handle in writers {
        objects.extend(handle.join().unwrap());
    }
    assert_eq!(objects.len(), n_threads * per_thread);

    store.compact(&realm, None).unwrap();

    let mut total = 0;
    for (id, payload) in objects.iter() {
        let (meta, mut data) = store.get(&realm, id).unwrap();
        assert_eq!(&read_all(&mut data), payload, "{}", id);
        total += meta.to_original_size().unwrap();
    }
    assert_eq!(total, (n_threads * per_thread * 8) as u64);
}
