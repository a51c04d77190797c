//! Manifest build/flush/load/lookup behavior.

use std::sync::Arc;

use crate::manifest::{EntryRange, Manifest, ManifestError, ManifestSource};

fn loaded_from(bytes: Vec<u8>) -> Manifest {
    Manifest::load(ManifestSource::Owned(Arc::new(bytes))).unwrap()
}

#[test]
fn build_flush_lookup_round_trip() {
    let mut manifest = Manifest::new();
    manifest.put_start(0, b"alpha").unwrap();
    manifest.put_end(40, b"alpha").unwrap();
    manifest.put_start(40, b"beta").unwrap();
    manifest.put_end(100, b"beta").unwrap();

    assert_eq!(manifest.length(), 2);
    let bytes = manifest.flush().unwrap();

    let loaded = loaded_from(bytes);
    assert_eq!(loaded.length(), 2);
    assert_eq!(
        loaded.lookup(b"alpha").unwrap(),
        Some(EntryRange { start: 0, end: 40 })
    );
    assert_eq!(
        loaded.lookup(b"beta").unwrap(),
        Some(EntryRange {
            start: 40,
            end: 100
        })
    );
    assert_eq!(loaded.lookup(b"gamma").unwrap(), None);
}

#[test]
fn mutation_after_flush_fails() {
    let mut manifest = Manifest::new();
    manifest.put_start(0, b"a").unwrap();
    manifest.put_end(8, b"a").unwrap();
    manifest.flush().unwrap();

    assert!(matches!(
        manifest.put_start(8, b"b"),
        Err(ManifestError::Frozen)
    ));
    assert!(matches!(manifest.flush(), Err(ManifestError::Frozen)));
}

#[test]
fn put_end_without_start_fails() {
    let mut manifest = Manifest::new();
    assert!(matches!(
        manifest.put_end(8, b"orphan"),
        Err(ManifestError::NoOpenEntry)
    ));
}

#[test]
fn unclosed_entry_fails_flush() {
    let mut manifest = Manifest::new();
    manifest.put_start(0, b"open").unwrap();
    assert!(matches!(
        manifest.flush(),
        Err(ManifestError::UnclosedEntry)
    ));
}

#[test]
fn lookup_covers_every_stored_locator() {
    let mut manifest = Manifest::new();
    let mut offset = 0u64;
    for i in 0..200u32 {
        let locator = format!("loc-{i:05}").into_bytes();
        let size = 8 + (i as u64 % 32);
        manifest.put_start(offset, &locator).unwrap();
        offset += size;
        manifest.put_end(offset, &locator).unwrap();
    }
    let bytes = manifest.flush().unwrap();
    let loaded = loaded_from(bytes);

    let mut expected_start = 0u64;
    for i in 0..200u32 {
        let locator = format!("loc-{i:05}").into_bytes();
        let size = 8 + (i as u64 % 32);
        let range = loaded.lookup(&locator).unwrap().unwrap();
        assert_eq!(range.start, expected_start);
        assert_eq!(range.len(), size);
        expected_start += size;
    }
}

#[test]
fn streamed_lookup_scans_large_manifests() {
    // One past the streaming threshold forces the scan-on-demand path.
    let count = crate::manifest::STREAMING_THRESHOLD + 1;
    let mut manifest = Manifest::new();
    let mut offset = 0u64;
    for i in 0..count {
        let locator = format!("loc-{i:08}").into_bytes();
        manifest.put_start(offset, &locator).unwrap();
        offset += 16;
        manifest.put_end(offset, &locator).unwrap();
    }
    let loaded = loaded_from(manifest.flush().unwrap());
    assert_eq!(loaded.length(), count as u64);

    let first = loaded.lookup(b"loc-00000000").unwrap().unwrap();
    assert_eq!(first, EntryRange { start: 0, end: 16 });

    let last_name = format!("loc-{:08}", count - 1).into_bytes();
    let last = loaded.lookup(&last_name).unwrap().unwrap();
    assert_eq!(last.len(), 16);

    // Cached miss and cached hit agree across repeats.
    assert_eq!(loaded.lookup(b"loc-99999999").unwrap(), None);
    assert_eq!(loaded.lookup(b"loc-99999999").unwrap(), None);
    assert_eq!(loaded.lookup(b"loc-00000000").unwrap(), Some(first));
}

#[test]
fn repeat_lookups_are_consistent() {
    let mut manifest = Manifest::new();
    manifest.put_start(16, b"x").unwrap();
    manifest.put_end(48, b"x").unwrap();
    let loaded = loaded_from(manifest.flush().unwrap());

    let first = loaded.lookup(b"x").unwrap();
    let second = loaded.lookup(b"x").unwrap();
    assert_eq!(first, second);
    assert_eq!(loaded.lookup(b"missing").unwrap(), None);
    assert_eq!(loaded.lookup(b"missing").unwrap(), None);
}
