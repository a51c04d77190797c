//! Chunk freeze/seek behavior and sort-order invariants.

use std::sync::Arc;

use crate::chunk::{
    Chunk, ChunkBytes, ChunkError, ChunkKind, Locator, SealedChunk, Window, table_composite,
};
use crate::bloom::DEFAULT_FALSE_POSITIVE_RATE;
use crate::manifest::ManifestSource;
use crate::model::{Action, Key, Value, Write};

fn write(record: u64, key: &str, value: Value, version: u64, action: Action) -> Write {
    Write {
        record,
        key: Key::new(key).unwrap(),
        value,
        version,
        action,
    }
}

fn seal(chunk: &Chunk) -> SealedChunk {
    let ChunkBytes {
        bloom,
        manifest,
        revisions,
    } = chunk.freeze(DEFAULT_FALSE_POSITIVE_RATE).unwrap();
    SealedChunk::open(
        chunk.kind(),
        &bloom,
        ManifestSource::Owned(Arc::new(manifest)),
        Window::Owned(Arc::new(revisions)),
    )
    .unwrap()
}

#[test]
fn table_chunk_seek_returns_one_records_revisions() {
    let chunk = Chunk::table();
    chunk
        .insert(&write(1, "name", Value::String("jeff".into()), 10, Action::Add))
        .unwrap();
    chunk
        .insert(&write(2, "name", Value::String("ashleah".into()), 11, Action::Add))
        .unwrap();
    chunk
        .insert(&write(1, "age", Value::Int64(30), 12, Action::Add))
        .unwrap();

    let sealed = seal(&chunk);
    let revisions = sealed.seek(&Locator::Record(1)).unwrap();
    assert_eq!(revisions.len(), 2);
    assert!(revisions.iter().all(|w| w.record == 1));

    assert!(sealed.seek(&Locator::Record(99)).unwrap().is_empty());
}

#[test]
fn table_sort_key_is_record_key_value_version() {
    let chunk = Chunk::table();
    chunk
        .insert(&write(2, "b", Value::Int64(1), 4, Action::Add))
        .unwrap();
    chunk
        .insert(&write(1, "b", Value::Int64(5), 3, Action::Add))
        .unwrap();
    chunk
        .insert(&write(1, "a", Value::Int64(9), 2, Action::Add))
        .unwrap();
    chunk
        .insert(&write(1, "b", Value::Int64(5), 5, Action::Remove))
        .unwrap();

    let sorted = chunk.sorted_revisions().unwrap();
    let order: Vec<(u64, String, u64)> = sorted
        .iter()
        .map(|r| (r.write.record, r.write.key.to_string(), r.write.version))
        .collect();
    assert_eq!(
        order,
        vec![
            (1, "a".into(), 2),
            (1, "b".into(), 3),
            (1, "b".into(), 5),
            (2, "b".into(), 4),
        ]
    );
}

#[test]
fn index_chunk_groups_by_key() {
    let chunk = Chunk::index();
    chunk
        .insert(&write(1, "age", Value::Int64(30), 1, Action::Add))
        .unwrap();
    chunk
        .insert(&write(2, "age", Value::Int64(19), 2, Action::Add))
        .unwrap();
    chunk
        .insert(&write(3, "name", Value::String("x".into()), 3, Action::Add))
        .unwrap();

    let sealed = seal(&chunk);
    let age = sealed.seek(&Locator::Key("age".into())).unwrap();
    assert_eq!(age.len(), 2);
    // (key, value, record, version): 19 sorts before 30.
    assert_eq!(age[0].value, Value::Int64(19));
    assert_eq!(age[1].value, Value::Int64(30));
}

#[test]
fn bloom_survives_the_freeze() {
    let chunk = Chunk::table();
    chunk
        .insert(&write(7, "city", Value::String("atlanta".into()), 5, Action::Add))
        .unwrap();

    let present = table_composite(7, "city", &Value::String("atlanta".into()));
    let absent = table_composite(7, "city", &Value::String("savannah".into()));
    assert!(chunk.might_contain(&present).unwrap());
    assert!(!chunk.might_contain(&absent).unwrap());

    let sealed = seal(&chunk);
    assert!(sealed.might_contain(&present));
}

#[test]
fn insert_after_freeze_fails() {
    let chunk = Chunk::index();
    chunk
        .insert(&write(1, "k", Value::Int64(1), 1, Action::Add))
        .unwrap();
    chunk.freeze(DEFAULT_FALSE_POSITIVE_RATE).unwrap();

    let err = chunk
        .insert(&write(1, "k", Value::Int64(2), 2, Action::Add))
        .unwrap_err();
    assert!(matches!(err, ChunkError::Frozen));
}

#[test]
fn duplicate_composites_are_all_recorded() {
    // ADD and REMOVE of the same triple are distinct revisions; parity
    // depends on both surviving.
    let chunk = Chunk::table();
    chunk
        .insert(&write(1, "k", Value::Int64(1), 1, Action::Add))
        .unwrap();
    chunk
        .insert(&write(1, "k", Value::Int64(1), 2, Action::Remove))
        .unwrap();
    chunk
        .insert(&write(1, "k", Value::Int64(1), 3, Action::Add))
        .unwrap();

    let sealed = seal(&chunk);
    let revisions = sealed.seek(&Locator::Record(1)).unwrap();
    assert_eq!(revisions.len(), 3);
    // Same (locator, key, value) group appears in version order.
    let versions: Vec<u64> = revisions.iter().map(|w| w.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
}

#[test]
fn manifest_ranges_cover_exact_revision_bytes() {
    let chunk = Chunk::index();
    for record in 0..20u64 {
        chunk
            .insert(&write(record, "k", Value::Int64(record as i64), record + 1, Action::Add))
            .unwrap();
    }
    let sealed = seal(&chunk);
    let all = sealed.iter_all().unwrap();
    let sought = sealed.seek(&Locator::Key("k".into())).unwrap();
    assert_eq!(all, sought);
}

#[test]
fn version_bounds_track_inserts() {
    let chunk = Chunk::table();
    assert_eq!(chunk.version_bounds(), None);
    chunk
        .insert(&write(1, "k", Value::Int64(1), 17, Action::Add))
        .unwrap();
    chunk
        .insert(&write(1, "k", Value::Int64(2), 5, Action::Add))
        .unwrap();
    assert_eq!(chunk.version_bounds(), Some((5, 17)));
    assert_eq!(chunk.kind(), ChunkKind::Table);
}
