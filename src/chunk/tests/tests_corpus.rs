//! Corpus tokenization and term-locator behavior.

use std::sync::Arc;

use crate::bloom::DEFAULT_FALSE_POSITIVE_RATE;
use crate::chunk::{
    Chunk, ChunkBytes, Locator, SealedChunk, Window, corpus_composite, corpus_tokens, substrings,
    tokenize,
};
use crate::manifest::ManifestSource;
use crate::model::{Action, Key, Value, Write};

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
fn tokenize_lowercases_and_drops_stop_words() {
    assert_eq!(tokenize("The Quick Fox"), vec!["quick", "fox"]);
    assert_eq!(tokenize("  "), Vec::<String>::new());
}

#[test]
fn substrings_are_distinct_and_capped() {
    let subs = substrings("abc", 2);
    let mut sorted: Vec<&str> = subs.iter().map(String::as_str).collect();
    sorted.sort();
    assert_eq!(sorted, vec!["a", "ab", "b", "bc", "c"]);

    // Repeated characters produce one token, not two.
    let subs = substrings("aa", 1);
    assert_eq!(subs.len(), 1);
}

#[test]
fn corpus_tokens_span_all_words() {
    let tokens = corpus_tokens("hello world", 10);
    assert!(tokens.contains("hello"));
    assert!(tokens.contains("llo"));
    assert!(tokens.contains("wo"));
    assert!(!tokens.contains("hello world"), "tokens never cross spaces");
}

#[test]
fn corpus_chunk_indexes_string_values_only() {
    let chunk = Chunk::corpus(10);
    chunk
        .insert(&Write::add(
            1,
            Key::new("name").unwrap(),
            Value::String("hi".into()),
            1,
        ))
        .unwrap();
    chunk
        .insert(&Write::add(
            2,
            Key::new("name").unwrap(),
            Value::Int64(42),
            2,
        ))
        .unwrap();
    chunk
        .insert(&Write::add(
            3,
            Key::new("name").unwrap(),
            Value::Tag("hi".into()),
            3,
        ))
        .unwrap();

    // "hi" fans out to {h, i, hi}; only record 1 contributed.
    assert_eq!(chunk.len(), 3);
}

#[test]
fn term_seek_finds_contributing_records() {
    let chunk = Chunk::corpus(10);
    chunk
        .insert(&Write::add(
            1,
            Key::new("name").unwrap(),
            Value::String("hello world".into()),
            1,
        ))
        .unwrap();
    chunk
        .insert(&Write::add(
            2,
            Key::new("name").unwrap(),
            Value::String("help".into()),
            2,
        ))
        .unwrap();

    let sealed = seal(&chunk);
    let hel: Vec<u64> = sealed
        .seek(&Locator::Term {
            key: "name".into(),
            token: "hel".into(),
        })
        .unwrap()
        .iter()
        .map(|w| w.record)
        .collect();
    assert_eq!(hel, vec![1, 2]);

    let world: Vec<u64> = sealed
        .seek(&Locator::Term {
            key: "name".into(),
            token: "world".into(),
        })
        .unwrap()
        .iter()
        .map(|w| w.record)
        .collect();
    assert_eq!(world, vec![1]);
}

#[test]
fn term_locator_trims_trailing_key_whitespace() {
    let padded = Locator::Term {
        key: "name  ".into(),
        token: "tok".into(),
    };
    let trimmed = Locator::Term {
        key: "name".into(),
        token: "tok".into(),
    };
    assert_eq!(padded.bytes(), trimmed.bytes());
    assert_eq!(
        corpus_composite("name  ", "tok").bytes(),
        corpus_composite("name", "tok").bytes()
    );
}

#[test]
fn oversized_tokens_are_not_emitted() {
    let tokens = corpus_tokens("abcdefghijk", 4);
    assert!(tokens.iter().all(|t| t.chars().count() <= 4));
    assert!(tokens.contains("abcd"));
}
