//! Transaction behavior seen through sessions.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use folio_common::{EngineConfig, FolioError, IndexKey, MAX_DATA_BYTES_PER_PAGE};
use folio_engine::{Engine, Query};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::{init_tracing, memory_engine, JsonKeyExtractor, Person};

#[test]
fn test_snapshot_isolation() {
    let engine = memory_engine();
    let writer = engine.session();
    writer.insert("people", IndexKey::from(1i64), &Person::new("ada", 36).to_bytes()).unwrap();

    let reader = engine.session();
    reader.begin().unwrap();
    assert_eq!(reader.count("people").unwrap(), 1);

    writer.insert("people", IndexKey::from(2i64), &Person::new("grace", 45).to_bytes()).unwrap();
    writer.delete("people", &IndexKey::from(1i64)).unwrap();

    // the reader keeps the version it started with
    assert_eq!(reader.count("people").unwrap(), 1);
    assert!(reader.find_by_id("people", &IndexKey::from(1i64)).unwrap().is_some());
    assert!(reader.find_by_id("people", &IndexKey::from(2i64)).unwrap().is_none());
    reader.commit().unwrap();

    assert_eq!(reader.count("people").unwrap(), 1);
    assert!(reader.find_by_id("people", &IndexKey::from(2i64)).unwrap().is_some());
}

#[test]
fn test_rollback_returns_new_pages() {
    let engine = memory_engine();
    assert!(engine.free_empty_pages().unwrap().is_empty());

    let session = engine.session();
    session.begin().unwrap();
    let big = vec![7u8; MAX_DATA_BYTES_PER_PAGE];
    for i in 0..10i64 {
        session.insert("blobs", IndexKey::from(i), &big).unwrap();
    }
    let allocated = session.auto_transaction(|txn| Ok(txn.new_page_count())).unwrap();
    assert!(allocated >= 11);
    assert!(session.rollback().unwrap());

    let free = engine.free_empty_pages().unwrap();
    assert_eq!(free.len(), allocated);
    assert!(engine.collection_names().is_empty());

    // the next transaction reuses them instead of growing the file
    session.insert("blobs", IndexKey::from(1i64), &big).unwrap();
    assert!(engine.free_empty_pages().unwrap().len() < allocated);
}

#[test]
fn test_duplicate_key_leaves_index_unchanged() {
    let engine = memory_engine();
    let session = engine.session();
    session
        .insert_many(
            "people",
            (0..5i64).map(|i| (IndexKey::from(i), Person::new("p", i).to_bytes())),
        )
        .unwrap();

    let batch = vec![
        (IndexKey::from(10i64), Person::new("new", 1).to_bytes()),
        (IndexKey::from(3i64), Person::new("clash", 2).to_bytes()),
    ];
    let err = session.insert_many("people", batch).unwrap_err();
    assert!(matches!(err, FolioError::DuplicateKey { .. }));

    assert_eq!(session.count("people").unwrap(), 5);
    assert!(session.find_by_id("people", &IndexKey::from(10i64)).unwrap().is_none());
}

#[test]
fn test_bulk_insert_passes_safepoints() {
    init_tracing();
    let config = EngineConfig::for_testing().with_max_transaction_size(64);
    let engine = Engine::builder(config)
        .key_extractor(Arc::new(JsonKeyExtractor))
        .open()
        .unwrap();
    let session = engine.session();
    let before = engine.stats().transactions.committed;

    let documents = (0..20_000i64).map(|i| (IndexKey::from(i), format!("{{\"n\":{i}}}").into_bytes()));
    assert_eq!(session.insert_many("numbers", documents).unwrap(), 20_000);
    assert_eq!(engine.stats().transactions.committed, before + 1);

    // a document spanning three blocks
    let large: Vec<u8> = (0..2 * MAX_DATA_BYTES_PER_PAGE + 100).map(|i| (i % 251) as u8).collect();
    session.insert("numbers", IndexKey::from(-1i64), &large).unwrap();

    assert_eq!(session.count("numbers").unwrap(), 20_001);
    assert_eq!(
        session.find_by_id("numbers", &IndexKey::from(-1i64)).unwrap().as_deref(),
        Some(&large[..])
    );
    assert_eq!(
        session.find_by_id("numbers", &IndexKey::from(12_345i64)).unwrap().as_deref(),
        Some(&b"{\"n\":12345}"[..])
    );
}

#[test]
fn test_concurrent_sessions_on_separate_collections() {
    let engine = memory_engine();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = engine.clone();
            thread::spawn(move || {
                let session = engine.session();
                let collection = format!("c{t}");
                for i in 0..100i64 {
                    session
                        .insert(&collection, IndexKey::from(i), &Person::new("x", i).to_bytes())
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let session = engine.session();
    let mut names = engine.collection_names();
    names.sort();
    assert_eq!(names, vec!["c0", "c1", "c2", "c3"]);
    for name in &names {
        assert_eq!(session.count(name).unwrap(), 100);
    }
}

#[test]
fn test_writers_on_one_collection_serialize() {
    let engine = memory_engine();

    let handles: Vec<_> = (0..3i64)
        .map(|t| {
            let engine = engine.clone();
            thread::spawn(move || {
                let session = engine.session();
                session.begin().unwrap();
                for i in 0..50i64 {
                    let id = t * 1000 + i;
                    session
                        .insert("shared", IndexKey::from(id), &Person::new("w", id).to_bytes())
                        .unwrap();
                }
                session.commit().unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let session = engine.session();
    assert_eq!(session.count("shared").unwrap(), 150);
    let ids: Vec<IndexKey> = session
        .query("shared", Query::by_id())
        .unwrap()
        .map(|item| item.unwrap().0)
        .collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn test_close_aborts_running_transactions() {
    init_tracing();
    let config = EngineConfig::for_testing().with_lock_timeout(Duration::from_millis(200));
    let engine = Engine::open(config).unwrap();
    let session = engine.session();
    session.begin().unwrap();
    session.insert("items", IndexKey::from(1i64), b"pending").unwrap();

    let other = engine.session();
    other.insert("done", IndexKey::from(1i64), b"committed").unwrap();

    engine.close().unwrap();
    assert!(engine.is_closed());
    assert!(session.commit().is_err());
    assert!(matches!(other.count("done"), Err(FolioError::EngineClosed)));
}

/// Document sizes from a few bytes up to three data blocks, so updates both
/// shrink in place and grow across pages.
fn churn_document(rng: &mut StdRng) -> Vec<u8> {
    let size = match rng.gen_range(0..4) {
        0 => rng.gen_range(1..64),
        1 => rng.gen_range(64..2048),
        2 => rng.gen_range(2048..MAX_DATA_BYTES_PER_PAGE),
        _ => rng.gen_range(MAX_DATA_BYTES_PER_PAGE..3 * MAX_DATA_BYTES_PER_PAGE),
    };
    let fill: u8 = rng.gen();
    (0..size).map(|i| fill.wrapping_add(i as u8)).collect()
}

fn assert_matches_model(engine: &Engine, model: &BTreeMap<i64, Vec<u8>>) {
    let session = engine.session();
    assert_eq!(session.count("churn").unwrap(), model.len());
    for (id, document) in model {
        let found = session.find_by_id("churn", &IndexKey::from(*id)).unwrap();
        assert_eq!(found.as_deref(), Some(document.as_slice()), "document {id}");
    }

    let scanned: Vec<(IndexKey, Vec<u8>)> = session
        .query("churn", Query::by_id())
        .unwrap()
        .map(|item| item.map(|(key, document)| (key, document.to_vec())))
        .collect::<Result<_, _>>()
        .unwrap();
    let expected: Vec<(IndexKey, Vec<u8>)> = model
        .iter()
        .map(|(id, document)| (IndexKey::from(*id), document.clone()))
        .collect();
    assert_eq!(scanned, expected);
}

#[test]
fn test_random_churn_matches_model() {
    init_tracing();

    for seed in 0..4u64 {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("churn.folio");
        let mut rng = StdRng::seed_from_u64(seed);
        let mut model: BTreeMap<i64, Vec<u8>> = BTreeMap::new();

        {
            let engine = Engine::open(EngineConfig::with_filename(&path)).unwrap();
            let session = engine.session();

            for batch in 0..12 {
                session.begin().unwrap();
                for _ in 0..25 {
                    let id = rng.gen_range(0..40i64);
                    let key = IndexKey::from(id);
                    match rng.gen_range(0..10) {
                        0..=3 => {
                            let document = churn_document(&mut rng);
                            let inserted = session.upsert("churn", key, &document).unwrap();
                            assert_eq!(inserted, model.insert(id, document).is_none());
                        }
                        4..=6 => {
                            let document = churn_document(&mut rng);
                            let updated = session.update("churn", &key, &document).unwrap();
                            assert_eq!(updated, model.contains_key(&id));
                            if updated {
                                model.insert(id, document);
                            }
                        }
                        _ => {
                            let deleted = session.delete("churn", &key).unwrap();
                            assert_eq!(deleted, model.remove(&id).is_some());
                        }
                    }
                }
                session.commit().unwrap();

                if batch % 4 == 3 {
                    assert_matches_model(&engine, &model);
                }
            }

            assert_matches_model(&engine, &model);
            engine.close().unwrap();
        }

        let engine = Engine::open(EngineConfig::with_filename(&path)).unwrap();
        assert_matches_model(&engine, &model);
    }
}
