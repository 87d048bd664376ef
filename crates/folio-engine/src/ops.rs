//! Document and collection operations.
//!
//! Every operation runs in the session's transaction, or in an auto
//! transaction when none is open. Documents are opaque bytes identified by
//! an [`IndexKey`] stored in the primary key index `_id`.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use folio_common::{FolioError, FolioResult, IndexKey, Order, PageAddress, PRIMARY_KEY_INDEX};
use folio_storage::{CollectionIndex, IndexNode};
use folio_txn::{LockMode, Snapshot, Transaction};

use crate::cursor::{Cursor, Query};
use crate::data::DataService;
use crate::index::IndexService;
use crate::keys::{extract_keys, KeyExtractor};
use crate::session::Session;

const PRIMARY_KEY_EXPRESSION: &str = "$._id";

/// Returns the write snapshot of `collection`, creating the collection and
/// its primary key index when missing.
fn write_snapshot<'t>(txn: &'t mut Transaction, collection: &str) -> FolioResult<&'t mut Snapshot> {
    let snapshot = txn.create_snapshot(LockMode::Write, collection, true)?;
    let has_pk = snapshot
        .collection_page()
        .is_some_and(|page| page.get_index(PRIMARY_KEY_INDEX).is_some());
    if !has_pk {
        IndexService::new(snapshot).create_index(PRIMARY_KEY_INDEX, PRIMARY_KEY_EXPRESSION, true)?;
    }
    Ok(snapshot)
}

/// Secondary index definitions, in slot order.
fn secondary_indexes(snapshot: &Snapshot) -> Vec<CollectionIndex> {
    snapshot
        .collection_page()
        .map(|page| {
            page.indexes()
                .into_iter()
                .filter(|index| !index.is_primary_key())
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn pk_index(snapshot: &Snapshot) -> FolioResult<Option<CollectionIndex>> {
    match snapshot.collection_page() {
        Some(page) => Ok(Some(page.pk_index()?.clone())),
        None => Ok(None),
    }
}

fn require_extractor<'e>(
    extractor: Option<&'e Arc<dyn KeyExtractor>>,
    operation: &str,
) -> FolioResult<&'e dyn KeyExtractor> {
    extractor
        .map(|extractor| extractor.as_ref())
        .ok_or_else(|| FolioError::NotSupported {
            operation: format!("{operation} without a key extractor"),
        })
}

/// Indexes `document` in every secondary index, chaining the new nodes
/// after `last`.
fn add_secondary_nodes(
    snapshot: &mut Snapshot,
    extractor: Option<&Arc<dyn KeyExtractor>>,
    document: &[u8],
    data_block: PageAddress,
    mut last: IndexNode,
) -> FolioResult<()> {
    let indexes = secondary_indexes(snapshot);
    if indexes.is_empty() {
        return Ok(());
    }
    let extractor = require_extractor(extractor, "secondary indexes")?;

    let mut indexer = IndexService::new(snapshot);
    for mut index in indexes {
        for key in extract_keys(extractor, &index.expression, document)? {
            last = indexer.add_node(&mut index, key, data_block, Some(&mut last))?;
        }
    }
    Ok(())
}

fn insert_document(
    snapshot: &mut Snapshot,
    extractor: Option<&Arc<dyn KeyExtractor>>,
    max_document_size: usize,
    id: IndexKey,
    document: &[u8],
) -> FolioResult<()> {
    let mut pk = pk_index(snapshot)?
        .ok_or_else(|| FolioError::internal("write snapshot without a collection"))?;
    let data_block = DataService::new(snapshot, max_document_size).insert(document)?;
    let pk_node = IndexService::new(snapshot).add_node(&mut pk, id, data_block, None)?;
    add_secondary_nodes(snapshot, extractor, document, data_block, pk_node)
}

fn update_document(
    snapshot: &mut Snapshot,
    extractor: Option<&Arc<dyn KeyExtractor>>,
    max_document_size: usize,
    id: &IndexKey,
    document: &[u8],
) -> FolioResult<bool> {
    let Some(pk) = pk_index(snapshot)? else {
        return Ok(false);
    };
    let Some(pk_node) = IndexService::new(snapshot).find(&pk, id, false, Order::Ascending)? else {
        return Ok(false);
    };
    let data_block = pk_node.data_block();
    DataService::new(snapshot, max_document_size).update(data_block, document)?;

    let indexes = secondary_indexes(snapshot);
    if indexes.is_empty() {
        return Ok(true);
    }
    let extractor = require_extractor(extractor, "secondary indexes")?;

    let mut wanted: Vec<(CollectionIndex, IndexKey)> = Vec::new();
    for index in indexes {
        for key in extract_keys(extractor, &index.expression, document)? {
            wanted.push((index.clone(), key));
        }
    }

    let mut indexer = IndexService::new(snapshot);
    let chain = indexer.get_node_list(&pk_node)?;
    let mut kept: Vec<(u8, IndexKey)> = Vec::new();
    let mut to_delete = HashSet::new();
    for node in chain.iter().skip(1) {
        let entry = (node.slot(), node.key().clone());
        let still_wanted = wanted
            .iter()
            .any(|(index, key)| index.slot == entry.0 && *key == entry.1);
        if still_wanted && !kept.contains(&entry) {
            kept.push(entry);
        } else {
            to_delete.insert(node.position());
        }
    }

    let mut last = indexer.delete_list(pk_node.position(), &to_delete)?;
    for (mut index, key) in wanted {
        if kept.iter().any(|(slot, k)| *slot == index.slot && *k == key) {
            continue;
        }
        last = indexer.add_node(&mut index, key, data_block, Some(&mut last))?;
    }
    Ok(true)
}

fn delete_document(snapshot: &mut Snapshot, max_document_size: usize, id: &IndexKey) -> FolioResult<bool> {
    let Some(pk) = pk_index(snapshot)? else {
        return Ok(false);
    };
    let Some(pk_node) = IndexService::new(snapshot).find(&pk, id, false, Order::Ascending)? else {
        return Ok(false);
    };
    DataService::new(snapshot, max_document_size).delete(pk_node.data_block())?;
    IndexService::new(snapshot).delete_all(pk_node.position())?;
    Ok(true)
}

impl Session {
    // ========================================================================
    // Writes
    // ========================================================================

    /// Inserts `document` under `id`, creating the collection if needed.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::DuplicateKey`] when `id` or a unique secondary
    /// key exists, [`FolioError::DocumentTooLarge`] above the size limit
    /// and [`FolioError::OpenCursors`] while cursors are open.
    pub fn insert(&self, collection: &str, id: IndexKey, document: &[u8]) -> FolioResult<()> {
        let engine = self.engine().clone();
        let max_document_size = engine.config().max_document_size;
        self.write_transaction(|txn| {
            let snapshot = write_snapshot(txn, collection)?;
            insert_document(snapshot, engine.extractor(), max_document_size, id, document)
        })
    }

    /// Inserts many documents in one transaction, passing a safepoint
    /// before each. Returns the number inserted.
    ///
    /// # Errors
    ///
    /// As [`Session::insert`]; also [`FolioError::Cancelled`] after the
    /// session is cancelled. Nothing is inserted on error.
    pub fn insert_many<I, D>(&self, collection: &str, documents: I) -> FolioResult<usize>
    where
        I: IntoIterator<Item = (IndexKey, D)>,
        D: AsRef<[u8]>,
    {
        let engine = self.engine().clone();
        let max_document_size = engine.config().max_document_size;
        self.write_transaction(|txn| {
            let mut count = 0;
            for (id, document) in documents {
                txn.safepoint()?;
                let snapshot = write_snapshot(txn, collection)?;
                insert_document(snapshot, engine.extractor(), max_document_size, id, document.as_ref())?;
                count += 1;
            }
            debug!(collection, count, "documents inserted");
            Ok(count)
        })
    }

    /// Replaces the document stored under `id`. Returns false when there
    /// is none.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::DocumentTooLarge`] above the size limit and
    /// [`FolioError::DuplicateKey`] for a clashing unique secondary key.
    pub fn update(&self, collection: &str, id: &IndexKey, document: &[u8]) -> FolioResult<bool> {
        let engine = self.engine().clone();
        let max_document_size = engine.config().max_document_size;
        self.write_transaction(|txn| {
            let snapshot = write_snapshot(txn, collection)?;
            update_document(snapshot, engine.extractor(), max_document_size, id, document)
        })
    }

    /// Updates the document under `id`, or inserts it. Returns true when it
    /// was inserted.
    ///
    /// # Errors
    ///
    /// As [`Session::insert`].
    pub fn upsert(&self, collection: &str, id: IndexKey, document: &[u8]) -> FolioResult<bool> {
        let engine = self.engine().clone();
        let max_document_size = engine.config().max_document_size;
        self.write_transaction(|txn| {
            let snapshot = write_snapshot(txn, collection)?;
            if update_document(snapshot, engine.extractor(), max_document_size, &id, document)? {
                return Ok(false);
            }
            insert_document(snapshot, engine.extractor(), max_document_size, id, document)?;
            Ok(true)
        })
    }

    /// Deletes the document under `id`. Returns false when there is none.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::OpenCursors`] while cursors are open.
    pub fn delete(&self, collection: &str, id: &IndexKey) -> FolioResult<bool> {
        let max_document_size = self.engine().config().max_document_size;
        self.write_transaction(|txn| {
            if txn.create_snapshot(LockMode::Read, collection, false)?.collection_page().is_none() {
                return Ok(false);
            }
            let snapshot = write_snapshot(txn, collection)?;
            delete_document(snapshot, max_document_size, id)
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The document stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for broken pages.
    pub fn find_by_id(&self, collection: &str, id: &IndexKey) -> FolioResult<Option<Bytes>> {
        let max_document_size = self.engine().config().max_document_size;
        self.auto_transaction(|txn| {
            let cancel = txn.cancel_token().clone();
            let snapshot = txn.create_snapshot(LockMode::Read, collection, false)?;
            let Some(pk) = pk_index(snapshot)? else {
                return Ok(None);
            };
            let Some(node) = IndexService::new(snapshot).find(&pk, id, false, Order::Ascending)? else {
                return Ok(None);
            };
            DataService::new(snapshot, max_document_size)
                .with_cancellation(cancel)
                .read_document(node.data_block())
                .map(Some)
        })
    }

    /// Every document whose `index` key equals `key`, in index order.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::IndexNotFound`] for an unknown index.
    pub fn find(&self, collection: &str, index: &str, key: &IndexKey) -> FolioResult<Vec<Bytes>> {
        let max_document_size = self.engine().config().max_document_size;
        self.auto_transaction(|txn| {
            let cancel = txn.cancel_token().clone();
            let snapshot = txn.create_snapshot(LockMode::Read, collection, false)?;
            let Some(page) = snapshot.collection_page() else {
                return Ok(Vec::new());
            };
            let definition = page
                .get_index(index)
                .cloned()
                .ok_or_else(|| FolioError::IndexNotFound {
                    collection: collection.to_string(),
                    index: index.to_string(),
                })?;

            let nodes = IndexService::new(snapshot).find_equal(&definition, key, Order::Ascending)?;
            let mut data = DataService::new(snapshot, max_document_size).with_cancellation(cancel);
            nodes
                .iter()
                .map(|node| data.read_document(node.data_block()))
                .collect()
        })
    }

    /// Opens a lazy cursor over `query`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::EngineClosed`] after close. Unknown indexes
    /// are reported by the first [`Iterator::next`].
    pub fn query(&self, collection: &str, query: Query) -> FolioResult<Cursor> {
        self.open_cursor()?;
        Ok(Cursor::new(
            self.engine().clone(),
            Arc::clone(self.core()),
            collection,
            query,
        ))
    }

    /// Number of documents in `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for broken index pages.
    pub fn count(&self, collection: &str) -> FolioResult<usize> {
        self.auto_transaction(|txn| {
            let snapshot = txn.create_snapshot(LockMode::Read, collection, false)?;
            let Some(pk) = pk_index(snapshot)? else {
                return Ok(0);
            };
            Ok(IndexService::new(snapshot).find_all(&pk, Order::Ascending)?.len())
        })
    }

    /// Every document of `collection` in storage order.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for broken data pages.
    pub fn read_all(&self, collection: &str) -> FolioResult<Vec<Bytes>> {
        let max_document_size = self.engine().config().max_document_size;
        self.auto_transaction(|txn| {
            let cancel = txn.cancel_token().clone();
            let snapshot = txn.create_snapshot(LockMode::Read, collection, false)?;
            let documents = DataService::new(snapshot, max_document_size)
                .with_cancellation(cancel)
                .read_all()?;
            Ok(documents.into_iter().map(|(_, document)| document).collect())
        })
    }

    // ========================================================================
    // Collections and indexes
    // ========================================================================

    /// Creates a secondary index over `expression` and indexes every
    /// existing document. Returns false when an identical index exists.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::NotSupported`] without a key extractor,
    /// [`FolioError::IndexAlreadyExists`] when `name` is taken by another
    /// definition and [`FolioError::DuplicateKey`] when existing documents
    /// break a unique index.
    pub fn ensure_index(&self, collection: &str, name: &str, expression: &str, unique: bool) -> FolioResult<bool> {
        let engine = self.engine().clone();
        let extractor = require_extractor(engine.extractor(), "ensure_index")?;
        let max_document_size = engine.config().max_document_size;
        if name == PRIMARY_KEY_INDEX {
            return Err(FolioError::invalid_argument("the primary key index cannot be redefined"));
        }

        self.write_transaction(|txn| {
            let snapshot = write_snapshot(txn, collection)?;
            if let Some(existing) = snapshot.collection_page().and_then(|page| page.get_index(name)) {
                if existing.expression == expression && existing.unique == unique {
                    return Ok(false);
                }
                return Err(FolioError::IndexAlreadyExists {
                    collection: collection.to_string(),
                    index: name.to_string(),
                });
            }

            IndexService::new(snapshot).create_index(name, expression, unique)?;
            let pk = pk_index(snapshot)?
                .ok_or_else(|| FolioError::internal("write snapshot without a collection"))?;
            let documents: Vec<(PageAddress, PageAddress)> = IndexService::new(snapshot)
                .find_all(&pk, Order::Ascending)?
                .iter()
                .map(|node| (node.position(), node.data_block()))
                .collect();

            for (pk_address, data_block) in &documents {
                txn.safepoint()?;
                let snapshot = write_snapshot(txn, collection)?;
                let document = DataService::new(snapshot, max_document_size).read_document(*data_block)?;

                let mut index = snapshot
                    .collection_page()
                    .and_then(|page| page.get_index(name))
                    .cloned()
                    .ok_or_else(|| FolioError::internal(format!("index '{name}' vanished while built")))?;
                let mut indexer = IndexService::new(snapshot);
                let pk_node = indexer
                    .get_node(*pk_address)?
                    .ok_or_else(|| FolioError::corruption("primary key node missing"))?;
                let mut last = indexer
                    .get_node_list(&pk_node)?
                    .pop()
                    .unwrap_or(pk_node);
                for key in extract_keys(extractor, expression, &document)? {
                    last = indexer.add_node(&mut index, key, *data_block, Some(&mut last))?;
                }
            }

            info!(collection, index = name, documents = documents.len(), "index created");
            Ok(true)
        })
    }

    /// Drops a secondary index. Returns false when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::InvalidArgument`] for the primary key index.
    pub fn drop_index(&self, collection: &str, name: &str) -> FolioResult<bool> {
        if name == PRIMARY_KEY_INDEX {
            return Err(FolioError::invalid_argument("the primary key index cannot be dropped"));
        }
        self.write_transaction(|txn| {
            if txn.create_snapshot(LockMode::Read, collection, false)?.collection_page().is_none() {
                return Ok(false);
            }
            let snapshot = txn.create_snapshot(LockMode::Write, collection, false)?;
            let Some(index) = snapshot
                .collection_page()
                .and_then(|page| page.get_index(name))
                .cloned()
            else {
                return Ok(false);
            };
            IndexService::new(snapshot).drop_index(&index)?;
            Ok(true)
        })
    }

    /// Drops a collection with all its documents and indexes. Returns false
    /// when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::LockTimeout`] when another transaction writes
    /// the collection.
    pub fn drop_collection(&self, collection: &str) -> FolioResult<bool> {
        self.write_transaction(|txn| txn.drop_collection(collection))
    }

    /// Names of all committed collections.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        self.engine().collection_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Engine;
    use folio_common::EngineConfig;

    fn session() -> Session {
        Engine::open(EngineConfig::for_testing()).unwrap().session()
    }

    #[test]
    fn test_insert_find_update_delete() {
        let session = session();
        session.insert("users", IndexKey::from(1i64), b"alice").unwrap();
        session.insert("users", IndexKey::from(2i64), b"bob").unwrap();
        assert_eq!(session.count("users").unwrap(), 2);
        assert_eq!(session.collection_names(), vec!["users".to_string()]);

        assert!(session.update("users", &IndexKey::from(1i64), b"alice v2").unwrap());
        assert!(!session.update("users", &IndexKey::from(9i64), b"nobody").unwrap());
        assert_eq!(
            session.find_by_id("users", &IndexKey::from(1i64)).unwrap().unwrap(),
            &b"alice v2"[..]
        );

        assert!(session.delete("users", &IndexKey::from(2i64)).unwrap());
        assert!(!session.delete("users", &IndexKey::from(2i64)).unwrap());
        assert!(!session.delete("missing", &IndexKey::from(2i64)).unwrap());
        assert_eq!(session.count("users").unwrap(), 1);
    }

    #[test]
    fn test_upsert() {
        let session = session();
        assert!(session.upsert("kv", IndexKey::from("a"), b"1").unwrap());
        assert!(!session.upsert("kv", IndexKey::from("a"), b"2").unwrap());
        assert_eq!(session.read_all("kv").unwrap(), vec![Bytes::from_static(b"2")]);
    }

    #[test]
    fn test_duplicate_id_rolls_back() {
        let session = session();
        session.insert("users", IndexKey::from(1i64), b"alice").unwrap();
        let err = session.insert("users", IndexKey::from(1i64), b"again").unwrap_err();
        assert!(matches!(err, FolioError::DuplicateKey { .. }));
        assert_eq!(session.count("users").unwrap(), 1);
        assert_eq!(session.read_all("users").unwrap().len(), 1);
    }

    #[test]
    fn test_index_management_without_extractor() {
        let session = session();
        session.insert("users", IndexKey::from(1i64), b"alice").unwrap();
        assert!(matches!(
            session.ensure_index("users", "by_name", "$.name", false),
            Err(FolioError::NotSupported { .. })
        ));
        assert!(matches!(
            session.drop_index("users", PRIMARY_KEY_INDEX),
            Err(FolioError::InvalidArgument { .. })
        ));
        assert!(!session.drop_index("users", "by_name").unwrap());
    }

    #[test]
    fn test_find_unknown_index() {
        let session = session();
        session.insert("users", IndexKey::from(1i64), b"alice").unwrap();
        assert!(matches!(
            session.find("users", "by_age", &IndexKey::from(3i64)),
            Err(FolioError::IndexNotFound { .. })
        ));
        assert!(session.find("nothing", "by_age", &IndexKey::from(3i64)).unwrap().is_empty());
    }

    #[test]
    fn test_drop_collection() {
        let session = session();
        session.insert("users", IndexKey::from(1i64), b"alice").unwrap();
        assert!(session.drop_collection("users").unwrap());
        assert!(!session.drop_collection("users").unwrap());
        assert!(session.collection_names().is_empty());
        assert!(!session.engine().free_empty_pages().unwrap().is_empty());
    }
}
