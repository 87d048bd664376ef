//! Lazy index cursors.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{trace, warn};

use folio_common::{FolioError, FolioResult, IndexKey, Order, PageAddress, PRIMARY_KEY_INDEX};
use folio_txn::LockMode;

use crate::data::DataService;
use crate::engine::Engine;
use crate::index::IndexService;
use crate::session::SessionCore;

/// Which nodes of an index a cursor visits.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyRange {
    /// Every node.
    All,
    /// Nodes equal to the key.
    Equal(IndexKey),
    /// Nodes from the key onwards in scan order: keys at or above it when
    /// ascending, at or below it when descending.
    From(IndexKey),
}

/// An index scan.
///
/// # Example
///
/// ```rust
/// use folio_common::{IndexKey, Order};
/// use folio_engine::Query;
///
/// let query = Query::from_key("_id", IndexKey::from(10i64)).descending();
/// assert_eq!(query.order, Order::Descending);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Index to scan.
    pub index: String,
    /// Nodes to visit.
    pub range: KeyRange,
    /// Scan direction.
    pub order: Order,
}

impl Query {
    /// Every document in `index` order.
    #[must_use]
    pub fn all(index: &str) -> Self {
        Self {
            index: index.to_string(),
            range: KeyRange::All,
            order: Order::Ascending,
        }
    }

    /// Every document by primary key.
    #[must_use]
    pub fn by_id() -> Self {
        Self::all(PRIMARY_KEY_INDEX)
    }

    /// Documents whose `index` key equals `key`.
    #[must_use]
    pub fn equal(index: &str, key: IndexKey) -> Self {
        Self {
            range: KeyRange::Equal(key),
            ..Self::all(index)
        }
    }

    /// Documents from `key` onwards.
    #[must_use]
    pub fn from_key(index: &str, key: IndexKey) -> Self {
        Self {
            range: KeyRange::From(key),
            ..Self::all(index)
        }
    }

    /// Scans largest key first.
    #[must_use]
    pub fn descending(mut self) -> Self {
        self.order = Order::Descending;
        self
    }
}

enum Position {
    Start,
    At(PageAddress),
    End,
}

/// Lazy iterator over the documents an index scan visits, yielding each
/// node's key and document.
///
/// An open cursor keeps its session's transaction alive and blocks writes
/// on that session. [`Cursor::close`], or dropping the cursor, releases it;
/// when the last cursor of an auto transaction closes, the transaction
/// commits.
pub struct Cursor {
    engine: Engine,
    core: Arc<Mutex<SessionCore>>,
    collection: String,
    query: Query,
    position: Position,
    closed: bool,
}

impl Cursor {
    pub(crate) fn new(engine: Engine, core: Arc<Mutex<SessionCore>>, collection: &str, query: Query) -> Self {
        Self {
            engine,
            core,
            collection: collection.to_string(),
            query,
            position: Position::Start,
            closed: false,
        }
    }

    /// The scan this cursor runs.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn fetch(&mut self) -> FolioResult<Option<(IndexKey, Bytes)>> {
        if matches!(self.position, Position::End) {
            return Ok(None);
        }
        let max_document_size = self.engine.config().max_document_size;
        let order = self.query.order;

        let mut core = self.core.lock();
        let txn = core.transaction.as_mut().ok_or_else(|| FolioError::TransactionClosed {
            txn_id: folio_common::TxnId::INVALID,
            state: "ended".to_string(),
        })?;
        txn.safepoint()?;
        let cancel = txn.cancel_token().clone();
        let snapshot = txn.create_snapshot(LockMode::Read, &self.collection, false)?;

        let Some(index) = snapshot
            .collection_page()
            .and_then(|page| page.get_index(&self.query.index))
            .cloned()
        else {
            if snapshot.collection_page().is_some() {
                return Err(FolioError::IndexNotFound {
                    collection: self.collection.clone(),
                    index: self.query.index.clone(),
                });
            }
            return Ok(None);
        };

        let mut indexer = IndexService::new(snapshot);
        let node = match self.position {
            Position::End => None,
            Position::At(address) => indexer.get_node(address)?,
            Position::Start => match &self.query.range {
                KeyRange::All => indexer.first(&index, order)?,
                KeyRange::Equal(key) => indexer.first_equal(&index, key, order)?,
                KeyRange::From(key) => match indexer.first_equal(&index, key, order)? {
                    Some(node) => Some(node),
                    None => indexer.find(&index, key, true, order)?,
                },
            },
        };

        let Some(node) = node else {
            self.position = Position::End;
            return Ok(None);
        };
        if let KeyRange::Equal(key) = &self.query.range {
            if node.key() != key {
                self.position = Position::End;
                return Ok(None);
            }
        }

        self.position = match indexer.next_in_order(&node, order)? {
            Some(next) => Position::At(next.position()),
            None => Position::End,
        };

        let document = DataService::new(snapshot, max_document_size)
            .with_cancellation(cancel)
            .read_document(node.data_block())?;
        trace!(collection = %self.collection, key = %node.key(), "cursor step");
        Ok(Some((node.key().clone(), document)))
    }

    /// Closes the cursor. Closing the last cursor of an auto transaction
    /// commits it. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns any commit error.
    pub fn close(&mut self) -> FolioResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.position = Position::End;

        let committed = {
            let mut core = self.core.lock();
            core.open_cursors = core.open_cursors.saturating_sub(1);
            if core.open_cursors == 0 && !core.explicit {
                core.commit_current()?
            } else {
                false
            }
        };
        if committed {
            self.engine.auto_checkpoint();
        }
        Ok(())
    }
}

impl Iterator for Cursor {
    type Item = FolioResult<(IndexKey, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.closed {
            return None;
        }
        match self.fetch() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.position = Position::End;
                self.core.lock().abandon();
                Some(Err(e))
            }
        }
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(collection = %self.collection, error = %e, "closing cursor failed");
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("collection", &self.collection)
            .field("query", &self.query)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
