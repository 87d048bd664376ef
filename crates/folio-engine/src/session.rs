//! Sessions.
//!
//! A [`Session`] is the execution context of a caller. It carries at most
//! one transaction at a time:
//!
//! - an **explicit** transaction opened by [`Session::begin`] and ended by
//!   [`Session::commit`] or [`Session::rollback`];
//! - an **auto** transaction opened by a document operation run outside an
//!   explicit transaction, committed when the operation succeeds, or when
//!   the last cursor reading through it closes.
//!
//! Any error raised inside a transaction rolls it back before the error is
//! returned.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use folio_common::{CancellationToken, FolioError, FolioResult};
use folio_txn::Transaction;

use crate::engine::Engine;

/// Unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a new session ID.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the numeric ID.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

/// Transaction slot shared by a session and its cursors.
#[derive(Default)]
pub(crate) struct SessionCore {
    pub(crate) transaction: Option<Transaction>,
    pub(crate) explicit: bool,
    pub(crate) open_cursors: usize,
}

impl SessionCore {
    /// Rolls back and clears the current transaction, logging a failed
    /// rollback.
    pub(crate) fn abandon(&mut self) {
        if let Some(mut txn) = self.transaction.take() {
            if let Err(e) = txn.rollback() {
                warn!(txn_id = txn.id().as_u32(), error = %e, "rollback failed");
            }
        }
        self.explicit = false;
    }

    /// Commits and clears the current transaction. A failed commit rolls
    /// back.
    pub(crate) fn commit_current(&mut self) -> FolioResult<bool> {
        let Some(mut txn) = self.transaction.take() else {
            return Ok(false);
        };
        self.explicit = false;
        match txn.commit() {
            Ok(committed) => Ok(committed),
            Err(e) => {
                if let Err(rollback) = txn.rollback() {
                    warn!(txn_id = txn.id().as_u32(), error = %rollback, "rollback after failed commit failed");
                }
                Err(e)
            }
        }
    }
}

/// A caller's execution context.
pub struct Session {
    id: SessionId,
    engine: Engine,
    core: Arc<Mutex<SessionCore>>,
    cancel: CancellationToken,
}

impl Session {
    pub(crate) fn new(id: SessionId, engine: Engine) -> Self {
        Self {
            id,
            engine,
            core: Arc::new(Mutex::new(SessionCore::default())),
            cancel: CancellationToken::new(),
        }
    }

    /// Session ID.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The engine this session runs on.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Token cancelling the work of this session. Cancellation is checked
    /// at document and block boundaries; the interrupted transaction rolls
    /// back.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns true inside an explicit transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.core.lock().explicit
    }

    /// Number of cursors open on this session.
    #[must_use]
    pub fn open_cursors(&self) -> usize {
        self.core.lock().open_cursors
    }

    pub(crate) fn core(&self) -> &Arc<Mutex<SessionCore>> {
        &self.core
    }

    fn begin_transaction(&self) -> FolioResult<Transaction> {
        Transaction::begin(Arc::clone(self.engine.context()), self.cancel.clone())
    }

    /// Begins an explicit transaction. Returns false when one is already
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::OpenCursors`] while cursors are open and
    /// [`FolioError::EngineClosed`] after close.
    pub fn begin(&self) -> FolioResult<bool> {
        let mut core = self.core.lock();
        if core.open_cursors > 0 {
            return Err(FolioError::OpenCursors {
                count: core.open_cursors,
            });
        }
        if core.explicit {
            return Ok(false);
        }

        let txn = self.begin_transaction()?;
        debug!(session = %self.id, txn_id = txn.id().as_u32(), "explicit transaction started");
        core.transaction = Some(txn);
        core.explicit = true;
        Ok(true)
    }

    /// Commits the explicit transaction. Returns false when none is
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::OpenCursors`] while cursors are open and any
    /// commit error, after rolling back.
    pub fn commit(&self) -> FolioResult<bool> {
        let committed = {
            let mut core = self.core.lock();
            if core.open_cursors > 0 {
                return Err(FolioError::OpenCursors {
                    count: core.open_cursors,
                });
            }
            if !core.explicit {
                return Ok(false);
            }
            core.commit_current()?
        };
        self.engine.auto_checkpoint();
        Ok(committed)
    }

    /// Rolls back the explicit transaction. Returns false when none is
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::OpenCursors`] while cursors are open and any
    /// error writing the returned pages.
    pub fn rollback(&self) -> FolioResult<bool> {
        let mut core = self.core.lock();
        if core.open_cursors > 0 {
            return Err(FolioError::OpenCursors {
                count: core.open_cursors,
            });
        }
        if !core.explicit {
            return Ok(false);
        }
        core.explicit = false;
        match core.transaction.take() {
            Some(mut txn) => txn.rollback(),
            None => Ok(false),
        }
    }

    /// Runs `f` in the current transaction, or in a new auto transaction
    /// committed when `f` succeeds. An error from `f` rolls back whichever
    /// transaction was running.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or of beginning or committing.
    pub fn auto_transaction<T, F>(&self, f: F) -> FolioResult<T>
    where
        F: FnOnce(&mut Transaction) -> FolioResult<T>,
    {
        self.run(false, f)
    }

    /// Like [`Session::auto_transaction`], refusing to run while cursors
    /// are open.
    pub(crate) fn write_transaction<T, F>(&self, f: F) -> FolioResult<T>
    where
        F: FnOnce(&mut Transaction) -> FolioResult<T>,
    {
        self.run(true, f)
    }

    fn run<T, F>(&self, write: bool, f: F) -> FolioResult<T>
    where
        F: FnOnce(&mut Transaction) -> FolioResult<T>,
    {
        let mut core = self.core.lock();
        if write && core.open_cursors > 0 {
            return Err(FolioError::OpenCursors {
                count: core.open_cursors,
            });
        }

        let is_new = core.transaction.is_none();
        if is_new {
            core.transaction = Some(self.begin_transaction()?);
            core.explicit = false;
        }

        let result = match core.transaction.as_mut() {
            Some(txn) => f(txn),
            None => Err(FolioError::internal("session transaction missing")),
        };

        match result {
            Ok(value) => {
                if is_new && core.open_cursors == 0 {
                    core.commit_current()?;
                    drop(core);
                    self.engine.auto_checkpoint();
                }
                Ok(value)
            }
            Err(e) => {
                debug!(session = %self.id, error = %e, "rolling back after error");
                core.abandon();
                Err(e)
            }
        }
    }

    /// Opens a cursor slot. The caller must already hold a transaction.
    pub(crate) fn open_cursor(&self) -> FolioResult<()> {
        let mut core = self.core.lock();
        if core.transaction.is_none() {
            core.transaction = Some(self.begin_transaction()?);
            core.explicit = false;
        }
        core.open_cursors += 1;
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("explicit", &core.explicit)
            .field("transaction", &core.transaction.as_ref().map(Transaction::id))
            .field("open_cursors", &core.open_cursors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_common::{EngineConfig, IndexKey};

    fn engine() -> Engine {
        Engine::open(EngineConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_session_ids_increase() {
        let engine = engine();
        let a = engine.session();
        let b = engine.session();
        assert!(b.id().as_u64() > a.id().as_u64());
        assert_eq!(a.id().to_string(), format!("session_{}", a.id().as_u64()));
    }

    #[test]
    fn test_begin_commit() {
        let engine = engine();
        let session = engine.session();
        assert!(!session.commit().unwrap());

        assert!(session.begin().unwrap());
        assert!(!session.begin().unwrap());
        assert!(session.in_transaction());
        session.insert("items", IndexKey::from(1i64), b"one").unwrap();

        // other sessions do not see uncommitted documents
        let other = engine.session();
        assert!(other.find_by_id("items", &IndexKey::from(1i64)).unwrap().is_none());

        assert!(session.commit().unwrap());
        assert!(!session.in_transaction());
        assert!(other.find_by_id("items", &IndexKey::from(1i64)).unwrap().is_some());
    }

    #[test]
    fn test_rollback_discards() {
        let engine = engine();
        let session = engine.session();
        session.begin().unwrap();
        session.insert("items", IndexKey::from(1i64), b"one").unwrap();
        assert!(session.rollback().unwrap());
        assert!(!session.rollback().unwrap());
        assert!(session.find_by_id("items", &IndexKey::from(1i64)).unwrap().is_none());
    }

    #[test]
    fn test_error_rolls_back_explicit_transaction() {
        let engine = engine();
        let session = engine.session();
        session.begin().unwrap();
        session.insert("items", IndexKey::from(1i64), b"one").unwrap();
        let err = session.insert("items", IndexKey::from(1i64), b"again").unwrap_err();
        assert!(matches!(err, FolioError::DuplicateKey { .. }));
        assert!(!session.in_transaction());
        assert_eq!(session.count("items").unwrap(), 0);
    }

    #[test]
    fn test_auto_transaction_commits() {
        let engine = engine();
        let session = engine.session();
        let id = session
            .auto_transaction(|txn| Ok(txn.id()))
            .unwrap();
        assert!(id.is_valid());
        assert_eq!(engine.stats().transactions.committed, 1);
    }

    #[test]
    fn test_cancelled_session_rolls_back() {
        let engine = engine();
        let session = engine.session();
        session.cancel_token().cancel();
        let docs = (0..10i64).map(|i| (IndexKey::from(i), b"doc".to_vec()));
        assert!(matches!(
            session.insert_many("items", docs),
            Err(FolioError::Cancelled)
        ));
        assert!(engine.collection_names().is_empty());
    }
}
