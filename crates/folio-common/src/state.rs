//! Engine-wide usability state.
//!
//! Every service holds an `Arc<EngineState>`. The first fatal failure (a
//! failed log write, for example) is recorded once and from then on every
//! call to [`EngineState::ensure_usable`] fails with
//! [`FolioError::EngineUnusable`] carrying that first reason. Closing the
//! engine makes the same call fail with [`FolioError::EngineClosed`].

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{FolioError, FolioResult};

/// Shared fatal/closed flags for one engine instance.
#[derive(Debug, Default)]
pub struct EngineState {
    failed: AtomicBool,
    closed: AtomicBool,
    reason: RwLock<Option<String>>,
}

impl EngineState {
    /// Creates a usable state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails fast when the engine is closed or poisoned.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::EngineUnusable`] after a fatal failure and
    /// [`FolioError::EngineClosed`] after shutdown.
    #[inline]
    pub fn ensure_usable(&self) -> FolioResult<()> {
        if self.failed.load(Ordering::Acquire) {
            return Err(self.unusable_error());
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(FolioError::EngineClosed);
        }
        Ok(())
    }

    /// Records a fatal failure. Only the first reason is kept.
    pub fn set_fatal(&self, reason: impl Into<String>) {
        let mut slot = self.reason.write();
        if slot.is_none() {
            *slot = Some(reason.into());
        }
        self.failed.store(true, Ordering::Release);
    }

    /// Marks the engine closed.
    pub fn set_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Returns true once a fatal failure was recorded.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Returns true once the engine was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Builds the error returned while poisoned.
    #[must_use]
    pub fn unusable_error(&self) -> FolioError {
        FolioError::EngineUnusable {
            reason: self
                .reason
                .read()
                .clone()
                .unwrap_or_else(|| "unknown failure".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_by_default() {
        let state = EngineState::new();
        assert!(state.ensure_usable().is_ok());
        assert!(!state.is_failed());
    }

    #[test]
    fn test_first_reason_wins() {
        let state = EngineState::new();
        state.set_fatal("disk full");
        state.set_fatal("second failure");

        match state.ensure_usable() {
            Err(FolioError::EngineUnusable { reason }) => assert_eq!(reason, "disk full"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_closed() {
        let state = EngineState::new();
        state.set_closed();
        assert!(matches!(state.ensure_usable(), Err(FolioError::EngineClosed)));
    }
}
