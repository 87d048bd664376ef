//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{FolioError, FolioResult};

/// A cloneable flag checked between documents and between data blocks.
///
/// Cancelling never retracts writes already handed to the log writer; the
/// unit of work that observes the cancellation fails with
/// [`FolioError::Cancelled`] and its transaction is rolled back.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fails with [`FolioError::Cancelled`] once cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Cancelled`] if the token was cancelled.
    #[inline]
    pub fn check(&self) -> FolioResult<()> {
        if self.is_cancelled() {
            Err(FolioError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(clone.check().is_ok());

        token.cancel();
        assert!(clone.is_cancelled());
        assert!(matches!(clone.check(), Err(FolioError::Cancelled)));
    }
}
