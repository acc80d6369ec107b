use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::foundation::error::{SvgaError, SvgaResult};

/// Shared, advisory cancellation flag.
///
/// Long-running steps (fetch, inflate, unzip) poll it between chunks. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Clear a cancellation that work has not acted on yet.
    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Return [`SvgaError::Cancelled`] once the token has been cancelled.
    pub fn check(&self) -> SvgaResult<()> {
        if self.is_cancelled() {
            Err(SvgaError::Cancelled)
        } else {
            Ok(())
        }
    }
}
