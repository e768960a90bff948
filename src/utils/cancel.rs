use crate::error::PipelineError;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// A cooperative cancellation flag shared by the driver, every sample job and
/// every running external process.
///
/// Cancelling is one-way. Work that has not started yet checks the flag before
/// starting, and running external processes are killed by the runner on its
/// next wait slice.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of all work sharing this token.
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns [`PipelineError::Cancelled`] naming `what` if cancellation was
    /// requested.
    #[inline]
    pub fn check(&self, what: impl std::fmt::Display) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled(format!("{what} was cancelled")))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let worker = token.clone();
        assert!(worker.check("sample A").is_ok());

        token.cancel();
        assert!(worker.is_cancelled());
        match worker.check("sample A") {
            Err(PipelineError::Cancelled(msg)) => assert_eq!(msg, "sample A was cancelled"),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
}
