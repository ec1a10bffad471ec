//! Shared first-error capture and cancellation broadcast.
//!
//! Every worker thread in the pipeline holds a clone of a single
//! [`FailureCoordinator`]. Calling [`FailureCoordinator::fail`] stores the first
//! error reported, flips the cancellation flag, and returns the stored error to
//! every caller (including later, unrelated callers) so all workers converge on
//! the same failure. No worker ever panics past this boundary: every recoverable
//! condition is turned into an [`Error`] and handed to `fail`.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use crate::error::Error;

#[derive(Clone)]
pub struct FailureCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    first_error: Mutex<Option<Error>>,
    cancelled: AtomicBool,
}

impl FailureCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                first_error: Mutex::new(None),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Records `err` as the run's failure (unless one was already recorded),
    /// cancels the run, and returns the first error seen so far -- which may be
    /// a different error than the one just passed in if another thread lost
    /// the race.
    pub fn fail(&self, err: Error) -> Error {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let mut slot = self.inner.first_error.lock().unwrap();
        if slot.is_none() {
            tracing::error!(error = %err, "pipeline failing");
            *slot = Some(err);
        } else {
            tracing::debug!(error = %err, "additional error swallowed after first failure");
        }
        // Safe: we just ensured the slot is populated.
        clone_error(slot.as_ref().unwrap())
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Consumes the coordinator and returns the first recorded error, if any.
    pub fn into_result(self) -> Result<(), Error> {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => match inner.first_error.into_inner().unwrap() {
                Some(err) => Err(err),
                None => Ok(()),
            },
            Err(inner) => match &*inner.first_error.lock().unwrap() {
                Some(err) => Err(clone_error(err)),
                None => Ok(()),
            },
        }
    }
}

impl Default for FailureCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Error`] does not derive `Clone` (its `io::Error` source does not), so
/// cancellation propagation re-renders the stored error as a string-carrying
/// [`Error::InvariantViolation`]-free copy via [`Error::InputFormat`] when exact
/// reconstruction is not possible.
fn clone_error(err: &Error) -> Error {
    match err {
        Error::InputFormat(msg) => Error::InputFormat(msg.clone()),
        Error::Io { path, source } => Error::Io {
            path: path.clone(),
            source: std::io::Error::new(source.kind(), source.to_string()),
        },
        Error::Subprocess { program, detail } => Error::Subprocess {
            program: program.clone(),
            detail: detail.clone(),
        },
        Error::Cancelled => Error::Cancelled,
        Error::InvariantViolation(msg) => Error::InvariantViolation(msg.clone()),
    }
}
