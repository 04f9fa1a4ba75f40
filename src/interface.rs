//! Call control for backend work: deadlines and cooperative cancellation.
//!
//! Every session operation builds a [`CallContext`] from the session's
//! [`CallOptions`] and hands it to each backend call it makes. Backends check
//! the context before (and, where they loop, during) their work, so a caller
//! can bound how long an operation may take or stop it from another thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{CcdbError, Result};

/// Cancellation token shared between the caller and the running operation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);
impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
    /// Clears a previous cancellation so the token can be reused.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Options applied to every operation of a session.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}
impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
    pub fn context(&self, operation: &'static str) -> CallContext {
        CallContext {
            operation,
            deadline: self.timeout.map(|t| Instant::now() + t),
            cancel: self.cancel.clone(),
        }
    }
}

/// Deadline and cancellation state of one operation.
#[derive(Debug, Clone)]
pub struct CallContext {
    operation: &'static str,
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}
impl CallContext {
    /// A context without deadline or cancellation.
    pub fn unbounded(operation: &'static str) -> Self {
        Self {
            operation,
            deadline: None,
            cancel: None,
        }
    }
    pub fn operation(&self) -> &'static str {
        self.operation
    }
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
    /// Fails with `Cancelled` or `Timeout` once the operation should stop.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(CcdbError::Cancelled(self.operation.to_string()));
        }
        if self.is_expired() {
            return Err(CcdbError::Timeout(self.operation.to_string()));
        }
        Ok(())
    }
}
