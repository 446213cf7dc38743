//! In-flight call table
//!
//! Request IDs are non-negative, unique for the session lifetime and start
//! above the reserved hello ID 0. Each call registers a oneshot completion;
//! a response resolves and removes exactly one. When the session dies the
//! whole table fails at once so no caller waits forever.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

use proctor_core::error::CallError;
use proctor_protocol::Response;

struct PendingInner {
    calls: HashMap<i64, oneshot::Sender<Response>>,
    closed: bool,
}

/// Pending calls of one agent session
pub struct PendingCalls {
    next_id: AtomicI64,
    inner: Mutex<PendingInner>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            inner: Mutex::new(PendingInner {
                calls: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Allocate the next request ID and register its completion
    pub fn register(&self) -> Result<(i64, oneshot::Receiver<Response>), CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(CallError::ConnectionLost);
        }
        inner.calls.insert(id, tx);
        Ok((id, rx))
    }

    /// Resolve one pending call. Returns false for an unknown ID, which the
    /// caller logs and otherwise ignores.
    pub fn resolve(&self, id: i64, response: Response) -> bool {
        let sender = self.inner.lock().unwrap().calls.remove(&id);
        match sender {
            Some(tx) => {
                // The caller may have given up; that's not an error
                let _ = tx.send(response);
                true
            }
            None => false,
        }
    }

    /// Drop a registration after a failed send
    pub fn discard(&self, id: i64) {
        self.inner.lock().unwrap().calls.remove(&id);
    }

    /// Fail every outstanding call and refuse new ones. Dropping the
    /// senders wakes each waiter with a closed-channel error.
    pub fn fail_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        inner.calls.clear();
    }

    pub fn outstanding(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}
