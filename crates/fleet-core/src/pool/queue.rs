//! Shared work queue drained by pool workers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// FIFO of repository names, shared between the workers of one pool run.
///
/// Workers run on a multi-threaded runtime, so the pop is guarded by a mutex.
/// The lock is held for the pop alone and is never held across an `.await`;
/// this is what guarantees that every name is handed out exactly once.
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    items: Arc<Mutex<VecDeque<String>>>,
}

impl WorkQueue {
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: Arc::new(Mutex::new(items.into_iter().map(Into::into).collect())),
        }
    }

    /// Remove and return the front item, or `None` once the queue is drained.
    pub fn pop(&self) -> Option<String> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Items nobody picked up. Non-empty only when every worker aborted.
    pub fn drain_remaining(&self) -> Vec<String> {
        self.lock().drain(..).collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
