//! Per-thread turn serialization
//!
//! A turn is a read-modify-write over one thread's checkpoint log, so turns
//! on the same thread must not overlap. Turns on different threads never
//! contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held for the whole of a turn; dropping it releases the thread
pub type ThreadGuard = OwnedMutexGuard<()>;

/// Registry of one async mutex per thread id
#[derive(Debug, Default)]
pub struct ThreadLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ThreadLocks {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `thread_id`
    ///
    /// The returned guard is owned, so it can move into a stream that
    /// outlives the caller's borrow of the registry.
    pub async fn acquire(&self, thread_id: &str) -> ThreadGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Idle entries are referenced only by the map.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
