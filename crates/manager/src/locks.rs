//! Per-id exclusive lock table. The table itself is guarded by a coarse
//! lock held only long enough to look up (or insert) the per-id lock; the
//! actual mutation serializes on that per-id lock, never on the table lock.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

#[derive(Default)]
pub struct LockTable {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the exclusive lock for `id`, creating its entry if absent.
    /// The returned guard serializes every other caller of this method for
    /// the same `id`, but never blocks callers using a different `id`.
    pub async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table: MutexGuard<'_, _> = self.locks.lock().await;
            Arc::clone(table.entry(id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        lock.lock_owned().await
    }
}
