//! Per-task mutex table serializing writers for a single task.

use std::sync::Arc;

use dashmap::DashMap;
use taskgate_types::TaskId;
use tokio::sync::Mutex;

/// Bounded retry budget for `(task_id, task_seq)` collisions under
/// concurrent writers racing past the in-process lock (e.g. a rebuild or a
/// second process).
pub const MAX_SEQ_RETRIES: u32 = 3;

/// Lazily-allocated table of per-task mutexes.
///
/// An entry is created on first access and removed once its task reaches a
/// terminal state, so the table does not grow without bound across a long
/// process lifetime.
#[derive(Default)]
pub struct TaskSerializer {
    locks: DashMap<TaskId, Arc<Mutex<()>>>,
}

impl TaskSerializer {
    /// Construct an empty serializer.
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Borrow (allocating if necessary) the mutex guarding `task_id`.
    pub fn lock_for(&self, task_id: TaskId) -> Arc<Mutex<()>> {
        self.locks
            .entry(task_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the table entry for `task_id`. Call once the task has reached a
    /// terminal status; a subsequent `lock_for` simply reallocates, which is
    /// harmless since terminal tasks accept no further writes.
    pub fn reclaim(&self, task_id: TaskId) {
        self.locks.remove(&task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_task_shares_one_mutex() {
        let serializer = TaskSerializer::new();
        let task_id = TaskId::new();
        let a = serializer.lock_for(task_id);
        let b = serializer.lock_for(task_id);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn reclaim_frees_the_entry() {
        let serializer = TaskSerializer::new();
        let task_id = TaskId::new();
        let _ = serializer.lock_for(task_id);
        serializer.reclaim(task_id);
        assert!(serializer.locks.is_empty());
    }
}
