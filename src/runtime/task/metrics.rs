use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TaskRuntimeMetrics {
    spawned: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    waiting: AtomicI64,
}

impl TaskRuntimeMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_spawn(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
        self.waiting.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.waiting.fetch_sub(1, Ordering::Relaxed);
    }

    /// A panicked task also counts as completed.
    pub fn record_panic(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
        self.record_completion();
    }

    pub fn snapshot(&self) -> TaskMetricsSnapshot {
        TaskMetricsSnapshot {
            tasks_spawned: self.spawned.load(Ordering::Relaxed),
            tasks_completed: self.completed.load(Ordering::Relaxed),
            tasks_panicked: self.panicked.load(Ordering::Relaxed),
            tasks_waiting: u64::try_from(self.waiting.load(Ordering::Relaxed)).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskMetricsSnapshot {
    pub tasks_spawned: u64,
    pub tasks_completed: u64,
    pub tasks_panicked: u64,
    pub tasks_waiting: u64,
}
