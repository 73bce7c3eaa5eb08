//! Task runtime scaffolding.
//!
//! Provides the work-stealing scheduler, join handles and runtime metrics
//! used to run compilation tasks off the calling thread.

mod metrics;
mod scheduler;
mod task;

pub use metrics::{TaskMetricsSnapshot, TaskRuntimeMetrics};
pub use scheduler::{SchedulerConfig, TaskScheduler};
pub use task::{JoinFuture, JoinHandle, Task, TaskFn, TaskId, TaskState};

use std::io;

use once_cell::sync::OnceCell;

use crate::config::RuntimeConfig;

static COMPILE_SCHEDULER: OnceCell<TaskScheduler> = OnceCell::new();

/// Process wide scheduler for compilation tasks, started on first use with
/// the worker count from [`RuntimeConfig::from_env`].
pub fn compile_scheduler() -> io::Result<&'static TaskScheduler> {
    COMPILE_SCHEDULER.get_or_try_init(|| {
        let config = RuntimeConfig::from_env().unwrap_or_else(|err| {
            tracing::warn!(%err, "ignoring invalid runtime configuration");
            RuntimeConfig::default()
        });
        TaskScheduler::new(&SchedulerConfig {
            max_workers: config.compile_workers(),
            thread_name: "jitrt-compile".to_string(),
        })
    })
}
