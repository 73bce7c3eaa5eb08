use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use crossbeam_utils::Backoff;

use super::metrics::TaskRuntimeMetrics;
use super::task::{JoinHandle, Task, TaskFn, TaskState};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_workers: usize,
    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        Self {
            max_workers: workers,
            thread_name: "jitrt-worker".to_string(),
        }
    }
}

#[derive(Debug)]
struct SchedulerCore {
    injector: Injector<Task>,
    stealers: Arc<Vec<Stealer<Task>>>,
    metrics: Arc<TaskRuntimeMetrics>,
    shutdown: AtomicBool,
}

/// Work-stealing pool of worker threads. Cloning yields another handle to
/// the same pool.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    core: Arc<SchedulerCore>,
}

impl TaskScheduler {
    pub fn new(config: &SchedulerConfig) -> io::Result<Self> {
        let max_workers = config.max_workers.max(1);
        let metrics = TaskRuntimeMetrics::new();
        let injector = Injector::new();
        let mut workers = Vec::with_capacity(max_workers);
        let mut stealer_store = Vec::with_capacity(max_workers);

        for _ in 0..max_workers {
            let worker = Worker::new_fifo();
            stealer_store.push(worker.stealer());
            workers.push(worker);
        }

        let stealers = Arc::new(stealer_store);

        let core = Arc::new(SchedulerCore {
            injector,
            stealers: Arc::clone(&stealers),
            metrics,
            shutdown: AtomicBool::new(false),
        });

        for (index, worker) in workers.into_iter().enumerate() {
            let worker_core = Arc::clone(&core);
            let stealers = Arc::clone(&stealers);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name))
                .spawn(move || worker_loop(&worker_core, &stealers, &worker, index));
            if let Err(err) = spawned {
                tracing::error!(%err, index, "failed to spawn task worker");
                let scheduler = Self { core };
                scheduler.shutdown();
                return Err(err);
            }
        }

        tracing::debug!(workers = max_workers, name = %config.thread_name, "task scheduler started");
        Ok(Self { core })
    }

    pub fn metrics(&self) -> Arc<TaskRuntimeMetrics> {
        Arc::clone(&self.core.metrics)
    }

    pub fn num_workers(&self) -> usize {
        self.core.stealers.len()
    }

    pub fn spawn_fn<F>(&self, name: Option<String>, func: F) -> JoinHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Task::new(name, Box::new(func) as TaskFn);
        let join = task.join_handle();
        self.core.metrics.record_spawn();
        self.core.injector.push(task);
        join
    }

    pub fn is_shutdown(&self) -> bool {
        self.core.shutdown.load(Ordering::SeqCst)
    }

    /// Stops the workers. Tasks still queued are dropped without running.
    pub fn shutdown(&self) {
        if self
            .core
            .shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            for _ in 0..self.core.stealers.len() {
                self.core.injector.push(Task::new(None, Box::new(|| {})));
            }
        }
    }
}

fn run_task(core: &SchedulerCore, task: Task) {
    match task.run() {
        TaskState::Panicked => core.metrics.record_panic(),
        _ => core.metrics.record_completion(),
    }
}

fn worker_loop(
    core: &SchedulerCore,
    stealers: &[Stealer<Task>],
    local: &Worker<Task>,
    index: usize,
) {
    let stealers: Vec<_> = stealers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, stealer)| stealer.clone())
        .collect();
    let backoff = Backoff::new();

    loop {
        if core.shutdown.load(Ordering::SeqCst) {
            break;
        }

        if let Some(task) = local.pop() {
            backoff.reset();
            run_task(core, task);
            continue;
        }

        match core.injector.steal_batch_and_pop(local) {
            Steal::Success(task) => {
                backoff.reset();
                run_task(core, task);
                continue;
            }
            Steal::Retry => {
                backoff.spin();
                continue;
            }
            Steal::Empty => {}
        }

        let stolen = stealers
            .iter()
            .map(Stealer::steal)
            .find_map(|steal| match steal {
                Steal::Success(task) => Some(task),
                Steal::Retry | Steal::Empty => None,
            });

        if let Some(task) = stolen {
            backoff.reset();
            run_task(core, task);
            continue;
        }

        // Nothing to do; yield slightly.
        if backoff.is_completed() {
            thread::sleep(Duration::from_micros(100));
        } else {
            backoff.snooze();
        }
    }

    tracing::trace!(index, "task worker stopped");
}
