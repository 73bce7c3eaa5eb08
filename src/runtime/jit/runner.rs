//! Execution of specialization compile tasks.

use std::any::Any;
use std::fmt;
use std::io;

use super::arguments::Argument;
use super::specialization::ArgumentConstraint;
use crate::runtime::task::{TaskScheduler, compile_scheduler};

/// Caller data forwarded untouched to the task runner.
pub type UserData<'a> = Option<&'a (dyn Any + Send + Sync)>;

/// The deferred compile step of one specialization.
pub struct CompilationTask {
    specialization: usize,
    body: Box<dyn FnOnce() + Send + 'static>,
}

impl CompilationTask {
    pub fn new<F>(specialization: usize, body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            specialization,
            body: Box::new(body),
        }
    }

    pub const fn specialization(&self) -> usize {
        self.specialization
    }

    /// Compiles the specialization and settles its cache slot.
    pub fn run(self) {
        (self.body)();
    }
}

impl fmt::Debug for CompilationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationTask")
            .field("specialization", &self.specialization)
            .finish_non_exhaustive()
    }
}

/// Decides where and when compile tasks run. Every task handed to `run` must
/// eventually be run exactly once; a task dropped without running settles its
/// slot with an error.
pub trait CompilationTaskRunner: Send + Sync {
    fn run(
        &self,
        specialization: usize,
        constraints: &[ArgumentConstraint],
        arguments: &[Argument<'_>],
        task: CompilationTask,
        user_data: UserData<'_>,
    );
}

impl<F> CompilationTaskRunner for F
where
    F: Fn(usize, &[ArgumentConstraint], &[Argument<'_>], CompilationTask, UserData<'_>)
        + Send
        + Sync,
{
    fn run(
        &self,
        specialization: usize,
        constraints: &[ArgumentConstraint],
        arguments: &[Argument<'_>],
        task: CompilationTask,
        user_data: UserData<'_>,
    ) {
        self(specialization, constraints, arguments, task, user_data);
    }
}

/// Runs compile tasks on the calling thread before returning.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineTaskRunner;

impl CompilationTaskRunner for InlineTaskRunner {
    fn run(
        &self,
        _specialization: usize,
        _constraints: &[ArgumentConstraint],
        _arguments: &[Argument<'_>],
        task: CompilationTask,
        _user_data: UserData<'_>,
    ) {
        task.run();
    }
}

/// Runs compile tasks on the worker threads of a [`TaskScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerTaskRunner {
    scheduler: TaskScheduler,
}

impl SchedulerTaskRunner {
    pub const fn new(scheduler: TaskScheduler) -> Self {
        Self { scheduler }
    }

    /// Runner backed by the process wide compile scheduler.
    pub fn shared() -> io::Result<Self> {
        compile_scheduler().map(|scheduler| Self::new(scheduler.clone()))
    }

    pub const fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }
}

impl CompilationTaskRunner for SchedulerTaskRunner {
    fn run(
        &self,
        specialization: usize,
        _constraints: &[ArgumentConstraint],
        _arguments: &[Argument<'_>],
        task: CompilationTask,
        _user_data: UserData<'_>,
    ) {
        if self.scheduler.is_shutdown() {
            tracing::warn!(specialization, "compile scheduler is shut down, compiling inline");
            task.run();
            return;
        }

        self.scheduler.spawn_fn(
            Some(format!("jitrt-specialization-{specialization}")),
            move || task.run(),
        );
    }
}
