use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use crate::runtime::async_value::{AsyncValue, AsyncValueRef, WhenReady};
use crate::utils::errors::JitError;

/// Unique identifier assigned to each task at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    TaskId::new(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Completed,
    Panicked,
}

/// Unit of work executed by the scheduler.
pub struct Task {
    id: TaskId,
    name: Option<String>,
    state: TaskState,
    func: Option<TaskFn>,
    done: AsyncValueRef<()>,
}

impl Task {
    pub fn new(name: Option<String>, func: TaskFn) -> Self {
        Self {
            id: next_task_id(),
            name,
            state: TaskState::Ready,
            func: Some(func),
            done: AsyncValue::pending(),
        }
    }

    pub const fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub const fn state(&self) -> TaskState {
        self.state
    }

    pub fn join_handle(&self) -> JoinHandle {
        JoinHandle {
            task_id: self.id,
            done: AsyncValueRef::clone(&self.done),
        }
    }

    /// Runs the task body. A panic is contained and reported through the
    /// join handle; the returned state tells which one happened.
    pub fn run(mut self) -> TaskState {
        self.state = TaskState::Running;
        let outcome = self
            .func
            .take()
            .map_or(Ok(()), |func| catch_unwind(AssertUnwindSafe(func)));

        match outcome {
            Ok(()) => {
                self.state = TaskState::Completed;
                self.done.set_value(());
            }
            Err(_) => {
                self.state = TaskState::Panicked;
                tracing::error!(task = self.id.raw(), name = ?self.name, "task panicked");
                self.done.set_error(JitError::TaskPanicked {
                    name: self.name.clone().unwrap_or_else(|| "<unnamed>".to_string()),
                });
            }
        }
        self.state
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct JoinHandle {
    task_id: TaskId,
    done: AsyncValueRef<()>,
}

impl JoinHandle {
    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_available()
    }

    /// True if the task body panicked.
    pub fn is_panicked(&self) -> bool {
        self.done.is_error()
    }

    /// Blocks until the task has run.
    pub fn join(&self) {
        let _ = self.done.wait();
    }

    pub fn into_future(self) -> JoinFuture {
        JoinFuture {
            inner: WhenReady::new(self.done),
        }
    }
}

pub struct JoinFuture {
    inner: WhenReady<()>,
}

impl Future for JoinFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}
