//! Single-assignment values shared between the thread that produces them and
//! any number of readers.
//!
//! A value starts pending and is settled exactly once, either with a value or
//! with an error. Reads never block unless the reader explicitly waits.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};

use crate::utils::errors::JitError;

pub type AsyncValueRef<T> = Arc<AsyncValue<T>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncState {
    Pending,
    Ready,
    Failed,
}

pub struct AsyncValue<T> {
    value: OnceCell<Result<T, JitError>>,
    waiters: Mutex<Vec<Waker>>,
    condvar: Condvar,
}

impl<T> AsyncValue<T> {
    fn with_cell(value: OnceCell<Result<T, JitError>>) -> Arc<Self> {
        Arc::new(Self {
            value,
            waiters: Mutex::new(Vec::new()),
            condvar: Condvar::new(),
        })
    }

    pub fn pending() -> Arc<Self> {
        Self::with_cell(OnceCell::new())
    }

    pub fn available(value: T) -> Arc<Self> {
        Self::with_cell(OnceCell::with_value(Ok(value)))
    }

    pub fn error(error: JitError) -> Arc<Self> {
        Self::with_cell(OnceCell::with_value(Err(error)))
    }

    /// Settles the value. Returns `false` if it was already settled, in which
    /// case `result` is dropped and readers keep observing the first result.
    pub fn settle(&self, result: Result<T, JitError>) -> bool {
        if self.value.set(result).is_err() {
            return false;
        }

        let mut waiters = self.waiters.lock();
        for waker in waiters.drain(..) {
            waker.wake();
        }
        self.condvar.notify_all();
        true
    }

    pub fn set_value(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn set_error(&self, error: JitError) -> bool {
        self.settle(Err(error))
    }

    pub fn state(&self) -> AsyncState {
        match self.value.get() {
            None => AsyncState::Pending,
            Some(Ok(_)) => AsyncState::Ready,
            Some(Err(_)) => AsyncState::Failed,
        }
    }

    /// True once the value is settled, with either a value or an error.
    pub fn is_available(&self) -> bool {
        self.value.get().is_some()
    }

    pub fn is_error(&self) -> bool {
        self.state() == AsyncState::Failed
    }

    /// Non-blocking read.
    pub fn try_get(&self) -> Option<Result<&T, &JitError>> {
        self.value.get().map(Result::as_ref)
    }

    /// Blocks the calling thread until the value is settled.
    pub fn wait(&self) -> Result<&T, &JitError> {
        let mut guard = self.waiters.lock();
        loop {
            if let Some(result) = self.value.get() {
                return result.as_ref();
            }
            self.condvar.wait(&mut guard);
        }
    }

    /// Returns true if the value is already settled, otherwise arranges for
    /// `waker` to be woken when it is.
    fn register_waker(&self, waker: &Waker) -> bool {
        let mut waiters = self.waiters.lock();
        if self.value.get().is_some() {
            return true;
        }
        if !waiters.iter().any(|existing| existing.will_wake(waker)) {
            waiters.push(waker.clone());
        }
        false
    }
}

impl<T> fmt::Debug for AsyncValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncValue")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Future resolving once one async value is settled.
pub struct WhenReady<T> {
    value: AsyncValueRef<T>,
}

impl<T> WhenReady<T> {
    pub const fn new(value: AsyncValueRef<T>) -> Self {
        Self { value }
    }
}

impl<T> Future for WhenReady<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.value.register_waker(cx.waker()) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Future resolving once every value in a snapshot is settled.
pub struct AllAvailable<T> {
    pending: Vec<AsyncValueRef<T>>,
}

impl<T> AllAvailable<T> {
    pub fn new(values: Vec<AsyncValueRef<T>>) -> Self {
        let pending = values
            .into_iter()
            .filter(|value| !value.is_available())
            .collect();
        Self { pending }
    }

    pub fn is_ready(&self) -> bool {
        self.pending.iter().all(|value| value.is_available())
    }

    /// Blocks the calling thread until every value is settled.
    pub fn wait(self) {
        for value in &self.pending {
            let _ = value.wait();
        }
    }
}

impl<T> Future for AllAvailable<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        this.pending
            .retain(|value| !value.register_waker(cx.waker()));
        if this.pending.is_empty() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}
