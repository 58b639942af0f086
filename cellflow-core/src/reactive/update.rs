//! Update values and the per-run context.
//!
//! Computations, reducers and asynchronous setters all produce an
//! [`Update`]: either a value that is committed immediately, a future that
//! puts the atom into the loading state until it settles, or an
//! [`Awaiter`] produced by `wait()`.

use std::fmt;
use std::future::Future;

use futures_util::future::{FutureExt, LocalBoxFuture};

use super::wait::Awaiter;
use crate::error::Result;
use crate::flow::Cancellable;
use crate::util::Subscription;

/// The outcome of a computation.
pub enum Update<T> {
    /// Commit synchronously.
    Value(T),
    /// Load asynchronously. Only setters accept this; computed atoms and
    /// reducers must use `wait()` instead.
    Future(LocalBoxFuture<'static, Result<T>>),
    /// The result of a `wait()` combinator.
    Wait(Awaiter<T>),
}

impl<T: 'static> Update<T> {
    /// Box a future as an update.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + 'static,
    {
        Self::Future(future.boxed_local())
    }

    /// Whether committing this update goes through the loading state.
    pub fn is_async(&self) -> bool {
        match self {
            Self::Value(_) => false,
            Self::Future(_) => true,
            Self::Wait(awaiter) => !awaiter.is_ready(),
        }
    }
}

impl<T> From<Awaiter<T>> for Update<T> {
    fn from(awaiter: Awaiter<T>) -> Self {
        Self::Wait(awaiter)
    }
}

impl<T> fmt::Debug for Update<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Update::Value"),
            Self::Future(_) => f.write_str("Update::Future"),
            Self::Wait(_) => f.write_str("Update::Wait"),
        }
    }
}

/// Per-run context handed to computations and reducers.
///
/// Each run gets a fresh context; starting the next run, calling
/// `Atom::abort` or disposing the atom aborts it.
#[derive(Clone, Default)]
pub struct Context {
    abort: Cancellable,
}

impl Context {
    /// A context that is not aborted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this run has been superseded or aborted.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Abort the run.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Run `callback` when the run is aborted.
    pub fn on_abort<F>(&self, callback: F) -> Subscription
    where
        F: FnOnce() + 'static,
    {
        self.abort.on_cancel(callback)
    }

    /// Resolve once the run is aborted.
    pub async fn aborted(&self) {
        self.abort.cancelled().await
    }

    /// The underlying abort flag, for handing to cancellable helpers.
    pub fn signal(&self) -> &Cancellable {
        &self.abort
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn values_are_synchronous() {
        assert!(!Update::Value(1).is_async());
        assert!(Update::<i32>::future(async { Ok(1) }).is_async());
        assert!(!Update::Wait(Awaiter::ready(Ok(1))).is_async());
    }

    #[test]
    fn abort_fires_once() {
        let context = Context::new();
        let count = Rc::new(Cell::new(0));
        let counter = Rc::clone(&count);
        let _ = context.on_abort(move || counter.set(counter.get() + 1));

        context.abort();
        context.abort();

        assert!(context.is_aborted());
        assert_eq!(count.get(), 1);
    }
}
