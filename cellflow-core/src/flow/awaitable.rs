//! Values a flow can wait for.

use std::fmt;
use std::future::Future;

use futures_util::future::{FutureExt, LocalBoxFuture};

use super::context::Flow;
use super::signal::Signal;
use super::task::Task;
use crate::error::Result;
use crate::reactive::Atom;

type Call<V> = Box<dyn FnOnce(Flow) -> LocalBoxFuture<'static, Result<V>>>;

/// Anything [`Flow::when`] and the combinators accept.
pub enum Awaitable<V: 'static> {
    /// A plain future.
    Future(LocalBoxFuture<'static, Result<V>>),
    /// A task, started if idle.
    Task(Task<V>),
    /// The next emission of a signal.
    Signal(Signal<V>),
    /// The next state change of an atom.
    Atom(Atom<V>),
    /// A function called with a flow context.
    Call(Call<V>),
}

impl<V: Clone + PartialEq + 'static> Awaitable<V> {
    /// Box a future.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = Result<V>> + 'static,
    {
        Self::Future(future.boxed_local())
    }

    /// Wrap a function receiving a flow context.
    pub fn call<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Flow) -> Fut + 'static,
        Fut: Future<Output = Result<V>> + 'static,
    {
        Self::Call(Box::new(move |flow| f(flow).boxed_local()))
    }

    /// Await in place, running calls with `flow` itself.
    pub(crate) fn into_future(self, flow: &Flow) -> LocalBoxFuture<'static, Result<V>> {
        match self {
            Self::Future(future) => future,
            Self::Call(call) => call(flow.clone()),
            other => other.into_entry(flow).0,
        }
    }

    /// Await as a combinator entry. Futures and calls run in a task owned by
    /// the combinator, which is returned so it can be cancelled.
    pub(crate) fn into_entry(self, flow: &Flow) -> (LocalBoxFuture<'static, Result<V>>, Option<Task<V>>) {
        match self {
            Self::Future(future) => {
                let task = flow.detached(move |_| future);
                (task.start().boxed_local(), Some(task))
            }
            Self::Call(call) => {
                let task = flow.detached(call);
                (task.start().boxed_local(), Some(task))
            }
            Self::Task(task) => (task.start().boxed_local(), None),
            Self::Signal(signal) => (signal.next().map(Ok).boxed_local(), None),
            Self::Atom(atom) => (atom.changed().map(Ok).boxed_local(), None),
        }
    }
}

impl<V: 'static> From<LocalBoxFuture<'static, Result<V>>> for Awaitable<V> {
    fn from(future: LocalBoxFuture<'static, Result<V>>) -> Self {
        Self::Future(future)
    }
}

impl<V: 'static> From<Task<V>> for Awaitable<V> {
    fn from(task: Task<V>) -> Self {
        Self::Task(task)
    }
}

impl<V: 'static> From<&Task<V>> for Awaitable<V> {
    fn from(task: &Task<V>) -> Self {
        Self::Task(task.clone())
    }
}

impl<V: 'static> From<Signal<V>> for Awaitable<V> {
    fn from(signal: Signal<V>) -> Self {
        Self::Signal(signal)
    }
}

impl<V: 'static> From<&Signal<V>> for Awaitable<V> {
    fn from(signal: &Signal<V>) -> Self {
        Self::Signal(signal.clone())
    }
}

impl<V: 'static> From<Atom<V>> for Awaitable<V> {
    fn from(atom: Atom<V>) -> Self {
        Self::Atom(atom)
    }
}

impl<V: 'static> From<&Atom<V>> for Awaitable<V> {
    fn from(atom: &Atom<V>) -> Self {
        Self::Atom(atom.clone())
    }
}

impl<V: 'static> fmt::Debug for Awaitable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Future(_) => f.write_str("Awaitable::Future"),
            Self::Task(task) => f.debug_tuple("Awaitable::Task").field(task).finish(),
            Self::Signal(signal) => f.debug_tuple("Awaitable::Signal").field(signal).finish(),
            Self::Atom(_) => f.write_str("Awaitable::Atom"),
            Self::Call(_) => f.write_str("Awaitable::Call"),
        }
    }
}
