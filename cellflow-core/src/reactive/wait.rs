//! The `wait()` combinator.
//!
//! Computed atoms and reducers are synchronous functions. When they need a
//! value that is not there yet, they return an [`Awaiter`] built by
//! [`wait`], [`wait_all`] or [`wait_map`]: once every input has settled, the
//! continuation runs with the collected values, back inside the scope of the
//! evaluation that called `wait`. The continuation may read more atoms or
//! call `wait` again.
//!
//! If every input is an atom that is not loading, the continuation runs
//! immediately and the awaiter is already resolved, so no loading transition
//! happens.

use std::cell::Cell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::hash::Hash;
use std::rc::Rc;

use futures_util::future::{self, FutureExt, LocalBoxFuture};
use indexmap::IndexMap;

use super::atom::Atom;
use super::scope::{self, run_in_scope, Scope};
use super::update::Update;
use crate::error::{Error, Result, UsageError};

pub(crate) enum AwaiterState<T> {
    Ready(Result<T>),
    Pending(LocalBoxFuture<'static, Result<T>>),
}

/// The tagged result of a `wait()` combinator.
pub struct Awaiter<T> {
    state: AwaiterState<T>,
}

impl<T: 'static> Awaiter<T> {
    /// An awaiter that is already resolved.
    pub fn ready(result: Result<T>) -> Self {
        Self {
            state: AwaiterState::Ready(result),
        }
    }

    pub(crate) fn pending(future: LocalBoxFuture<'static, Result<T>>) -> Self {
        Self {
            state: AwaiterState::Pending(future),
        }
    }

    /// Whether the result is available without waiting.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, AwaiterState::Ready(_))
    }

    pub(crate) fn into_state(self) -> AwaiterState<T> {
        self.state
    }
}

impl<T: 'static> IntoFuture for Awaiter<T> {
    type Output = Result<T>;
    type IntoFuture = LocalBoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        match self.state {
            AwaiterState::Ready(result) => future::ready(result).boxed_local(),
            AwaiterState::Pending(future) => future,
        }
    }
}

impl<T> fmt::Debug for Awaiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            AwaiterState::Ready(_) => "ready",
            AwaiterState::Pending(_) => "pending",
        };
        f.debug_struct("Awaiter").field("state", &state).finish()
    }
}

/// Something `wait()` can wait for.
pub enum Waitable<V: 'static> {
    /// A future.
    Future(LocalBoxFuture<'static, Result<V>>),
    /// An atom; waits while it is loading.
    Atom(Atom<V>),
}

impl<V: 'static> Waitable<V> {
    /// Wrap a future.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = Result<V>> + 'static,
    {
        Self::Future(future.boxed_local())
    }
}

impl<V: 'static> From<Atom<V>> for Waitable<V> {
    fn from(atom: Atom<V>) -> Self {
        Self::Atom(atom)
    }
}

impl<V: 'static> From<&Atom<V>> for Waitable<V> {
    fn from(atom: &Atom<V>) -> Self {
        Self::Atom(atom.clone())
    }
}

impl<V: 'static> From<LocalBoxFuture<'static, Result<V>>> for Waitable<V> {
    fn from(future: LocalBoxFuture<'static, Result<V>>) -> Self {
        Self::Future(future)
    }
}

/// Wait for one input, then continue with its value.
pub fn wait<V, T, F>(input: impl Into<Waitable<V>>, continuation: F) -> Result<Awaiter<T>>
where
    V: Clone + PartialEq + 'static,
    T: 'static,
    F: FnOnce(V) -> Result<Update<T>> + 'static,
{
    wait_all(vec![input.into()], move |mut values| match values.pop() {
        Some(value) => continuation(value),
        None => Err(Error::msg("wait() resolved without a value")),
    })
}

/// Wait for every input, then continue with their values in input order.
///
/// Fails as soon as one input fails.
pub fn wait_all<V, T, F>(inputs: Vec<Waitable<V>>, continuation: F) -> Result<Awaiter<T>>
where
    V: Clone + PartialEq + 'static,
    T: 'static,
    F: FnOnce(Vec<V>) -> Result<Update<T>> + 'static,
{
    let register_cleanup = scope::cleanup_hook().ok_or(UsageError::WaitOutsideEvaluation)?;

    // Read every atom through the tracked accessors so the evaluation
    // depends on both of its channels.
    let mut settled = Vec::with_capacity(inputs.len());
    let mut futures = Vec::with_capacity(inputs.len());
    for input in inputs {
        match input {
            Waitable::Atom(atom) => {
                let loading = atom.loading();
                let state = atom.state();
                if loading {
                    futures.push(atom.settled());
                } else {
                    settled.push(state.clone());
                    futures.push(future::ready(Ok(state)).boxed_local());
                }
            }
            Waitable::Future(future) => futures.push(future),
        }
    }

    if settled.len() == futures.len() {
        return match continuation(settled) {
            Ok(Update::Value(value)) => Ok(Awaiter::ready(Ok(value))),
            Ok(Update::Wait(awaiter)) => Ok(awaiter),
            Ok(Update::Future(_)) => Err(UsageError::FutureReturned.into()),
            Err(error) => Ok(Awaiter::ready(Err(error))),
        };
    }

    let active = Rc::new(Cell::new(true));
    let flag = Rc::clone(&active);
    register_cleanup(Rc::new(move || flag.set(false)));

    let scope = Scope::current().map(|scope| scope.detached()).unwrap_or_default();
    let pending = async move {
        let values = future::try_join_all(futures).await?;
        if !active.get() {
            return Err(Error::Aborted);
        }
        match run_in_scope(scope, move || continuation(values))? {
            Update::Value(value) => Ok(value),
            Update::Wait(awaiter) => awaiter.await,
            Update::Future(_) => {
                tracing::error!("wait() continuation returned a raw future");
                Err(UsageError::FutureReturned.into())
            }
        }
    };

    Ok(Awaiter::pending(pending.boxed_local()))
}

/// Wait for every keyed input, then continue with a map of their values.
pub fn wait_map<K, V, T, F>(inputs: IndexMap<K, Waitable<V>>, continuation: F) -> Result<Awaiter<T>>
where
    K: Hash + Eq + 'static,
    V: Clone + PartialEq + 'static,
    T: 'static,
    F: FnOnce(IndexMap<K, V>) -> Result<Update<T>> + 'static,
{
    let (keys, inputs): (Vec<K>, Vec<Waitable<V>>) = inputs.into_iter().unzip();
    wait_all(inputs, move |values| continuation(keys.into_iter().zip(values).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::delay_value;
    use std::time::Duration;

    #[test]
    fn wait_outside_evaluation_is_a_usage_error() {
        let atom = Atom::new(1);
        let error = wait(atom, |x| Ok(Update::Value(x))).unwrap_err();
        assert!(matches!(error, Error::Usage(UsageError::WaitOutsideEvaluation)));
    }

    #[test]
    fn settled_atoms_continue_synchronously() {
        let a = Atom::new(2);
        let b = Atom::new(3);
        let (left, right) = (a.clone(), b.clone());
        let product = Atom::computed(move |_| {
            let awaiter = wait_all(vec![left.clone().into(), right.clone().into()], |values| {
                Ok(Update::Value(values.iter().product::<i32>()))
            })?;
            assert!(awaiter.is_ready());
            Ok(Update::Wait(awaiter))
        });

        assert_eq!(product.peek(), 6);
        assert!(!product.loading());
        b.set(4);
        assert_eq!(product.peek(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn keyed_inputs_keep_their_keys() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let label = Atom::computed(|_| {
                    let mut inputs = IndexMap::new();
                    inputs.insert("a", Waitable::Future(delay_value(Duration::from_millis(5), 1)));
                    inputs.insert("b", Waitable::Future(delay_value(Duration::from_millis(2), 2)));
                    let awaiter = wait_map(inputs, |values| {
                        Ok(Update::Value(format!("a={} b={}", values["a"], values["b"])))
                    })?;
                    Ok(Update::Wait(awaiter))
                });

                assert!(label.loading());
                assert_eq!(label.settled().await.unwrap(), "a=1 b=2");
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_rejects() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let atom = Atom::<i32>::computed(|_| {
                    let inputs = vec![
                        Waitable::Future(delay_value(Duration::from_millis(50), 1)),
                        Waitable::future(async {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            Err(Error::msg("boom"))
                        }),
                    ];
                    Ok(Update::Wait(wait_all(inputs, |values| Ok(Update::Value(values.len() as i32)))?))
                });

                let start = tokio::time::Instant::now();
                let error = atom.settled().await.unwrap_err();
                assert_eq!(error.to_string(), "boom");
                assert!(start.elapsed() < Duration::from_millis(50));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn continuation_can_wait_again() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let atom = Atom::computed(|_| {
                    let first = wait(Waitable::Future(delay_value(Duration::from_millis(5), 2)), |x| {
                        let second = wait(Waitable::Future(delay_value(Duration::from_millis(5), 3)), move |y| {
                            Ok(Update::Value(x * y))
                        })?;
                        Ok(Update::Wait(second))
                    })?;
                    Ok(Update::Wait(first))
                });

                assert_eq!(atom.settled().await.unwrap(), 6);
            })
            .await;
    }
}
