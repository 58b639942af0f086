//! The flow context handed to task bodies.
//!
//! Every waiting operation on a [`Flow`] stops making progress once the
//! flow is cancelled: the returned future stays pending instead of resolving
//! or failing.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::rc::Rc;
use std::time::Duration;

use futures_util::future::{self, FutureExt, LocalBoxFuture};
use futures_util::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;

use super::awaitable::Awaitable;
use super::cancellable::Cancellable;
use super::listen::{Listener, Policy, Sources};
use super::task::{Task, TaskCore, TaskId, TaskStatus};
use crate::error::Result;
use crate::reactive::{Atom, Emittable};
use crate::util::{self, Subscription};

type Entries<K, V> = (Vec<K>, Vec<LocalBoxFuture<'static, Result<V>>>, Vec<Task<V>>);

/// Environment of a running task.
#[derive(Clone)]
pub struct Flow {
    task: Rc<TaskCore>,
}

impl Flow {
    pub(crate) fn new(task: Rc<TaskCore>) -> Self {
        Self { task }
    }

    /// Identity of the task owning this flow.
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Status of the owning task.
    pub fn status(&self) -> TaskStatus {
        self.task.status()
    }

    /// Whether the owning task has been cancelled or has failed.
    pub fn is_cancelled(&self) -> bool {
        self.task.cancellable.is_cancelled()
    }

    /// The cancellation flag of the owning task.
    pub fn cancellable(&self) -> &Cancellable {
        &self.task.cancellable
    }

    /// Run `callback` when the owning task is cancelled.
    pub fn on_cancel<F>(&self, callback: F) -> Subscription
    where
        F: FnOnce() + 'static,
    {
        self.task.cancellable.on_cancel(callback)
    }

    /// Run `callback` when the owning task is disposed.
    pub fn on_dispose<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.task.add_dispose_hook(Box::new(callback));
    }

    /// Start a child task.
    ///
    /// The child is cancelled if this task is already finished.
    pub fn fork<T, F, Fut>(&self, body: F) -> Task<T>
    where
        T: Clone + 'static,
        F: FnOnce(Flow) -> Fut + 'static,
        Fut: Future<Output = Result<T>> + 'static,
    {
        let task = Task::create(Some(&self.task), body);
        let _ = task.start();
        task
    }

    /// A root task cancelled together with this flow. Its failure stays with
    /// its own caller instead of failing this flow.
    pub(crate) fn detached<T, F, Fut>(&self, body: F) -> Task<T>
    where
        T: Clone + 'static,
        F: FnOnce(Flow) -> Fut + 'static,
        Fut: Future<Output = Result<T>> + 'static,
    {
        let task = Task::new(body);
        let link = {
            let task = task.clone();
            self.on_cancel(move || task.cancel())
        };
        let _ = task.on_settled(move |_| link.unsubscribe());
        task
    }

    fn guard<V: 'static>(&self, work: LocalBoxFuture<'static, V>) -> LocalBoxFuture<'static, V> {
        let cancellable = self.task.cancellable.clone();
        async move {
            let outcome = tokio::select! {
                biased;
                _ = cancellable.cancelled() => None,
                value = work => Some(value),
            };
            match outcome {
                Some(value) if !cancellable.is_cancelled() => value,
                _ => future::pending().await,
            }
        }
        .boxed_local()
    }

    /// Wait for `awaitable`.
    pub fn when<V>(&self, awaitable: impl Into<Awaitable<V>>) -> LocalBoxFuture<'static, Result<V>>
    where
        V: Clone + PartialEq + 'static,
    {
        self.guard(awaitable.into().into_future(self))
    }

    /// Call `f` with this flow.
    pub fn call<V, F, Fut>(&self, f: F) -> LocalBoxFuture<'static, Result<V>>
    where
        V: 'static,
        F: FnOnce(Flow) -> Fut,
        Fut: Future<Output = Result<V>> + 'static,
    {
        self.guard(f(self.clone()).boxed_local())
    }

    /// Sleep for `duration`.
    pub fn delay(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        self.guard(util::delay(duration))
    }

    /// Set `atom` unless this flow is cancelled.
    pub fn set<T>(&self, atom: &Atom<T>, value: T)
    where
        T: Clone + PartialEq + 'static,
    {
        if !self.is_cancelled() {
            atom.set(value);
        }
    }

    /// Emit `action` to `target` unless this flow is cancelled.
    pub fn emit<T, A>(&self, target: &Emittable<T, A>, action: A)
    where
        T: Clone + PartialEq + 'static,
        A: 'static,
    {
        if !self.is_cancelled() {
            target.emit(action);
        }
    }

    fn prepare<K, V>(&self, entries: IndexMap<K, Awaitable<V>>) -> Entries<K, V>
    where
        V: Clone + PartialEq + 'static,
    {
        let mut keys = Vec::with_capacity(entries.len());
        let mut futures = Vec::with_capacity(entries.len());
        let mut created = Vec::new();
        for (key, awaitable) in entries {
            let (future, task) = awaitable.into_entry(self);
            keys.push(key);
            futures.push(future);
            created.extend(task);
        }
        (keys, futures, created)
    }

    /// Resolve with the first entry to settle. Only the winner's slot is
    /// `Some`.
    ///
    /// The first rejection rejects the race and cancels the tasks it created
    /// for futures and calls. Other entries keep running after a win.
    pub fn race<K, V>(&self, entries: IndexMap<K, Awaitable<V>>) -> LocalBoxFuture<'static, Result<IndexMap<K, Option<V>>>>
    where
        K: Hash + Eq + 'static,
        V: Clone + PartialEq + 'static,
    {
        let (keys, futures, created) = self.prepare(entries);
        self.guard(
            async move {
                let mut pending = indexed(futures);
                let first = pending.next().await;
                let mut results: IndexMap<K, Option<V>> = keys.into_iter().map(|key| (key, None)).collect();
                match first {
                    Some((index, Ok(value))) => {
                        if let Some((_, slot)) = results.get_index_mut(index) {
                            *slot = Some(value);
                        }
                        Ok(results)
                    }
                    Some((_, Err(error))) => {
                        cancel_all(&created);
                        Err(error)
                    }
                    None => Ok(results),
                }
            }
            .boxed_local(),
        )
    }

    /// Resolve with every entry's value. The first rejection rejects and
    /// cancels the tasks created for futures and calls.
    pub fn all<K, V>(&self, entries: IndexMap<K, Awaitable<V>>) -> LocalBoxFuture<'static, Result<IndexMap<K, V>>>
    where
        K: Hash + Eq + 'static,
        V: Clone + PartialEq + 'static,
    {
        let (keys, futures, created) = self.prepare(entries);
        self.guard(
            async move {
                let mut slots: Vec<Option<V>> = keys.iter().map(|_| None).collect();
                let mut pending = indexed(futures);
                while let Some((index, result)) = pending.next().await {
                    match result {
                        Ok(value) => slots[index] = Some(value),
                        Err(error) => {
                            cancel_all(&created);
                            return Err(error);
                        }
                    }
                }
                Ok(keys
                    .into_iter()
                    .zip(slots)
                    .filter_map(|(key, value)| value.map(|value| (key, value)))
                    .collect())
            }
            .boxed_local(),
        )
    }

    /// Resolve once every entry has settled, with each outcome.
    pub fn all_settled<K, V>(&self, entries: IndexMap<K, Awaitable<V>>) -> LocalBoxFuture<'static, IndexMap<K, Result<V>>>
    where
        K: Hash + Eq + 'static,
        V: Clone + PartialEq + 'static,
    {
        let (keys, futures, _) = self.prepare(entries);
        self.guard(
            async move {
                let mut slots: Vec<Option<Result<V>>> = keys.iter().map(|_| None).collect();
                let mut pending = indexed(futures);
                while let Some((index, result)) = pending.next().await {
                    slots[index] = Some(result);
                }
                keys.into_iter()
                    .zip(slots)
                    .filter_map(|(key, result)| result.map(|result| (key, result)))
                    .collect()
            }
            .boxed_local(),
        )
    }

    /// Listen to `sources` with `policy`.
    pub fn listen<P, F, Fut>(&self, sources: impl Into<Sources<P>>, policy: Policy, handler: F) -> Listener<P>
    where
        P: Clone + PartialEq + 'static,
        F: Fn(Flow, P) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        Listener::start(self, sources.into(), policy, handler)
    }

    /// React to every event concurrently.
    pub fn on<P, F, Fut>(&self, sources: impl Into<Sources<P>>, handler: F) -> Listener<P>
    where
        P: Clone + PartialEq + 'static,
        F: Fn(Flow, P) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.listen(sources, Policy::Every, handler)
    }

    /// React to events one at a time, in arrival order.
    pub fn sequential<P, F, Fut>(&self, sources: impl Into<Sources<P>>, handler: F) -> Listener<P>
    where
        P: Clone + PartialEq + 'static,
        F: Fn(Flow, P) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.listen(sources, Policy::Sequential, handler)
    }

    /// React to the latest event, cancelling the running reaction.
    pub fn restartable<P, F, Fut>(&self, sources: impl Into<Sources<P>>, handler: F) -> Listener<P>
    where
        P: Clone + PartialEq + 'static,
        F: Fn(Flow, P) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.listen(sources, Policy::Restartable, handler)
    }

    /// Ignore events while a reaction is running.
    pub fn droppable<P, F, Fut>(&self, sources: impl Into<Sources<P>>, handler: F) -> Listener<P>
    where
        P: Clone + PartialEq + 'static,
        F: Fn(Flow, P) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.listen(sources, Policy::Droppable, handler)
    }

    /// React once no event arrived for `duration`.
    pub fn debounce<P, F, Fut>(&self, sources: impl Into<Sources<P>>, duration: Duration, handler: F) -> Listener<P>
    where
        P: Clone + PartialEq + 'static,
        F: Fn(Flow, P) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.listen(sources, Policy::Debounce(duration), handler)
    }

    /// React at most once per `duration`.
    pub fn throttle<P, F, Fut>(&self, sources: impl Into<Sources<P>>, duration: Duration, handler: F) -> Listener<P>
    where
        P: Clone + PartialEq + 'static,
        F: Fn(Flow, P) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.listen(sources, Policy::Throttle(duration), handler)
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("task", &self.task.id())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn indexed<V: 'static>(
    futures: Vec<LocalBoxFuture<'static, Result<V>>>,
) -> FuturesUnordered<LocalBoxFuture<'static, (usize, Result<V>)>> {
    futures
        .into_iter()
        .enumerate()
        .map(|(index, future)| future.map(move |result| (index, result)).boxed_local())
        .collect()
}

fn cancel_all<V: Clone + 'static>(tasks: &[Task<V>]) {
    for task in tasks {
        task.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::flow::{spawn, TaskStatus};
    use crate::util::{delay_error, delay_value};
    use std::cell::Cell;
    use tokio::task::LocalSet;

    #[tokio::test(start_paused = true)]
    async fn race_fills_only_the_winner() {
        LocalSet::new()
            .run_until(async {
                let task = spawn(|flow| async move {
                    flow.race(IndexMap::from([
                        ("p1", Awaitable::from(delay_value(Duration::from_millis(5), 1))),
                        ("p2", Awaitable::from(delay_value(Duration::from_millis(3), 2))),
                    ]))
                    .await
                });

                let results = task.await.unwrap();
                assert_eq!(results.get("p1"), Some(&None));
                assert_eq!(results.get("p2"), Some(&Some(2)));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_all_cancels_created_tasks() {
        LocalSet::new()
            .run_until(async {
                let cancelled = Rc::new(Cell::new(false));
                let flag = Rc::clone(&cancelled);
                let task = spawn(move |flow| async move {
                    let slow = Awaitable::call(move |flow: Flow| async move {
                        let _ = flow.on_cancel(move || flag.set(true));
                        flow.delay(Duration::from_secs(60)).await;
                        Ok(1)
                    });
                    let failing = Awaitable::from(delay_error(Duration::from_millis(2), Error::msg("nope")));
                    flow.all(IndexMap::from([("slow", slow), ("failing", failing)])).await
                });

                let error = task.await.unwrap_err();
                assert_eq!(error.to_string(), "nope");
                assert!(cancelled.get());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn all_settled_reports_every_outcome() {
        LocalSet::new()
            .run_until(async {
                let task = spawn(|flow| async move {
                    let outcomes = flow
                        .all_settled(IndexMap::from([
                            ("ok", Awaitable::from(delay_value(Duration::from_millis(4), 1))),
                            ("err", Awaitable::from(delay_error(Duration::from_millis(1), Error::msg("bad")))),
                        ]))
                        .await;
                    Ok(outcomes.into_iter().map(|(key, result)| (key, result.is_ok())).collect::<Vec<_>>())
                });

                assert_eq!(task.await.unwrap(), vec![("ok", true), ("err", false)]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn when_stays_pending_after_cancel() {
        LocalSet::new()
            .run_until(async {
                let task: Task<()> = Task::new(|_| async { Ok(()) });
                let flow = task.flow();
                let waiting = flow.when(delay_value(Duration::from_millis(5), 1));
                task.cancel();

                let outcome = tokio::time::timeout(Duration::from_secs(1), waiting).await;
                assert!(outcome.is_err());
                assert_eq!(task.status(), TaskStatus::Cancelled);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn set_is_ignored_once_cancelled() {
        LocalSet::new()
            .run_until(async {
                let count = Atom::new(0);
                let task: Task<()> = Task::new(|_| async { Ok(()) });
                let flow = task.flow();

                flow.set(&count, 1);
                task.cancel();
                flow.set(&count, 2);
                assert_eq!(count.peek(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn when_accepts_signals_and_tasks() {
        LocalSet::new()
            .run_until(async {
                let signal = crate::flow::Signal::new();
                let source = signal.clone();
                let task = spawn(move |flow| async move {
                    let child = flow.fork(|flow| async move {
                        flow.delay(Duration::from_millis(2)).await;
                        Ok(10)
                    });
                    let from_task = flow.when(&child).await?;
                    let from_signal = flow.when(&source).await?;
                    Ok::<_, Error>(from_task + from_signal)
                });

                tokio::time::sleep(Duration::from_millis(5)).await;
                signal.emit(5).unwrap();
                assert_eq!(task.await.unwrap(), 15);
            })
            .await;
    }
}
