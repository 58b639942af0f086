//! Listen Engine
//!
//! Every listening helper on [`Flow`] goes through one engine: a forked task
//! that stays running while the listener is subscribed, plus one child task
//! per reaction. How events turn into reactions is decided by [`Policy`].
//!
//! Stopping the listener (explicitly, or by reaching the `times` limit)
//! releases every source subscription and lets the engine task finish. Like
//! any task it then waits for reactions still running before it succeeds.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use futures_util::future::{FutureExt, LocalBoxFuture};
use tokio::time::Instant;

use super::cancellable::Cancellable;
use super::context::Flow;
use super::signal::Signal;
use super::task::Task;
use crate::error::Result;
use crate::reactive::Atom;
use crate::util::Subscription;

/// How a listener schedules reactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Fork a reaction for every event.
    #[default]
    Every,
    /// Queue events and react to them one at a time, in order.
    Sequential,
    /// Cancel the running reaction and react to the new event.
    Restartable,
    /// Ignore events while a reaction is running.
    Droppable,
    /// Wait until no event arrived for the duration, then react to the last.
    Debounce(Duration),
    /// Drop events arriving within the duration of the last reaction.
    Throttle(Duration),
}

/// Something a listener can subscribe to.
pub enum Source<P: 'static> {
    /// Every emission of a signal.
    Signal(Signal<P>),
    /// Every state change of an atom.
    Atom(Atom<P>),
}

impl<P: Clone + PartialEq + 'static> Source<P> {
    fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(P) + 'static,
    {
        match self {
            Self::Signal(signal) => signal.on(move |payload| listener(payload.clone())),
            Self::Atom(atom) => atom.on_change(move |state| listener(state.clone())),
        }
    }
}

impl<P: 'static> From<Signal<P>> for Source<P> {
    fn from(signal: Signal<P>) -> Self {
        Self::Signal(signal)
    }
}

impl<P: 'static> From<&Signal<P>> for Source<P> {
    fn from(signal: &Signal<P>) -> Self {
        Self::Signal(signal.clone())
    }
}

impl<P: 'static> From<Atom<P>> for Source<P> {
    fn from(atom: Atom<P>) -> Self {
        Self::Atom(atom)
    }
}

impl<P: 'static> From<&Atom<P>> for Source<P> {
    fn from(atom: &Atom<P>) -> Self {
        Self::Atom(atom.clone())
    }
}

impl<P: 'static> fmt::Debug for Source<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(signal) => f.debug_tuple("Source::Signal").field(signal).finish(),
            Self::Atom(_) => f.write_str("Source::Atom"),
        }
    }
}

/// One or more sources sharing a listener.
pub struct Sources<P: 'static>(Vec<Source<P>>);

impl<P: 'static> Sources<P> {
    /// No sources.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Add a source.
    pub fn with(mut self, source: impl Into<Source<P>>) -> Self {
        self.0.push(source.into());
        self
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there is no source.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<P: 'static> Default for Sources<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: 'static> From<Source<P>> for Sources<P> {
    fn from(source: Source<P>) -> Self {
        Self(vec![source])
    }
}

impl<P: 'static> From<Vec<Source<P>>> for Sources<P> {
    fn from(sources: Vec<Source<P>>) -> Self {
        Self(sources)
    }
}

impl<P: 'static> From<Signal<P>> for Sources<P> {
    fn from(signal: Signal<P>) -> Self {
        Self(vec![Source::Signal(signal)])
    }
}

impl<P: 'static> From<&Signal<P>> for Sources<P> {
    fn from(signal: &Signal<P>) -> Self {
        Self(vec![Source::Signal(signal.clone())])
    }
}

impl<P: 'static> From<Atom<P>> for Sources<P> {
    fn from(atom: Atom<P>) -> Self {
        Self(vec![Source::Atom(atom)])
    }
}

impl<P: 'static> From<&Atom<P>> for Sources<P> {
    fn from(atom: &Atom<P>) -> Self {
        Self(vec![Source::Atom(atom.clone())])
    }
}

impl<P: 'static> fmt::Debug for Sources<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.0).finish()
    }
}

type Handler<P> = Rc<dyn Fn(Flow, P) -> LocalBoxFuture<'static, Result<()>>>;

struct ListenerState<P: 'static> {
    policy: Policy,
    handler: Handler<P>,
    engine: Task<()>,
    stopped: Cancellable,
    subscriptions: RefCell<Vec<Subscription>>,
    limit: Cell<Option<usize>>,
    reactions: Cell<usize>,
    running: RefCell<Option<Task<()>>>,
    timer: RefCell<Option<Task<()>>>,
    queue: RefCell<VecDeque<P>>,
    last_fork: Cell<Option<Instant>>,
}

impl<P: Clone + PartialEq + 'static> ListenerState<P> {
    fn is_running(&self) -> bool {
        self.running
            .borrow()
            .as_ref()
            .map_or(false, |reaction| !reaction.status().is_terminal())
    }

    fn dispatch(self: &Rc<Self>, payload: P) {
        if self.stopped.is_cancelled() {
            return;
        }
        match self.policy {
            Policy::Every => self.react(payload),
            Policy::Sequential => {
                if self.is_running() {
                    self.queue.borrow_mut().push_back(payload);
                } else {
                    self.react(payload);
                }
            }
            Policy::Restartable => {
                let previous = self.running.borrow_mut().take();
                if let Some(previous) = previous {
                    previous.cancel();
                }
                self.react(payload);
            }
            Policy::Droppable => {
                if self.is_running() {
                    tracing::trace!(engine = self.engine.id().raw(), "dropping event while reacting");
                } else {
                    self.react(payload);
                }
            }
            Policy::Debounce(duration) => {
                let timer = self.timer.borrow_mut().take();
                if let Some(timer) = timer {
                    timer.cancel();
                }
                let previous = self.running.borrow_mut().take();
                if let Some(previous) = previous {
                    previous.cancel();
                }
                self.schedule(payload, duration);
            }
            Policy::Throttle(duration) => {
                let now = Instant::now();
                let throttled = self
                    .last_fork
                    .get()
                    .map_or(false, |last| now.duration_since(last) < duration);
                if throttled {
                    tracing::trace!(engine = self.engine.id().raw(), "dropping throttled event");
                } else {
                    self.last_fork.set(Some(now));
                    self.react(payload);
                }
            }
        }
    }

    fn schedule(self: &Rc<Self>, payload: P, duration: Duration) {
        let weak = Rc::downgrade(self);
        let timer = self.engine.flow().fork(move |flow| async move {
            flow.delay(duration).await;
            if let Some(state) = weak.upgrade() {
                state.timer.borrow_mut().take();
                state.react(payload);
            }
            Ok(())
        });
        *self.timer.borrow_mut() = Some(timer);
    }

    fn react(self: &Rc<Self>, payload: P) {
        if self.stopped.is_cancelled() {
            return;
        }
        let handler = Rc::clone(&self.handler);
        let reaction = self.engine.flow().fork(move |flow| handler(flow, payload));
        self.reactions.set(self.reactions.get() + 1);
        *self.running.borrow_mut() = Some(reaction.clone());

        if self.policy == Policy::Sequential {
            let weak = Rc::downgrade(self);
            let _ = reaction.on_settled(move |_| {
                if let Some(state) = weak.upgrade() {
                    state.next_queued();
                }
            });
        }

        if self.limit_reached() {
            self.stop();
        }
    }

    fn next_queued(self: &Rc<Self>) {
        let next = self.queue.borrow_mut().pop_front();
        if let Some(payload) = next {
            self.react(payload);
        }
    }

    fn limit_reached(&self) -> bool {
        self.limit.get().map_or(false, |limit| self.reactions.get() >= limit)
    }

    fn stop(&self) {
        if self.stopped.is_cancelled() {
            return;
        }
        tracing::debug!(engine = self.engine.id().raw(), reactions = self.reactions.get(), "listener stopped");
        self.stopped.cancel();

        let subscriptions = std::mem::take(&mut *self.subscriptions.borrow_mut());
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        self.queue.borrow_mut().clear();
        let timer = self.timer.borrow_mut().take();
        if let Some(timer) = timer {
            timer.cancel();
        }
    }
}

/// Handle to a running listener.
pub struct Listener<P: 'static> {
    state: Rc<ListenerState<P>>,
}

impl<P: Clone + PartialEq + 'static> Listener<P> {
    pub(crate) fn start<F, Fut>(flow: &Flow, sources: Sources<P>, policy: Policy, handler: F) -> Self
    where
        F: Fn(Flow, P) -> Fut + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        let stop = Cancellable::new();
        // The engine body owns the state while it runs, so dropping the
        // handle does not stop the listener. The slot is filled after the
        // fork, and the body's first poll happens inside it.
        let owner: Rc<RefCell<Option<Rc<ListenerState<P>>>>> = Rc::new(RefCell::new(None));
        let engine = {
            let (stop, owner) = (stop.clone(), Rc::clone(&owner));
            flow.fork(move |_| async move {
                stop.cancelled().await;
                owner.borrow_mut().take();
                Ok(())
            })
        };

        let state = Rc::new(ListenerState {
            policy,
            handler: Rc::new(move |flow, payload| handler(flow, payload).boxed_local()),
            engine,
            stopped: stop,
            subscriptions: RefCell::new(Vec::new()),
            limit: Cell::new(None),
            reactions: Cell::new(0),
            running: RefCell::new(None),
            timer: RefCell::new(None),
            queue: RefCell::new(VecDeque::new()),
            last_fork: Cell::new(None),
        });
        *owner.borrow_mut() = Some(Rc::clone(&state));

        let subscriptions = sources
            .0
            .iter()
            .map(|source| {
                let weak = Rc::downgrade(&state);
                source.subscribe(move |payload| {
                    if let Some(state) = weak.upgrade() {
                        state.dispatch(payload);
                    }
                })
            })
            .collect();
        *state.subscriptions.borrow_mut() = subscriptions;

        let weak = Rc::downgrade(&state);
        let _ = state.engine.on_settled(move |_| {
            if let Some(state) = weak.upgrade() {
                state.stop();
            }
        });
        tracing::debug!(engine = state.engine.id().raw(), ?policy, sources = sources.len(), "listener started");

        Self { state }
    }

    /// Stop after the first reaction.
    pub fn once(self) -> Self {
        self.times(1)
    }

    /// Stop after `count` reactions.
    pub fn times(self, count: usize) -> Self {
        self.state.limit.set(Some(count));
        if self.state.limit_reached() {
            self.state.stop();
        }
        self
    }

    /// Release every subscription. Running reactions finish normally.
    pub fn stop(&self) {
        self.state.stop();
    }

    /// Whether events are still being received.
    pub fn is_listening(&self) -> bool {
        !self.state.stopped.is_cancelled()
    }

    /// The engine task.
    pub fn task(&self) -> &Task<()> {
        &self.state.engine
    }

    /// The scheduling policy.
    pub fn policy(&self) -> Policy {
        self.state.policy
    }

    /// Number of reactions forked so far.
    pub fn reaction_count(&self) -> usize {
        self.state.reactions.get()
    }
}

impl<P: 'static> Clone for Listener<P> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<P: 'static> fmt::Debug for Listener<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("policy", &self.state.policy)
            .field("engine", &self.state.engine)
            .field("reactions", &self.state.reactions.get())
            .field("listening", &!self.state.stopped.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{spawn, TaskStatus};
    use tokio::task::LocalSet;
    use tokio::time::sleep;

    fn host() -> (Task<()>, Flow) {
        let root = spawn(|flow| async move {
            flow.delay(Duration::from_secs(3600)).await;
            Ok(())
        });
        let flow = root.flow();
        (root, flow)
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[tokio::test(start_paused = true)]
    async fn every_reacts_concurrently() {
        LocalSet::new()
            .run_until(async {
                let (_root, flow) = host();
                let signal = Signal::new();
                let done = Rc::new(RefCell::new(Vec::new()));
                let log = Rc::clone(&done);
                let listener = flow.on(&signal, move |flow, n: u64| {
                    let log = Rc::clone(&log);
                    async move {
                        flow.delay(ms(10 - n)).await;
                        log.borrow_mut().push(n);
                        Ok(())
                    }
                });

                signal.emit(1).unwrap();
                signal.emit(5).unwrap();
                sleep(ms(20)).await;

                assert_eq!(*done.borrow(), vec![5, 1]);
                assert_eq!(listener.reaction_count(), 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn droppable_ignores_events_while_busy() {
        LocalSet::new()
            .run_until(async {
                let (_root, flow) = host();
                let signal = Signal::new();
                let done = Rc::new(RefCell::new(Vec::new()));
                let log = Rc::clone(&done);
                let _listener = flow.droppable(&signal, move |flow, n: i32| {
                    let log = Rc::clone(&log);
                    async move {
                        flow.delay(ms(10)).await;
                        log.borrow_mut().push(n);
                        Ok(())
                    }
                });

                signal.emit(1).unwrap();
                sleep(ms(5)).await;
                signal.emit(2).unwrap();
                sleep(ms(10)).await;
                signal.emit(3).unwrap();
                sleep(ms(20)).await;

                assert_eq!(*done.borrow(), vec![1, 3]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_reacts_to_the_last_event() {
        LocalSet::new()
            .run_until(async {
                let (_root, flow) = host();
                let signal = Signal::new();
                let done = Rc::new(RefCell::new(Vec::new()));
                let log = Rc::clone(&done);
                let listener = flow.debounce(&signal, ms(20), move |_, n: i32| {
                    let log = Rc::clone(&log);
                    async move {
                        log.borrow_mut().push(n);
                        Ok(())
                    }
                });

                for n in 1..=3 {
                    signal.emit(n).unwrap();
                    sleep(ms(5)).await;
                }
                assert!(done.borrow().is_empty());

                sleep(ms(30)).await;
                assert_eq!(*done.borrow(), vec![3]);
                assert_eq!(listener.reaction_count(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_drops_events_inside_the_window() {
        LocalSet::new()
            .run_until(async {
                let (_root, flow) = host();
                let signal = Signal::new();
                let done = Rc::new(RefCell::new(Vec::new()));
                let log = Rc::clone(&done);
                let _listener = flow.throttle(&signal, ms(20), move |_, n: i32| {
                    let log = Rc::clone(&log);
                    async move {
                        log.borrow_mut().push(n);
                        Ok(())
                    }
                });

                signal.emit(1).unwrap();
                sleep(ms(5)).await;
                signal.emit(2).unwrap();
                sleep(ms(20)).await;
                signal.emit(3).unwrap();
                sleep(ms(1)).await;

                assert_eq!(*done.borrow(), vec![1, 3]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn once_releases_subscriptions_and_finishes() {
        LocalSet::new()
            .run_until(async {
                let (_root, flow) = host();
                let signal = Signal::new();
                let count = Atom::new(0);
                let target = count.clone();
                let listener = flow
                    .on(Sources::new().with(&signal), move |flow, n: i32| {
                        let target = target.clone();
                        async move {
                            flow.delay(ms(5)).await;
                            flow.set(&target, n);
                            Ok(())
                        }
                    })
                    .once();

                signal.emit(7).unwrap();
                signal.emit(8).unwrap();
                assert!(!listener.is_listening());
                assert_eq!(signal.listener_count(), 0);

                let engine = listener.task().clone();
                engine.await.unwrap();
                assert_eq!(count.peek(), 7);
                assert_eq!(listener.task().status(), TaskStatus::Success);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn atoms_are_sources_too() {
        LocalSet::new()
            .run_until(async {
                let (_root, flow) = host();
                let query = Atom::new(String::new());
                let seen = Rc::new(RefCell::new(Vec::new()));
                let log = Rc::clone(&seen);
                let listener = flow
                    .on(&query, move |_, text: String| {
                        let log = Rc::clone(&log);
                        async move {
                            log.borrow_mut().push(text);
                            Ok(())
                        }
                    })
                    .times(2);

                query.set("a".into());
                query.set("ab".into());
                query.set("abc".into());
                sleep(ms(1)).await;

                assert_eq!(*seen.borrow(), vec!["a".to_owned(), "ab".to_owned()]);
                assert_eq!(query.subscriber_count(), 0);
                assert!(!listener.is_listening());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn listening_on_a_finished_flow_holds_nothing() {
        LocalSet::new()
            .run_until(async {
                let (root, flow) = host();
                root.cancel();

                let signal: Signal<i32> = Signal::new();
                let listener = flow.on(&signal, |_, _: i32| async { Ok(()) });
                assert_eq!(listener.task().status(), TaskStatus::Cancelled);
                assert!(!listener.is_listening());
                assert_eq!(signal.listener_count(), 0);

                let state = Rc::downgrade(&listener.state);
                drop(listener);
                assert!(state.upgrade().is_none());
            })
            .await;
    }
}
