//! Dependency Collection
//!
//! A `Channel` is something an evaluation can subscribe to: an atom exposes
//! one channel for state changes and another for status (loading/error)
//! changes. A `Dependencies` map, owned by whoever runs the evaluation, maps
//! each channel it read to the subscription that keeps it informed.
//!
//! # How It Works
//!
//! 1. Before the evaluation runs, every existing edge is marked stale.
//!
//! 2. Each read reports its channel through the scope's `add_dependency`
//!    hook. The edge is marked as used and, if it is not already subscribed,
//!    `on_invalidate` is subscribed to the channel.
//!
//! 3. After the evaluation, every edge still marked stale is unsubscribed and
//!    removed.
//!
//! The map therefore prunes itself: a computation that stops reading a
//! channel stops listening to it at the end of that very run.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::id::ChannelId;
use super::scope::{run_in_scope, Scope};
use crate::util::{CallbackGroup, Subscription};

/// Callback run when a dependency changes.
pub type Invalidate = Rc<dyn Fn()>;

/// A subscribable source of invalidations.
#[derive(Clone)]
pub struct Channel {
    id: ChannelId,
    subscribe: Rc<dyn Fn(Invalidate) -> Subscription>,
}

impl Channel {
    /// A channel with a custom subscribe function.
    pub fn new<F>(id: ChannelId, subscribe: F) -> Self
    where
        F: Fn(Invalidate) -> Subscription + 'static,
    {
        Self {
            id,
            subscribe: Rc::new(subscribe),
        }
    }

    /// A channel backed by a callback group.
    pub fn from_group(group: &CallbackGroup<()>) -> Self {
        let group = group.clone();
        Self::new(group.id(), move |invalidate| group.add(move |_| invalidate()))
    }

    /// The identity of this channel.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Subscribe `invalidate` to this channel.
    pub fn subscribe(&self, invalidate: Invalidate) -> Subscription {
        (self.subscribe)(invalidate)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}

#[derive(Clone)]
struct Edge {
    channel: Channel,
    subscription: Subscription,
}

/// The set of channels an evaluation depends on.
#[derive(Default)]
pub struct Dependencies {
    edges: RefCell<IndexMap<ChannelId, Edge>>,
}

impl Dependencies {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.edges.borrow().len()
    }

    /// Whether there are no edges.
    pub fn is_empty(&self) -> bool {
        self.edges.borrow().is_empty()
    }

    /// Whether an edge to `channel` exists.
    pub fn contains(&self, channel: ChannelId) -> bool {
        self.edges.borrow().contains_key(&channel)
    }

    /// The channel ids in subscription order.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.edges.borrow().keys().copied().collect()
    }

    /// Unsubscribe and remove every edge.
    pub fn release_all(&self) {
        let edges = std::mem::take(&mut *self.edges.borrow_mut());
        for (_, edge) in edges {
            edge.subscription.unsubscribe();
        }
    }

    /// Unsubscribe every edge but remember it, so `resume` can restore it.
    pub(crate) fn suspend(&self) {
        let subscriptions: Vec<Subscription> = self
            .edges
            .borrow()
            .values()
            .map(|edge| edge.subscription.clone())
            .collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }

    /// A copy sharing the same subscriptions.
    pub(crate) fn duplicate(&self) -> Self {
        Self {
            edges: RefCell::new(self.edges.borrow().clone()),
        }
    }

    /// Unsubscribe the edges of `self` that `other` does not share.
    pub(crate) fn release_unshared(&self, other: &Dependencies) {
        let unshared: Vec<Subscription> = {
            let theirs = other.edges.borrow();
            self.edges
                .borrow()
                .iter()
                .filter(|(id, edge)| {
                    theirs
                        .get(*id)
                        .map_or(true, |their| !edge.subscription.same_as(&their.subscription))
                })
                .map(|(_, edge)| edge.subscription.clone())
                .collect()
        };
        for subscription in unshared {
            subscription.unsubscribe();
        }
    }

    /// Re-subscribe every edge whose subscription was released elsewhere.
    pub(crate) fn resume(&self, invalidate: &Invalidate) {
        let dormant: Vec<(ChannelId, Channel)> = self
            .edges
            .borrow()
            .iter()
            .filter(|(_, edge)| !edge.subscription.is_active())
            .map(|(id, edge)| (*id, edge.channel.clone()))
            .collect();
        for (id, channel) in dormant {
            let subscription = channel.subscribe(Rc::clone(invalidate));
            self.edges.borrow_mut().insert(id, Edge { channel, subscription });
        }
    }

    fn ensure(&self, channel: &Channel, invalidate: &Invalidate) {
        let live = self
            .edges
            .borrow()
            .get(&channel.id())
            .map_or(false, |edge| edge.subscription.is_active());
        if live {
            return;
        }
        let subscription = channel.subscribe(Rc::clone(invalidate));
        self.edges.borrow_mut().insert(
            channel.id(),
            Edge {
                channel: channel.clone(),
                subscription,
            },
        );
    }

    fn remove(&self, id: ChannelId) {
        let removed = self.edges.borrow_mut().shift_remove(&id);
        if let Some(edge) = removed {
            edge.subscription.unsubscribe();
        }
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies")
            .field("channels", &self.channels())
            .finish()
    }
}

/// Run `f` under `scope`, recording every channel it reads into
/// `dependencies` and pruning the channels it no longer reads.
///
/// `on_invalidate` is subscribed to each newly read channel and fires once
/// per notification of that channel.
pub fn collect_dependencies<R, F>(
    f: F,
    dependencies: &Rc<Dependencies>,
    on_invalidate: Invalidate,
    scope: Scope,
) -> R
where
    F: FnOnce() -> R,
{
    let stale: Rc<RefCell<HashSet<ChannelId>>> =
        Rc::new(RefCell::new(dependencies.channels().into_iter().collect()));

    let hook = {
        let stale = Rc::clone(&stale);
        let dependencies = Rc::clone(dependencies);
        move |channel: &Channel| {
            stale.borrow_mut().remove(&channel.id());
            dependencies.ensure(channel, &on_invalidate);
        }
    };

    let result = run_in_scope(scope.on_dependency(hook), f);

    let unused = std::mem::take(&mut *stale.borrow_mut());
    for id in unused {
        dependencies.remove(id);
    }

    result
}
