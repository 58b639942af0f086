//! Callback Groups
//!
//! A `CallbackGroup` is an ordered multicast listener registry. Every atom
//! owns two of them (state changes and status changes), every signal owns
//! one, and tasks use them for status, error and dispose hooks.
//!
//! # Dispatch Semantics
//!
//! `call()` snapshots the registered callbacks before invoking them, in
//! registration order. A callback that removes itself (or any other callback)
//! while the group is dispatching does not disturb the current dispatch;
//! additions and removals only affect later calls. Re-entrant calls from
//! inside a callback are allowed and run over their own snapshot.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;
use tokio::sync::Notify;

/// Unique identifier for a callback group.
///
/// Dependency edges are keyed by the group they subscribe to, so the id is
/// also the identity of a reactive channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u64);

impl GroupId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

type Callback<A> = Rc<dyn Fn(&A)>;

struct Entry<A> {
    slot: u64,
    active: Rc<Cell<bool>>,
    callback: Callback<A>,
}

struct GroupInner<A> {
    id: GroupId,
    next_slot: Cell<u64>,
    entries: RefCell<Vec<Entry<A>>>,
}

/// An ordered set of callbacks invoked together.
pub struct CallbackGroup<A: 'static = ()> {
    inner: Rc<GroupInner<A>>,
}

impl<A: 'static> CallbackGroup<A> {
    /// Create an empty group.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(GroupInner {
                id: GroupId::next(),
                next_slot: Cell::new(0),
                entries: RefCell::new(Vec::new()),
            }),
        }
    }

    /// The identity of this group.
    pub fn id(&self) -> GroupId {
        self.inner.id
    }

    /// Register a callback.
    ///
    /// The returned subscription removes the callback when unsubscribed.
    pub fn add<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&A) + 'static,
    {
        let slot = self.inner.next_slot.get();
        self.inner.next_slot.set(slot + 1);

        let active = Rc::new(Cell::new(true));
        self.inner.entries.borrow_mut().push(Entry {
            slot,
            active: Rc::clone(&active),
            callback: Rc::new(callback),
        });

        let weak = Rc::downgrade(&self.inner);
        Subscription::with_flag(active, move || {
            if let Some(inner) = weak.upgrade() {
                inner.entries.borrow_mut().retain(|entry| entry.slot != slot);
            }
        })
    }

    /// Invoke every registered callback with `arg`.
    pub fn call(&self, arg: &A) {
        let snapshot: SmallVec<[Callback<A>; 4]> = self
            .inner
            .entries
            .borrow()
            .iter()
            .map(|entry| Rc::clone(&entry.callback))
            .collect();

        for callback in snapshot {
            callback(arg);
        }
    }

    /// Resolve with the argument of the next `call`.
    ///
    /// The callback is registered right away, so a `call` that happens
    /// before the future is first polled is not missed.
    pub fn next(&self) -> impl Future<Output = A> + 'static
    where
        A: Clone,
    {
        let received: Rc<RefCell<Option<A>>> = Rc::new(RefCell::new(None));
        let notify = Rc::new(Notify::new());
        let guard = {
            let received = Rc::clone(&received);
            let notify = Rc::clone(&notify);
            self.add(move |arg: &A| {
                let mut slot = received.borrow_mut();
                if slot.is_none() {
                    *slot = Some(arg.clone());
                    notify.notify_one();
                }
            })
            .guard()
        };

        async move {
            loop {
                let value = received.borrow_mut().take();
                if let Some(value) = value {
                    drop(guard);
                    return value;
                }
                notify.notified().await;
            }
        }
    }

    /// Remove every callback. Outstanding subscriptions become inactive.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.inner.entries.borrow_mut());
        for entry in removed {
            entry.active.set(false);
        }
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    /// Whether no callback is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.borrow().is_empty()
    }
}

impl<A: 'static> Clone for CallbackGroup<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<A: 'static> Default for CallbackGroup<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static> fmt::Debug for CallbackGroup<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackGroup")
            .field("id", &self.inner.id)
            .field("len", &self.len())
            .finish()
    }
}

struct SubscriptionInner {
    active: Rc<Cell<bool>>,
    release: RefCell<Option<Box<dyn FnOnce()>>>,
}

/// Handle to a registered callback.
///
/// Clones share the same registration; unsubscribing is idempotent.
#[derive(Clone)]
pub struct Subscription {
    inner: Rc<SubscriptionInner>,
}

impl Subscription {
    /// Create a subscription that runs `release` the first time it is
    /// unsubscribed.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self::with_flag(Rc::new(Cell::new(true)), release)
    }

    fn with_flag<F>(active: Rc<Cell<bool>>, release: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self {
            inner: Rc::new(SubscriptionInner {
                active,
                release: RefCell::new(Some(Box::new(release))),
            }),
        }
    }

    /// A subscription that is already released.
    pub fn released() -> Self {
        let subscription = Self::new(|| {});
        subscription.unsubscribe();
        subscription
    }

    /// Combine several subscriptions into one.
    pub fn merge(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || {
            for subscription in subscriptions {
                subscription.unsubscribe();
            }
        })
    }

    /// Remove the callback.
    pub fn unsubscribe(&self) {
        self.inner.active.set(false);
        let release = self.inner.release.borrow_mut().take();
        if let Some(release) = release {
            release();
        }
    }

    /// Whether the callback is still registered.
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// Whether both handles refer to the same registration.
    pub fn same_as(&self, other: &Subscription) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Tie the subscription to a guard that unsubscribes on drop.
    pub fn guard(self) -> SubscriptionGuard {
        SubscriptionGuard(Some(self))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Unsubscribes when dropped.
#[derive(Debug)]
pub struct SubscriptionGuard(Option<Subscription>);

impl SubscriptionGuard {
    /// Keep the subscription alive past the guard.
    pub fn disarm(mut self) -> Subscription {
        // `Drop` still runs, but finds nothing to release.
        self.0.take().unwrap_or_else(Subscription::released)
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(subscription) = self.0.take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callbacks_run_in_registration_order() {
        let group = CallbackGroup::<u32>::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let log = Rc::clone(&log);
            let _ = group.add(move |value| log.borrow_mut().push(format!("{name}{value}")));
        }

        group.call(&1);
        assert_eq!(*log.borrow(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn unsubscribe_removes_callback() {
        let group = CallbackGroup::<()>::new();
        let count = Rc::new(Cell::new(0));
        let count_clone = Rc::clone(&count);

        let subscription = group.add(move |_| count_clone.set(count_clone.get() + 1));
        group.call(&());
        assert_eq!(count.get(), 1);

        subscription.unsubscribe();
        assert!(!subscription.is_active());
        group.call(&());
        assert_eq!(count.get(), 1);
        assert!(group.is_empty());

        // Idempotent.
        subscription.unsubscribe();
    }

    #[test]
    fn removal_during_dispatch_does_not_skip_others() {
        let group = CallbackGroup::<()>::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let slot_clone = Rc::clone(&slot);
        let log_first = Rc::clone(&log);
        let first = group.add(move |_| {
            log_first.borrow_mut().push("first");
            if let Some(own) = slot_clone.borrow().as_ref() {
                own.unsubscribe();
            }
        });
        *slot.borrow_mut() = Some(first);

        let log_second = Rc::clone(&log);
        let _second = group.add(move |_| log_second.borrow_mut().push("second"));

        group.call(&());
        group.call(&());

        assert_eq!(*log.borrow(), vec!["first", "second", "second"]);
    }

    #[test]
    fn addition_during_dispatch_applies_to_next_call() {
        let group = CallbackGroup::<()>::new();
        let count = Rc::new(Cell::new(0));

        let group_clone = group.clone();
        let count_clone = Rc::clone(&count);
        let _outer = group.add(move |_| {
            let count = Rc::clone(&count_clone);
            let _ = group_clone.add(move |_| count.set(count.get() + 1));
        });

        group.call(&());
        assert_eq!(count.get(), 0);
        assert_eq!(group.len(), 2);

        group.call(&());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn clear_deactivates_subscriptions() {
        let group = CallbackGroup::<()>::new();
        let subscription = group.add(|_| {});
        group.clear();
        assert!(!subscription.is_active());
        assert!(group.is_empty());
    }

    #[tokio::test]
    async fn next_resolves_with_the_following_call() {
        let group = CallbackGroup::<u32>::new();
        let next = group.next();
        assert_eq!(group.len(), 1);

        group.call(&4);
        group.call(&5);

        assert_eq!(next.await, 4);
        assert!(group.is_empty());
    }

    #[test]
    fn guard_unsubscribes_on_drop() {
        let group = CallbackGroup::<()>::new();
        {
            let _guard = group.add(|_| {}).guard();
            assert_eq!(group.len(), 1);
        }
        assert!(group.is_empty());
    }
}
