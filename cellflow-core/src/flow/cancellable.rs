//! Cancellation flags.
//!
//! A `Cancellable` is a boolean flag plus a group of on-cancel callbacks.
//! Cancellation is one-way and idempotent. Child flags follow their parent
//! downward only: cancelling a child never touches the parent.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tokio::sync::Notify;

use crate::util::{CallbackGroup, Subscription};

struct Inner {
    cancelled: Cell<bool>,
    listeners: CallbackGroup<()>,
    notify: Notify,
}

/// A shared cancellation flag.
#[derive(Clone)]
pub struct Cancellable {
    inner: Rc<Inner>,
}

impl Cancellable {
    /// Create a flag that is not cancelled.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(Inner {
                cancelled: Cell::new(false),
                listeners: CallbackGroup::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Create a flag that is cancelled together with this one.
    pub fn child(&self) -> Self {
        let child = Self::new();
        let weak: Weak<Inner> = Rc::downgrade(&child.inner);
        let link = self.on_cancel(move || {
            if let Some(inner) = weak.upgrade() {
                Cancellable { inner }.cancel();
            }
        });
        // A child cancelled on its own no longer needs the parent link.
        let _ = child.on_cancel(move || link.unsubscribe());
        child
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Cancel the flag and run the on-cancel callbacks once.
    pub fn cancel(&self) {
        if self.inner.cancelled.replace(true) {
            return;
        }
        self.inner.listeners.call(&());
        self.inner.listeners.clear();
        self.inner.notify.notify_waiters();
    }

    /// Run `callback` on cancellation, or immediately if already cancelled.
    pub fn on_cancel<F>(&self, callback: F) -> Subscription
    where
        F: FnOnce() + 'static,
    {
        if self.is_cancelled() {
            callback();
            return Subscription::released();
        }
        let slot = RefCell::new(Some(callback));
        self.inner.listeners.add(move |_| {
            if let Some(callback) = slot.borrow_mut().take() {
                callback();
            }
        })
    }

    /// Resolve once the flag is cancelled.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for Cancellable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cancellable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellable")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
