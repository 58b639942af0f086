//! Signals: multicast event sources.
//!
//! A plain signal is emitted manually with [`Signal::emit`]. A custom signal
//! is driven by an external emitter instead:
//!
//! - the first listener starts the emitter (`Idle -> Active`);
//! - `pause` buffers emissions and `resume` replays them in order;
//! - `end`, or the last listener leaving, runs the teardown (`-> Idle`).

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{FutureExt, LocalBoxFuture};
use tokio::sync::oneshot;

use crate::error::{Result, UsageError};
use crate::util::{CallbackGroup, Subscription};

/// Unique identifier for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(u64);

impl SignalId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// State of a custom signal's emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Not started, or ended.
    Idle,
    /// Emissions reach listeners.
    Active,
    /// Emissions are queued until `resume`.
    Pausing,
}

type Teardown = Box<dyn FnOnce()>;
type Start<P> = Box<dyn Fn(EmitHandle<P>) -> Teardown>;

struct Emitter<P: 'static> {
    start: Start<P>,
    lifecycle: Cell<Lifecycle>,
    queue: RefCell<VecDeque<P>>,
    teardown: RefCell<Option<Teardown>>,
}

struct SignalInner<P: 'static> {
    id: SignalId,
    payload: RefCell<Option<P>>,
    listeners: CallbackGroup<P>,
    emitter: Option<Emitter<P>>,
}

impl<P: Clone + 'static> SignalInner<P> {
    fn dispatch(&self, payload: P) {
        *self.payload.borrow_mut() = Some(payload.clone());
        self.listeners.call(&payload);
    }

    fn activate(self: &Rc<Self>) {
        let Some(emitter) = &self.emitter else {
            return;
        };
        if emitter.lifecycle.get() != Lifecycle::Idle {
            return;
        }
        emitter.lifecycle.set(Lifecycle::Active);
        tracing::debug!(signal = ?self.id, "starting emitter");

        let teardown = (emitter.start)(EmitHandle {
            signal: Rc::downgrade(self),
        });
        if emitter.lifecycle.get() == Lifecycle::Idle {
            // Ended while starting.
            teardown();
        } else {
            *emitter.teardown.borrow_mut() = Some(teardown);
        }
    }

    fn end(&self) {
        let Some(emitter) = &self.emitter else {
            return;
        };
        if emitter.lifecycle.replace(Lifecycle::Idle) == Lifecycle::Idle {
            return;
        }
        tracing::debug!(signal = ?self.id, "ending emitter");
        emitter.queue.borrow_mut().clear();
        let teardown = emitter.teardown.borrow_mut().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }
}

/// A multicast event source.
pub struct Signal<P: 'static> {
    inner: Rc<SignalInner<P>>,
}

impl<P: Clone + 'static> Signal<P> {
    /// Create a plain signal.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a signal driven by an external emitter.
    ///
    /// `start` runs when the first listener subscribes and returns the
    /// teardown that runs when the signal ends.
    pub fn custom<F, T>(start: F) -> Self
    where
        F: Fn(EmitHandle<P>) -> T + 'static,
        T: FnOnce() + 'static,
    {
        Self::build(Some(Emitter {
            start: Box::new(move |handle| Box::new(start(handle))),
            lifecycle: Cell::new(Lifecycle::Idle),
            queue: RefCell::new(VecDeque::new()),
            teardown: RefCell::new(None),
        }))
    }

    fn build(emitter: Option<Emitter<P>>) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                id: SignalId::next(),
                payload: RefCell::new(None),
                listeners: CallbackGroup::new(),
                emitter,
            }),
        }
    }

    /// Identity of this signal.
    pub fn id(&self) -> SignalId {
        self.inner.id
    }

    /// Notify every listener with `payload`.
    ///
    /// Custom signals are emitted by their emitter only.
    pub fn emit(&self, payload: P) -> Result<()> {
        if self.inner.emitter.is_some() {
            return Err(UsageError::CustomSignalEmit.into());
        }
        self.inner.dispatch(payload);
        Ok(())
    }

    /// Listen to emissions. Starts the emitter of a custom signal.
    pub fn on<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&P) + 'static,
    {
        let registration = self.inner.listeners.add(listener);
        self.inner.activate();

        let weak: Weak<SignalInner<P>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            registration.unsubscribe();
            if let Some(inner) = weak.upgrade() {
                if inner.listeners.is_empty() {
                    inner.end();
                }
            }
        })
    }

    /// Resolve with the payload of the next emission.
    pub fn next(&self) -> LocalBoxFuture<'static, P> {
        let (sender, receiver) = oneshot::channel();
        let sender = RefCell::new(Some(sender));
        let guard = self
            .on(move |payload: &P| {
                if let Some(sender) = sender.borrow_mut().take() {
                    let _ = sender.send(payload.clone());
                }
            })
            .guard();

        async move {
            let received = receiver.await;
            drop(guard);
            match received {
                Ok(payload) => payload,
                Err(_) => futures_util::future::pending().await,
            }
        }
        .boxed_local()
    }

    /// The last emitted payload.
    pub fn payload(&self) -> Option<P> {
        self.inner.payload.borrow().clone()
    }

    /// Buffer emissions of a custom signal until `resume`.
    pub fn pause(&self) {
        if let Some(emitter) = &self.inner.emitter {
            if emitter.lifecycle.get() == Lifecycle::Active {
                emitter.lifecycle.set(Lifecycle::Pausing);
            }
        }
    }

    /// Replay buffered emissions in order and continue.
    pub fn resume(&self) {
        let Some(emitter) = &self.inner.emitter else {
            return;
        };
        if emitter.lifecycle.get() != Lifecycle::Pausing {
            return;
        }
        emitter.lifecycle.set(Lifecycle::Active);
        while emitter.lifecycle.get() == Lifecycle::Active {
            let next = emitter.queue.borrow_mut().pop_front();
            match next {
                Some(payload) => self.inner.dispatch(payload),
                None => break,
            }
        }
    }

    /// Stop the emitter of a custom signal and run its teardown.
    pub fn end(&self) {
        self.inner.end();
    }

    /// Emitter state of a custom signal, `None` for plain signals.
    pub fn lifecycle(&self) -> Option<Lifecycle> {
        self.inner.emitter.as_ref().map(|emitter| emitter.lifecycle.get())
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl<P: Clone + 'static> Default for Signal<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: 'static> Clone for Signal<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: 'static> fmt::Debug for Signal<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("listeners", &self.inner.listeners.len())
            .field(
                "lifecycle",
                &self.inner.emitter.as_ref().map(|emitter| emitter.lifecycle.get()),
            )
            .finish()
    }
}

/// Handed to a custom signal's emitter.
pub struct EmitHandle<P: 'static> {
    signal: Weak<SignalInner<P>>,
}

impl<P: Clone + 'static> EmitHandle<P> {
    /// Emit `payload`. Queued while pausing, dropped while idle.
    pub fn emit(&self, payload: P) {
        let Some(inner) = self.signal.upgrade() else {
            return;
        };
        let Some(emitter) = &inner.emitter else {
            return;
        };
        match emitter.lifecycle.get() {
            Lifecycle::Active => inner.dispatch(payload),
            Lifecycle::Pausing => emitter.queue.borrow_mut().push_back(payload),
            Lifecycle::Idle => tracing::trace!(signal = ?inner.id, "dropping emission of idle signal"),
        }
    }
}

impl<P: 'static> Clone for EmitHandle<P> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<P: 'static> fmt::Debug for EmitHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmitHandle")
            .field("alive", &(self.signal.strong_count() > 0))
            .finish()
    }
}
