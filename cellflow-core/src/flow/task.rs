//! Task Implementation
//!
//! A task runs an async body at most once and ends in exactly one terminal
//! status. Tasks form a tree through [`Flow::fork`].
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> Running -> Success
//!                 -> Error
//!                 -> Cancelled
//! ```
//!
//! 1. `start` moves an idle task to `Running` and polls its body once in
//!    place. A body that is still pending is spawned on the current
//!    `LocalSet`. Later calls return the same completion future.
//!
//! 2. When the body returns `Ok`, the task keeps running until every child
//!    has finished, then succeeds.
//!
//! 3. When the body returns `Err`, or a child fails, the task fails at once:
//!    running children are cancelled, the task's own `Cancellable` fires and
//!    the error is reported to the parent, which fails in turn.
//!
//! 4. `cancel` cancels the task and all of its descendants. The body future
//!    is dropped and never resumed.
//!
//! After the terminal transition the task is disposed: `on_dispose` hooks
//! run and any child still alive is cancelled.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{FutureExt, LocalBoxFuture, Shared};

use super::cancellable::Cancellable;
use super::context::Flow;
use crate::error::{Error, Result};
use crate::reactive::{run_in_scope, Scope, ScopeKind};
use crate::util::{CallbackGroup, Subscription};

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Where a task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Created, not started.
    Idle,
    /// Body or children still running.
    Running,
    /// Finished with a value.
    Success,
    /// Finished with an error.
    Error,
    /// Cancelled before finishing.
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }
}

/// The untyped part of a task: status, tree links and hooks.
pub(crate) struct TaskCore {
    id: TaskId,
    status: Cell<TaskStatus>,
    error: RefCell<Option<Error>>,
    pub(crate) cancellable: Cancellable,
    parent: Option<Weak<TaskCore>>,
    children: RefCell<Vec<Rc<TaskCore>>>,
    on_status: CallbackGroup<TaskStatus>,
    on_error: CallbackGroup<Error>,
    on_child_settled: CallbackGroup<()>,
    on_dispose: RefCell<Vec<Box<dyn FnOnce()>>>,
    disposed: Cell<bool>,
}

impl TaskCore {
    fn create(parent: Option<&Rc<TaskCore>>) -> Rc<Self> {
        let core = Rc::new(Self {
            id: TaskId::next(),
            status: Cell::new(TaskStatus::Idle),
            error: RefCell::new(None),
            cancellable: Cancellable::new(),
            parent: parent.map(Rc::downgrade),
            children: RefCell::new(Vec::new()),
            on_status: CallbackGroup::new(),
            on_error: CallbackGroup::new(),
            on_child_settled: CallbackGroup::new(),
            on_dispose: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
        });
        if let Some(parent) = parent {
            if parent.status().is_terminal() {
                core.cancel();
            } else {
                parent.children.borrow_mut().push(Rc::clone(&core));
            }
        }
        core
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.status.get()
    }

    fn error(&self) -> Option<Error> {
        self.error.borrow().clone()
    }

    fn run(&self) -> bool {
        if self.status() != TaskStatus::Idle {
            return false;
        }
        self.status.set(TaskStatus::Running);
        tracing::debug!(task = self.id.0, "task started");
        self.on_status.call(&TaskStatus::Running);
        true
    }

    fn succeed(&self) {
        if self.status().is_terminal() {
            return;
        }
        self.status.set(TaskStatus::Success);
        tracing::debug!(task = self.id.0, "task succeeded");
        self.finish();
    }

    fn fail(&self, error: Error) {
        if self.status().is_terminal() {
            return;
        }
        self.status.set(TaskStatus::Error);
        tracing::debug!(task = self.id.0, %error, "task failed");
        *self.error.borrow_mut() = Some(error.clone());
        self.cancel_children();
        self.cancellable.cancel();
        self.on_error.call(&error);
        self.finish();
    }

    pub(crate) fn cancel(&self) {
        if self.status().is_terminal() {
            return;
        }
        self.status.set(TaskStatus::Cancelled);
        tracing::debug!(task = self.id.0, "task cancelled");
        self.cancellable.cancel();
        self.cancel_children();
        self.finish();
    }

    fn cancel_children(&self) {
        let children = std::mem::take(&mut *self.children.borrow_mut());
        for child in children {
            child.cancel();
        }
    }

    fn finish(&self) {
        let status = self.status();
        self.on_status.call(&status);
        self.dispose();

        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent.child_finished(self.id, status, self.error());
        }
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        let hooks = std::mem::take(&mut *self.on_dispose.borrow_mut());
        for hook in hooks {
            hook();
        }
        self.cancel_children();
    }

    fn child_finished(&self, child: TaskId, status: TaskStatus, error: Option<Error>) {
        self.children.borrow_mut().retain(|core| core.id != child);
        if status == TaskStatus::Error {
            self.fail(error.unwrap_or_else(|| Error::msg("child task failed")));
        }
        self.on_child_settled.call(&());
    }

    pub(crate) fn add_dispose_hook(&self, hook: Box<dyn FnOnce()>) {
        if self.disposed.get() {
            hook();
        } else {
            self.on_dispose.borrow_mut().push(hook);
        }
    }

    fn children_finished(self: &Rc<Self>) -> impl Future<Output = ()> + 'static {
        let core = Rc::clone(self);
        async move {
            loop {
                let next = core.on_child_settled.next();
                if core.children.borrow().is_empty() {
                    return;
                }
                next.await;
            }
        }
    }

    fn finished(self: &Rc<Self>) -> impl Future<Output = ()> + 'static {
        let core = Rc::clone(self);
        async move {
            loop {
                let next = core.on_status.next();
                if core.status().is_terminal() {
                    return;
                }
                next.await;
            }
        }
    }
}

type Body<T> = Box<dyn FnOnce(Flow) -> LocalBoxFuture<'static, Result<T>>>;

/// Shared completion future of a task.
///
/// Resolves with the value on success, the error on failure and
/// [`Error::Cancelled`] on cancellation.
pub type Completion<T> = Shared<LocalBoxFuture<'static, Result<T>>>;

struct TaskInner<T: 'static> {
    core: Rc<TaskCore>,
    body: RefCell<Option<Body<T>>>,
    value: Rc<RefCell<Option<T>>>,
    completion: RefCell<Option<Completion<T>>>,
}

/// A cancellable, observable async computation.
pub struct Task<T: 'static> {
    inner: Rc<TaskInner<T>>,
}

impl<T: Clone + 'static> Task<T> {
    /// Create an idle root task.
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Flow) -> Fut + 'static,
        Fut: Future<Output = Result<T>> + 'static,
    {
        Self::create(None, body)
    }

    pub(crate) fn create<F, Fut>(parent: Option<&Rc<TaskCore>>, body: F) -> Self
    where
        F: FnOnce(Flow) -> Fut + 'static,
        Fut: Future<Output = Result<T>> + 'static,
    {
        let core = TaskCore::create(parent);
        // A task born cancelled never runs, so it must not keep its body.
        let body: Option<Body<T>> = if core.status().is_terminal() {
            None
        } else {
            Some(Box::new(move |flow| body(flow).boxed_local()))
        };
        Self {
            inner: Rc::new(TaskInner {
                core,
                body: RefCell::new(body),
                value: Rc::new(RefCell::new(None)),
                completion: RefCell::new(None),
            }),
        }
    }

    /// Start the task if it is idle and return its completion.
    pub fn start(&self) -> Completion<T> {
        if let Some(completion) = self.inner.completion.borrow().clone() {
            return completion;
        }
        let completion = Self::completion(Rc::clone(&self.inner.core), Rc::clone(&self.inner.value));
        *self.inner.completion.borrow_mut() = Some(completion.clone());

        let body = self.inner.body.borrow_mut().take();
        if let Some(body) = body {
            let core = Rc::clone(&self.inner.core);
            if core.run() {
                let mut work = body(Flow::new(Rc::clone(&core)));
                // First poll in place, so a body that settles before its first
                // suspension point settles the task before `start` returns.
                let scope = Scope::new(ScopeKind::Stable).isolated();
                match run_in_scope(scope, || (&mut work).now_or_never()) {
                    Some(Err(error)) => core.fail(error),
                    Some(Ok(result)) => {
                        *self.inner.value.borrow_mut() = Some(result);
                        if core.children.borrow().is_empty() {
                            core.succeed();
                        } else {
                            tokio::task::spawn_local(Self::settle(core));
                        }
                    }
                    None => {
                        tokio::task::spawn_local(Self::drive(core, Rc::clone(&self.inner.value), work));
                    }
                }
            }
        }
        completion
    }

    async fn drive(core: Rc<TaskCore>, value: Rc<RefCell<Option<T>>>, work: LocalBoxFuture<'static, Result<T>>) {
        let finished = core.finished();
        let run = async {
            match work.await {
                Ok(result) => {
                    *value.borrow_mut() = Some(result);
                    core.children_finished().await;
                    core.succeed();
                }
                Err(error) => core.fail(error),
            }
        };
        tokio::select! {
            biased;
            _ = finished => {}
            _ = run => {}
        }
    }

    async fn settle(core: Rc<TaskCore>) {
        let finished = core.finished();
        let children = core.children_finished();
        tokio::select! {
            biased;
            _ = finished => {}
            _ = children => core.succeed(),
        }
    }

    fn completion(core: Rc<TaskCore>, value: Rc<RefCell<Option<T>>>) -> Completion<T> {
        async move {
            core.finished().await;
            match core.status() {
                TaskStatus::Success => value.borrow().clone().ok_or(Error::Cancelled),
                TaskStatus::Error => Err(core.error().unwrap_or_else(|| Error::msg("task failed"))),
                _ => Err(Error::Cancelled),
            }
        }
        .boxed_local()
        .shared()
    }

    /// Identity of this task.
    pub fn id(&self) -> TaskId {
        self.inner.core.id()
    }

    /// Current status.
    pub fn status(&self) -> TaskStatus {
        self.inner.core.status()
    }

    /// The value, once the task has succeeded.
    pub fn result(&self) -> Option<T> {
        match self.status() {
            TaskStatus::Success => self.inner.value.borrow().clone(),
            _ => None,
        }
    }

    /// The error, once the task has failed.
    pub fn error(&self) -> Option<Error> {
        self.inner.core.error()
    }

    /// Cancel the task and its descendants.
    pub fn cancel(&self) {
        self.inner.core.cancel();
    }

    /// Whether the task ended cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status() == TaskStatus::Cancelled
    }

    /// Listen to status transitions.
    pub fn on_status<F>(&self, listener: F) -> Subscription
    where
        F: Fn(TaskStatus) + 'static,
    {
        self.inner.core.on_status.add(move |status| listener(*status))
    }

    /// Listen to the failure of this task.
    pub fn on_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Error) + 'static,
    {
        self.inner.core.on_error.add(listener)
    }

    /// Run `callback` once with the terminal status, right away if the task
    /// has already finished.
    pub fn on_settled<F>(&self, callback: F) -> Subscription
    where
        F: FnOnce(TaskStatus) + 'static,
    {
        let status = self.status();
        if status.is_terminal() {
            callback(status);
            return Subscription::released();
        }
        let slot = RefCell::new(Some(callback));
        self.inner.core.on_status.add(move |status| {
            if status.is_terminal() {
                if let Some(callback) = slot.borrow_mut().take() {
                    callback(*status);
                }
            }
        })
    }

    /// Number of children that have not finished.
    pub fn child_count(&self) -> usize {
        self.inner.core.children.borrow().len()
    }

    /// The flow context of this task, for forking children into it.
    pub fn flow(&self) -> Flow {
        Flow::new(Rc::clone(&self.inner.core))
    }
}

impl<T: Clone + 'static> IntoFuture for Task<T> {
    type Output = Result<T>;
    type IntoFuture = Completion<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.start()
    }
}

impl<T: 'static> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.core.id)
            .field("status", &self.inner.core.status())
            .field("children", &self.inner.core.children.borrow().len())
            .finish()
    }
}

/// Create a root task and start it.
///
/// Must be called inside a `LocalSet`.
pub fn spawn<T, F, Fut>(body: F) -> Task<T>
where
    T: Clone + 'static,
    F: FnOnce(Flow) -> Fut + 'static,
    Fut: Future<Output = Result<T>> + 'static,
{
    let task = Task::new(body);
    let _ = task.start();
    task
}
