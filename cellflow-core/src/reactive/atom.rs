//! Atom Implementation
//!
//! An atom is a reactive cell holding a state plus a loading/error status.
//! It comes in three shapes, fixed at creation:
//!
//! - **updatable**: `Atom::new`. State is written from outside through the
//!   `set` family of operations.
//! - **computed**: `Atom::computed`. A function re-runs every time one of
//!   the atoms it read changes.
//! - **emittable**: `Atom::emittable`. A reducer runs for every emitted
//!   action (see [`Emittable`](super::Emittable)).
//!
//! # Update Pipeline
//!
//! Every write ends up in one of three places:
//!
//! 1. `commit`: the next state is compared with the current one. If it is
//!    equal nothing is notified and `save` is not called.
//!
//! 2. `start_async`: the future is spawned on the current `LocalSet`, a
//!    fresh change token is installed and the atom enters the loading state.
//!    When the future settles, its result is applied only if the token is
//!    still current. A newer dispatch aborts the previous future, so at most
//!    one asynchronous update is ever in flight.
//!
//! 3. `fail`: the error is stored, loading is reset and the last good state
//!    is kept.
//!
//! Asynchronous updates must run inside a `tokio::task::LocalSet`.
//!
//! # Channels
//!
//! State changes and status changes are two separate listener groups. Reading
//! `state()` inside an evaluation depends on the first, reading `loading()`
//! or `error()` on the second. Change listeners are always notified before
//! status listeners.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures_util::future::{FutureExt, LocalBoxFuture};
use tokio::task::JoinHandle;

use super::dependencies::{collect_dependencies, Channel, Dependencies, Invalidate};
use super::id::{AtomKey, ChangeToken};
use super::scope::{self, run_in_scope, Dispose, Scope, ScopeKind};
use super::snapshot::Revert;
use super::update::{Context, Update};
use super::wait::AwaiterState;
use crate::error::{Error, Result, UsageError};
use crate::util::{CallbackGroup, Equality, Subscription};

/// A total function from the previous state to the next one.
pub type Mutation<T> = Box<dyn FnOnce(T) -> T>;

pub(crate) type Compute<T> = Rc<dyn Fn(&Context) -> Result<Update<T>>>;
type LoadHook<T> = Rc<dyn Fn() -> Option<T>>;
type SaveHook<T> = Rc<dyn Fn(&T)>;

/// Configuration shared by every atom shape.
pub struct AtomOptions<T> {
    pub(crate) name: Option<String>,
    pub(crate) equality: Equality<T>,
    pub(crate) load: Option<LoadHook<T>>,
    pub(crate) save: Option<SaveHook<T>>,
}

impl<T> AtomOptions<T> {
    /// Default options: structural equality, no hydration hooks.
    pub fn new() -> Self {
        Self {
            name: None,
            equality: Equality::Structural,
            load: None,
            save: None,
        }
    }

    /// Name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// How the next state is compared with the current one.
    pub fn equality(mut self, equality: Equality<T>) -> Self {
        self.equality = equality;
        self
    }

    /// Seed the initial state. Returning `None` keeps normal initialization.
    pub fn load<F>(mut self, load: F) -> Self
    where
        F: Fn() -> Option<T> + 'static,
    {
        self.load = Some(Rc::new(load));
        self
    }

    /// Called after every state change.
    pub fn save<F>(mut self, save: F) -> Self
    where
        F: Fn(&T) + 'static,
    {
        self.save = Some(Rc::new(save));
        self
    }
}

impl<T> Default for AtomOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for AtomOptions<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            equality: self.equality.clone(),
            load: self.load.clone(),
            save: self.save.clone(),
        }
    }
}

impl<T> fmt::Debug for AtomOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomOptions")
            .field("name", &self.name)
            .field("equality", &self.equality)
            .field("load", &self.load.is_some())
            .field("save", &self.save.is_some())
            .finish()
    }
}

pub(crate) enum Shape<T> {
    Updatable,
    Computed(Compute<T>),
    Emittable,
}

/// Everything a snapshot captures.
struct Storage<T> {
    state: T,
    loading: bool,
    error: Option<Error>,
    task: Option<Rc<JoinHandle<()>>>,
    token: ChangeToken,
    dependencies: Rc<Dependencies>,
    context: Option<Context>,
    cleanups: Vec<Rc<dyn Fn()>>,
}

impl<T: Clone> Storage<T> {
    fn new(state: T) -> Self {
        Self {
            state,
            loading: false,
            error: None,
            task: None,
            token: ChangeToken::new(),
            dependencies: Rc::new(Dependencies::new()),
            context: None,
            cleanups: Vec::new(),
        }
    }

    fn shallow_copy(&self) -> Self {
        Self {
            state: self.state.clone(),
            loading: self.loading,
            error: self.error.clone(),
            task: self.task.clone(),
            token: self.token,
            dependencies: Rc::new(self.dependencies.duplicate()),
            context: self.context.clone(),
            cleanups: self.cleanups.clone(),
        }
    }
}

type SharedStorage<T> = Rc<RefCell<Storage<T>>>;

pub(crate) struct Core<T: 'static> {
    key: AtomKey,
    this: Weak<Core<T>>,
    shape: Shape<T>,
    initial: T,
    options: AtomOptions<T>,
    storage: RefCell<SharedStorage<T>>,
    on_change: CallbackGroup<()>,
    on_status: CallbackGroup<()>,
    active: Cell<bool>,
    muted: Cell<bool>,
    invalidate: Invalidate,
    init_action: RefCell<Option<Rc<dyn Fn()>>>,
}

impl<T: 'static> Core<T> {
    fn storage(&self) -> SharedStorage<T> {
        Rc::clone(&*self.storage.borrow())
    }
}

impl<T: Clone + PartialEq + 'static> Core<T> {
    pub(crate) fn create(shape: Shape<T>, initial: T, options: AtomOptions<T>) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let weak = this.clone();
            Core {
                key: AtomKey::new(),
                this: this.clone(),
                shape,
                storage: RefCell::new(Rc::new(RefCell::new(Storage::new(initial.clone())))),
                initial,
                options,
                on_change: CallbackGroup::new(),
                on_status: CallbackGroup::new(),
                active: Cell::new(true),
                muted: Cell::new(false),
                invalidate: Rc::new(move || {
                    if let Some(core) = weak.upgrade() {
                        core.evaluate();
                    }
                }),
                init_action: RefCell::new(None),
            }
        })
    }

    pub(crate) fn set_init_action(&self, init: Rc<dyn Fn()>) {
        *self.init_action.borrow_mut() = Some(init);
    }

    pub(crate) fn key(&self) -> AtomKey {
        self.key
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    fn with_storage<R>(&self, f: impl FnOnce(&mut Storage<T>) -> R) -> R {
        let storage = self.storage();
        let mut storage = storage.borrow_mut();
        f(&mut storage)
    }

    fn notify(&self, group: &CallbackGroup<()>) {
        if !self.muted.get() {
            group.call(&());
        }
    }

    /// Run the load hook, then the shape's own initialization.
    fn initialize(&self) {
        let seeded = match &self.options.load {
            Some(load) => scope::untracked(|| load()),
            None => None,
        };
        let was_seeded = seeded.is_some();
        if let Some(state) = seeded {
            self.with_storage(|storage| storage.state = state);
        }

        match &self.shape {
            Shape::Computed(_) => self.evaluate(),
            Shape::Emittable if !was_seeded => {
                let init = self.init_action.borrow().clone();
                if let Some(init) = init {
                    init();
                }
            }
            _ => {}
        }
    }

    /// Start a new run: run the previous run's cleanups and abort its context.
    pub(crate) fn next_context(&self) -> Context {
        let context = Context::new();
        let (previous, cleanups) = self.with_storage(|storage| {
            (
                storage.context.replace(context.clone()),
                std::mem::take(&mut storage.cleanups),
            )
        });
        for cleanup in cleanups {
            cleanup();
        }
        if let Some(previous) = previous {
            previous.abort();
        }
        context
    }

    /// Hook collecting cleanups for the current run.
    fn cleanup_collector(&self) -> impl Fn(Rc<dyn Fn()>) + 'static {
        let this = self.this.clone();
        move |cleanup| {
            if let Some(core) = this.upgrade() {
                core.with_storage(|storage| storage.cleanups.push(cleanup));
            }
        }
    }

    fn evaluate(&self) {
        let compute = match &self.shape {
            Shape::Computed(compute) => Rc::clone(compute),
            _ => return,
        };
        if !self.active.get() {
            return;
        }

        let context = self.next_context();
        let dependencies = self.with_storage(|storage| Rc::clone(&storage.dependencies));
        let scope = Scope::new(ScopeKind::Computed)
            .with_parent(self.key)
            .on_cleanup(self.cleanup_collector());

        let result = collect_dependencies(
            || compute(&context),
            &dependencies,
            Rc::clone(&self.invalidate),
            scope,
        );
        self.apply_result(result, context, false);
    }

    /// Run `f` as a reducer-style update under `kind`.
    ///
    /// Reads inside `f` are not tracked, but `wait()` is available.
    pub(crate) fn dispatch<F>(&self, kind: ScopeKind, allow_future: bool, f: F)
    where
        F: FnOnce(&T, &Context) -> Result<Update<T>>,
    {
        if !self.active.get() {
            return;
        }
        let context = self.next_context();
        let previous = self.peek();
        let scope = Scope::new(kind)
            .with_parent(self.key)
            .on_cleanup(self.cleanup_collector())
            .without_tracking();

        let result = run_in_scope(scope, || f(&previous, &context));
        self.apply_result(result, context, allow_future);
    }

    fn apply_result(&self, result: Result<Update<T>>, context: Context, allow_future: bool) {
        match result {
            Ok(Update::Future(_)) if !allow_future => {
                panic!("{}", UsageError::FutureReturned);
            }
            Ok(update) => self.apply(update, context),
            Err(error) => self.resolve(Err(error)),
        }
    }

    pub(crate) fn apply(&self, update: Update<T>, context: Context) {
        match update {
            Update::Value(value) => self.commit(value, true),
            Update::Future(future) => self.start_async(future, context),
            Update::Wait(awaiter) => match awaiter.into_state() {
                AwaiterState::Ready(result) => self.resolve(result),
                AwaiterState::Pending(future) => self.start_async(future, context),
            },
        }
    }

    fn resolve(&self, result: Result<T>) {
        match result {
            Ok(value) => self.commit(value, true),
            Err(Error::Aborted) => self.stop_loading(),
            Err(error) => self.fail(error),
        }
    }

    pub(crate) fn commit(&self, next: T, save: bool) {
        let equality = &self.options.equality;
        let (changed, status_changed) = self.with_storage(|storage| {
            if let Some(task) = storage.task.take() {
                task.abort();
            }
            let changed = !equality.equals(&storage.state, &next);
            if changed {
                storage.state = next;
                storage.token = ChangeToken::new();
            }
            let status_changed = storage.loading || storage.error.is_some();
            storage.loading = false;
            storage.error = None;
            (changed, status_changed)
        });

        if changed {
            if save {
                self.save();
            }
            self.notify(&self.on_change);
        }
        if status_changed {
            self.notify(&self.on_status);
        }
    }

    fn save(&self) {
        if let Some(save) = &self.options.save {
            let state = self.peek();
            save(&state);
        }
    }

    fn start_async(&self, future: LocalBoxFuture<'static, Result<T>>, context: Context) {
        let token = ChangeToken::new();
        let this = self.this.clone();
        let handle = tokio::task::spawn_local(async move {
            let result = tokio::select! {
                biased;
                _ = context.aborted() => Err(Error::Aborted),
                result = future => result,
            };
            if let Some(core) = this.upgrade() {
                core.settle(token, result);
            }
        });

        let (previous, flipped) = self.with_storage(|storage| {
            storage.token = token;
            let previous = storage.task.replace(Rc::new(handle));
            let flipped = !storage.loading;
            storage.loading = true;
            (previous, flipped)
        });
        if let Some(previous) = previous {
            previous.abort();
        }
        if flipped {
            self.notify(&self.on_status);
        }
    }

    fn settle(&self, token: ChangeToken, result: Result<T>) {
        let current = self.with_storage(|storage| {
            if storage.token == token {
                storage.task = None;
                true
            } else {
                false
            }
        });
        if !current {
            tracing::trace!(atom = ?self.key, name = ?self.options.name, "discarding superseded update");
            return;
        }
        self.resolve(result);
    }

    fn stop_loading(&self) {
        let was_loading = self.with_storage(|storage| {
            if let Some(task) = storage.task.take() {
                task.abort();
            }
            std::mem::replace(&mut storage.loading, false)
        });
        if was_loading {
            self.notify(&self.on_status);
        }
    }

    fn fail(&self, error: Error) {
        tracing::debug!(atom = ?self.key, name = ?self.options.name, %error, "atom failed");
        self.with_storage(|storage| {
            if let Some(task) = storage.task.take() {
                task.abort();
            }
            storage.loading = false;
            storage.error = Some(error);
        });
        self.notify(&self.on_status);
    }

    pub(crate) fn peek(&self) -> T {
        self.with_storage(|storage| storage.state.clone())
    }

    fn token(&self) -> ChangeToken {
        self.with_storage(|storage| storage.token)
    }

    fn track_change(&self) {
        scope::track(self.key, || Channel::from_group(&self.on_change));
    }

    fn track_status(&self) {
        scope::track(self.key, || Channel::from_group(&self.on_status));
    }

    fn abort(&self) {
        let context = self.with_storage(|storage| {
            storage.task = None;
            storage.context.clone()
        });
        if let Some(context) = context {
            context.abort();
        }
    }

    pub(crate) fn snapshot(&self, reset: bool) -> Revert {
        let captured = self.storage();
        let installed = if reset {
            Rc::new(RefCell::new(Storage::new(self.initial.clone())))
        } else {
            Rc::new(RefCell::new(captured.borrow().shallow_copy()))
        };
        *self.storage.borrow_mut() = Rc::clone(&installed);

        if reset {
            let dependencies = Rc::clone(&captured.borrow().dependencies);
            dependencies.suspend();
            self.muted.set(true);
            self.initialize();
            self.muted.set(false);
            self.notify_difference(&captured, &installed);
        }

        let this = self.this.clone();
        Revert::new(move || match this.upgrade() {
            Some(core) => core.restore(&captured, &installed),
            None => false,
        })
    }

    fn restore(&self, captured: &SharedStorage<T>, installed: &SharedStorage<T>) -> bool {
        if !Rc::ptr_eq(&self.storage(), installed) {
            return false;
        }
        *self.storage.borrow_mut() = Rc::clone(captured);

        let (outgoing, outgoing_task) = {
            let storage = installed.borrow();
            (Rc::clone(&storage.dependencies), storage.task.clone())
        };
        let (incoming, incoming_task) = {
            let storage = captured.borrow();
            (Rc::clone(&storage.dependencies), storage.task.clone())
        };

        outgoing.release_unshared(&incoming);
        incoming.resume(&self.invalidate);

        if let Some(task) = outgoing_task {
            let shared = incoming_task.map_or(false, |other| Rc::ptr_eq(&task, &other));
            if !shared {
                task.abort();
            }
        }

        self.notify_difference(installed, captured);
        true
    }

    fn notify_difference(&self, from: &SharedStorage<T>, to: &SharedStorage<T>) {
        let (changed, status_changed) = {
            let from = from.borrow();
            let to = to.borrow();
            (
                !self.options.equality.equals(&from.state, &to.state),
                from.loading != to.loading || from.error.is_some() != to.error.is_some(),
            )
        };
        if changed {
            self.notify(&self.on_change);
        }
        if status_changed {
            self.notify(&self.on_status);
        }
    }
}

impl<T: 'static> Dispose for Core<T> {
    fn dispose(&self) {
        if !self.active.replace(false) {
            return;
        }
        let storage = Rc::clone(&*self.storage.borrow());
        let (task, context, cleanups, dependencies) = {
            let mut storage = storage.borrow_mut();
            (
                storage.task.take(),
                storage.context.take(),
                std::mem::take(&mut storage.cleanups),
                Rc::clone(&storage.dependencies),
            )
        };
        if let Some(task) = task {
            task.abort();
        }
        if let Some(context) = context {
            context.abort();
        }
        for cleanup in cleanups {
            cleanup();
        }
        dependencies.release_all();
        self.on_change.clear();
        self.on_status.clear();
        tracing::debug!(atom = ?self.key, name = ?self.options.name, "atom disposed");
    }
}

/// A reactive cell.
///
/// Cloning an atom is cheap and yields a handle to the same cell.
pub struct Atom<T: 'static> {
    pub(crate) core: Rc<Core<T>>,
}

impl<T: Clone + PartialEq + 'static> Atom<T> {
    /// Create an updatable atom.
    pub fn new(initial: T) -> Self {
        Self::with_options(initial, AtomOptions::default())
    }

    /// Create an updatable atom with options.
    pub fn with_options(initial: T, options: AtomOptions<T>) -> Self {
        Self::start(Core::create(Shape::Updatable, initial, options))
    }

    /// Create an updatable atom whose first state comes from `future`.
    ///
    /// The atom holds `placeholder` and is loading until the future settles.
    pub fn from_future<F>(placeholder: T, future: F) -> Self
    where
        F: Future<Output = Result<T>> + 'static,
    {
        let atom = Self::new(placeholder);
        atom.set_future(future);
        atom
    }

    /// Create a computed atom.
    ///
    /// The state is `T::default()` until the first evaluation commits.
    ///
    /// # Panics
    ///
    /// Evaluation panics if `compute` returns [`Update::Future`]; asynchronous
    /// work has to go through `wait()`.
    pub fn computed<F>(compute: F) -> Self
    where
        T: Default,
        F: Fn(&Context) -> Result<Update<T>> + 'static,
    {
        Self::computed_with(compute, AtomOptions::default())
    }

    /// Create a computed atom with options.
    pub fn computed_with<F>(compute: F, options: AtomOptions<T>) -> Self
    where
        T: Default,
        F: Fn(&Context) -> Result<Update<T>> + 'static,
    {
        Self::start(Core::create(Shape::Computed(Rc::new(compute)), T::default(), options))
    }

    /// Announce the atom to the current scope and initialize it.
    pub(crate) fn start(core: Rc<Core<T>>) -> Self {
        scope::atom_created(Rc::clone(&core) as Rc<dyn Dispose>);
        core.initialize();
        Self { core }
    }

    /// Identity of this atom.
    pub fn key(&self) -> AtomKey {
        self.core.key()
    }

    /// Name given through [`AtomOptions::name`].
    pub fn name(&self) -> Option<&str> {
        self.core.options.name.as_deref()
    }

    /// Whether two handles refer to the same atom.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.core, &b.core)
    }

    /// The current state. Tracked.
    pub fn state(&self) -> T {
        self.core.track_change();
        self.core.peek()
    }

    /// The current state without tracking.
    pub fn peek(&self) -> T {
        self.core.peek()
    }

    /// Whether an asynchronous update is in flight. Tracked.
    pub fn loading(&self) -> bool {
        self.core.track_status();
        self.core.with_storage(|storage| storage.loading)
    }

    /// The error of the last failed update. Tracked.
    pub fn error(&self) -> Option<Error> {
        self.core.track_status();
        self.core.with_storage(|storage| storage.error.clone())
    }

    /// Whether the atom has not been disposed.
    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    /// Replace the state.
    pub fn set(&self, value: T) {
        self.core.commit(value, true);
    }

    /// Replace the state with a function of the previous one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.core.peek());
        self.core.commit(next, true);
    }

    /// Replace the state with a possibly asynchronous function of the
    /// previous one.
    ///
    /// A returned future or pending awaiter puts the atom into the loading
    /// state right away. Its result is discarded if another update happens
    /// first.
    pub fn update_async<F>(&self, f: F)
    where
        F: FnOnce(&T, &Context) -> Result<Update<T>>,
    {
        self.core.dispatch(ScopeKind::Updatable, true, f);
    }

    /// Load the next state from a future.
    pub fn set_future<F>(&self, future: F)
    where
        F: Future<Output = Result<T>> + 'static,
    {
        let context = self.core.next_context();
        self.core.apply(Update::Future(future.boxed_local()), context);
    }

    /// Apply an update produced elsewhere.
    pub fn set_update(&self, update: Update<T>) {
        let context = self.core.next_context();
        self.core.apply(update, context);
    }

    /// Apply each mutation in turn and commit the result once.
    pub fn mutate<I>(&self, mutations: I)
    where
        I: IntoIterator<Item = Mutation<T>>,
    {
        let next = mutations
            .into_iter()
            .fold(self.core.peek(), |state, mutation| mutation(state));
        self.core.commit(next, true);
    }

    /// Capture the current version for an update that completes later.
    pub fn deferred(&self) -> Deferred<T> {
        Deferred {
            core: Rc::downgrade(&self.core),
            token: self.core.token(),
        }
    }

    /// Overwrite the state of an updatable atom without calling `save`.
    pub fn assign(&self, value: T) -> Result<()> {
        match self.core.shape {
            Shape::Updatable => {
                self.core.commit(value, false);
                Ok(())
            }
            _ => Err(UsageError::NotUpdatable.into()),
        }
    }

    /// Restore the initial state of an updatable atom.
    pub fn reset(&self) -> Result<()> {
        match self.core.shape {
            Shape::Updatable => {
                self.core.commit(self.core.initial.clone(), true);
                Ok(())
            }
            _ => Err(UsageError::NotUpdatable.into()),
        }
    }

    /// Abort the current run's context. The in-flight update settles as
    /// aborted: loading is reset and the state kept.
    pub fn abort(&self) {
        self.core.abort();
    }

    /// Release every dependency and listener.
    pub fn dispose(&self) {
        self.core.dispose();
    }

    /// Capture the current storage.
    ///
    /// With `reset`, the atom is re-initialized from scratch; otherwise it
    /// continues on a copy. Reverting restores the captured storage unless
    /// another snapshot replaced it in the meantime.
    pub fn snapshot(&self, reset: bool) -> Revert {
        self.core.snapshot(reset)
    }

    /// Listen to state changes.
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + 'static,
    {
        let core = Rc::downgrade(&self.core);
        self.core.on_change.add(move |_| {
            if let Some(core) = core.upgrade() {
                listener(&core.peek());
            }
        })
    }

    /// Listen to loading and error transitions.
    pub fn on_status<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool, Option<&Error>) + 'static,
    {
        let core = Rc::downgrade(&self.core);
        self.core.on_status.add(move |_| {
            if let Some(core) = core.upgrade() {
                let (loading, error) = core.with_storage(|storage| (storage.loading, storage.error.clone()));
                listener(loading, error.as_ref());
            }
        })
    }

    /// Number of registered change and status listeners.
    pub fn subscriber_count(&self) -> usize {
        self.core.on_change.len() + self.core.on_status.len()
    }

    /// Resolve once the atom is not loading.
    ///
    /// Resolves with the current state right away if nothing is in flight,
    /// otherwise with the outcome of the pending update.
    pub fn settled(&self) -> LocalBoxFuture<'static, Result<T>> {
        let core = Rc::clone(&self.core);
        async move {
            let mut waited = false;
            loop {
                let next = core.on_status.next();
                let (loading, state, error) =
                    core.with_storage(|storage| (storage.loading, storage.state.clone(), storage.error.clone()));
                if !loading {
                    return match error {
                        Some(error) if waited => Err(error),
                        _ => Ok(state),
                    };
                }
                next.await;
                waited = true;
            }
        }
        .boxed_local()
    }

    /// Resolve with the state after the next change.
    pub fn changed(&self) -> LocalBoxFuture<'static, T> {
        let next = self.core.on_change.next();
        let core = Rc::clone(&self.core);
        async move {
            next.await;
            core.peek()
        }
        .boxed_local()
    }
}

impl<T: 'static> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = self.core.storage();
        let storage = storage.borrow();
        f.debug_struct("Atom")
            .field("key", &self.core.key)
            .field("name", &self.core.options.name)
            .field("state", &storage.state)
            .field("loading", &storage.loading)
            .field("error", &storage.error)
            .finish()
    }
}

/// An update applied later, unless the atom changed in the meantime.
pub struct Deferred<T: 'static> {
    core: Weak<Core<T>>,
    token: ChangeToken,
}

impl<T: Clone + PartialEq + 'static> Deferred<T> {
    /// Whether the atom changed since this was created.
    pub fn is_stale(&self) -> bool {
        match self.core.upgrade() {
            Some(core) => core.token() != self.token,
            None => true,
        }
    }

    /// Commit `value` if still current. Returns whether it was applied.
    pub fn apply(&self, value: T) -> bool {
        if self.is_stale() {
            return false;
        }
        match self.core.upgrade() {
            Some(core) => {
                core.commit(value, true);
                true
            }
            None => false,
        }
    }
}
