//! Evaluation Scope
//!
//! The scope records what kind of evaluation is currently running and which
//! hooks it offers. Reads of an atom call the current scope's
//! `add_dependency` hook, which is how dependencies are tracked without
//! threading any parameter through user code.
//!
//! # Implementation
//!
//! We use a thread-local stack. `run_in_scope` pushes the merge of the
//! enclosing scope and the override, and a guard pops it again when dropped,
//! so the previous scope is restored even if the closure panics.
//!
//! Hooks set on the override win; hooks it leaves unset are inherited from
//! the enclosing scope. `on_done` is never inherited: it belongs to the
//! `run_in_scope` call that installed it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::dependencies::Channel;
use super::id::AtomKey;

thread_local! {
    static SCOPE_STACK: RefCell<Vec<Scope>> = RefCell::new(Vec::new());
}

/// Something owned by a scope that can be torn down with it.
pub trait Dispose {
    /// Release every resource held. Calling it twice is a no-op.
    fn dispose(&self);
}

/// The kind of evaluation a scope describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// A computed atom is re-running its function.
    Computed,
    /// An emittable atom is running its reducer.
    Emittable,
    /// An updatable atom is running an update function.
    Updatable,
    /// A component-style host is rendering.
    Component,
    /// Reads are not tracked.
    Stable,
}

pub(crate) type DependencyHook = Rc<dyn Fn(&Channel)>;
pub(crate) type AtomCreatedHook = Rc<dyn Fn(Rc<dyn Dispose>)>;
pub(crate) type EffectHook = Rc<dyn Fn(Box<dyn FnOnce()>)>;
pub(crate) type CleanupHook = Rc<dyn Fn(Rc<dyn Fn()>)>;
type DoneHook = Rc<dyn Fn()>;

/// A description of the current evaluation plus its hooks.
#[derive(Clone, Default)]
pub struct Scope {
    kind: Option<ScopeKind>,
    parent: Option<AtomKey>,
    add_dependency: Option<DependencyHook>,
    on_atom_created: Option<AtomCreatedHook>,
    add_effect: Option<EffectHook>,
    on_cleanup: Option<CleanupHook>,
    on_done: Option<DoneHook>,
    untracked: bool,
    isolated: bool,
}

impl Scope {
    /// An override of the given kind with no hooks.
    pub fn new(kind: ScopeKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// A `Stable` scope that hides the enclosing dependency hook.
    pub fn untracked() -> Self {
        Self::new(ScopeKind::Stable).without_tracking()
    }

    /// Hide the enclosing dependency hook from this scope.
    pub fn without_tracking(mut self) -> Self {
        self.untracked = true;
        self.add_dependency = None;
        self
    }

    /// Ignore the enclosing scope entirely instead of inheriting its hooks.
    pub fn isolated(mut self) -> Self {
        self.isolated = true;
        self
    }

    /// Mark `key` as the atom being evaluated, so it never depends on itself.
    pub fn with_parent(mut self, key: AtomKey) -> Self {
        self.parent = Some(key);
        self
    }

    /// Called for every channel read during the evaluation.
    pub fn on_dependency<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Channel) + 'static,
    {
        self.add_dependency = Some(Rc::new(hook));
        self
    }

    /// Called for every atom created during the evaluation.
    pub fn on_atom_created<F>(mut self, hook: F) -> Self
    where
        F: Fn(Rc<dyn Dispose>) + 'static,
    {
        self.on_atom_created = Some(Rc::new(hook));
        self
    }

    /// Receives effects instead of running them immediately.
    pub fn on_effect<F>(mut self, hook: F) -> Self
    where
        F: Fn(Box<dyn FnOnce()>) + 'static,
    {
        self.add_effect = Some(Rc::new(hook));
        self
    }

    /// Receives cleanup callbacks for the current run.
    pub fn on_cleanup<F>(mut self, hook: F) -> Self
    where
        F: Fn(Rc<dyn Fn()>) + 'static,
    {
        self.on_cleanup = Some(Rc::new(hook));
        self
    }

    /// Called once when `run_in_scope` exits.
    pub fn on_done<F>(mut self, hook: F) -> Self
    where
        F: Fn() + 'static,
    {
        self.on_done = Some(Rc::new(hook));
        self
    }

    /// The evaluation kind, if any.
    pub fn kind(&self) -> Option<ScopeKind> {
        self.kind
    }

    /// The atom being evaluated, if any.
    pub fn parent(&self) -> Option<AtomKey> {
        self.parent
    }

    /// Whether reads in this scope are recorded as dependencies.
    pub fn is_tracking(&self) -> bool {
        self.add_dependency.is_some()
    }

    /// The scope currently in effect on this thread.
    pub fn current() -> Option<Scope> {
        SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Overlay `other` on top of `self`.
    fn merge(&self, other: Scope) -> Scope {
        if other.isolated {
            return Scope { on_done: None, ..other };
        }
        Scope {
            kind: other.kind.or(self.kind),
            parent: other.parent.or(self.parent),
            add_dependency: if other.untracked {
                None
            } else {
                other.add_dependency.or_else(|| self.add_dependency.clone())
            },
            on_atom_created: other.on_atom_created.or_else(|| self.on_atom_created.clone()),
            add_effect: other.add_effect.or_else(|| self.add_effect.clone()),
            on_cleanup: other.on_cleanup.or_else(|| self.on_cleanup.clone()),
            on_done: None,
            untracked: other.untracked,
            isolated: false,
        }
    }

    /// The same scope without its `on_done` hook.
    pub(crate) fn detached(&self) -> Scope {
        Scope {
            on_done: None,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("kind", &self.kind)
            .field("parent", &self.parent)
            .field("tracking", &self.is_tracking())
            .field("on_cleanup", &self.on_cleanup.is_some())
            .finish()
    }
}

/// Guard that pops the scope when dropped.
///
/// This ensures the scope stack is properly maintained even if the
/// evaluation panics.
pub struct ScopeGuard {
    depth: usize,
    on_done: Option<DoneHook>,
}

impl ScopeGuard {
    fn enter(scope: Scope, on_done: Option<DoneHook>) -> Self {
        let depth = SCOPE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(scope);
            stack.len()
        });
        Self { depth, on_done }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "scope stack mismatch: expected depth {}, got {}",
                self.depth,
                stack.len()
            );
            stack.pop();
        });
        if let Some(on_done) = self.on_done.take() {
            on_done();
        }
    }
}

/// Run `f` with `scope` merged over the current scope.
pub fn run_in_scope<R, F>(scope: Scope, f: F) -> R
where
    F: FnOnce() -> R,
{
    let on_done = scope.on_done.clone();
    let merged = match Scope::current() {
        Some(enclosing) => enclosing.merge(scope),
        None => Scope {
            on_done: None,
            ..scope
        },
    };
    let _guard = ScopeGuard::enter(merged, on_done);
    f()
}

/// Run `f` without recording any dependency.
pub fn untracked<R, F>(f: F) -> R
where
    F: FnOnce() -> R,
{
    run_in_scope(Scope::untracked(), f)
}

/// Whether reads are currently being recorded.
pub fn is_tracking() -> bool {
    SCOPE_STACK.with(|stack| stack.borrow().last().map_or(false, Scope::is_tracking))
}

/// Report a read of `key` through `channel` to the current scope.
pub(crate) fn track<F>(key: AtomKey, channel: F)
where
    F: FnOnce() -> Channel,
{
    let hook = SCOPE_STACK.with(|stack| {
        stack.borrow().last().and_then(|scope| {
            if scope.parent == Some(key) {
                None
            } else {
                scope.add_dependency.clone()
            }
        })
    });
    if let Some(hook) = hook {
        hook(&channel());
    }
}

/// Hand a newly created atom to the current scope.
pub(crate) fn atom_created(atom: Rc<dyn Dispose>) {
    let hook = SCOPE_STACK.with(|stack| {
        stack
            .borrow()
            .last()
            .and_then(|scope| scope.on_atom_created.clone())
    });
    if let Some(hook) = hook {
        hook(atom);
    }
}

/// Give `effect` to the current scope, or run it now if nobody collects it.
pub(crate) fn add_effect(effect: Box<dyn FnOnce()>) {
    let hook = SCOPE_STACK.with(|stack| stack.borrow().last().and_then(|scope| scope.add_effect.clone()));
    match hook {
        Some(hook) => hook(effect),
        None => effect(),
    }
}

/// The cleanup hook of the current evaluation, if any.
pub(crate) fn cleanup_hook() -> Option<CleanupHook> {
    SCOPE_STACK.with(|stack| stack.borrow().last().and_then(|scope| scope.on_cleanup.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn scope_is_restored_after_run() {
        assert!(Scope::current().is_none());

        run_in_scope(Scope::new(ScopeKind::Computed), || {
            assert_eq!(Scope::current().and_then(|s| s.kind()), Some(ScopeKind::Computed));
        });

        assert!(Scope::current().is_none());
    }

    #[test]
    fn nested_scopes() {
        run_in_scope(Scope::new(ScopeKind::Component), || {
            run_in_scope(Scope::new(ScopeKind::Computed), || {
                assert_eq!(Scope::current().and_then(|s| s.kind()), Some(ScopeKind::Computed));
            });

            // After inner scope exits, outer should be current
            assert_eq!(Scope::current().and_then(|s| s.kind()), Some(ScopeKind::Component));
        });
    }

    #[test]
    fn hooks_are_inherited_unless_overridden() {
        let created = Rc::new(Cell::new(0));
        let created_clone = Rc::clone(&created);
        let outer = Scope::new(ScopeKind::Component).on_atom_created(move |_| {
            created_clone.set(created_clone.get() + 1);
        });

        run_in_scope(outer, || {
            run_in_scope(Scope::new(ScopeKind::Computed), || {
                let scope = Scope::current().unwrap();
                assert_eq!(scope.kind(), Some(ScopeKind::Computed));
                assert!(scope.on_atom_created.is_some());
            });
        });
    }

    #[test]
    fn on_done_runs_on_exit() {
        let done = Rc::new(Cell::new(false));
        let done_clone = Rc::clone(&done);
        let value = run_in_scope(Scope::new(ScopeKind::Stable).on_done(move || done_clone.set(true)), || {
            assert!(!done.get());
            42
        });
        assert_eq!(value, 42);
        assert!(done.get());
    }

    #[test]
    fn scope_is_restored_after_panic() {
        let result = std::panic::catch_unwind(|| {
            run_in_scope(Scope::new(ScopeKind::Computed), || panic!("boom"));
        });
        assert!(result.is_err());
        assert!(Scope::current().is_none());
    }

    #[test]
    fn untracked_masks_dependency_hook() {
        let tracking = Scope::new(ScopeKind::Computed).on_dependency(|_| {});
        run_in_scope(tracking, || {
            assert!(is_tracking());
            untracked(|| assert!(!is_tracking()));
            assert!(is_tracking());
        });
    }

    #[test]
    fn isolated_scope_drops_inherited_hooks() {
        let outer = Scope::new(ScopeKind::Component)
            .on_dependency(|_| {})
            .on_atom_created(|_| {});
        run_in_scope(outer, || {
            run_in_scope(Scope::new(ScopeKind::Stable).isolated(), || {
                let scope = Scope::current().unwrap();
                assert!(!scope.is_tracking());
                assert!(scope.on_atom_created.is_none());
            });
        });
    }

    #[test]
    fn effects_run_immediately_without_collector() {
        let ran = Rc::new(Cell::new(false));
        let ran_clone = Rc::clone(&ran);
        add_effect(Box::new(move || ran_clone.set(true)));
        assert!(ran.get());
    }
}
