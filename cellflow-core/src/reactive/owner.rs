//! Owners host component-style evaluations.
//!
//! A view layer renders by calling [`Owner::run`]. Reads made during the run
//! become the owner's dependencies, atoms and watchers created during it are
//! owned and disposed with it, and effects are held back until
//! [`Owner::mount`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::dependencies::{collect_dependencies, Dependencies, Invalidate};
use super::scope::{Dispose, Scope, ScopeKind};

struct OwnerInner {
    owned: RefCell<Vec<Rc<dyn Dispose>>>,
    effects: RefCell<Vec<Box<dyn FnOnce()>>>,
    dependencies: Rc<Dependencies>,
    invalidate: Invalidate,
    mounted: Cell<bool>,
    disposed: Cell<bool>,
}

impl OwnerInner {
    fn flush_effects(&self) {
        loop {
            let effects = std::mem::take(&mut *self.effects.borrow_mut());
            if effects.is_empty() {
                break;
            }
            for effect in effects {
                effect();
            }
        }
    }
}

/// A component-style scope host.
#[derive(Clone)]
pub struct Owner {
    inner: Rc<OwnerInner>,
}

impl Owner {
    /// Create an owner. `on_invalidate` is called whenever something read
    /// during the last `run` changes.
    pub fn new<F>(on_invalidate: F) -> Self
    where
        F: Fn() + 'static,
    {
        let inner = Rc::new_cyclic(|this: &Weak<OwnerInner>| {
            let this = this.clone();
            OwnerInner {
                owned: RefCell::new(Vec::new()),
                effects: RefCell::new(Vec::new()),
                dependencies: Rc::new(Dependencies::new()),
                invalidate: Rc::new(move || {
                    let alive = this.upgrade().map_or(false, |inner| !inner.disposed.get());
                    if alive {
                        on_invalidate();
                    }
                }),
                mounted: Cell::new(false),
                disposed: Cell::new(false),
            }
        });
        Self { inner }
    }

    /// Run `f` as a render of this owner.
    pub fn run<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let owned = Rc::downgrade(&self.inner);
        let effects = Rc::downgrade(&self.inner);
        let scope = Scope::new(ScopeKind::Component)
            .on_atom_created(move |disposable| {
                if let Some(inner) = owned.upgrade() {
                    inner.owned.borrow_mut().push(disposable);
                }
            })
            .on_effect(move |effect| match effects.upgrade() {
                Some(inner) if inner.disposed.get() => {}
                Some(inner) if !inner.mounted.get() => inner.effects.borrow_mut().push(effect),
                _ => effect(),
            });

        collect_dependencies(f, &self.inner.dependencies, Rc::clone(&self.inner.invalidate), scope)
    }

    /// Run the effects collected so far. Later effects run immediately.
    pub fn mount(&self) {
        if self.inner.disposed.get() || self.inner.mounted.replace(true) {
            return;
        }
        self.inner.flush_effects();
    }

    /// Dispose everything created under this owner, newest first.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        self.inner.effects.borrow_mut().clear();
        self.inner.dependencies.release_all();
        let owned = std::mem::take(&mut *self.inner.owned.borrow_mut());
        for disposable in owned.into_iter().rev() {
            disposable.dispose();
        }
    }

    /// Whether `mount` has run.
    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    /// Whether `dispose` has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Number of atoms and watchers owned.
    pub fn owned_count(&self) -> usize {
        self.inner.owned.borrow().len()
    }

    /// Number of channels read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.len()
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("mounted", &self.is_mounted())
            .field("disposed", &self.is_disposed())
            .field("owned", &self.owned_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{watch, Atom, Update};

    #[test]
    fn reads_invalidate_the_owner() {
        let renders = Rc::new(Cell::new(0));
        let counter = Rc::clone(&renders);
        let owner = Owner::new(move || counter.set(counter.get() + 1));
        let count = Atom::new(0);

        let value = owner.run(|| count.state());
        assert_eq!(value, 0);
        assert_eq!(owner.dependency_count(), 1);

        count.set(1);
        assert_eq!(renders.get(), 1);
    }

    #[test]
    fn effects_wait_for_mount() {
        let owner = Owner::new(|| {});
        let count = Atom::new(0);
        let runs = Rc::new(Cell::new(0));

        let watcher = owner.run(|| {
            let (source, counter) = (count.clone(), Rc::clone(&runs));
            watch(move || {
                source.state();
                counter.set(counter.get() + 1);
            })
        });
        assert_eq!(runs.get(), 0);

        owner.mount();
        assert_eq!(runs.get(), 1);
        count.set(1);
        assert_eq!(runs.get(), 2);
        assert_eq!(watcher.run_count(), 2);
    }

    #[test]
    fn dispose_tears_down_owned_atoms() {
        let owner = Owner::new(|| {});
        let source = Atom::new(1);

        let derived = owner.run(|| {
            let input = source.clone();
            Atom::computed(move |_| Ok(Update::Value(input.state() + 1)))
        });
        assert_eq!(owner.owned_count(), 1);
        assert_eq!(source.subscriber_count(), 1);

        owner.dispose();
        assert!(!derived.is_active());
        assert_eq!(source.subscriber_count(), 0);
    }
}
