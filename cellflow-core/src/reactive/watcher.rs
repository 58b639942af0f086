//! Watcher Implementation
//!
//! A Watcher is a side effect that re-runs whenever the atoms it read
//! change. Unlike a computed atom it produces no value.
//!
//! # How Watchers Work
//!
//! 1. When created, the watcher runs its function to establish its initial
//!    dependencies. If the current scope collects effects (an [`Owner`]
//!    that has not mounted yet), the first run is handed to it instead.
//!
//! 2. When any dependency changes, the watcher re-runs synchronously and
//!    its dependency set is diffed, exactly like a computed atom.
//!
//! 3. `watch_once` watchers stop after the first change: they release their
//!    dependencies and call their callback once.
//!
//! Dropping the last handle releases the dependencies.
//!
//! [`Owner`]: super::Owner

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::dependencies::{collect_dependencies, Dependencies, Invalidate};
use super::scope::{self, Dispose, Scope, ScopeKind};

enum Mode {
    Repeat,
    Once(RefCell<Option<Box<dyn FnOnce()>>>),
}

struct WatcherInner {
    run: Rc<dyn Fn()>,
    mode: Mode,
    dependencies: Rc<Dependencies>,
    invalidate: Invalidate,
    disposed: Cell<bool>,
    run_count: Cell<usize>,
}

impl WatcherInner {
    fn create(run: Rc<dyn Fn()>, mode: Mode) -> Rc<Self> {
        Rc::new_cyclic(|this: &Weak<Self>| {
            let this = this.clone();
            WatcherInner {
                run,
                mode,
                dependencies: Rc::new(Dependencies::new()),
                invalidate: Rc::new(move || {
                    if let Some(inner) = this.upgrade() {
                        inner.invalidated();
                    }
                }),
                disposed: Cell::new(false),
                run_count: Cell::new(0),
            }
        })
    }

    fn execute(&self) {
        if self.disposed.get() {
            return;
        }
        let run = Rc::clone(&self.run);
        collect_dependencies(
            || run(),
            &self.dependencies,
            Rc::clone(&self.invalidate),
            Scope::new(ScopeKind::Computed),
        );
        self.run_count.set(self.run_count.get() + 1);
    }

    fn invalidated(&self) {
        match &self.mode {
            Mode::Repeat => self.execute(),
            Mode::Once(callback) => {
                let callback = callback.borrow_mut().take();
                self.dispose();
                if let Some(callback) = callback {
                    callback();
                }
            }
        }
    }
}

impl Dispose for WatcherInner {
    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        self.dependencies.release_all();
    }
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        self.dependencies.release_all();
    }
}

/// A side effect bound to the atoms it reads.
#[derive(Clone)]
pub struct Watcher {
    inner: Rc<WatcherInner>,
}

impl Watcher {
    fn start(inner: Rc<WatcherInner>) -> Self {
        scope::atom_created(Rc::clone(&inner) as Rc<dyn Dispose>);
        let weak = Rc::downgrade(&inner);
        scope::add_effect(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.execute();
            }
        }));
        Self { inner }
    }

    /// Stop reacting and release every dependency.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether the watcher has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Number of times the function has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Number of channels currently watched.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.len()
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Run `f` now and again after every change of the atoms it read.
pub fn watch<F>(f: F) -> Watcher
where
    F: Fn() + 'static,
{
    Watcher::start(WatcherInner::create(Rc::new(f), Mode::Repeat))
}

/// Run `track` to collect dependencies, then call `on_change` once on the
/// first change of any of them.
pub fn watch_once<T, C>(track: T, on_change: C) -> Watcher
where
    T: Fn() + 'static,
    C: FnOnce() + 'static,
{
    let callback: Box<dyn FnOnce()> = Box::new(on_change);
    Watcher::start(WatcherInner::create(
        Rc::new(track),
        Mode::Once(RefCell::new(Some(callback))),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Atom;

    #[test]
    fn watcher_runs_on_creation_and_on_change() {
        let count = Atom::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (source, log) = (count.clone(), Rc::clone(&seen));
        let watcher = watch(move || log.borrow_mut().push(source.state()));

        count.set(1);
        count.set(2);

        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
        assert_eq!(watcher.run_count(), 3);
        assert_eq!(watcher.dependency_count(), 1);
    }

    #[test]
    fn disposed_watcher_stops() {
        let count = Atom::new(0);
        let source = count.clone();
        let watcher = watch(move || {
            source.state();
        });

        watcher.dispose();
        count.set(1);

        assert!(watcher.is_disposed());
        assert_eq!(watcher.run_count(), 1);
        assert_eq!(count.subscriber_count(), 0);
    }

    #[test]
    fn dropping_the_watcher_releases_dependencies() {
        let count = Atom::new(0);
        let source = count.clone();
        let watcher = watch(move || {
            source.state();
        });
        assert_eq!(count.subscriber_count(), 1);

        drop(watcher);
        assert_eq!(count.subscriber_count(), 0);
    }

    #[test]
    fn watch_once_fires_a_single_time() {
        let count = Atom::new(0);
        let fired = Rc::new(Cell::new(0));
        let source = count.clone();
        let counter = Rc::clone(&fired);
        let watcher = watch_once(
            move || {
                source.state();
            },
            move || counter.set(counter.get() + 1),
        );

        count.set(1);
        count.set(2);

        assert_eq!(fired.get(), 1);
        assert!(watcher.is_disposed());
        assert_eq!(count.subscriber_count(), 0);
    }
}
