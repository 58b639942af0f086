//! Reducer-driven atoms.

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use super::atom::{Atom, AtomOptions, Core, Shape};
use super::scope::ScopeKind;
use super::update::{Context, Update};
use crate::error::Result;

type Reducer<T, A> = dyn Fn(&T, A, &Context) -> Result<Update<T>>;

/// An atom whose state changes only through `emit`.
///
/// Derefs to [`Atom`] for reading and listening.
pub struct Emittable<T: 'static, A: 'static> {
    atom: Atom<T>,
    reducer: Rc<Reducer<T, A>>,
}

impl<T: Clone + PartialEq + 'static> Atom<T> {
    /// Create an emittable atom.
    pub fn emittable<A, F>(initial: T, reducer: F) -> Emittable<T, A>
    where
        A: 'static,
        F: Fn(&T, A, &Context) -> Result<Update<T>> + 'static,
    {
        let core = Core::create(Shape::Emittable, initial, AtomOptions::default());
        Emittable {
            atom: Atom::start(core),
            reducer: Rc::new(reducer),
        }
    }

    /// Create an emittable atom with options.
    ///
    /// `init_action` is emitted once right after construction, and again
    /// whenever the atom is reset through a snapshot.
    pub fn emittable_with<A, F>(
        initial: T,
        reducer: F,
        options: AtomOptions<T>,
        init_action: Option<A>,
    ) -> Emittable<T, A>
    where
        A: Clone + 'static,
        F: Fn(&T, A, &Context) -> Result<Update<T>> + 'static,
    {
        let reducer: Rc<Reducer<T, A>> = Rc::new(reducer);
        let core = Core::create(Shape::Emittable, initial, options);

        if let Some(action) = init_action {
            let weak = Rc::downgrade(&core);
            let reducer = Rc::clone(&reducer);
            core.set_init_action(Rc::new(move || {
                if let Some(core) = weak.upgrade() {
                    run_reducer(&core, &*reducer, action.clone());
                }
            }));
        }

        Emittable {
            atom: Atom::start(core),
            reducer,
        }
    }
}

fn run_reducer<T, A>(core: &Core<T>, reducer: &Reducer<T, A>, action: A)
where
    T: Clone + PartialEq + 'static,
{
    core.dispatch(ScopeKind::Emittable, false, |state, context| reducer(state, action, context));
}

impl<T: Clone + PartialEq + 'static, A: 'static> Emittable<T, A> {
    /// Run the reducer with `action`.
    ///
    /// Reducer errors are stored on the atom rather than returned.
    ///
    /// # Panics
    ///
    /// Panics if the reducer returns [`Update::Future`].
    pub fn emit(&self, action: A) {
        run_reducer(&self.atom.core, &*self.reducer, action);
    }

    /// The underlying atom.
    pub fn atom(&self) -> &Atom<T> {
        &self.atom
    }
}

impl<T: 'static, A: 'static> Deref for Emittable<T, A> {
    type Target = Atom<T>;

    fn deref(&self) -> &Atom<T> {
        &self.atom
    }
}

impl<T: 'static, A: 'static> Clone for Emittable<T, A> {
    fn clone(&self) -> Self {
        Self {
            atom: self.atom.clone(),
            reducer: Rc::clone(&self.reducer),
        }
    }
}

impl<T: Clone + fmt::Debug + 'static, A: 'static> fmt::Debug for Emittable<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Emittable").field(&self.atom).finish()
    }
}
