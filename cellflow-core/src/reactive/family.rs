//! Families: memoized keyed factories of cells.
//!
//! The key is the whole argument tuple, so `family.get((1, 2))` twice
//! returns the same instance until `(1, 2)` is deleted.

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::scope::{run_in_scope, Scope, ScopeKind};

type Factory<K, C> = dyn Fn(&K) -> C;

struct FamilyInner<K, C> {
    factory: Box<Factory<K, C>>,
    entries: RefCell<IndexMap<K, C>>,
}

/// A keyed cache of cells.
pub struct Family<K, C> {
    inner: Rc<FamilyInner<K, C>>,
}

impl<K, C> Family<K, C>
where
    K: Hash + Eq + Clone + 'static,
    C: Clone + 'static,
{
    /// Create an empty family.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&K) -> C + 'static,
    {
        Self {
            inner: Rc::new(FamilyInner {
                factory: Box::new(factory),
                entries: RefCell::new(IndexMap::new()),
            }),
        }
    }

    /// The cell for `key`, created on first access.
    ///
    /// Cells are created outside the current scope, so they are not owned by
    /// whatever evaluation happens to request them first.
    pub fn get(&self, key: K) -> C {
        if let Some(cell) = self.inner.entries.borrow().get(&key) {
            return cell.clone();
        }
        let cell = run_in_scope(Scope::new(ScopeKind::Stable).isolated(), || (self.inner.factory)(&key));
        self.inner.entries.borrow_mut().insert(key, cell.clone());
        cell
    }

    /// Like `get`, plus a handle that deletes this entry.
    pub fn entry(&self, key: K) -> FamilyEntry<C> {
        let cell = self.get(key.clone());
        let family: Weak<FamilyInner<K, C>> = Rc::downgrade(&self.inner);
        FamilyEntry {
            cell,
            delete: Rc::new(move || {
                if let Some(inner) = family.upgrade() {
                    inner.entries.borrow_mut().shift_remove(&key);
                }
            }),
        }
    }

    /// Whether a cell exists for `key`.
    pub fn has(&self, key: &K) -> bool {
        self.inner.entries.borrow().contains_key(key)
    }

    /// Forget the cell for `key`. The next `get` creates a new one.
    pub fn delete(&self, key: &K) -> Option<C> {
        self.inner.entries.borrow_mut().shift_remove(key)
    }

    /// Forget every cell.
    pub fn clear(&self) {
        self.inner.entries.borrow_mut().clear();
    }

    /// Number of cached cells.
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    /// Whether no cell is cached.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.borrow().is_empty()
    }

    /// The cached keys in creation order.
    pub fn keys(&self) -> Vec<K> {
        self.inner.entries.borrow().keys().cloned().collect()
    }
}

impl<K, C> Clone for Family<K, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, C> fmt::Debug for Family<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Family")
            .field("len", &self.inner.entries.borrow().len())
            .finish()
    }
}

/// A family cell together with the means to delete it.
#[derive(Clone)]
pub struct FamilyEntry<C> {
    /// The cell.
    pub cell: C,
    delete: Rc<dyn Fn()>,
}

impl<C> FamilyEntry<C> {
    /// Remove this entry from its family.
    pub fn delete(&self) {
        (self.delete)()
    }
}

impl<C: fmt::Debug> fmt::Debug for FamilyEntry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FamilyEntry").field("cell", &self.cell).finish()
    }
}
