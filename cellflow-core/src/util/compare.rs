//! Equality strategies used to decide whether an atom's state changed.
//!
//! Deep structural equality is `PartialEq`. Shallow equality compares
//! collections element by element using pointer identity, which is what an
//! atom holding shared `Rc` values usually wants.

use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

/// How an atom compares its current and next state.
pub enum Equality<T> {
    /// Structural equality via `PartialEq`.
    Structural,
    /// Every update counts as a change.
    Never,
    /// A caller-supplied comparison.
    Custom(Rc<dyn Fn(&T, &T) -> bool>),
}

impl<T: PartialEq> Equality<T> {
    /// Whether `current` and `next` are considered the same state.
    pub fn equals(&self, current: &T, next: &T) -> bool {
        match self {
            Self::Structural => current == next,
            Self::Never => false,
            Self::Custom(compare) => compare(current, next),
        }
    }
}

impl<T> Equality<T> {
    /// Build a custom strategy.
    pub fn by<F>(compare: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        Self::Custom(Rc::new(compare))
    }
}

impl<U: 'static> Equality<Vec<Rc<U>>> {
    /// Element-wise pointer identity.
    pub fn shallow() -> Self {
        Self::by(|a: &Vec<Rc<U>>, b: &Vec<Rc<U>>| shallow_eq(a, b))
    }
}

impl<T> Clone for Equality<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Structural => Self::Structural,
            Self::Never => Self::Never,
            Self::Custom(compare) => Self::Custom(Rc::clone(compare)),
        }
    }
}

impl<T> Default for Equality<T> {
    fn default() -> Self {
        Self::Structural
    }
}

impl<T> fmt::Debug for Equality<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structural => f.write_str("Structural"),
            Self::Never => f.write_str("Never"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Same length and the same allocation at every position.
pub fn shallow_eq<T>(a: &[Rc<T>], b: &[Rc<T>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Rc::ptr_eq(x, y))
}

/// Same keys, each mapped to the same allocation. Key order is ignored.
pub fn shallow_eq_map<K, V>(a: &IndexMap<K, Rc<V>>, b: &IndexMap<K, Rc<V>>) -> bool
where
    K: Hash + Eq,
{
    a.len() == b.len()
        && a
            .iter()
            .all(|(key, x)| b.get(key).map_or(false, |y| Rc::ptr_eq(x, y)))
}
