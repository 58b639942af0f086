//! Snapshots
//!
//! `Atom::snapshot` swaps the atom's storage for a copy (or for fresh
//! storage when resetting) and returns a [`Revert`] holding the captured
//! storage. Reverting is compare-and-restore: it only puts the captured
//! storage back if the storage installed by that snapshot is still the
//! current one, so a stale revert never clobbers a newer snapshot.

use std::fmt;
use std::rc::Rc;

use super::atom::Atom;

/// Restores what a snapshot captured.
#[derive(Clone)]
pub struct Revert {
    restore: Rc<dyn Fn() -> bool>,
}

impl Revert {
    pub(crate) fn new<F>(restore: F) -> Self
    where
        F: Fn() -> bool + 'static,
    {
        Self {
            restore: Rc::new(restore),
        }
    }

    /// Restore the captured state. Returns whether anything was restored.
    pub fn revert(&self) -> bool {
        (self.restore)()
    }

    /// Combine several reverts. The combined revert restores in reverse
    /// order and reports whether any of them restored.
    pub fn all(reverts: Vec<Revert>) -> Self {
        Self::new(move || {
            reverts
                .iter()
                .rev()
                .fold(false, |restored, revert| revert.revert() || restored)
        })
    }
}

impl fmt::Debug for Revert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Revert")
    }
}

/// Anything that can be snapshotted.
pub trait Snapshot {
    /// Capture the current state. See [`Atom::snapshot`].
    fn snapshot(&self, reset: bool) -> Revert;
}

impl<T: Clone + PartialEq + 'static> Snapshot for Atom<T> {
    fn snapshot(&self, reset: bool) -> Revert {
        Atom::snapshot(self, reset)
    }
}

/// Snapshot several atoms at once.
pub fn snapshot_all(targets: &[&dyn Snapshot], reset: bool) -> Revert {
    Revert::all(targets.iter().map(|target| target.snapshot(reset)).collect())
}
