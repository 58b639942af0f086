//! Reactive Primitives
//!
//! This module implements the atom runtime: atoms, computed atoms, emittable
//! atoms, watchers and the scope machinery that wires them together.
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An [`Atom`] is a cell holding a state plus a loading/error status. Reading
//! an atom inside an evaluation registers it as a dependency of whatever is
//! being evaluated. Writing it notifies every dependent.
//!
//! ## Computed Atoms
//!
//! A computed atom re-runs its function whenever one of the atoms it read
//! changes. Dependencies are re-collected on every run, so an atom that is no
//! longer read is unsubscribed right away. Asynchronous inputs go through
//! [`wait`], which keeps the dependency on the awaited atom.
//!
//! ## Emittable Atoms
//!
//! An [`Emittable`] runs a reducer for every emitted action.
//!
//! ## Watchers and Owners
//!
//! A [`Watcher`] is a side effect bound to the atoms it reads. An [`Owner`]
//! hosts component-style renders: it owns everything created while it runs
//! and holds effects back until it is mounted.
//!
//! # Implementation Notes
//!
//! Everything here is single-threaded. Scopes live on a thread-local stack;
//! reading an atom asks the innermost scope to record the dependency.
//! Asynchronous updates are spawned with `tokio::task::spawn_local`, so they
//! need a `LocalSet`.

mod atom;
mod dependencies;
mod emittable;
mod family;
mod hydrate;
mod id;
mod owner;
mod scope;
mod snapshot;
mod update;
mod wait;
mod watcher;

pub use atom::{Atom, AtomOptions, Deferred, Mutation};
pub use dependencies::{collect_dependencies, Channel, Dependencies, Invalidate};
pub use emittable::Emittable;
pub use family::{Family, FamilyEntry};
pub use hydrate::{HydrationStore, MemoryStore};
pub use id::{AtomKey, ChangeToken, ChannelId};
pub use owner::Owner;
pub use scope::{is_tracking, run_in_scope, untracked, Dispose, Scope, ScopeGuard, ScopeKind};
pub use snapshot::{snapshot_all, Revert, Snapshot};
pub use update::{Context, Update};
pub use wait::{wait, wait_all, wait_map, Awaiter, Waitable};
pub use watcher::{watch, watch_once, Watcher};
