//! Identifiers for the reactive system.
//!
//! Atoms are identified by an `AtomKey`, which lets an evaluation recognise
//! reads of its own atom. Every state mutation installs a fresh
//! `ChangeToken`, so an asynchronous update can tell whether it has been
//! superseded by comparing the token it captured with the current one.

use std::sync::atomic::{AtomicU64, Ordering};

pub use crate::util::GroupId as ChannelId;

/// Unique identifier for an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomKey(u64);

impl AtomKey {
    /// Generate a new unique atom key.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for AtomKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque version marker replaced on every state mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeToken(u64);

impl ChangeToken {
    /// Generate a token distinct from every token issued before.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ChangeToken {
    fn default() -> Self {
        Self::new()
    }
}
