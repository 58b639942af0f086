//! Cellflow Core
//!
//! This crate provides the runtime of the Cellflow state library. It
//! implements:
//!
//! - Reactive atoms with automatic dependency tracking
//! - Synchronous and asynchronous derivation through computed atoms
//! - Snapshots, families and component-style owners
//! - Cancellable task trees with signal-driven listeners
//!
//! Everything is single-threaded. Asynchronous work is spawned with
//! `tokio::task::spawn_local`, so it has to run inside a
//! `tokio::task::LocalSet`.
//!
//! # Architecture
//!
//! - `util`: callback groups, timers and equality helpers
//! - `reactive`: atoms, scopes, dependency collection and `wait()`
//! - `flow`: tasks, signals and the listen engine
//! - `error`: the shared error type
//!
//! # Example
//!
//! ```rust
//! use cellflow_core::reactive::{Atom, Update};
//!
//! // Create an atom
//! let count = Atom::new(1);
//!
//! // Derive a value from it
//! let source = count.clone();
//! let doubled = Atom::computed(move |_| Ok(Update::Value(source.state() * 2)));
//!
//! // Update the atom; the computed atom follows
//! count.set(5);
//! assert_eq!(doubled.peek(), 10);
//! ```

pub mod error;
pub mod flow;
pub mod reactive;
pub mod util;

pub use error::{Error, Result, UsageError};
pub use flow::{spawn, Flow, Signal, Task, TaskStatus};
pub use reactive::{wait, Atom, AtomOptions, Update};
