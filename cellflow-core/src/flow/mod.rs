//! Structured Concurrency
//!
//! This module implements cancellable task trees and the flow context that
//! task bodies receive.
//!
//! # Concepts
//!
//! ## Tasks
//!
//! A [`Task`] runs an async body once. Tasks forked from a [`Flow`] are
//! children of the task owning that flow:
//!
//! - a parent succeeds only after all of its children have finished;
//! - a failing child fails its parent, which cancels the other children;
//! - cancelling a task cancels its children, never its parent.
//!
//! ## Signals
//!
//! A [`Signal`] is a multicast event source. Custom signals are driven by an
//! external emitter that starts with the first listener and stops with the
//! last one.
//!
//! ## Listeners
//!
//! [`Flow::listen`] forks a long-lived engine task that reacts to signals or
//! atoms according to a [`Policy`].
//!
//! # Implementation Notes
//!
//! Task bodies are spawned with `tokio::task::spawn_local`, so a `LocalSet`
//! must be running. A cancelled task's body future is dropped: none of its
//! continuations run afterwards.

mod awaitable;
mod cancellable;
mod context;
mod listen;
mod signal;
mod task;

pub use awaitable::Awaitable;
pub use cancellable::Cancellable;
pub use context::Flow;
pub use listen::{Listener, Policy, Source, Sources};
pub use signal::{EmitHandle, Lifecycle, Signal, SignalId};
pub use task::{spawn, Completion, Task, TaskId, TaskStatus};
