//! Leaf utilities with no dependency on the reactive engine.

mod callback_group;
mod compare;
mod delay;

pub use callback_group::{CallbackGroup, GroupId, Subscription, SubscriptionGuard};
pub use compare::{shallow_eq, shallow_eq_map, Equality};
pub use delay::{cancellable_delay, delay, delay_error, delay_value};
