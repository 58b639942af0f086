//! Timer futures.
//!
//! `delay` is the only timeout primitive in the crate. Callers compose
//! timeouts by racing a delay against other work.

use std::time::Duration;

use futures_util::future::{FutureExt, LocalBoxFuture};

use crate::error::{Error, Result};
use crate::flow::Cancellable;

/// Resolve after `duration`.
pub fn delay(duration: Duration) -> LocalBoxFuture<'static, ()> {
    tokio::time::sleep(duration).boxed_local()
}

/// Resolve with `value` after `duration`.
pub fn delay_value<V: 'static>(duration: Duration, value: V) -> LocalBoxFuture<'static, Result<V>> {
    async move {
        tokio::time::sleep(duration).await;
        Ok(value)
    }
    .boxed_local()
}

/// Reject with `error` after `duration`.
pub fn delay_error<V: 'static>(duration: Duration, error: Error) -> LocalBoxFuture<'static, Result<V>> {
    async move {
        tokio::time::sleep(duration).await;
        Err(error)
    }
    .boxed_local()
}

/// Resolve after `duration`, or reject with [`Error::Aborted`] as soon as
/// `cancellable` is cancelled.
pub fn cancellable_delay(duration: Duration, cancellable: &Cancellable) -> LocalBoxFuture<'static, Result<()>> {
    let cancellable = cancellable.clone();
    async move {
        tokio::select! {
            biased;
            _ = cancellable.cancelled() => Err(Error::Aborted),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
    .boxed_local()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn delay_value_resolves_after_duration() {
        let start = tokio::time::Instant::now();
        let value = delay_value(Duration::from_millis(20), 7).await.unwrap();
        assert_eq!(value, 7);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_delay_rejects_as_aborted() {
        let cancellable = Cancellable::new();
        let timer = cancellable_delay(Duration::from_secs(60), &cancellable);
        cancellable.cancel();
        let result = timer.await;
        assert!(matches!(result, Err(Error::Aborted)));
    }

    #[tokio::test(start_paused = true)]
    async fn uncancelled_delay_resolves() {
        let cancellable = Cancellable::new();
        let result = cancellable_delay(Duration::from_millis(5), &cancellable).await;
        assert!(result.is_ok());
    }
}
