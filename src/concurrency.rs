//! Bounded concurrency gate (C4).
//!
//! Wraps a [`tokio::sync::Semaphore`] (FIFO over waiters) with an observable
//! active-count gauge. Release is structural: [`Permit`] is an RAII guard, so
//! "release exactly once per acquire on every exit path" is enforced by the
//! type system rather than by caller discipline.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::errors::{CoreError, CoreResult};

pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicI64>,
}

/// A held permit; decrements the active-count gauge on drop, whichever exit
/// path (success, failure, cancel) releases it.
pub struct Permit {
    _inner: OwnedSemaphorePermit,
    active: Arc<AtomicI64>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyGate {
    /// `capacity` is `max_concurrent_downloads`, validated 1..10 by
    /// [`crate::config::Settings::validate`] before construction.
    pub fn new(capacity: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            active: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Suspends until a permit is free; cancellable via `cancel`.
    pub async fn acquire(&self, cancel: &CancellationToken) -> CoreResult<Permit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoreError::Cancelled),
            result = self.semaphore.clone().acquire_owned() => {
                let inner = result.map_err(acquire_error_to_fatal)?;
                self.active.fetch_add(1, Ordering::SeqCst);
                Ok(Permit {
                    _inner: inner,
                    active: self.active.clone(),
                })
            }
        }
    }

    /// Observable gauge for status reporting.
    pub fn active_count(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }
}

fn acquire_error_to_fatal(_: AcquireError) -> CoreError {
    CoreError::fatal("concurrency gate semaphore closed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounds_active_count_to_capacity() {
        let gate = ConcurrencyGate::new(2);
        let cancel = CancellationToken::new();
        let p1 = gate.acquire(&cancel).await.unwrap();
        let p2 = gate.acquire(&cancel).await.unwrap();
        assert_eq!(gate.active_count(), 2);

        let gate_ref = &gate;
        let acquire_fut = gate_ref.acquire(&cancel);
        tokio::pin!(acquire_fut);
        tokio::select! {
            _ = &mut acquire_fut => panic!("third permit should not be available yet"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
        }

        drop(p1);
        let p3 = acquire_fut.await.unwrap();
        assert_eq!(gate.active_count(), 2);
        drop(p2);
        drop(p3);
        assert_eq!(gate.active_count(), 0);
    }

    #[tokio::test]
    async fn acquire_is_cancellable() {
        let gate = ConcurrencyGate::new(1);
        let cancel = CancellationToken::new();
        let _held = gate.acquire(&cancel).await.unwrap();

        let cancel2 = cancel.clone();
        cancel2.cancel();
        let result = gate.acquire(&cancel).await;
        assert!(matches!(result, Err(CoreError::Cancelled)));
    }
}
