use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_CONCURRENCY: usize = 3;

/// Counting gate for outstanding translation calls.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Held while a worker runs. Dropping it frees the slot, which also happens
/// when the owning task panics or is aborted.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub async fn acquire(&self) -> Result<Slot> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .context("concurrency limiter closed")?;
        Ok(Slot { _permit: permit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let limiter = ConcurrencyLimiter::new(1);
        let first = limiter.acquire().await.expect("first slot");
        assert_eq!(limiter.available(), 0);

        let blocked = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
        assert!(blocked.is_err());

        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(50), limiter.acquire())
            .await
            .expect("slot freed")
            .expect("second slot");
        drop(second);
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn panicking_holder_releases_slot() {
        let limiter = ConcurrencyLimiter::new(1);
        let slot = limiter.acquire().await.expect("slot");
        let handle = tokio::spawn(async move {
            let _slot = slot;
            panic!("worker crashed");
        });
        assert!(handle.await.is_err());
        assert_eq!(limiter.available(), 1);
    }
}
