//! Completion barrier shared by the sessions of one connection.
//!
//! Initialized to the number of participating sessions. Each session
//! arrives once, when its own ping is acknowledged, then waits for the count
//! to reach zero before tearing down its transport. Without the wait, the
//! faster side could close the stream while the slower side's pong is still
//! in flight.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Countdown latch with an async wait.
///
/// The counter only decreases after construction and never underflows:
/// arrivals past zero are ignored.
#[derive(Debug)]
pub struct CompletionBarrier {
    participants: usize,
    remaining: AtomicUsize,
    released: Notify,
}

impl CompletionBarrier {
    /// Barrier for `participants` sessions.
    pub fn new(participants: usize) -> Self {
        Self { participants, remaining: AtomicUsize::new(participants), released: Notify::new() }
    }

    /// Number of sessions the barrier was created for.
    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Sessions that have not arrived yet.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Whether every participant has arrived.
    pub fn is_released(&self) -> bool {
        self.remaining() == 0
    }

    /// Record one arrival.
    ///
    /// Returns `true` for the arrival that released the barrier.
    pub fn arrive(&self) -> bool {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match previous {
            Ok(1) => {
                self.released.notify_waiters();
                true
            },
            Ok(_) => false,
            Err(_) => {
                tracing::warn!(participants = self.participants, "arrival on released barrier");
                false
            },
        }
    }

    /// Wait until every participant has arrived.
    pub async fn wait(&self) {
        loop {
            let notified = self.released.notified();
            let mut notified = std::pin::pin!(notified);
            // Register before re-checking so a release between the check and
            // the await is not missed.
            notified.as_mut().enable();

            if self.is_released() {
                return;
            }

            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[test]
    fn counts_down_to_zero() {
        let barrier = CompletionBarrier::new(2);

        assert!(!barrier.arrive());
        assert_eq!(barrier.remaining(), 1);
        assert!(barrier.arrive());
        assert!(barrier.is_released());
    }

    #[test]
    fn never_underflows() {
        let barrier = CompletionBarrier::new(1);

        assert!(barrier.arrive());
        assert!(!barrier.arrive());
        assert!(!barrier.arrive());
        assert_eq!(barrier.remaining(), 0);
    }

    #[test]
    fn empty_barrier_is_released() {
        let barrier = CompletionBarrier::new(0);
        assert!(barrier.is_released());
        assert!(!barrier.arrive());
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_released() {
        let barrier = CompletionBarrier::new(1);
        barrier.arrive();

        tokio::time::timeout(Duration::from_secs(1), barrier.wait())
            .await
            .expect("released barrier must not block");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiters_wake_on_last_arrival() {
        let barrier = Arc::new(CompletionBarrier::new(2));

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move { barrier.wait().await })
            })
            .collect();

        barrier.arrive();
        tokio::task::yield_now().await;
        assert!(!barrier.is_released());
        barrier.arrive();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter woke")
                .expect("waiter task");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_arrivals_release_exactly_once() {
        let barrier = Arc::new(CompletionBarrier::new(64));

        let arrivals: Vec<_> = (0..128)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move { barrier.arrive() })
            })
            .collect();

        let mut releases = 0;
        for arrival in arrivals {
            if arrival.await.expect("arrival task") {
                releases += 1;
            }
        }

        assert_eq!(releases, 1);
        assert_eq!(barrier.remaining(), 0);
    }
}
