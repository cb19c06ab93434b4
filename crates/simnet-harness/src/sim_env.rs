//! Seeded environment for reproducible runs.
//!
//! Randomness comes from a shared `ChaCha8Rng`, so the same seed yields the
//! same node identifiers and puzzle payloads. Time is tokio's clock, which
//! is virtual under turmoil and under a paused test runtime.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use simnet_core::Environment;

/// Deterministic environment for tests.
#[derive(Clone, Debug)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    epoch: tokio::time::Instant,
}

impl SimEnv {
    /// Environment whose random stream is fixed by `seed`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            epoch: tokio::time::Instant::now(),
        }
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        // A poisoned lock still holds a valid RNG state.
        let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        rng.fill_bytes(buffer);
    }

    fn wall_clock_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}
