//! Budget-bounded proof-of-work search.
//!
//! A puzzle is a random payload and a difficulty. Solving it means finding a
//! nonce such that `SHA-256(payload || nonce)` starts with at least
//! `difficulty` zero bits. The search is pure CPU work; the harness runs it on
//! the blocking pool.

use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::env::Environment;

/// Nonce length in bytes (big-endian `u64`).
pub const NONCE_LEN: usize = 8;

/// Number of nonces tried between budget checks.
pub const BUDGET_CHECK_INTERVAL: u64 = 1024;

/// A solved puzzle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Required leading zero bits
    pub difficulty: u8,
    /// Puzzle payload
    pub data: Vec<u8>,
    /// Winning nonce
    pub nonce: [u8; NONCE_LEN],
    /// `SHA-256(data || nonce)`
    pub hash: [u8; 32],
}

impl Job {
    /// Recompute the hash and check it against the difficulty.
    pub fn verify(&self) -> bool {
        let hash = derive_hash(&self.data, &self.nonce);
        hash == self.hash && meets_difficulty(&hash, self.difficulty)
    }
}

/// Result of one search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    /// A nonce satisfying the difficulty was found
    Found(Job),
    /// Time budget ran out first
    BudgetExhausted {
        /// Nonces tried before giving up
        attempts: u64,
    },
    /// Difficulty 0: nothing to search
    Idle,
    /// Caller asked the search to stop
    Interrupted {
        /// Nonces tried before stopping
        attempts: u64,
    },
}

/// `SHA-256(data || nonce)`.
pub fn derive_hash(data: &[u8], nonce: &[u8; NONCE_LEN]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.update(nonce);
    hasher.finalize().into()
}

/// Count leading zero bits.
pub fn leading_zero_bits(hash: &[u8]) -> u32 {
    let mut count = 0;
    for &byte in hash {
        if byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros();
            break;
        }
    }
    count
}

/// Whether `hash` has at least `difficulty` leading zero bits.
pub fn meets_difficulty(hash: &[u8], difficulty: u8) -> bool {
    leading_zero_bits(hash) >= u32::from(difficulty)
}

/// Search for a nonce within `budget`.
///
/// Starts from a random nonce and walks upward, checking the clock every
/// [`BUDGET_CHECK_INTERVAL`] attempts. A zero budget gives up before hashing
/// anything.
pub fn search<E: Environment>(
    env: &E,
    data: Vec<u8>,
    difficulty: u8,
    budget: Duration,
) -> SearchOutcome {
    search_until(env, data, difficulty, budget, || false)
}

/// [`search`] that also polls `interrupted` at every budget check.
pub fn search_until<E, F>(
    env: &E,
    data: Vec<u8>,
    difficulty: u8,
    budget: Duration,
    interrupted: F,
) -> SearchOutcome
where
    E: Environment,
    F: Fn() -> bool,
{
    if difficulty == 0 {
        return SearchOutcome::Idle;
    }

    let started = env.now();
    let mut nonce = env.random_u64();
    let mut attempts: u64 = 0;

    loop {
        if attempts % BUDGET_CHECK_INTERVAL == 0 {
            if interrupted() {
                return SearchOutcome::Interrupted { attempts };
            }
            if env.now() - started >= budget {
                return SearchOutcome::BudgetExhausted { attempts };
            }
        }

        let candidate = nonce.to_be_bytes();
        let hash = derive_hash(&data, &candidate);
        attempts += 1;

        if meets_difficulty(&hash, difficulty) {
            return SearchOutcome::Found(Job { difficulty, data, nonce: candidate, hash });
        }

        nonce = nonce.wrapping_add(1);
    }
}
