use std::fmt;

use serde::{Deserialize, Serialize};

use crate::env::Environment;

/// Fixed-size node identifier.
///
/// Unique within a topology and stable for the node's lifetime. Displayed as
/// the hex of its first 8 bytes, which is what log lines and result sinks
/// print.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; 32]);

impl NodeId {
    /// Identifier length in bytes.
    pub const LEN: usize = 32;

    /// Wrap raw identifier bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Random identifier drawn from the environment.
    pub fn random<E: Environment>(env: &E) -> Self {
        let mut bytes = [0u8; 32];
        env.random_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw identifier bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}
