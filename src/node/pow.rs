// SPDX-License-Identifier: AGPL-3.0-or-later

//! Proof-of-work throttling and nonce generation.
//!
//! Nonce searches are CPU-bound, so two things keep them from starving
//! the runtime: a global semaphore caps how many run at once, and the
//! search itself runs on the blocking thread pool. Permits are RAII and
//! release on every exit path, including cancellation.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Global cap on concurrent nonce generations.
#[derive(Clone)]
pub struct PowThrottle {
    slots: Arc<Semaphore>,
}

impl PowThrottle {
    pub fn new(max_slots: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_slots)),
        }
    }

    /// Wait for a free generation slot.
    pub async fn slot(&self) -> PowPermit {
        // The semaphore is never closed, so acquisition can only fail
        // after shutdown has already torn the throttle down.
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .expect("pow semaphore never closed");
        PowPermit { _permit: permit }
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

/// Held for the duration of one nonce search.
pub struct PowPermit {
    _permit: OwnedSemaphorePermit,
}

/// Search for a nonce whose hash with `digest` meets `difficulty`.
///
/// Runs on the blocking pool; the caller must already hold a
/// [`PowPermit`].
pub async fn generate_nonce(
    digest: [u8; 32],
    difficulty: u64,
) -> Result<String, tokio::task::JoinError> {
    tokio::task::spawn_blocking(move || {
        let target = u64::MAX / difficulty.max(1);
        let mut nonce: u64 = 0;
        loop {
            let mut hasher = Sha256::new();
            hasher.update(digest);
            hasher.update(nonce.to_le_bytes());
            let out = hasher.finalize();
            let mut word = [0u8; 8];
            word.copy_from_slice(&out[..8]);
            if u64::from_le_bytes(word) <= target {
                debug!(nonce, difficulty, "nonce found");
                return hex::encode(nonce.to_le_bytes());
            }
            nonce = nonce.wrapping_add(1);
        }
    })
    .await
}
