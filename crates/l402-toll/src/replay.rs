//! Optional single-use enforcement.
//!
//! Macaroons are self-authenticating, so by default the same credential and
//! preimage admit until the `expires_at` caveat lapses. Operators who want
//! single-use semantics enable `replay_protection`, which keeps this
//! per-instance seen-set keyed by payment hash. Entries expire with the
//! macaroon lifetime and the set does not survive restarts.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::clock::Clock;

pub struct ReplayGuard {
    /// Payment hash to first-seen unix millis; entries age out with the
    /// macaroon TTL, after which the credential is dead anyway.
    seen: Cache<String, u64>,
    clock: Arc<dyn Clock>,
}

impl ReplayGuard {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        ReplayGuard {
            seen: Cache::builder()
                .time_to_live(ttl.max(Duration::from_millis(1)))
                .build(),
            clock,
        }
    }

    /// True the first time a payment hash is presented within the TTL.
    pub fn check_and_insert(&self, payment_hash: &str) -> bool {
        let now = self.clock.now_millis();
        self.seen
            .entry_by_ref(payment_hash)
            .or_insert(now)
            .is_fresh()
    }

    pub fn len(&self) -> usize {
        self.seen.run_pending_tasks();
        self.seen.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
