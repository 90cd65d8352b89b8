//! Per-client windowed free-tier accounting.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use crate::clock::Clock;
use crate::config::FreeWindow;

#[derive(Debug, Clone, Copy)]
struct FreeTierEntry {
    count: u32,
    /// Unix millis at which this client's current window opened.
    window_start: u64,
}

/// Counts free admissions per client id within a rolling window.
///
/// Entries live in a TTL-bounded cache: reclamation of idle clients is the
/// cache's job (entries idle for two windows are evicted), while the window
/// arithmetic itself runs against the injectable clock. The per-key
/// read-modify-write happens under the cache's per-key compute lock and
/// never yields.
pub struct FreeTierAccountant {
    free_requests: u32,
    window: FreeWindow,
    clock: Arc<dyn Clock>,
    entries: Cache<String, FreeTierEntry>,
}

impl FreeTierAccountant {
    pub fn new(free_requests: u32, window: FreeWindow, clock: Arc<dyn Clock>) -> Self {
        let idle = (window.0 * 2).max(Duration::from_millis(1));
        FreeTierAccountant {
            free_requests,
            window,
            clock,
            entries: Cache::builder().time_to_idle(idle).build(),
        }
    }

    /// One free admission for `client_id`, if quota remains in its window.
    pub fn admit(&self, client_id: &str) -> bool {
        if self.free_requests == 0 {
            return false;
        }

        let now = self.clock.now_millis();
        let window_ms = self.window.as_millis();
        let mut admitted = false;

        let _ = self
            .entries
            .entry_by_ref(client_id)
            .and_upsert_with(|existing| {
                let mut entry = existing
                    .map(|e| e.into_value())
                    .filter(|e| now.saturating_sub(e.window_start) <= window_ms)
                    .unwrap_or(FreeTierEntry {
                        count: 0,
                        window_start: now,
                    });

                if entry.count < self.free_requests {
                    entry.count += 1;
                    admitted = true;
                }
                entry
            });

        admitted
    }

    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn accountant(free: u32, window_ms: u64) -> (FreeTierAccountant, Arc<ManualClock>) {
        let clock = ManualClock::at(1_000_000);
        let acct = FreeTierAccountant::new(free, FreeWindow::from(window_ms), clock.clone());
        (acct, clock)
    }

    #[test]
    fn zero_quota_never_admits() {
        let (acct, _) = accountant(0, 60_000);
        assert!(!acct.admit("alice"));
        assert!(acct.is_empty());
    }

    #[test]
    fn admits_up_to_quota_then_refuses() {
        let (acct, _) = accountant(3, 60_000);
        assert!(acct.admit("alice"));
        assert!(acct.admit("alice"));
        assert!(acct.admit("alice"));
        assert!(!acct.admit("alice"));
        // Another client has its own window.
        assert!(acct.admit("bob"));
    }

    #[test]
    fn window_lapse_resets_count() {
        let (acct, clock) = accountant(2, 60_000);
        assert!(acct.admit("alice"));
        assert!(acct.admit("alice"));
        assert!(!acct.admit("alice"));

        // Exactly one window later the entry is still the same window.
        clock.advance_millis(60_000);
        assert!(!acct.admit("alice"));

        clock.advance_millis(1);
        assert!(acct.admit("alice"));
    }

    #[test]
    fn idle_entries_are_evicted_by_the_cache() {
        // Short real-time window: the cache reclaims after two idle windows.
        let (acct, _) = accountant(5, 40);
        assert!(acct.admit("old"));
        assert_eq!(acct.len(), 1);

        std::thread::sleep(Duration::from_millis(120));
        assert!(acct.is_empty());
    }
}
