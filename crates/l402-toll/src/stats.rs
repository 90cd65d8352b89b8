//! In-memory revenue and traffic accounting.
//!
//! One locked aggregate mutated on every admission; readers get deep copies
//! so no caller can observe or mutate live state. Snapshots are eventually
//! consistent with in-flight requests, which is all the dashboard needs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Hard cap on the recent-payments ring buffer.
pub const RECENT_PAYMENTS_CAP: usize = 100;

/// How many recent payments the dashboard surfaces.
pub const DASHBOARD_RECENT_LIMIT: usize = 20;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStats {
    pub revenue: u64,
    pub requests: u64,
    pub paid: u64,
    pub free: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecentPayment {
    pub endpoint: String,
    pub amount_sats: u64,
    pub payer_id: String,
    pub payment_hash: String,
    /// Unix milliseconds at which the admission was recorded.
    pub timestamp: u64,
}

/// Deep copy of the recorder state at one instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_revenue: u64,
    pub total_requests: u64,
    pub total_paid: u64,
    pub unique_payers: u64,
    pub endpoints: HashMap<String, EndpointStats>,
    /// Oldest first, capped at [`RECENT_PAYMENTS_CAP`].
    pub recent_payments: Vec<RecentPayment>,
}

/// Dashboard projection: same totals, recent payments newest-first and
/// trimmed to [`DASHBOARD_RECENT_LIMIT`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub total_revenue: u64,
    pub total_requests: u64,
    pub total_paid: u64,
    pub unique_payers: u64,
    pub endpoints: HashMap<String, EndpointStats>,
    pub recent_payments: Vec<RecentPayment>,
}

#[derive(Debug, Default)]
struct StatsInner {
    total_revenue: u64,
    total_requests: u64,
    total_paid: u64,
    payers: HashSet<String>,
    endpoints: HashMap<String, EndpointStats>,
    recent: VecDeque<RecentPayment>,
}

#[derive(Debug, Default)]
pub struct StatsRecorder {
    inner: Mutex<StatsInner>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        StatsRecorder::default()
    }

    /// Record one admission. Called on the request path before the
    /// downstream handler runs; the critical section never yields.
    pub fn record(
        &self,
        endpoint: &str,
        paid: bool,
        amount_sats: u64,
        payer_id: &str,
        payment_hash: Option<&str>,
        now_millis: u64,
    ) {
        let mut inner = self.inner.lock().expect("stats lock");

        inner.total_requests += 1;
        let endpoint_stats = inner.endpoints.entry(endpoint.to_string()).or_default();
        endpoint_stats.requests += 1;

        if paid && amount_sats > 0 {
            endpoint_stats.revenue += amount_sats;
            endpoint_stats.paid += 1;
            inner.total_revenue += amount_sats;
            inner.total_paid += 1;
            inner.payers.insert(payer_id.to_string());
            inner.recent.push_back(RecentPayment {
                endpoint: endpoint.to_string(),
                amount_sats,
                payer_id: payer_id.to_string(),
                payment_hash: payment_hash.unwrap_or_default().to_string(),
                timestamp: now_millis,
            });
            while inner.recent.len() > RECENT_PAYMENTS_CAP {
                inner.recent.pop_front();
            }
        } else {
            endpoint_stats.free += 1;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock().expect("stats lock");
        StatsSnapshot {
            total_revenue: inner.total_revenue,
            total_requests: inner.total_requests,
            total_paid: inner.total_paid,
            unique_payers: inner.payers.len() as u64,
            endpoints: inner.endpoints.clone(),
            recent_payments: inner.recent.iter().cloned().collect(),
        }
    }

    /// Payments recorded within the trailing 60 seconds.
    pub fn payments_last_minute(&self, now_millis: u64) -> u64 {
        let inner = self.inner.lock().expect("stats lock");
        inner
            .recent
            .iter()
            .rev()
            .take_while(|p| now_millis.saturating_sub(p.timestamp) <= 60_000)
            .count() as u64
    }
}

impl StatsSnapshot {
    pub fn into_dashboard(self) -> DashboardResponse {
        let mut recent = self.recent_payments;
        recent.reverse();
        recent.truncate(DASHBOARD_RECENT_LIMIT);
        DashboardResponse {
            total_revenue: self.total_revenue,
            total_requests: self.total_requests,
            total_paid: self.total_paid,
            unique_payers: self.unique_payers,
            endpoints: self.endpoints,
            recent_payments: recent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925";

    #[test]
    fn paid_and_free_aggregation() {
        let stats = StatsRecorder::new();
        stats.record("/api/joke", true, 5, "alice", Some(HASH), 1_000);
        stats.record("/api/joke", true, 5, "bob", Some(HASH), 2_000);
        stats.record("/api/joke", false, 0, "carol", None, 3_000);
        stats.record("/api/time", true, 21, "alice", Some(HASH), 4_000);

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 4);
        assert_eq!(snap.total_paid, 3);
        assert_eq!(snap.total_revenue, 31);
        assert_eq!(snap.unique_payers, 2);

        let joke = &snap.endpoints["/api/joke"];
        assert_eq!(joke.requests, 3);
        assert_eq!(joke.paid, 2);
        assert_eq!(joke.free, 1);
        assert_eq!(joke.revenue, 10);

        // Cross-endpoint invariants.
        let revenue_sum: u64 = snap.endpoints.values().map(|e| e.revenue).sum();
        let paid_sum: u64 = snap.endpoints.values().map(|e| e.paid).sum();
        let req_sum: u64 = snap.endpoints.values().map(|e| e.paid + e.free).sum();
        assert_eq!(revenue_sum, snap.total_revenue);
        assert_eq!(paid_sum, snap.total_paid);
        assert_eq!(req_sum, snap.total_requests);
    }

    #[test]
    fn paid_with_zero_amount_counts_as_free() {
        let stats = StatsRecorder::new();
        stats.record("/api/joke", true, 0, "alice", Some(HASH), 1_000);
        let snap = stats.snapshot();
        assert_eq!(snap.total_paid, 0);
        assert_eq!(snap.endpoints["/api/joke"].free, 1);
        assert!(snap.recent_payments.is_empty());
    }

    #[test]
    fn ring_buffer_is_capped() {
        let stats = StatsRecorder::new();
        for i in 0..150u64 {
            stats.record("/api/joke", true, 1, "alice", Some(HASH), i);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.recent_payments.len(), RECENT_PAYMENTS_CAP);
        // Oldest entries were dropped.
        assert_eq!(snap.recent_payments[0].timestamp, 50);
        assert_eq!(snap.recent_payments.last().unwrap().timestamp, 149);
    }

    #[test]
    fn dashboard_is_newest_first_and_trimmed() {
        let stats = StatsRecorder::new();
        for i in 0..30u64 {
            stats.record("/api/joke", true, 1, "alice", Some(HASH), i);
        }
        let dash = stats.snapshot().into_dashboard();
        assert_eq!(dash.recent_payments.len(), DASHBOARD_RECENT_LIMIT);
        assert_eq!(dash.recent_payments[0].timestamp, 29);
        assert_eq!(dash.recent_payments.last().unwrap().timestamp, 10);
    }

    #[test]
    fn payments_last_minute_is_a_rolling_window() {
        let stats = StatsRecorder::new();
        stats.record("/api/joke", true, 1, "alice", Some(HASH), 10_000);
        stats.record("/api/joke", true, 1, "alice", Some(HASH), 50_000);
        stats.record("/api/joke", true, 1, "alice", Some(HASH), 90_000);
        assert_eq!(stats.payments_last_minute(100_000), 2);
        assert_eq!(stats.payments_last_minute(200_000), 0);
    }

    #[test]
    fn snapshot_is_detached_from_live_state() {
        let stats = StatsRecorder::new();
        stats.record("/api/joke", true, 5, "alice", Some(HASH), 1_000);
        let mut snap = stats.snapshot();
        snap.endpoints.get_mut("/api/joke").unwrap().revenue = 999;
        assert_eq!(stats.snapshot().endpoints["/api/joke"].revenue, 5);
    }
}
