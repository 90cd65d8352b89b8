//! Prometheus exposition-format rendering over the stats snapshot.
//!
//! Hand-rendered text rather than a metrics registry: the recorder already
//! holds every number, so the endpoint is a pure projection.

use std::fmt::Write;

use crate::stats::StatsSnapshot;

pub const PREFIX: &str = "lightning_toll_";

/// `Content-Type` for the rendered body.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Escape a label value: backslash, double quote, and newline.
fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render(snapshot: &StatsSnapshot, payments_per_minute: u64) -> String {
    let mut body = String::new();

    let _ = writeln!(body, "# HELP {PREFIX}revenue_sats_total Total revenue in sats");
    let _ = writeln!(body, "# TYPE {PREFIX}revenue_sats_total counter");
    let _ = writeln!(body, "{PREFIX}revenue_sats_total {}", snapshot.total_revenue);

    let _ = writeln!(body, "# HELP {PREFIX}requests_total Requests admitted through the gate");
    let _ = writeln!(body, "# TYPE {PREFIX}requests_total counter");
    let _ = writeln!(body, "{PREFIX}requests_total {}", snapshot.total_requests);

    let _ = writeln!(body, "# HELP {PREFIX}paid_requests_total Paid admissions");
    let _ = writeln!(body, "# TYPE {PREFIX}paid_requests_total counter");
    let _ = writeln!(body, "{PREFIX}paid_requests_total {}", snapshot.total_paid);

    let _ = writeln!(body, "# HELP {PREFIX}unique_payers Distinct payer ids observed");
    let _ = writeln!(body, "# TYPE {PREFIX}unique_payers gauge");
    let _ = writeln!(body, "{PREFIX}unique_payers {}", snapshot.unique_payers);

    let mut endpoints: Vec<_> = snapshot.endpoints.iter().collect();
    endpoints.sort_by(|a, b| a.0.cmp(b.0));

    let _ = writeln!(body, "# TYPE {PREFIX}endpoint_revenue_sats gauge");
    for (path, stats) in &endpoints {
        let _ = writeln!(
            body,
            "{PREFIX}endpoint_revenue_sats{{endpoint=\"{}\"}} {}",
            escape_label(path),
            stats.revenue
        );
    }

    let _ = writeln!(body, "# TYPE {PREFIX}endpoint_requests gauge");
    for (path, stats) in &endpoints {
        let _ = writeln!(
            body,
            "{PREFIX}endpoint_requests{{endpoint=\"{}\"}} {}",
            escape_label(path),
            stats.requests
        );
    }

    let _ = writeln!(body, "# TYPE {PREFIX}endpoint_paid gauge");
    for (path, stats) in &endpoints {
        let _ = writeln!(
            body,
            "{PREFIX}endpoint_paid{{endpoint=\"{}\"}} {}",
            escape_label(path),
            stats.paid
        );
    }

    let _ = writeln!(body, "# TYPE {PREFIX}endpoint_free gauge");
    for (path, stats) in &endpoints {
        let _ = writeln!(
            body,
            "{PREFIX}endpoint_free{{endpoint=\"{}\"}} {}",
            escape_label(path),
            stats.free
        );
    }

    let _ = writeln!(body, "# HELP {PREFIX}payments_per_minute Payments in the trailing 60s");
    let _ = writeln!(body, "# TYPE {PREFIX}payments_per_minute gauge");
    let _ = writeln!(body, "{PREFIX}payments_per_minute {payments_per_minute}");

    if snapshot.total_paid > 0 {
        let average = snapshot.total_revenue as f64 / snapshot.total_paid as f64;
        let _ = writeln!(body, "# HELP {PREFIX}average_payment_sats Mean sats per paid request");
        let _ = writeln!(body, "# TYPE {PREFIX}average_payment_sats gauge");
        let _ = writeln!(body, "{PREFIX}average_payment_sats {average}");
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsRecorder;

    const HASH: &str = "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925";

    #[test]
    fn renders_totals_and_endpoints() {
        let stats = StatsRecorder::new();
        stats.record("/api/joke", true, 5, "alice", Some(HASH), 1_000);
        stats.record("/api/joke", false, 0, "bob", None, 2_000);

        let body = render(&stats.snapshot(), 1);
        assert!(body.contains("lightning_toll_revenue_sats_total 5\n"));
        assert!(body.contains("lightning_toll_requests_total 2\n"));
        assert!(body.contains("lightning_toll_paid_requests_total 1\n"));
        assert!(body.contains("lightning_toll_unique_payers 1\n"));
        assert!(body.contains("lightning_toll_endpoint_revenue_sats{endpoint=\"/api/joke\"} 5\n"));
        assert!(body.contains("lightning_toll_endpoint_free{endpoint=\"/api/joke\"} 1\n"));
        assert!(body.contains("lightning_toll_payments_per_minute 1\n"));
        assert!(body.contains("lightning_toll_average_payment_sats 5\n"));
    }

    #[test]
    fn average_omitted_with_no_paid_requests() {
        let stats = StatsRecorder::new();
        stats.record("/api/joke", false, 0, "alice", None, 1_000);
        let body = render(&stats.snapshot(), 0);
        assert!(!body.contains("average_payment_sats"));
    }

    #[test]
    fn label_values_are_escaped() {
        let stats = StatsRecorder::new();
        stats.record("/api/\"quoted\"", true, 1, "alice", Some(HASH), 1_000);
        let body = render(&stats.snapshot(), 0);
        assert!(body.contains("{endpoint=\"/api/\\\"quoted\\\"\"}"));
    }
}
