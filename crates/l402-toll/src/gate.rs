//! The toll booth and its per-request admission state machine.
//!
//! For each request the gate decides one of three outcomes: admit (valid
//! macaroon + preimage, or free-tier quota remains), challenge (mint an
//! invoice and a bound macaroon, answer 402), or reject (credential failed
//! verification, or the wallet is down). Verification is purely
//! cryptographic; nothing about minted credentials is tracked server-side.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode, header};
use serde::Serialize;
use tokio::task::JoinHandle;

use l402_core::macaroon::{Macaroon, MintOptions, VerifyContext};
use l402_core::preimage::verify_preimage;
use l402_core::types::PaymentHash;
use l402_core::wire::{self, Challenge, Credentials};

use crate::clock::{Clock, SystemClock};
use crate::config::{RouteConfig, TollConfig};
use crate::freetier::FreeTierAccountant;
use crate::metrics;
use crate::replay::ReplayGuard;
use crate::stats::{DashboardResponse, StatsRecorder, StatsSnapshot};
use crate::wallet::{CreateInvoice, Wallet};
use crate::watcher::{self, WatchParams};

/// The request facts the gate evaluates: everything is borrowed from the
/// incoming request before the downstream handler sees it. `body` is only
/// populated for routes with dynamic price or description.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    /// Uppercase HTTP method.
    pub method: String,
    /// Request path, exact string compare against the `endpoint` caveat.
    pub path: String,
    pub client_id: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Attached to request extensions on admission, ahead of the downstream
/// handler.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TollReceipt {
    pub paid: bool,
    pub free: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_hash: Option<PaymentHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_sats: Option<u64>,
    pub client_id: String,
}

/// A refusal with the exact status and body `error` string to surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: StatusCode,
    pub error: String,
}

impl Rejection {
    pub fn invalid_macaroon() -> Self {
        Rejection {
            status: StatusCode::UNAUTHORIZED,
            error: "Invalid macaroon".to_string(),
        }
    }

    pub fn unauthorized(error: impl Into<String>) -> Self {
        Rejection {
            status: StatusCode::UNAUTHORIZED,
            error: error.into(),
        }
    }

    pub fn booth_error(message: impl std::fmt::Display) -> Self {
        Rejection {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: format!("Toll booth error: {message}"),
        }
    }
}

/// Result of evaluating one request.
#[derive(Debug, Clone)]
pub enum GateOutcome {
    Admit(TollReceipt),
    Challenge(Challenge),
    Reject(Rejection),
}

/// Per-route state owned by a [`TollGate`]: the options plus this route's
/// free-tier ledger.
pub struct RouteState {
    pub config: RouteConfig,
    pub accountant: Arc<FreeTierAccountant>,
}

/// A per-route middleware constructor; tower/axum glue lives in
/// [`crate::axum`].
pub struct TollGate<W> {
    pub booth: Arc<TollBooth<W>>,
    pub route: Arc<RouteState>,
}

impl<W> Clone for TollGate<W> {
    fn clone(&self) -> Self {
        TollGate {
            booth: Arc::clone(&self.booth),
            route: Arc::clone(&self.route),
        }
    }
}

/// Owns the configuration and all shared state of one payment gate:
/// stats, the optional replay guard, background task handles, the wallet,
/// and the clock.
pub struct TollBooth<W> {
    config: TollConfig,
    wallet: W,
    stats: StatsRecorder,
    replay: Option<Arc<ReplayGuard>>,
    clock: Arc<dyn Clock>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<W: Wallet + Clone + Send + Sync + 'static> TollBooth<W> {
    pub fn new(config: TollConfig, wallet: W) -> Arc<Self> {
        Self::with_clock(config, wallet, Arc::new(SystemClock))
    }

    pub fn with_clock(config: TollConfig, wallet: W, clock: Arc<dyn Clock>) -> Arc<Self> {
        let replay = config.replay_protection.then(|| {
            Arc::new(ReplayGuard::new(
                Duration::from_secs(config.macaroon_expiry_secs),
                Arc::clone(&clock),
            ))
        });

        Arc::new(TollBooth {
            config,
            wallet,
            stats: StatsRecorder::new(),
            replay,
            clock,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Per-route middleware constructor. Each route gets its own free-tier
    /// ledger.
    pub fn toll(self: &Arc<Self>, route: RouteConfig) -> TollGate<W> {
        let accountant = Arc::new(FreeTierAccountant::new(
            route.free_requests,
            route.free_window,
            Arc::clone(&self.clock),
        ));

        TollGate {
            booth: Arc::clone(self),
            route: Arc::new(RouteState {
                config: route,
                accountant,
            }),
        }
    }

    /// Decide admission for one request. Invoice creation is the only
    /// suspension point; it inherits the caller's cancellation scope.
    pub async fn evaluate(&self, route: &RouteState, snapshot: &RequestSnapshot) -> GateOutcome {
        match snapshot
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            Some(raw) if has_l402_scheme(raw) => self.redeem(route, snapshot, raw),
            _ => self.challenge_or_free(route, snapshot).await,
        }
    }

    /// Credentials are present: verify macaroon + preimage and admit as paid.
    fn redeem(&self, route: &RouteState, snapshot: &RequestSnapshot, raw: &str) -> GateOutcome {
        let Some(credentials) = Credentials::parse(raw) else {
            return GateOutcome::Reject(Rejection::invalid_macaroon());
        };
        let Some(macaroon) = Macaroon::decode(&credentials.macaroon_raw) else {
            return GateOutcome::Reject(Rejection::invalid_macaroon());
        };

        let ctx = VerifyContext {
            endpoint: self.config.bind_endpoint.then(|| snapshot.path.clone()),
            method: self.config.bind_method.then(|| snapshot.method.clone()),
            client_id: self.config.bind_ip.then(|| snapshot.client_id.clone()),
            now_seconds: self.clock.now_seconds(),
        };

        if let Err(err) = macaroon.verify(&self.config.secret, &ctx) {
            tracing::debug!(endpoint = %snapshot.path, %err, "macaroon rejected");
            return GateOutcome::Reject(Rejection::unauthorized(err.to_string()));
        }

        if !verify_preimage(&credentials.preimage_hex, &macaroon.id) {
            tracing::debug!(endpoint = %snapshot.path, "preimage does not settle payment hash");
            return GateOutcome::Reject(Rejection::unauthorized(
                "Invalid preimage — does not match payment hash",
            ));
        }

        if let Some(replay) = &self.replay {
            if !replay.check_and_insert(&macaroon.id) {
                return GateOutcome::Reject(Rejection::unauthorized("Macaroon already redeemed"));
            }
        }

        let amount_sats = self.resolve_price(route, snapshot);
        self.stats.record(
            &snapshot.path,
            true,
            amount_sats,
            &snapshot.client_id,
            Some(&macaroon.id),
            self.clock.now_millis(),
        );

        tracing::debug!(
            endpoint = %snapshot.path,
            payment_hash = %macaroon.id,
            amount_sats,
            "admitted as paid"
        );

        GateOutcome::Admit(TollReceipt {
            paid: true,
            free: false,
            payment_hash: macaroon.payment_hash(),
            amount_sats: Some(amount_sats),
            client_id: snapshot.client_id.clone(),
        })
    }

    /// No credentials: spend free quota if any remains, otherwise mint an
    /// invoice and a bound macaroon and challenge.
    async fn challenge_or_free(&self, route: &RouteState, snapshot: &RequestSnapshot) -> GateOutcome {
        if route.config.free_requests > 0 && route.accountant.admit(&snapshot.client_id) {
            self.stats.record(
                &snapshot.path,
                false,
                0,
                &snapshot.client_id,
                None,
                self.clock.now_millis(),
            );
            tracing::debug!(endpoint = %snapshot.path, client_id = %snapshot.client_id, "admitted as free");
            return GateOutcome::Admit(TollReceipt {
                paid: false,
                free: true,
                payment_hash: None,
                amount_sats: None,
                client_id: snapshot.client_id.clone(),
            });
        }

        let amount_sats = self.resolve_price(route, snapshot);
        let description = route.config.description.resolve(snapshot);

        let handle = match self
            .wallet
            .create_invoice(CreateInvoice {
                amount_sats,
                description: description.clone(),
                expiry_secs: self.config.invoice_expiry_secs,
            })
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(endpoint = %snapshot.path, %err, "invoice creation failed");
                return GateOutcome::Reject(Rejection::booth_error(err));
            }
        };

        let macaroon = Macaroon::mint(
            &self.config.secret,
            &handle.payment_hash,
            &MintOptions {
                expires_at: Some(self.clock.now_seconds() + self.config.macaroon_expiry_secs),
                endpoint: self.config.bind_endpoint.then(|| snapshot.path.clone()),
                method: self.config.bind_method.then(|| snapshot.method.clone()),
                ip: self.config.bind_ip.then(|| snapshot.client_id.clone()),
            },
        );

        if let Some(callback) = &self.config.on_payment {
            let task = watcher::spawn(
                self.wallet.clone(),
                Arc::clone(callback),
                WatchParams {
                    payment_hash: handle.payment_hash,
                    amount_sats,
                    endpoint: snapshot.path.clone(),
                    client_id: snapshot.client_id.clone(),
                    timeout: Duration::from_secs(self.config.invoice_expiry_secs),
                },
            );
            self.register_task(task);
        }

        tracing::debug!(
            endpoint = %snapshot.path,
            payment_hash = %handle.payment_hash,
            amount_sats,
            "challenging for payment"
        );

        GateOutcome::Challenge(Challenge {
            payment_hash: handle.payment_hash,
            invoice: handle.invoice,
            macaroon,
            amount_sats,
            description: Some(description),
        })
    }

    fn resolve_price(&self, route: &RouteState, snapshot: &RequestSnapshot) -> u64 {
        match &route.config.price {
            Some(price) => price.resolve(snapshot),
            None => self.config.default_sats,
        }
    }

    pub fn config(&self) -> &TollConfig {
        &self.config
    }

    pub fn wallet(&self) -> &W {
        &self.wallet
    }

    /// Current stats, deep-copied.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn dashboard(&self) -> DashboardResponse {
        self.stats.snapshot().into_dashboard()
    }

    /// Prometheus exposition text over the current stats.
    pub fn metrics_text(&self) -> String {
        let per_minute = self.stats.payments_last_minute(self.clock.now_millis());
        metrics::render(&self.stats.snapshot(), per_minute)
    }

    fn register_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().expect("task lock");
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Cancel all in-flight settlement watchers. Idempotent; call at
    /// graceful shutdown.
    pub fn close(&self) {
        let mut tasks = self.tasks.lock().expect("task lock");
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

fn has_l402_scheme(header: &str) -> bool {
    header
        .get(..wire::SCHEME.len())
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case(wire::SCHEME))
}

/// Client identity for free-tier accounting and optional IP binding: first
/// token of `X-Forwarded-For`, else the peer address, else `"unknown"`.
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}
