//! tower/axum integration: the per-route gate as a [`Layer`], plus the
//! dashboard and metrics handlers.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http::{HeaderValue, StatusCode, header};
use serde_json::json;
use tower::{Layer, Service};

use l402_core::wire::Challenge;

use crate::gate::{self, GateOutcome, Rejection, RequestSnapshot, TollBooth, TollGate};
use crate::metrics;
use crate::stats::DashboardResponse;
use crate::wallet::Wallet;

/// Routes with dynamic price or description buffer the request body up to
/// this many bytes; larger bodies fail the request rather than admit it
/// unpriced.
pub const BODY_BUFFER_LIMIT: usize = 256 * 1024;

impl<W, S> Layer<S> for TollGate<W> {
    type Service = TollGateService<W, S>;

    fn layer(&self, inner: S) -> Self::Service {
        TollGateService {
            gate: self.clone(),
            inner,
        }
    }
}

pub struct TollGateService<W, S> {
    gate: TollGate<W>,
    inner: S,
}

impl<W, S: Clone> Clone for TollGateService<W, S> {
    fn clone(&self) -> Self {
        TollGateService {
            gate: self.gate.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<W, S> Service<Request> for TollGateService<W, S>
where
    W: Wallet + Clone + Send + Sync + 'static,
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let gate = self.gate.clone();
        // Take the service that was polled ready, leave the clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (mut parts, body) = request.into_parts();

            let peer = parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0);
            let client_id = gate::client_id(&parts.headers, peer);

            let needs_body = gate
                .route
                .config
                .price
                .as_ref()
                .is_some_and(|p| p.is_dynamic())
                || gate.route.config.description.is_dynamic();

            let (snapshot_body, body) = if needs_body {
                match axum::body::to_bytes(body, BODY_BUFFER_LIMIT).await {
                    Ok(bytes) => (bytes.clone(), axum::body::Body::from(bytes)),
                    Err(err) => {
                        tracing::warn!(%err, "failed to buffer request body for pricing");
                        return Ok(
                            Rejection::booth_error("request body unreadable").into_response()
                        );
                    }
                }
            } else {
                (Bytes::new(), body)
            };

            let snapshot = RequestSnapshot {
                method: parts.method.as_str().to_string(),
                path: parts.uri.path().to_string(),
                client_id,
                headers: parts.headers.clone(),
                body: snapshot_body,
            };

            match gate.booth.evaluate(&gate.route, &snapshot).await {
                GateOutcome::Admit(receipt) => {
                    parts.extensions.insert(receipt);
                    inner.call(Request::from_parts(parts, body)).await
                }
                GateOutcome::Challenge(challenge) => {
                    Ok(ChallengeResponse(challenge).into_response())
                }
                GateOutcome::Reject(rejection) => Ok(rejection.into_response()),
            }
        })
    }
}

/// 402 with the `WWW-Authenticate` challenge header and JSON body.
#[derive(Debug, Clone)]
pub struct ChallengeResponse(pub Challenge);

impl IntoResponse for ChallengeResponse {
    fn into_response(self) -> Response {
        let header_value = HeaderValue::from_str(&self.0.www_authenticate());
        let mut response =
            (StatusCode::PAYMENT_REQUIRED, Json(self.0.body())).into_response();
        match header_value {
            Ok(value) => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
            Err(err) => {
                tracing::warn!(%err, "failed to encode WWW-Authenticate header; skipping")
            }
        }
        response
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.error }))).into_response()
    }
}

/// Prometheus text with the exposition-format content type.
#[derive(Debug, Clone)]
pub struct MetricsResponse(pub String);

impl IntoResponse for MetricsResponse {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, metrics::CONTENT_TYPE)], self.0).into_response()
    }
}

/// Dashboard JSON handler; mount with `.with_state(booth)`.
pub async fn dashboard<W>(State(booth): State<Arc<TollBooth<W>>>) -> Json<DashboardResponse>
where
    W: Wallet + Clone + Send + Sync + 'static,
{
    Json(booth.dashboard())
}

/// Prometheus scrape handler; mount with `.with_state(booth)`.
pub async fn prometheus<W>(State(booth): State<Arc<TollBooth<W>>>) -> MetricsResponse
where
    W: Wallet + Clone + Send + Sync + 'static,
{
    MetricsResponse(booth.metrics_text())
}
