//! Per-request Lightning payment gate for HTTP APIs, speaking the L402
//! protocol.
//!
//! A request without proof of payment receives a 402 carrying a freshly
//! minted bolt11 invoice and a macaroon bound to that invoice's payment
//! hash. After paying out of band the client retries with
//! `Authorization: L402 <macaroon>:<preimage>`, and the gate verifies the
//! pair cryptographically before admitting the request. Admission is purely
//! stateless on the credential side; the only shared state is the free-tier
//! accounting, the stats recorder, and the optional replay guard.
//!
//! The [`TollBooth`] owns configuration and shared state; [`TollBooth::toll`]
//! produces a per-route tower layer for use with axum.

pub mod axum;
pub mod clock;
pub mod config;
pub mod freetier;
pub mod gate;
pub mod metrics;
pub mod replay;
pub mod stats;
pub mod wallet;
pub mod watcher;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    Description, FreeWindow, PaymentCallback, PaymentEvent, Price, RouteConfig, TollConfig,
};
pub use gate::{GateOutcome, Rejection, RequestSnapshot, TollBooth, TollGate, TollReceipt};
pub use stats::{DashboardResponse, StatsSnapshot};
pub use wallet::{
    CreateInvoice, InvoiceHandle, PaidInvoice, PaymentStatus, RemoteWalletClient, Wallet,
};
