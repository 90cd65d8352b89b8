//! Factory and per-route configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use l402_core::types::{PaymentHash, Preimage, Secret};

use crate::gate::RequestSnapshot;

/// Fired by the settlement watcher when an invoice issued in a 402 settles.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub payment_hash: PaymentHash,
    pub amount_sats: u64,
    pub endpoint: String,
    pub preimage: Preimage,
    /// Unix milliseconds reported by the wallet.
    pub settled_at: u64,
    pub client_id: String,
}

/// Fire-and-forget settlement hook. Runs on a watcher task, never on the
/// request path; panics are caught at the invocation boundary.
pub type PaymentCallback = Arc<dyn Fn(PaymentEvent) + Send + Sync>;

/// Booth-wide options. `secret` is required; everything else has the
/// documented default.
#[derive(Builder, Clone)]
pub struct TollConfig {
    /// Root key for macaroon signatures. At least 32 random bytes
    /// recommended; see [`Secret::generate`].
    pub secret: Secret,

    /// Price applied when a route specifies none.
    #[builder(default = 10)]
    pub default_sats: u64,

    /// Invoice expiry in seconds; also bounds each settlement watcher.
    #[builder(default = 300)]
    pub invoice_expiry_secs: u64,

    /// Lifetime of minted macaroons, folded in as the `expires_at` caveat.
    #[builder(default = 3600)]
    pub macaroon_expiry_secs: u64,

    /// Bind minted macaroons to the request path and require it at verify.
    #[builder(default = true)]
    pub bind_endpoint: bool,

    /// Bind minted macaroons to the HTTP method and require it at verify.
    #[builder(default = true)]
    pub bind_method: bool,

    /// Bind minted macaroons to the client id and require it at verify.
    #[builder(default = false)]
    pub bind_ip: bool,

    /// Reject a credential's second redemption. The seen-set is in-memory
    /// only and expires with the macaroon lifetime; it does not survive
    /// restarts.
    #[builder(default = false)]
    pub replay_protection: bool,

    /// Settlement hook; see [`PaymentEvent`].
    pub on_payment: Option<PaymentCallback>,
}

impl fmt::Debug for TollConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TollConfig")
            .field("default_sats", &self.default_sats)
            .field("invoice_expiry_secs", &self.invoice_expiry_secs)
            .field("macaroon_expiry_secs", &self.macaroon_expiry_secs)
            .field("bind_endpoint", &self.bind_endpoint)
            .field("bind_method", &self.bind_method)
            .field("bind_ip", &self.bind_ip)
            .field("replay_protection", &self.replay_protection)
            .field("on_payment", &self.on_payment.is_some())
            .finish()
    }
}

/// Price of one request on a route, in sats.
#[derive(Clone)]
pub enum Price {
    Fixed(u64),
    /// Resolved once per request against the request snapshot.
    Dynamic(Arc<dyn Fn(&RequestSnapshot) -> u64 + Send + Sync>),
}

impl Price {
    pub fn dynamic(f: impl Fn(&RequestSnapshot) -> u64 + Send + Sync + 'static) -> Self {
        Price::Dynamic(Arc::new(f))
    }

    pub fn resolve(&self, snapshot: &RequestSnapshot) -> u64 {
        match self {
            Price::Fixed(sats) => *sats,
            Price::Dynamic(f) => f(snapshot),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Price::Dynamic(_))
    }
}

impl From<u64> for Price {
    fn from(sats: u64) -> Self {
        Price::Fixed(sats)
    }
}

impl fmt::Debug for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Price::Fixed(sats) => write!(f, "Price::Fixed({sats})"),
            Price::Dynamic(_) => write!(f, "Price::Dynamic(..)"),
        }
    }
}

/// Invoice description for a route. The default renders
/// `"API access: <METHOD> <path>"`.
#[derive(Clone, Default)]
pub enum Description {
    #[default]
    Standard,
    Fixed(String),
    Dynamic(Arc<dyn Fn(&RequestSnapshot) -> String + Send + Sync>),
}

impl Description {
    pub fn dynamic(f: impl Fn(&RequestSnapshot) -> String + Send + Sync + 'static) -> Self {
        Description::Dynamic(Arc::new(f))
    }

    pub fn resolve(&self, snapshot: &RequestSnapshot) -> String {
        match self {
            Description::Standard => {
                format!("API access: {} {}", snapshot.method, snapshot.path)
            }
            Description::Fixed(text) => text.clone(),
            Description::Dynamic(f) => f(snapshot),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Description::Dynamic(_))
    }
}

impl From<&str> for Description {
    fn from(text: &str) -> Self {
        Description::Fixed(text.to_string())
    }
}

impl From<String> for Description {
    fn from(text: String) -> Self {
        Description::Fixed(text)
    }
}

impl fmt::Debug for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Description::Standard => write!(f, "Description::Standard"),
            Description::Fixed(text) => write!(f, "Description::Fixed({text:?})"),
            Description::Dynamic(_) => write!(f, "Description::Dynamic(..)"),
        }
    }
}

/// Free-tier window length. Accepts `"<n>ms|s|m|h|d"` or a raw millisecond
/// count; anything unparseable falls back to one hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeWindow(pub Duration);

impl FreeWindow {
    pub const DEFAULT: FreeWindow = FreeWindow(Duration::from_secs(3600));

    pub fn parse(input: &str) -> FreeWindow {
        let input = input.trim();

        let (digits, unit) = match input.find(|c: char| !c.is_ascii_digit()) {
            Some(idx) => input.split_at(idx),
            None => (input, ""),
        };
        let Ok(n) = digits.parse::<u64>() else {
            return FreeWindow::DEFAULT;
        };

        let millis = match unit {
            "" | "ms" => n,
            "s" => n * 1_000,
            "m" => n * 60_000,
            "h" => n * 3_600_000,
            "d" => n * 86_400_000,
            _ => return FreeWindow::DEFAULT,
        };

        FreeWindow(Duration::from_millis(millis))
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }
}

impl Default for FreeWindow {
    fn default() -> Self {
        FreeWindow::DEFAULT
    }
}

impl From<&str> for FreeWindow {
    fn from(input: &str) -> Self {
        FreeWindow::parse(input)
    }
}

impl From<u64> for FreeWindow {
    fn from(millis: u64) -> Self {
        FreeWindow(Duration::from_millis(millis))
    }
}

impl From<Duration> for FreeWindow {
    fn from(d: Duration) -> Self {
        FreeWindow(d)
    }
}

/// Per-route options.
#[derive(Builder, Debug, Clone)]
pub struct RouteConfig {
    /// Price per request; the booth's `default_sats` applies when absent.
    #[builder(into)]
    pub price: Option<Price>,

    /// Invoice description; defaults to `"API access: <METHOD> <path>"`.
    #[builder(into, default)]
    pub description: Description,

    /// Free admissions per client within each window.
    #[builder(default = 0)]
    pub free_requests: u32,

    /// Window over which `free_requests` is counted.
    #[builder(into, default)]
    pub free_window: FreeWindow,
}

impl RouteConfig {
    /// A route with no free tier at the booth's default price.
    pub fn paid() -> RouteConfig {
        RouteConfig::builder().build()
    }
}
