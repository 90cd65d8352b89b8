//! The narrow Lightning wallet contract the gate depends on, and a remote
//! client speaking it over HTTP.
//!
//! The booth never interprets a bolt11 invoice; it passes the string through
//! to the client and trusts the wallet's payment hash. Any [`Wallet`]
//! implementation works: the remote client below, a wallet library wrapped
//! in the trait, or a scripted mock in tests.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use l402_core::types::{PaymentHash, Preimage};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoice {
    pub amount_sats: u64,
    pub description: String,
    /// Invoice expiry in seconds.
    pub expiry_secs: u64,
}

/// What the wallet hands back for a freshly created invoice. The bolt11
/// string is opaque to the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceHandle {
    pub invoice: String,
    pub payment_hash: PaymentHash,
}

/// Settlement report from [`Wallet::wait_for_payment`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatus {
    pub paid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preimage: Option<Preimage>,
    /// Unix milliseconds of settlement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<u64>,
}

impl PaymentStatus {
    pub fn unpaid() -> Self {
        PaymentStatus {
            paid: false,
            preimage: None,
            settled_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidInvoice {
    pub preimage: Preimage,
}

/// Lightning wallet interface.
pub trait Wallet {
    type Error: std::error::Error + Send + Sync + 'static;

    fn create_invoice(
        &self,
        request: CreateInvoice,
    ) -> impl Future<Output = Result<InvoiceHandle, Self::Error>> + Send;

    /// Long-running: resolves when the invoice settles or `timeout` lapses.
    fn wait_for_payment(
        &self,
        payment_hash: PaymentHash,
        timeout: Duration,
    ) -> impl Future<Output = Result<PaymentStatus, Self::Error>> + Send;

    /// Pay someone else's invoice. Used by the auto-pay client, not the gate.
    fn pay_invoice(
        &self,
        bolt11: &str,
    ) -> impl Future<Output = Result<PaidInvoice, Self::Error>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteWalletError {
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),
    #[error("HTTP request error: {0}")]
    HttpRequestError(#[from] reqwest::Error),
    #[error("Wallet refused: {0}")]
    Refused(String),
}

/// A wallet daemon reached over HTTP from a connection URL.
///
/// Endpoints, all JSON:
/// - `POST invoices` with [`CreateInvoice`] returns [`InvoiceHandle`]
/// - `POST invoices/<hash>/wait?timeout_ms=<n>` returns [`PaymentStatus`]
/// - `POST payments` with `{"invoice": <bolt11>}` returns [`PaidInvoice`]
#[derive(Debug, Clone)]
pub struct RemoteWalletClient {
    base_url: Url,
    client: reqwest::Client,
}

impl RemoteWalletClient {
    pub fn from_url(base_url: Url) -> Self {
        RemoteWalletClient {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Bring your own client, e.g. to set auth headers from the connection
    /// URL's credentials.
    pub fn with_client(base_url: Url, client: reqwest::Client) -> Self {
        RemoteWalletClient { base_url, client }
    }
}

#[derive(Debug, Serialize)]
struct PayRequest<'a> {
    invoice: &'a str,
}

impl Wallet for RemoteWalletClient {
    type Error = RemoteWalletError;

    async fn create_invoice(&self, request: CreateInvoice) -> Result<InvoiceHandle, Self::Error> {
        let response = self
            .client
            .post(self.base_url.join("invoices")?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteWalletError::Refused(response.status().to_string()));
        }

        Ok(response.json().await?)
    }

    async fn wait_for_payment(
        &self,
        payment_hash: PaymentHash,
        timeout: Duration,
    ) -> Result<PaymentStatus, Self::Error> {
        let mut url = self.base_url.join(&format!("invoices/{payment_hash}/wait"))?;
        url.query_pairs_mut()
            .append_pair("timeout_ms", &timeout.as_millis().to_string());

        // The HTTP deadline sits slightly past the wallet-side deadline so
        // the wallet's own timeout report wins when both race.
        let response = self
            .client
            .post(url)
            .timeout(timeout + Duration::from_secs(5))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteWalletError::Refused(response.status().to_string()));
        }

        Ok(response.json().await?)
    }

    async fn pay_invoice(&self, bolt11: &str) -> Result<PaidInvoice, Self::Error> {
        let response = self
            .client
            .post(self.base_url.join("payments")?)
            .json(&PayRequest { invoice: bolt11 })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteWalletError::Refused(response.status().to_string()));
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_handle_wire_shape() {
        let handle: InvoiceHandle = serde_json::from_value(serde_json::json!({
            "invoice": "lnbc50n1pexample",
            "paymentHash": "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        }))
        .unwrap();
        assert_eq!(handle.invoice, "lnbc50n1pexample");
        assert_eq!(
            handle.payment_hash.to_string(),
            "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        );
    }

    #[test]
    fn payment_status_optional_fields() {
        let status: PaymentStatus =
            serde_json::from_value(serde_json::json!({ "paid": false })).unwrap();
        assert!(!status.paid);
        assert!(status.preimage.is_none());

        let settled: PaymentStatus = serde_json::from_value(serde_json::json!({
            "paid": true,
            "preimage": "0000000000000000000000000000000000000000000000000000000000000000",
            "settledAt": 1_700_000_000_000u64
        }))
        .unwrap();
        assert!(settled.paid);
        assert_eq!(settled.settled_at, Some(1_700_000_000_000));
    }
}
