//! Auto-pay client for L402-gated APIs.
//!
//! Issues the original request; on a 402 it parses the challenge body,
//! enforces a sats budget, pays the invoice through the wallet, and retries
//! once with `Authorization: L402 <macaroon>:<preimage>` while preserving
//! the original method, headers, and body. Everything else passes through
//! untouched, so the client behaves like a plain `reqwest::Client` against
//! ungated endpoints.

use http::{StatusCode, header};

use l402_toll::wallet::Wallet;

#[derive(Debug, thiserror::Error)]
pub enum AutoPayError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed 402 challenge: {0}")]
    MalformedChallenge(String),

    /// A streaming body cannot be replayed, so it cannot be auto-paid.
    #[error("Request body cannot be replayed for the paid retry")]
    UnclonableRequest,

    #[error("Invoice asks {asked} sats, over the {budget} sat budget")]
    OverBudget { asked: u64, budget: u64 },

    #[error("Wallet payment failed: {0}")]
    Payment(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// What a 402 challenge asks for, as far as the payer cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeTerms {
    pub invoice: String,
    pub macaroon: String,
    pub amount_sats: u64,
}

/// Extract the payable terms from a 402 challenge body.
///
/// Only `invoice`, `macaroon`, and `amountSats` matter to the payer; the
/// rest of the body is informational.
pub fn parse_challenge(body: &serde_json::Value) -> Result<ChallengeTerms, AutoPayError> {
    let field = |name: &str| {
        body[name]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AutoPayError::MalformedChallenge(format!("missing {name}")))
    };

    Ok(ChallengeTerms {
        invoice: field("invoice")?,
        macaroon: field("macaroon")?,
        amount_sats: body["amountSats"]
            .as_u64()
            .ok_or_else(|| AutoPayError::MalformedChallenge("missing amountSats".to_string()))?,
    })
}

/// Render the retry header value: `L402 <macaroon>:<preimage>`.
pub fn authorization_value(macaroon: &str, preimage_hex: &str) -> String {
    format!("L402 {macaroon}:{preimage_hex}")
}

/// A `reqwest` wrapper that transparently settles L402 challenges within a
/// budget.
#[derive(Debug, Clone)]
pub struct AutoPayClient<W> {
    http: reqwest::Client,
    wallet: W,
    /// Hard per-request cap in sats; challenges above it are not paid.
    max_sats: u64,
}

impl<W: Wallet> AutoPayClient<W> {
    pub fn new(wallet: W, max_sats: u64) -> Self {
        AutoPayClient {
            http: reqwest::Client::new(),
            wallet,
            max_sats,
        }
    }

    /// Bring your own `reqwest::Client`, e.g. with proxies or default
    /// headers configured.
    pub fn with_http(http: reqwest::Client, wallet: W, max_sats: u64) -> Self {
        AutoPayClient {
            http,
            wallet,
            max_sats,
        }
    }

    pub fn request(&self, method: http::Method, url: &str) -> reqwest::RequestBuilder {
        self.http.request(method, url)
    }

    /// Execute a request, paying one L402 challenge if the budget allows.
    ///
    /// Non-402 responses come back untouched, including errors. After a
    /// paid retry the response is returned as-is; a second 402 means the
    /// server refused the credential and is not paid again.
    pub async fn execute(
        &self,
        request: reqwest::Request,
    ) -> Result<reqwest::Response, AutoPayError> {
        let retry = request.try_clone().ok_or(AutoPayError::UnclonableRequest)?;

        let response = self.http.execute(request).await?;
        if response.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(response);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| AutoPayError::MalformedChallenge(err.to_string()))?;
        let terms = parse_challenge(&body)?;

        if terms.amount_sats > self.max_sats {
            return Err(AutoPayError::OverBudget {
                asked: terms.amount_sats,
                budget: self.max_sats,
            });
        }

        tracing::debug!(
            invoice = %terms.invoice,
            amount_sats = terms.amount_sats,
            "paying L402 challenge"
        );
        let paid = self
            .wallet
            .pay_invoice(&terms.invoice)
            .await
            .map_err(|err| AutoPayError::Payment(Box::new(err)))?;

        let mut retry = retry;
        let authorization = authorization_value(&terms.macaroon, &paid.preimage.to_string());
        retry.headers_mut().insert(
            header::AUTHORIZATION,
            authorization
                .parse()
                .map_err(|_| AutoPayError::MalformedChallenge("macaroon not header-safe".into()))?,
        );

        Ok(self.http.execute(retry).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l402_core::wire::Credentials;

    #[test]
    fn parse_challenge_picks_the_payable_fields() {
        let body = serde_json::json!({
            "status": 402,
            "message": "Payment Required",
            "paymentHash": "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925",
            "invoice": "lnbc50n1pexample",
            "macaroon": "bWFjYXJvb24",
            "amountSats": 5,
            "description": null,
            "protocol": "L402",
            "instructions": {"step1": "", "step2": "", "step3": ""}
        });
        let terms = parse_challenge(&body).unwrap();
        assert_eq!(terms.invoice, "lnbc50n1pexample");
        assert_eq!(terms.macaroon, "bWFjYXJvb24");
        assert_eq!(terms.amount_sats, 5);
    }

    #[test]
    fn parse_challenge_rejects_missing_fields() {
        let body = serde_json::json!({"invoice": "lnbc1", "amountSats": 5});
        assert!(matches!(
            parse_challenge(&body),
            Err(AutoPayError::MalformedChallenge(_))
        ));
    }

    #[test]
    fn authorization_round_trips_through_the_server_parser() {
        let value = authorization_value("bWFjYXJvb24", "00ff00ff");
        let credentials = Credentials::parse(&value).unwrap();
        assert_eq!(credentials.macaroon_raw, "bWFjYXJvb24");
        assert_eq!(credentials.preimage_hex, "00ff00ff");
    }
}
