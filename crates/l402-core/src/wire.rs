//! The L402 wire format: the 402 challenge (header and JSON body) and the
//! `Authorization` header carrying a macaroon + preimage pair.

use serde::{Deserialize, Serialize};

use crate::macaroon::Macaroon;
use crate::types::PaymentHash;

pub const SCHEME: &str = "L402";

/// Everything the server knows when it emits a 402.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub payment_hash: PaymentHash,
    pub invoice: String,
    pub macaroon: Macaroon,
    pub amount_sats: u64,
    pub description: Option<String>,
}

/// JSON body of the 402 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeBody {
    pub status: u16,
    pub message: String,
    pub payment_hash: PaymentHash,
    pub invoice: String,
    pub macaroon: String,
    pub amount_sats: u64,
    pub description: Option<String>,
    pub protocol: String,
    pub instructions: Instructions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instructions {
    pub step1: String,
    pub step2: String,
    pub step3: String,
}

impl Challenge {
    /// The exact `WWW-Authenticate` literal: single space after the scheme,
    /// comma + space between fields, double-quoted values.
    pub fn www_authenticate(&self) -> String {
        format!(
            "{SCHEME} invoice=\"{}\", macaroon=\"{}\"",
            self.invoice,
            self.macaroon.encode()
        )
    }

    pub fn body(&self) -> ChallengeBody {
        ChallengeBody {
            status: 402,
            message: "Payment Required".to_string(),
            payment_hash: self.payment_hash,
            invoice: self.invoice.clone(),
            macaroon: self.macaroon.encode(),
            amount_sats: self.amount_sats,
            description: self.description.clone(),
            protocol: SCHEME.to_string(),
            instructions: Instructions {
                step1: "Pay the Lightning invoice to obtain the preimage".to_string(),
                step2: "Retry the request with Authorization: L402 <macaroon>:<preimage>"
                    .to_string(),
                step3: "The macaroon is bound to this invoice's payment hash".to_string(),
            },
        }
    }
}

/// The parsed pair from an `Authorization: L402 <macaroon>:<preimage>` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub macaroon_raw: String,
    pub preimage_hex: String,
}

impl Credentials {
    /// Strict parse of the `Authorization` header value.
    ///
    /// The scheme token matches case-insensitively; the payload is taken
    /// verbatim and split on the first `:`. Exactly one space separates the
    /// two, and both halves must be non-empty. Looser formats are rejected
    /// rather than guessed at: accepting them would allow a client to
    /// present credentials the server never minted the shape of.
    pub fn parse(header: &str) -> Option<Credentials> {
        let rest = header
            .get(..SCHEME.len())
            .filter(|scheme| scheme.eq_ignore_ascii_case(SCHEME))
            .and_then(|_| header.get(SCHEME.len()..))?;
        let payload = rest.strip_prefix(' ')?;
        if payload.starts_with(' ') {
            return None;
        }

        let (macaroon_raw, preimage_hex) = payload.split_once(':')?;
        if macaroon_raw.is_empty() || preimage_hex.is_empty() {
            return None;
        }

        Some(Credentials {
            macaroon_raw: macaroon_raw.to_string(),
            preimage_hex: preimage_hex.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macaroon::MintOptions;
    use crate::types::Secret;

    fn challenge() -> Challenge {
        let payment_hash: PaymentHash =
            "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
                .parse()
                .unwrap();
        let secret = Secret::new(vec![7u8; 32]).unwrap();
        let macaroon = Macaroon::mint(
            &secret,
            &payment_hash,
            &MintOptions {
                expires_at: Some(1_700_003_600),
                endpoint: Some("/api/joke".to_string()),
                method: Some("GET".to_string()),
                ip: None,
            },
        );
        Challenge {
            payment_hash,
            invoice: "lnbc50n1pexample".to_string(),
            macaroon,
            amount_sats: 5,
            description: Some("API access: GET /api/joke".to_string()),
        }
    }

    #[test]
    fn www_authenticate_literal() {
        let ch = challenge();
        let header = ch.www_authenticate();
        assert!(header.starts_with("L402 invoice=\"lnbc50n1pexample\", macaroon=\""));
        assert!(header.ends_with('"'));
    }

    #[test]
    fn body_shape() {
        let body = serde_json::to_value(challenge().body()).unwrap();
        assert_eq!(body["status"], 402);
        assert_eq!(body["message"], "Payment Required");
        assert_eq!(body["protocol"], "L402");
        assert_eq!(
            body["paymentHash"],
            "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        );
        assert_eq!(body["amountSats"], 5);
        assert!(body["instructions"]["step1"].is_string());

        // The embedded macaroon decodes and is bound to the same hash.
        let mac = Macaroon::decode(body["macaroon"].as_str().unwrap()).unwrap();
        assert_eq!(mac.id, body["paymentHash"].as_str().unwrap());
    }

    #[test]
    fn body_null_description() {
        let mut ch = challenge();
        ch.description = None;
        let body = serde_json::to_value(ch.body()).unwrap();
        assert!(body["description"].is_null());
    }

    #[test]
    fn parse_is_left_inverse_of_emission() {
        let mac = "bWFjYXJvb24";
        let preimage = "00ff00ff";
        let parsed = Credentials::parse(&format!("L402 {mac}:{preimage}")).unwrap();
        assert_eq!(parsed.macaroon_raw, mac);
        assert_eq!(parsed.preimage_hex, preimage);
    }

    #[test]
    fn scheme_is_case_insensitive() {
        assert!(Credentials::parse("l402 m:p").is_some());
        assert!(Credentials::parse("L402 m:p").is_some());
        assert!(Credentials::parse("l402 m:p").is_some());
    }

    #[test]
    fn payload_split_on_first_colon() {
        let parsed = Credentials::parse("L402 mac:pre:image").unwrap();
        assert_eq!(parsed.macaroon_raw, "mac");
        assert_eq!(parsed.preimage_hex, "pre:image");
    }

    #[test]
    fn strict_rejections() {
        for bad in [
            "",
            "L402",
            "L402 ",
            "L402  m:p",
            "L402\tm:p",
            "L402 mp",
            "L402 :p",
            "L402 m:",
            "Bearer m:p",
            "L402x m:p",
        ] {
            assert!(Credentials::parse(bad).is_none(), "accepted {bad:?}");
        }
    }
}
