//! Chained-HMAC bearer credentials bound to a Lightning payment hash.
//!
//! A macaroon carries an `id` (the payment hash of the invoice it was minted
//! alongside), an ordered list of caveat strings, and a signature computed by
//! folding each caveat into an HMAC chain seeded from the root secret. The
//! server keeps no record of minted credentials; verification recomputes the
//! chain and re-checks every caveat against the request context.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::types::{PaymentHash, Secret};

type HmacSha256 = Hmac<Sha256>;

pub const CAVEAT_EXPIRES_AT: &str = "expires_at";
pub const CAVEAT_ENDPOINT: &str = "endpoint";
pub const CAVEAT_METHOD: &str = "method";
pub const CAVEAT_IP: &str = "ip";

/// Caveat keys are joined to their values with this exact separator; a
/// caveat that does not contain it is malformed and fails verification.
const CAVEAT_SEP: &str = " = ";

/// A minted or decoded credential. Field order and caveat order are part of
/// the signed material; reordering produces a different signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macaroon {
    /// Lowercase-hex payment hash of the invoice this credential is bound to.
    pub id: String,
    /// Ordered restriction strings of the form `"<key> = <value>"`.
    pub caveats: Vec<String>,
    /// Hex-encoded chained HMAC-SHA256 over `id` and `caveats`.
    pub signature: String,
}

/// Restrictions folded into a credential at mint time.
///
/// Caveats are assembled in a fixed order (`expires_at`, `endpoint`,
/// `method`, `ip`), skipping absent fields.
#[derive(Debug, Clone, Default)]
pub struct MintOptions {
    pub expires_at: Option<u64>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub ip: Option<String>,
}

/// Request-side facts a credential is checked against.
///
/// A `None` dimension disables that check: the caveat model is monotonic,
/// so skipping a dimension can only widen what the caller accepts, which is
/// exactly what a server with the corresponding binding knob off wants.
#[derive(Debug, Clone, Default)]
pub struct VerifyContext {
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub client_id: Option<String>,
    pub now_seconds: u64,
}

/// Why a credential was rejected. `user_message` is the string surfaced in
/// the 401 body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("Invalid macaroon signature")]
    Signature,
    #[error("Macaroon expired")]
    Expired,
    #[error("Endpoint mismatch")]
    EndpointMismatch,
    #[error("Method mismatch")]
    MethodMismatch,
    #[error("Client mismatch")]
    ClientMismatch,
    #[error("Malformed caveat")]
    MalformedCaveat,
}

fn hmac_chain(secret: &Secret, id: &str, caveats: &[String]) -> [u8; 32] {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(id.as_bytes());
    let mut sig: [u8; 32] = mac.finalize().into_bytes().into();

    for caveat in caveats {
        let mut mac = HmacSha256::new_from_slice(&sig).expect("HMAC accepts any key length");
        mac.update(caveat.as_bytes());
        sig = mac.finalize().into_bytes().into();
    }

    sig
}

impl Macaroon {
    /// Mint a credential bound to `payment_hash` with the given restrictions.
    pub fn mint(secret: &Secret, payment_hash: &PaymentHash, opts: &MintOptions) -> Macaroon {
        let id = payment_hash.to_string();

        let mut caveats = Vec::new();
        if let Some(expires_at) = opts.expires_at {
            caveats.push(format!("{CAVEAT_EXPIRES_AT}{CAVEAT_SEP}{expires_at}"));
        }
        if let Some(endpoint) = &opts.endpoint {
            caveats.push(format!("{CAVEAT_ENDPOINT}{CAVEAT_SEP}{endpoint}"));
        }
        if let Some(method) = &opts.method {
            caveats.push(format!("{CAVEAT_METHOD}{CAVEAT_SEP}{method}"));
        }
        if let Some(ip) = &opts.ip {
            caveats.push(format!("{CAVEAT_IP}{CAVEAT_SEP}{ip}"));
        }

        let signature = hex::encode(hmac_chain(secret, &id, &caveats));

        Macaroon {
            id,
            caveats,
            signature,
        }
    }

    /// Serialize to the bearer form: unpadded base64url of the JSON object.
    pub fn encode(&self) -> String {
        // Serialization of a struct with only string fields cannot fail.
        let json = serde_json::to_string(self).expect("macaroon serializes");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Parse a bearer credential with the failure cause preserved.
    pub fn try_decode(raw: &str) -> crate::Result<Macaroon> {
        let bytes = URL_SAFE_NO_PAD.decode(raw)?;
        let json = String::from_utf8(bytes)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Parse a bearer credential. Any structural failure yields `None`;
    /// this runs on the request path and must never propagate an error.
    pub fn decode(raw: &str) -> Option<Macaroon> {
        Self::try_decode(raw).ok()
    }

    /// Recompute the HMAC chain and re-check every caveat against `ctx`.
    ///
    /// The signature check runs first, in constant time. Caveats are then
    /// evaluated in their encoded order; unknown keys are ignored for
    /// forward compatibility but still contribute to the signature.
    pub fn verify(&self, secret: &Secret, ctx: &VerifyContext) -> Result<(), VerifyError> {
        let expected = hmac_chain(secret, &self.id, &self.caveats);
        let presented = match hex::decode(&self.signature) {
            Ok(bytes) => bytes,
            Err(_) => return Err(VerifyError::Signature),
        };
        if presented.len() != expected.len()
            || presented.ct_eq(&expected).unwrap_u8() == 0
        {
            return Err(VerifyError::Signature);
        }

        for caveat in &self.caveats {
            let (key, value) = caveat
                .split_once(CAVEAT_SEP)
                .ok_or(VerifyError::MalformedCaveat)?;

            match key {
                CAVEAT_EXPIRES_AT => {
                    let expires_at: u64 =
                        value.parse().map_err(|_| VerifyError::MalformedCaveat)?;
                    if ctx.now_seconds > expires_at {
                        return Err(VerifyError::Expired);
                    }
                }
                CAVEAT_ENDPOINT => {
                    if let Some(endpoint) = &ctx.endpoint {
                        if endpoint != value {
                            return Err(VerifyError::EndpointMismatch);
                        }
                    }
                }
                CAVEAT_METHOD => {
                    if let Some(method) = &ctx.method {
                        if !method.eq_ignore_ascii_case(value) {
                            return Err(VerifyError::MethodMismatch);
                        }
                    }
                }
                CAVEAT_IP => {
                    if let Some(client_id) = &ctx.client_id {
                        if client_id != value {
                            return Err(VerifyError::ClientMismatch);
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// The payment hash this credential is bound to, if `id` is well-formed.
    pub fn payment_hash(&self) -> Option<PaymentHash> {
        self.id.parse().ok()
    }
}
