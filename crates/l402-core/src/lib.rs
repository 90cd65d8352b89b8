//! Credential and wire format core for the L402 payment protocol.
//!
//! This crate holds everything that can be computed without a wallet or an
//! HTTP framework: the chained-HMAC macaroon codec, the 402 challenge /
//! `Authorization` header wire format, and the preimage settlement proof.
//! The gating middleware lives in `l402-toll`.

pub mod errors;
pub mod macaroon;
pub mod preimage;
pub mod types;
pub mod wire;

pub use errors::{Error, Result};
pub use macaroon::{Macaroon, MintOptions, VerifyContext, VerifyError};
pub use preimage::verify_preimage;
pub use types::{PaymentHash, Preimage, Secret};
pub use wire::{Challenge, ChallengeBody, Credentials};
