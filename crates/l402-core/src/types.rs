use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::Error;

/// The 32-byte hash published in a Lightning invoice. Commits to a
/// [`Preimage`] that is revealed to the payer on settlement.
///
/// Rendered as lowercase hex everywhere it crosses a wire boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaymentHash(pub [u8; 32]);

/// The 32-byte secret whose SHA-256 equals a [`PaymentHash`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Preimage(pub [u8; 32]);

impl Preimage {
    /// The payment hash this preimage settles.
    pub fn payment_hash(&self) -> PaymentHash {
        let digest = Sha256::digest(self.0);
        PaymentHash(digest.into())
    }
}

// Deliberately not Debug-printing the secret bytes.
impl std::fmt::Debug for Preimage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Preimage(..)")
    }
}

fn parse_hex32(s: &str) -> Result<[u8; 32], hex::FromHexError> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(s, &mut out)?;
    Ok(out)
}

macro_rules! hex32_impls {
    ($ty:ident) => {
        impl Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl FromStr for $ty {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_hex32(s).map($ty)
            }
        }

        impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex32_impls!(PaymentHash);
hex32_impls!(Preimage);

/// Root key for macaroon signatures.
///
/// Construction enforces a minimum length so a misconfigured deployment
/// fails at factory time rather than minting weak credentials per request.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Minimum accepted key length in bytes. 32 random bytes are recommended.
    pub const MIN_LEN: usize = 16;

    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, Error> {
        let bytes = bytes.into();
        if bytes.len() < Self::MIN_LEN {
            return Err(Error::SecretTooShort(bytes.len()));
        }
        Ok(Secret(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, Error> {
        Self::new(hex::decode(s)?)
    }

    /// 32 bytes from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::fill(&mut bytes);
        Secret(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret({} bytes)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preimage_hashes_to_payment_hash() {
        // SHA256 of 32 zero bytes, a fixed vector.
        let preimage = Preimage([0u8; 32]);
        let hash = preimage.payment_hash();
        assert_eq!(
            hash.to_string(),
            "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925"
        );
    }

    #[test]
    fn hex_round_trip() {
        let s = "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925";
        let hash: PaymentHash = s.parse().unwrap();
        assert_eq!(hash.to_string(), s);
    }

    #[test]
    fn rejects_bad_hex() {
        assert!("deadbeef".parse::<PaymentHash>().is_err());
        assert!("zz".repeat(32).parse::<PaymentHash>().is_err());
    }

    #[test]
    fn serde_as_hex_string() {
        let s = "66687aadf862bd776c8fc18b8e9f8e20089714856ee233b3902a591d0d5f2925";
        let hash: PaymentHash = s.parse().unwrap();
        assert_eq!(serde_json::to_value(hash).unwrap(), serde_json::json!(s));
        let back: PaymentHash = serde_json::from_value(serde_json::json!(s)).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn secret_length_enforced() {
        assert!(Secret::new(vec![0u8; 8]).is_err());
        assert!(Secret::new(vec![0u8; 32]).is_ok());
        assert_eq!(Secret::generate().as_bytes().len(), 32);
    }
}
