//! Settlement proof: `SHA256(preimage) == payment_hash`.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Check that `preimage_hex` settles `payment_hash_hex`.
///
/// Both arguments are hex strings as they arrive off the wire. Any decode
/// failure yields `false`; this never panics and the digest comparison is
/// constant time.
pub fn verify_preimage(preimage_hex: &str, payment_hash_hex: &str) -> bool {
    let Ok(preimage) = hex::decode(preimage_hex) else {
        return false;
    };
    let Ok(expected) = hex::decode(payment_hash_hex) else {
        return false;
    };

    let digest = Sha256::digest(&preimage);
    digest.as_slice().ct_eq(&expected).into()
}
