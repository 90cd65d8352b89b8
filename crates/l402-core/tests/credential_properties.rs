//! Property-style checks over randomized credentials: everything minted
//! verifies in a matching context, and any deviation rejects.

use l402_core::macaroon::{Macaroon, MintOptions, VerifyContext};
use l402_core::preimage::verify_preimage;
use l402_core::types::{Preimage, Secret};
use l402_core::wire::Credentials;

fn random_preimage() -> Preimage {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    Preimage(bytes)
}

fn contexts_matching(opts: &MintOptions, now_seconds: u64) -> VerifyContext {
    VerifyContext {
        endpoint: opts.endpoint.clone(),
        method: opts.method.clone(),
        client_id: opts.ip.clone(),
        now_seconds,
    }
}

#[test]
fn minted_credentials_always_verify_in_matching_context() {
    let endpoints = [None, Some("/api/joke".to_string())];
    let methods = [None, Some("GET".to_string()), Some("POST".to_string())];
    let ips = [None, Some("203.0.113.7".to_string())];
    let expiries = [None, Some(2_000_000_000u64)];

    for _ in 0..8 {
        let secret = Secret::generate();
        let preimage = random_preimage();
        let hash = preimage.payment_hash();

        for endpoint in &endpoints {
            for method in &methods {
                for ip in &ips {
                    for expires_at in &expiries {
                        let opts = MintOptions {
                            expires_at: *expires_at,
                            endpoint: endpoint.clone(),
                            method: method.clone(),
                            ip: ip.clone(),
                        };
                        let mac = Macaroon::mint(&secret, &hash, &opts);
                        let ctx = contexts_matching(&opts, 1_700_000_000);
                        mac.verify(&secret, &ctx).unwrap_or_else(|err| {
                            panic!("freshly minted credential rejected: {err} ({opts:?})")
                        });

                        // The encoded form round-trips and still verifies.
                        let decoded = Macaroon::decode(&mac.encode()).expect("decodes");
                        decoded.verify(&secret, &ctx).expect("round trip verifies");

                        // And the paired preimage settles the id.
                        assert!(verify_preimage(&preimage.to_string(), &mac.id));
                    }
                }
            }
        }
    }
}

#[test]
fn random_serialized_mutations_are_rejected() {
    let secret = Secret::generate();
    let preimage = random_preimage();
    let hash = preimage.payment_hash();
    let mac = Macaroon::mint(
        &secret,
        &hash,
        &MintOptions {
            expires_at: Some(2_000_000_000),
            endpoint: Some("/api/joke".to_string()),
            method: Some("GET".to_string()),
            ip: None,
        },
    );
    let ctx = VerifyContext {
        endpoint: Some("/api/joke".to_string()),
        method: Some("GET".to_string()),
        client_id: None,
        now_seconds: 1_700_000_000,
    };

    // Mutate the decoded JSON fields byte by byte at random positions; a
    // mutated credential must never verify.
    let mut rejected = 0u32;
    let mut total = 0u32;
    for _ in 0..200 {
        let mut tampered = mac.clone();
        let field: u8 = rand::random_range(0..3);
        let target = match field {
            0 => &mut tampered.id,
            1 => &mut tampered.signature,
            _ => {
                let idx = rand::random_range(0..tampered.caveats.len());
                &mut tampered.caveats[idx]
            }
        };
        let mut bytes = target.clone().into_bytes();
        let at = rand::random_range(0..bytes.len());
        let flip: u8 = rand::random_range(b'a'..=b'z');
        if bytes[at] == flip {
            continue;
        }
        bytes[at] = flip;
        let Ok(mutated) = String::from_utf8(bytes) else {
            continue;
        };
        *target = mutated;

        total += 1;
        if tampered.verify(&secret, &ctx).is_err() {
            rejected += 1;
        }
    }

    assert!(total > 0);
    assert_eq!(rejected, total, "every mutation must be rejected");
}

#[test]
fn wrong_preimage_never_settles() {
    for _ in 0..32 {
        let a = random_preimage();
        let b = random_preimage();
        let hash = a.payment_hash();
        assert!(verify_preimage(&a.to_string(), &hash.to_string()));
        if a != b {
            assert!(!verify_preimage(&b.to_string(), &hash.to_string()));
        }
    }
}

#[test]
fn authorization_parse_inverts_emission() {
    for (mac, preimage) in [
        ("bWFjYXJvb24", "00ff"),
        ("a", "b"),
        ("x-_9", "deadbeef:trailer"),
    ] {
        let parsed = Credentials::parse(&format!("L402 {mac}:{preimage}")).unwrap();
        assert_eq!(parsed.macaroon_raw, mac);
        assert_eq!(parsed.preimage_hex, preimage);
    }
}
