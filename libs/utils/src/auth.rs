//! MD5 challenge/response primitives used by the controller's auth gate.
//!
//! The protocol, reproduced from the dispatcher that drives it:
//!
//! * A fresh challenge is `MD5(date("DD-M-YYYY") || peer_host)`, rotating
//!   once per UTC day per peer.
//! * An account stores `stored_hash = MD5(plaintext_password)`.
//! * A login attempt sends `MD5(stored_hash || challenge)`; the server
//!   recomputes the same digest from its own `stored_hash` and compares.

use chrono::Utc;
use md5::{Digest, Md5};

fn hex_md5(input: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(input);
    format!("{:x}", hasher.finalize())
}

/// Hash a plaintext password the way an account record stores it.
pub fn hash_password(plaintext: &str) -> String {
    hex_md5(plaintext.as_bytes())
}

/// Compute today's challenge for a given peer host. Rotates at UTC midnight.
pub fn compute_challenge(peer_host: &str) -> String {
    let today = Utc::now().format("%d-%-m-%Y").to_string();
    hex_md5(format!("{today}{peer_host}").as_bytes())
}

/// Compute the response a correctly-behaving client would send, given the
/// stored (already-hashed) password and a challenge.
pub fn expected_response(stored_hash: &str, challenge: &str) -> String {
    hex_md5(format!("{stored_hash}{challenge}").as_bytes())
}

/// Verify a submitted response against the stored hash and challenge.
pub fn verify(stored_hash: &str, challenge: &str, submitted: &str) -> bool {
    expected_response(stored_hash, challenge) == submitted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let stored = hash_password("hunter2");
        let challenge = compute_challenge("127.0.0.1");
        let submitted = expected_response(&stored, &challenge);
        assert!(verify(&stored, &challenge, &submitted));
        assert!(!verify(&stored, &challenge, "garbage"));
    }

    #[test]
    fn challenge_is_stable_within_the_day() {
        let a = compute_challenge("1.2.3.4");
        let b = compute_challenge("1.2.3.4");
        assert_eq!(a, b);
    }

    #[test]
    fn challenge_differs_per_peer() {
        let a = compute_challenge("1.2.3.4");
        let b = compute_challenge("5.6.7.8");
        assert_ne!(a, b);
    }
}
