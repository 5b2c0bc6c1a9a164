// ── Challenge-response authentication ──
//
// The server greets with a fresh 40-hex-character challenge; the client
// proves knowledge of the shared secret with
// `SHA1(challenge + " " + secret)` in lowercase hex. Unknown users take
// the same code path as wrong passwords.

use rand::RngCore;
use sha1::{Digest, Sha1};

use zino_config::Secrets;

/// `count` random bytes as a lowercase hex string (2·count characters).
pub fn random_hex(count: usize) -> String {
    let mut bytes = vec![0u8; count];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The expected response for one challenge/secret pair.
pub fn challenge_response(challenge: &str, secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(challenge.as_bytes());
    hasher.update(b" ");
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a USER command. Hashing happens for unknown users too, so
/// both failures cost the same.
pub fn verify(secrets: &Secrets, challenge: &str, user: &str, response: &str) -> bool {
    match secrets.password(user) {
        Some(secret) => challenge_response(challenge, secret) == response,
        None => {
            let _ = challenge_response(challenge, "-");
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn secrets() -> Secrets {
        Secrets::parse("user1 password123\n", "secrets").unwrap()
    }

    #[test]
    fn known_answer_from_the_protocol() {
        assert_eq!(
            challenge_response("6077fe9fa53e4921b35c11cf6ef8891bc0194875", "password123"),
            "4daf3c1448c2c4b3b92489024cc4676f70c26b1d"
        );
    }

    #[test]
    fn verify_accepts_only_the_exact_digest() {
        let challenge = "6077fe9fa53e4921b35c11cf6ef8891bc0194875";
        assert!(verify(
            &secrets(),
            challenge,
            "user1",
            "4daf3c1448c2c4b3b92489024cc4676f70c26b1d"
        ));
        assert!(!verify(&secrets(), challenge, "user1", "deadbeef"));
        assert!(!verify(
            &secrets(),
            challenge,
            "nobody",
            "4daf3c1448c2c4b3b92489024cc4676f70c26b1d"
        ));
    }

    #[test]
    fn challenges_are_long_and_unique() {
        let a = random_hex(20);
        let b = random_hex(20);
        assert_eq!(a.len(), 40);
        assert_ne!(a, b);
    }
}
