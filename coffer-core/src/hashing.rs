use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha3::{Digest, Sha3_256};

const REHASH_ROUNDS: usize = 100;

/// Derives the opaque key under which a secret is stored in plugin storage.
///
/// SHA3-256 over `collection_name || secret_name`, re-hashed a fixed number
/// of rounds, base64-encoded. Plugin storage only ever sees this value; the
/// plaintext secret name stays inside the daemon's catalogue.
pub fn hashed_secret_name(collection_name: &str, secret_name: &str) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(collection_name.as_bytes());
    hasher.update(secret_name.as_bytes());
    let mut digest = hasher.finalize();

    for _ in 0..REHASH_ROUNDS {
        digest = Sha3_256::digest(&digest);
    }

    STANDARD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(
            hashed_secret_name("kv", "password"),
            hashed_secret_name("kv", "password")
        );
    }

    #[test]
    fn distinct_inputs_produce_distinct_names() {
        let a = hashed_secret_name("kv", "password");
        let b = hashed_secret_name("kv", "passwore");
        let c = hashed_secret_name("kw", "password");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn output_does_not_leak_the_plaintext_name() {
        let hashed = hashed_secret_name("accounts", "super-secret-token");
        assert!(!hashed.contains("super-secret-token"));
        assert!(!hashed.contains("accounts"));
    }

    #[test]
    fn output_is_valid_base64_of_a_digest() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        let hashed = hashed_secret_name("kv", "a");
        let raw = STANDARD.decode(hashed).unwrap();
        assert_eq!(raw.len(), 32);
    }
}
