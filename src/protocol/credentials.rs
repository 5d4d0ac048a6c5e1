//! Credential derivation shared by client and server.
//!
//! Passwords never cross the wire. At registration the client picks a
//! random salt and sends `SHA-512(salt || password || salt)`. At login the
//! server issues a random challenge and the client proves knowledge of the
//! stored hash by sending `SHA-512(challenge || passhash || challenge)`.

use rand::RngCore;
use sha2::{Digest, Sha512};

use crate::protocol::packets::types::{CHALLENGE_LEN, PASSHASH_LEN, SALT_LEN};

/// Generates a random registration salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Generates a random login challenge.
pub fn generate_challenge() -> [u8; CHALLENGE_LEN] {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

/// Derives the stored password hash from a salt and password.
pub fn compute_passhash(salt: &[u8], password: &str) -> [u8; PASSHASH_LEN] {
    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}

/// Derives the challenge solution from a challenge and stored hash.
pub fn compute_solution(challenge: &[u8], passhash: &[u8]) -> [u8; PASSHASH_LEN] {
    let mut hasher = Sha512::new();
    hasher.update(challenge);
    hasher.update(passhash);
    hasher.update(challenge);
    hasher.finalize().into()
}

/// Checks a submitted solution; both sides are one-shot digests of a
/// random challenge.
pub fn solution_matches(challenge: &[u8], passhash: &[u8], solution: &[u8]) -> bool {
    compute_solution(challenge, passhash) == solution
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passhash_is_deterministic_and_salt_sensitive() {
        let salt_a = [1u8; SALT_LEN];
        let salt_b = [2u8; SALT_LEN];
        assert_eq!(
            compute_passhash(&salt_a, "hunter2"),
            compute_passhash(&salt_a, "hunter2")
        );
        assert_ne!(
            compute_passhash(&salt_a, "hunter2"),
            compute_passhash(&salt_b, "hunter2")
        );
        assert_ne!(
            compute_passhash(&salt_a, "hunter2"),
            compute_passhash(&salt_a, "hunter3")
        );
    }

    #[test]
    fn solution_round_trip() {
        let salt = generate_salt();
        let passhash = compute_passhash(&salt, "hunter2");
        let challenge = generate_challenge();
        let solution = compute_solution(&challenge, &passhash);
        assert!(solution_matches(&challenge, &passhash, &solution));

        let other_challenge = generate_challenge();
        assert!(!solution_matches(&other_challenge, &passhash, &solution));
    }

    #[test]
    fn generated_material_has_declared_lengths() {
        assert_eq!(generate_salt().len(), SALT_LEN);
        assert_eq!(generate_challenge().len(), CHALLENGE_LEN);
        assert_eq!(compute_passhash(&[0u8; 16], "pw").len(), PASSHASH_LEN);
    }
}
