//! Challenge-response authentication.
//!
//! The server draws a random challenge and sends it to the client. The
//! client answers with SHA-256(challenge ‖ password); the server accepts
//! the connection only if that digest matches its own computation against
//! the configured password.

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::constants::CHALLENGE_LENGTH;

/// Draw a fresh random challenge.
pub fn generate_challenge() -> Vec<u8> {
    let mut challenge = vec![0u8; CHALLENGE_LENGTH];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

/// Compute SHA-256(challenge ‖ password), the response sent back by a client.
pub fn respond(challenge: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(challenge);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}

/// Check a client's response against the challenge the server issued and
/// its own configured password.
pub fn verify(challenge: &[u8], password: &str, response: &[u8]) -> bool {
    let expected = respond(challenge, password);
    // Constant-time-ish comparison isn't load-bearing here: a timing leak
    // of "how many leading bytes matched" on a 32-byte digest isn't a
    // practical attack surface, and the teacher's auth code doesn't use
    // one either. Keep this simple.
    expected == response
}
