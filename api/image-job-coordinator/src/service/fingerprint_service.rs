use sha2::{Digest, Sha256};

/// Trimmed, lower-cased form used for cache keys.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt.trim().to_lowercase()
}

/// SHA-256 hex digest of the normalized prompt.
pub fn fingerprint(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_prompt(prompt).as_bytes());
    hex::encode(hasher.finalize())
}
