//! Deterministic cache keys.
//!
//! A fingerprint folds together the operation, the subject (NFT id), and a
//! normalized prefix of the prompt. Keying on a prefix means differently
//! worded requests that start the same way share an entry.

use sha2::{Digest, Sha256};

/// Collapse whitespace runs to single spaces, trim, and lower-case.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// First `len` characters of the normalized prompt; `0` keeps all of it.
pub fn prompt_prefix(prompt: &str, len: usize) -> String {
    let normalized = normalize_prompt(prompt);
    if len == 0 {
        return normalized;
    }
    normalized.chars().take(len).collect()
}

/// `gen:` + hex SHA-256 of `"<op>|<subject>|<prefix>"`.
pub fn fingerprint(op: &str, subject: &str, prompt: &str, prefix_len: usize) -> String {
    let prefix = prompt_prefix(prompt, prefix_len);
    let mut hasher = Sha256::new();
    hasher.update(op.as_bytes());
    hasher.update(b"|");
    hasher.update(subject.as_bytes());
    hasher.update(b"|");
    hasher.update(prefix.as_bytes());
    format!("gen:{}", hex::encode(hasher.finalize()))
}
