//! Stable identities for commands, promotions, plans, and windows.
//!
//! Everything downstream — governor counters, confidence artifacts,
//! delegation events, receipts — joins on these digests, so the inputs are
//! concatenated with explicit separators and never re-ordered.

/// Fingerprint of a normalized command within its domain scope.
pub fn command_fingerprint(domain_scope: &str, normalized: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain_scope.as_bytes());
    hasher.update(b"|");
    hasher.update(normalized.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Promotion identity: keyed by what actually ran (command + sorted
/// capabilities + adapter), independent of any class definition, so
/// delegation can never substitute for demonstrated reliability.
pub fn promotion_fingerprint(normalized: &str, capabilities: &[String], adapter: &str) -> String {
    let mut sorted: Vec<&str> = capabilities.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = blake3::Hasher::new();
    hasher.update(normalized.as_bytes());
    for cap in sorted {
        hasher.update(b"|");
        hasher.update(cap.as_bytes());
    }
    hasher.update(b"|");
    hasher.update(adapter.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Content hash of an already-serialized record (plan hashes, receipt
/// checksums). Callers serialize with serde_json, whose object keys are
/// ordered, so equal values always hash equal.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Truncated hex digest for compact identifiers such as scheduler window ids.
pub fn short_hash(input: &str, len: usize) -> String {
    let hex = blake3::hash(input.as_bytes()).to_hex().to_string();
    hex[..len.min(hex.len())].to_string()
}
