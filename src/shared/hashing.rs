use sha2::{Digest, Sha256};

/// Content hash of normalized source, used for exact dedup and as the
/// TestCase `code_hash` column.
pub fn content_hash(source: &str) -> String {
    hash_value(&normalize_source(source))
}

pub fn hash_value(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache key for a completion call: deterministic over the inputs that
/// influence the response.
pub fn completion_cache_key(system: &str, prompt: &str, model: &str) -> String {
    hash_value(&format!("{}{}{}", system, prompt, model))
}

/// Line-ending and trailing-whitespace normalization so formatting-only
/// differences do not defeat exact dedup.
pub fn normalize_source(source: &str) -> String {
    source
        .replace("\r\n", "\n")
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
