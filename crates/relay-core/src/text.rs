use sha2::{Digest, Sha256};

/// Upper bound on the characters kept from one inbound prompt.
pub const MAX_PROMPT_CHARS: usize = 2_000;

/// Collapses whitespace runs to single spaces, trims, and caps the length.
pub fn sanitize_prompt(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, MAX_PROMPT_CHARS)
}

/// Truncates on a character boundary.
pub fn truncate_chars(raw: &str, max_chars: usize) -> String {
    match raw.char_indices().nth(max_chars) {
        Some((index, _)) => raw[..index].to_string(),
        None => raw.to_string(),
    }
}

/// Hashes a chat or user identifier so raw ids never leave the router.
pub fn hash_identifier(raw: impl std::fmt::Display) -> String {
    let digest = Sha256::digest(format!("relay-identity:{raw}").as_bytes());
    digest
        .iter()
        .take(16)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
