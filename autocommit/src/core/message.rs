//! Commit message composition.

/// `"<prefix> <drafted>"`, with surrounding whitespace removed from both parts.
pub fn compose_message(prefix: &str, drafted: &str) -> String {
    let prefix = prefix.trim();
    let drafted = drafted.trim();
    if prefix.is_empty() {
        return drafted.to_string();
    }
    format!("{prefix} {drafted}")
}
