//! Diff helpers used before handing a diff to the message drafter.

/// True for an empty or whitespace-only diff.
pub fn is_blank(diff: &str) -> bool {
    diff.trim().is_empty()
}

/// A diff cut down to fit a byte budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedDiff<'a> {
    pub text: &'a str,
    /// Bytes dropped from the end of the original diff.
    pub truncated_bytes: usize,
}

/// Keep at most `max_bytes` of `diff`, cutting on a char boundary.
pub fn truncate_diff(diff: &str, max_bytes: usize) -> BoundedDiff<'_> {
    if diff.len() <= max_bytes {
        return BoundedDiff {
            text: diff,
            truncated_bytes: 0,
        };
    }
    let mut cut = max_bytes;
    while !diff.is_char_boundary(cut) {
        cut -= 1;
    }
    BoundedDiff {
        text: &diff[..cut],
        truncated_bytes: diff.len() - cut,
    }
}
