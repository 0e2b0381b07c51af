//! Best-effort cleanup of model output
//!
//! Models wrap code in markdown fences even when told not to. This strips
//! the fence markers (with an optional language tag) and trims the result.
//! It does not check that what is left is a valid script.

use regex::Regex;
use std::sync::LazyLock;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)```(?:(?:jsonl|json|python|py|javascript|js|text|plaintext|plot)\b)?")
        .expect("fence pattern is valid")
});

/// Remove every fence marker, then trim surrounding whitespace.
///
/// Removal repeats until nothing matches, so backtick runs that only become
/// a marker after an inner removal are stripped too.
pub fn sanitize(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = FENCE.replace_all(&current, "");
        if next.len() == current.len() {
            break;
        }
        current = next.into_owned();
    }
    current.trim().to_string()
}

/// Whether the text still contains a fence marker
pub fn has_fence(text: &str) -> bool {
    text.contains("```")
}
