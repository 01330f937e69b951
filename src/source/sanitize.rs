//! Scrubbing of upstream error bodies.
//!
//! Error bodies from the configuration service end up in logs and in
//! [`VerdandiError`](crate::VerdandiError) messages shown to callers, so
//! they are stripped of control characters and truncated first.

/// Maximum number of characters kept from an upstream error body.
pub const MAX_ERROR_BODY_CHARS: usize = 200;

/// Maximum number of bytes read from an upstream error body: enough for
/// [`MAX_ERROR_BODY_CHARS`] characters of any UTF-8 width.
pub const MAX_ERROR_BODY_BYTES: usize = MAX_ERROR_BODY_CHARS * 4;

/// Strip control characters (newlines become spaces) and truncate to
/// [`MAX_ERROR_BODY_CHARS`], appending `...` when truncated.
pub fn sanitize_error_body(body: &str) -> String {
    let mut cleaned = String::with_capacity(body.len().min(MAX_ERROR_BODY_CHARS + 3));
    let mut kept = 0usize;
    let mut chars = body
        .trim()
        .chars()
        .map(|c| if c == '\n' || c == '\t' || c == '\r' { ' ' } else { c })
        .filter(|c| !c.is_control());

    for c in chars.by_ref() {
        if kept == MAX_ERROR_BODY_CHARS {
            cleaned.push_str("...");
            return cleaned;
        }
        cleaned.push(c);
        kept += 1;
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_characters() {
        let body = "bad\u{1b}[31m request\u{0}\nline two";
        assert_eq!(sanitize_error_body(body), "bad[31m request line two");
    }

    #[test]
    fn short_bodies_unchanged() {
        assert_eq!(sanitize_error_body("not found"), "not found");
    }

    #[test]
    fn truncates_long_bodies() {
        let body = "x".repeat(500);
        let cleaned = sanitize_error_body(&body);
        assert_eq!(cleaned.len(), MAX_ERROR_BODY_CHARS + 3);
        assert!(cleaned.ends_with("..."));
    }

    #[test]
    fn exact_limit_not_marked_truncated() {
        let body = "y".repeat(MAX_ERROR_BODY_CHARS);
        assert_eq!(sanitize_error_body(&body), body);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let body = "é".repeat(300);
        let cleaned = sanitize_error_body(&body);
        assert_eq!(cleaned.chars().count(), MAX_ERROR_BODY_CHARS + 3);
    }
}
