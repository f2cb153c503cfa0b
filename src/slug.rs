//! Filename normalization.
//!
//! File names derived from model output or user text double as idempotency
//! keys during re-save, so normalization must be total and deterministic:
//! the same input always yields the same output, and no input can produce
//! an empty or filesystem-illegal name.
//!
//! Rules applied, in order:
//! 1. Characters illegal on common filesystems (`\ / : * ? " < > |`) are
//!    replaced with `-`.
//! 2. Internal whitespace runs collapse to a single `-`.
//! 3. Repeated separators (`-`, `_`, `.`) collapse to one.
//! 4. Leading/trailing separators are trimmed.
//! 5. The result is truncated to [`MAX_LABEL_LEN`] characters.
//! 6. An empty result maps to [`FALLBACK_LABEL`].

/// Maximum length of a normalized label segment, in characters.
pub const MAX_LABEL_LEN: usize = 80;

/// Token substituted when normalization would otherwise yield nothing.
pub const FALLBACK_LABEL: &str = "document";

/// Characters that are illegal in file names on common filesystems.
const ILLEGAL: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Normalize an arbitrary label into a filesystem-safe, length-bounded slug.
///
/// Never panics and never returns an empty string. Idempotent:
/// `normalize_filename(normalize_filename(x)) == normalize_filename(x)`.
///
/// # Example
///
/// ```rust
/// use docvault::slug::normalize_filename;
///
/// assert_eq!(normalize_filename("Invoice: Acme / March"), "Invoice-Acme-March");
/// assert_eq!(normalize_filename("***"), "document");
/// ```
pub fn normalize_filename(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_sep = false;

    for ch in label.trim().chars() {
        let mapped = if ILLEGAL.contains(&ch) || ch.is_whitespace() {
            '-'
        } else {
            ch
        };

        if mapped == '-' || mapped == '_' || mapped == '.' {
            // Collapse separator runs; emit once before the next real char.
            pending_sep = true;
            continue;
        }

        if pending_sep {
            if !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
        }
        out.push(mapped);
    }

    let truncated: String = out.chars().take(MAX_LABEL_LEN).collect();
    let trimmed = truncated.trim_matches(|c| c == '-' || c == '_' || c == '.');

    if trimmed.is_empty() {
        FALLBACK_LABEL.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Map an image MIME type to a filename extension.
///
/// `image/<subtype>` yields `<subtype>`; anything else yields `"dat"`.
pub fn extension_for_mime(mime: &str) -> String {
    let mime = mime.to_lowercase();
    match mime.strip_prefix("image/") {
        Some(subtype) if !subtype.is_empty() => subtype.to_string(),
        _ => "dat".to_string(),
    }
}
