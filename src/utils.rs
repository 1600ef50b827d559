use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;

/// Format a `Duration` as a human-readable string with automatic unit scaling.
///
/// Produces output like `1.94ms`, `2.34s`, `150.00µs` using Rust's Debug format.
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Log a warning if the elapsed time since `start` exceeds `threshold`.
pub fn log_if_slow(start: Instant, threshold: Duration, label: &str) {
    let elapsed = start.elapsed();
    if elapsed > threshold {
        tracing::warn!(duration = fmt_duration(elapsed), "slow operation: {label}");
    }
}

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));

/// Build a URL slug: lowercase ASCII alphanumerics joined by single dashes.
///
/// Returns `None` when nothing usable remains (e.g. a name made of symbols).
pub fn slugify(input: &str) -> Option<String> {
    let lowered = input.to_ascii_lowercase();
    let slug = NON_ALNUM.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        None
    } else {
        Some(slug.to_string())
    }
}

/// Trim a string and map empty results to `None`.
pub fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Blue Dream  (3.5g)").as_deref(), Some("blue-dream-3-5g"));
        assert_eq!(slugify("--OG Kush--").as_deref(), Some("og-kush"));
    }

    #[test]
    fn slugify_drops_non_ascii() {
        assert_eq!(slugify("Café Gummies").as_deref(), Some("caf-gummies"));
        assert_eq!(slugify("★★★"), None);
    }

    #[test]
    fn non_empty_trims() {
        assert_eq!(non_empty("  hi "), Some("hi".to_string()));
        assert_eq!(non_empty("   "), None);
    }
}
