use url::Url;

use crate::core::context::Heuristic;

/// Extensions that disqualify a URL from crawling (binary/document targets).
const EXCLUDED_EXTENSIONS: [&str; 12] = [
    ".jpg", ".jpeg", ".png", ".bmp", ".webp", ".pdf", ".txt", ".csv", ".xls", ".xlsx", ".doc",
    ".docx",
];

/// Strip the fragment from a URL: everything from the first `#` onward.
///
/// A leading `#` (fragment-only reference) is left untouched, matching the
/// dedup semantics of seed ingestion. Idempotent.
pub fn remove_anchor(url: &str) -> &str {
    match url.find('#') {
        Some(pos) if pos > 0 => &url[..pos],
        _ => url,
    }
}

/// Extract the logical domain of a URL.
///
/// The host is refined through the configured heuristics table: the longest
/// host suffix that matches selects a regex which runs against the full URL;
/// its first capture group replaces the host. This collapses platform URLs
/// (e.g. `twitter.com/<handle>`) into distinct logical domains.
///
/// Malformed input yields an empty string, never an error.
pub fn domain_of(url: &str, heuristics: &[Heuristic]) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    let mut domain = parsed.host_str().unwrap_or("").to_string();
    if domain.is_empty() {
        return domain;
    }
    // Table is sorted longest-suffix-first; the first hit wins.
    for heuristic in heuristics {
        if !domain.ends_with(&heuristic.suffix) {
            continue;
        }
        if let Some(caps) = heuristic.pattern.captures(url) {
            if let Some(m) = caps.get(1).or_else(|| caps.get(0)) {
                domain = m.as_str().to_string();
            }
        }
        break;
    }
    domain
}

/// True iff the URL parses, uses http/https, and its path does not end in a
/// known binary/document extension. Malformed input → false, never a panic.
pub fn is_crawlable(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return false;
    }
    let path = parsed.path().to_ascii_lowercase();
    !EXCLUDED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Resolve a potentially relative URL to absolute against a base.
///
/// `javascript:`, `mailto:`, `tel:`, `data:` and fragment-only references are
/// passed through untouched only for `data:` (inline media payloads); the
/// rest resolve normally or fall back to the raw input when the base itself
/// is unparseable.
pub fn resolve_url(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return String::new();
    }
    if href.starts_with("http://") || href.starts_with("https://") || href.starts_with("data:") {
        return href.to_string();
    }
    if let Ok(base_url) = Url::parse(base) {
        if let Ok(resolved) = base_url.join(href) {
            return resolved.to_string();
        }
    }
    href.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn heuristic(suffix: &str, pattern: &str) -> Heuristic {
        Heuristic {
            suffix: suffix.to_string(),
            pattern: Regex::new(pattern).unwrap(),
        }
    }

    #[test]
    fn remove_anchor_strips_fragment() {
        assert_eq!(
            remove_anchor("https://a.example/x#section"),
            "https://a.example/x"
        );
        assert_eq!(remove_anchor("https://a.example/x"), "https://a.example/x");
        // Leading # untouched
        assert_eq!(remove_anchor("#top"), "#top");
    }

    #[test]
    fn remove_anchor_is_idempotent() {
        let once = remove_anchor("https://a.example/p#a#b");
        assert_eq!(remove_anchor(once), once);
    }

    #[test]
    fn domain_of_plain_host() {
        assert_eq!(domain_of("https://a.example/path?q=1", &[]), "a.example");
        assert_eq!(domain_of("not a url", &[]), "");
    }

    #[test]
    fn domain_of_applies_heuristic_capture() {
        let heuristics = vec![heuristic(
            "twitter.com",
            r"twitter\.com/([A-Za-z0-9_]+)",
        )];
        assert_eq!(
            domain_of("https://twitter.com/someone/status/42", &heuristics),
            "someone"
        );
        // Non-matching regex keeps the plain host.
        assert_eq!(domain_of("https://twitter.com/", &heuristics), "twitter.com");
    }

    #[test]
    fn domain_of_prefers_longest_suffix() {
        let heuristics = vec![
            heuristic("docs.example.com", r"https?://(docs\.example\.com/[a-z]+)"),
            heuristic("example.com", r"https?://(example\.com)"),
        ];
        assert_eq!(
            domain_of("https://docs.example.com/guide", &heuristics),
            "docs.example.com/guide"
        );
    }

    #[test]
    fn crawlable_filters_schemes_and_extensions() {
        assert!(is_crawlable("https://a.example/article"));
        assert!(is_crawlable("http://a.example/"));
        assert!(!is_crawlable("ftp://a.example/file"));
        assert!(!is_crawlable("https://a.example/photo.JPG"));
        assert!(!is_crawlable("https://a.example/report.pdf"));
        assert!(!is_crawlable("mailto:someone@example.com"));
        assert!(!is_crawlable("not a url"));
        // Extension in the query string does not disqualify.
        assert!(is_crawlable("https://a.example/view?file=x.pdf"));
    }

    #[test]
    fn resolve_url_joins_relative() {
        assert_eq!(
            resolve_url("https://a.example/dir/page", "../img/pic.png"),
            "https://a.example/img/pic.png"
        );
        assert_eq!(
            resolve_url("https://a.example/", "https://b.example/x"),
            "https://b.example/x"
        );
        assert_eq!(
            resolve_url("https://a.example/", "data:image/png;base64,AAAA"),
            "data:image/png;base64,AAAA"
        );
    }
}
