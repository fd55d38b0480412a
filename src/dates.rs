use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Multi-format date parsing for clean-extractor payloads and search-provider
// result dates. Providers are inconsistent: absolute dates ("Apr 2, 2024"),
// ISO timestamps, or relative English phrases ("2 days ago"). Parsing
// failures return None so callers can skip the update gracefully.
// ---------------------------------------------------------------------------

fn relative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:about\s+)?(\d+)\s+(minute|hour|day|week|month|year)s?\s+ago$")
            .expect("relative date regex")
    })
}

fn ordinal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d)(st|nd|rd|th)").expect("ordinal regex"))
}

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(updated|published?)[:\s-]+").expect("prefix regex"))
}

/// Parse a clean-extractor `date_published` value.
///
/// Accepts ISO-8601 with or without milliseconds and trailing `Z`,
/// `YYYY-MM-DD`, and `YYYY-MM-DDTHH:MM:SSZ`.
pub fn parse_published_date(value: &str) -> Option<NaiveDateTime> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(v, fmt) {
            return Some(dt);
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(v, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    None
}

/// Parse the loosely-formatted `date` field of search-provider results.
///
/// Tries ISO forms, a battery of absolute formats, then relative English
/// phrases ("today", "yesterday", "2 days ago").
pub fn parse_result_date(value: &str) -> Option<NaiveDateTime> {
    let mut normalized = value.trim().to_string();
    if normalized.is_empty() {
        return None;
    }

    // Strip common prefixes and punctuation quirks.
    normalized = prefix_re().replace(&normalized, "").to_string();
    normalized = normalized.replace('·', " ");
    normalized = normalized.replace('–', " ").replace('—', " ");
    normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    normalized = normalized.trim_matches(&[' ', '.', '-'][..]).to_string();
    normalized = normalized.replace(". ", " ");
    normalized = ordinal_re().replace_all(&normalized, "$1").to_string();

    if let Some(dt) = parse_published_date(&normalized) {
        return Some(dt);
    }

    for fmt in [
        "%Y/%m/%d", "%Y.%m.%d", "%m/%d/%Y", "%d/%m/%Y", "%d.%m.%Y", "%b %d, %Y", "%B %d, %Y",
        "%d %b %Y", "%d %B %Y",
    ] {
        if let Ok(d) = NaiveDate::parse_from_str(&normalized, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    let now = Utc::now().naive_utc();
    let lowered = normalized.to_ascii_lowercase();
    if lowered == "today" {
        return Some(now);
    }
    if lowered == "yesterday" {
        return Some(now - Duration::days(1));
    }

    if let Some(caps) = relative_re().captures(&normalized) {
        let amount: i64 = caps[1].parse().ok()?;
        let delta = match caps[2].to_ascii_lowercase().as_str() {
            "minute" => Duration::minutes(amount),
            "hour" => Duration::hours(amount),
            "day" => Duration::days(amount),
            "week" => Duration::weeks(amount),
            "month" => Duration::days(amount * 30),
            "year" => Duration::days(amount * 365),
            _ => return None,
        };
        return Some(now - delta);
    }

    None
}

/// Return the earliest non-null datetime between the current and candidate
/// values. Used by the smart-merge strategy for `published_at`.
pub fn prefer_earlier(
    current: Option<NaiveDateTime>,
    candidate: Option<NaiveDateTime>,
) -> Option<NaiveDateTime> {
    match (current, candidate) {
        (None, c) => c,
        (c, None) => c,
        (Some(a), Some(b)) => Some(if b < a { b } else { a }),
    }
}
