use std::time::Duration;
use url::Url;

use crate::fetch::Fetcher;

/// A resolved web-archive snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Full replay URL: `https://web.archive.org/web/<timestamp>/<original>`.
    pub url: String,
    /// Capture time in CDX format `YYYYMMDDhhmmss`.
    pub timestamp: String,
}

const CDX_ENDPOINT: &str = "https://web.archive.org/cdx/search/cdx";

fn cdx_query(url: &str, status_filter: bool) -> Option<String> {
    let mut params = vec![
        ("url", url),
        ("output", "json"),
        ("limit", "1"),
        ("matchType", "exact"),
    ];
    if status_filter {
        params.push(("filter", "statuscode:200"));
    }
    Url::parse_with_params(CDX_ENDPOINT, params)
        .ok()
        .map(|u| u.to_string())
}

/// Parse a CDX JSON payload: an array whose first element is a header row;
/// data rows are `[urlkey, timestamp, original, …]`.
pub fn parse_cdx_payload(payload: &str, requested_url: &str) -> Option<Snapshot> {
    let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(payload).ok()?;
    let row = rows.get(1)?;
    let timestamp = row.get(1)?.as_str()?.to_string();
    let original = row
        .get(2)
        .and_then(|v| v.as_str())
        .unwrap_or(requested_url)
        .to_string();
    Some(Snapshot {
        url: format!("https://web.archive.org/web/{}/{}", timestamp, original),
        timestamp,
    })
}

/// Look up the earliest archive snapshot of a URL.
///
/// Tries snapshots with HTTP 200 first, then any snapshot. Lookup failures
/// of any kind (HTTP error, timeout, unparseable JSON) yield `None`.
pub async fn earliest_snapshot(
    fetcher: &dyn Fetcher,
    url: &str,
    timeout: Duration,
) -> Option<Snapshot> {
    for status_filter in [true, false] {
        let Some(query) = cdx_query(url, status_filter) else {
            continue;
        };
        match fetcher.fetch(&query, timeout).await {
            Ok(page) if page.status == 200 => {
                if let Some(snapshot) = parse_cdx_payload(&page.body, url) {
                    return Some(snapshot);
                }
            }
            Ok(page) => {
                tracing::debug!("CDX lookup HTTP {} for {}", page.status, url);
            }
            Err(e) => {
                tracing::debug!("CDX lookup failed for {}: {}", url, e);
            }
        }
    }
    None
}
