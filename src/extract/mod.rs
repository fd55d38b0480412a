pub mod archive;
pub mod clean;
pub mod dom;
pub mod metadata;

use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::core::types::{FetchOutcome, MediaRef};
use crate::fetch::{FetchedPage, Fetcher, PAGE_TIMEOUT};

pub use metadata::PageMeta;

/// Readable text shorter than this is treated as an extraction miss and the
/// pipeline advances to the next fallback stage.
pub const MIN_READABLE_CHARS: usize = 100;

pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp", ".svg"];
pub const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".webm", ".ogg", ".ogv", ".mov", ".avi", ".mkv"];
pub const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".wav", ".ogg", ".aac", ".flac", ".m4a"];

/// True when the URL path carries one of the allowed extensions, or the URL
/// is an inline `data:` payload.
pub fn has_allowed_extension(url: &str, extensions: &[&str]) -> bool {
    if url.is_empty() {
        return false;
    }
    if url.to_ascii_lowercase().starts_with("data:") {
        return true;
    }
    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    extensions.iter().any(|ext| path.ends_with(ext))
}

/// An extraction stage that produced no usable content. The pipeline logs it
/// and advances; only programmer errors may panic.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage failed: {0}")]
    Failed(String),
}

/// Everything the per-expression pipeline needs to persist after one URL has
/// been pushed through the layered extractor.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub outcome: FetchOutcome,
    pub raw_html: Option<String>,
    pub readable: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub lang: Option<String>,
    pub links: Vec<String>,
    pub media: Vec<MediaRef>,
    /// True when the readable text came from a web-archive snapshot.
    pub archive_sourced: bool,
}

impl ExtractionOutcome {
    fn empty(outcome: FetchOutcome) -> Self {
        Self {
            outcome,
            raw_html: None,
            readable: None,
            title: None,
            description: None,
            keywords: None,
            lang: None,
            links: Vec::new(),
            media: Vec::new(),
            archive_sourced: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.readable.is_some()
    }
}

fn long_enough(text: &str) -> bool {
    text.trim().len() > MIN_READABLE_CHARS
}

/// Run the layered extractor against one URL.
///
/// Stages, in order, stopping at the first that yields readable text longer
/// than [`MIN_READABLE_CHARS`]:
/// 1. direct fetch (status captured even on failure);
/// 2. structural clean pass on the raw HTML;
/// 3. naive DOM reader on the same HTML;
/// 4. web-archive snapshot, re-running stage 2 against its body.
///
/// Never returns an error: every failure mode is folded into the outcome.
pub async fn extract_expression(
    fetcher: &dyn Fetcher,
    url: &str,
    archive_timeout: Duration,
) -> ExtractionOutcome {
    // Stage 1: direct fetch.
    let (outcome, raw_html) = match fetcher.fetch(url, PAGE_TIMEOUT).await {
        Ok(page) => {
            let body = capture_html(&page);
            if body.is_none() {
                tracing::debug!("direct fetch of {} returned status {}", url, page.status);
            }
            (FetchOutcome::Http(page.status), body)
        }
        Err(e) => {
            tracing::debug!("direct fetch of {} failed: {}", url, e);
            (e.outcome(), None)
        }
    };

    let mut result = ExtractionOutcome::empty(outcome);
    result.raw_html = raw_html;
    let base = Url::parse(url).ok();

    // Stage 2: structural clean pass on the fetched HTML.
    if let (Some(html), Some(base)) = (result.raw_html.as_deref(), base.as_ref()) {
        match clean::clean_extract(html, base) {
            Ok(cleaned) if long_enough(&cleaned.markdown) => {
                result.readable = Some(cleaned.markdown);
                result.links = cleaned.links;
                result.media = cleaned.media;
            }
            Ok(_) => tracing::debug!("clean pass on {} below readable threshold", url),
            Err(e) => tracing::debug!("clean pass failed on {}: {}", url, e),
        }
    }

    // Stage 3: naive DOM reader fallback.
    if result.readable.is_none() {
        if let Some(html) = result.raw_html.as_deref() {
            match dom::naive_readable(html) {
                Ok(extraction) if long_enough(&extraction.text) => {
                    result.readable = Some(extraction.text);
                    result.links = extraction.links;
                    result.media = extraction.media;
                }
                Ok(_) => tracing::debug!("DOM reader on {} below readable threshold", url),
                Err(e) => tracing::debug!("DOM reader failed on {}: {}", url, e),
            }
        }
    }

    // Stage 4: web-archive fallback.
    let mut meta_html: Option<String> = None;
    if result.readable.is_none() {
        if let Some(snapshot) = archive::earliest_snapshot(fetcher, url, archive_timeout).await {
            tracing::debug!("archive snapshot {} for {}", snapshot.timestamp, url);
            match fetcher.fetch(&snapshot.url, archive_timeout).await {
                Ok(page) if page.status == 200 => {
                    if let Some(base) = base.as_ref() {
                        match clean::clean_extract(&page.body, base) {
                            Ok(cleaned) if long_enough(&cleaned.markdown) => {
                                result.readable = Some(cleaned.markdown);
                                result.links = cleaned.links;
                                result.media = cleaned.media;
                                result.archive_sourced = true;
                                meta_html = Some(page.body);
                            }
                            Ok(_) => {
                                tracing::debug!("archive clean pass on {} too short", url)
                            }
                            Err(e) => tracing::debug!("archive clean pass failed on {}: {}", url, e),
                        }
                    }
                }
                Ok(page) => tracing::debug!("archive snapshot HTTP {} for {}", page.status, url),
                Err(e) => tracing::debug!("archive snapshot fetch failed for {}: {}", url, e),
            }
        }
    }

    // Metadata combiner over whichever HTML we ended up with.
    if let Some(html) = result.raw_html.as_deref().or(meta_html.as_deref()) {
        let meta = metadata::combine(html);
        result.title = meta.title;
        result.description = meta.description;
        result.keywords = meta.keywords;
        result.lang = meta.lang;
    }

    result
}

fn capture_html(page: &FetchedPage) -> Option<String> {
    if page.status == 200 && page.is_html() {
        Some(page.body.clone())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_extension_checks_path_only() {
        assert!(has_allowed_extension(
            "https://a.example/pic.png?width=200",
            IMAGE_EXTENSIONS
        ));
        assert!(!has_allowed_extension(
            "https://a.example/page?file=pic.png",
            IMAGE_EXTENSIONS
        ));
        assert!(has_allowed_extension("data:image/png;base64,AA", IMAGE_EXTENSIONS));
        assert!(has_allowed_extension("/relative/clip.mp4", VIDEO_EXTENSIONS));
        assert!(!has_allowed_extension("", AUDIO_EXTENSIONS));
    }
}
