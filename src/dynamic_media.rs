use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::time::Duration;

use crate::core::types::{MediaKind, MediaRef};
use crate::extract::{has_allowed_extension, IMAGE_EXTENSIONS};

// ---------------------------------------------------------------------------
// Dynamic media discovery — optional, feature-flagged, best-effort. Drives a
// headless Chromium through CDP to capture media URLs that only exist after
// JavaScript execution, including lazy-loaded images (`data-src` and
// friends). Every failure mode degrades to an empty set.
// ---------------------------------------------------------------------------

const SETTLE_DELAY: Duration = Duration::from_secs(3);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// JS evaluated in the page after load: collects `<img>`, `<video>` and
/// `<audio>` sources plus common lazy-loading attributes.
const COLLECT_MEDIA_JS: &str = r#"
(() => {
    const found = [];
    const push = (url, kind) => { if (url) found.push({ url, kind }); };
    for (const el of document.querySelectorAll('img[src]')) push(el.src, 'img');
    for (const el of document.querySelectorAll('video[src], video source[src]')) push(el.src, 'video');
    for (const el of document.querySelectorAll('audio[src], audio source[src]')) push(el.src, 'audio');
    const lazyAttrs = ['data-src', 'data-lazy-src', 'data-original', 'data-url'];
    for (const el of document.querySelectorAll(lazyAttrs.map(a => `img[${a}]`).join(','))) {
        for (const attr of lazyAttrs) {
            const v = el.getAttribute(attr);
            if (v) { push(v, 'img'); break; }
        }
    }
    return JSON.stringify(found);
})()
"#;

#[derive(serde::Deserialize)]
struct FoundMedia {
    url: String,
    kind: String,
}

async fn run_browser(url: &str) -> anyhow::Result<Vec<MediaRef>> {
    let config = BrowserConfig::builder()
        .build()
        .map_err(|e| anyhow::anyhow!("browser config: {}", e))?;
    let (mut browser, mut handler) = Browser::launch(config).await?;
    let driver = tokio::spawn(async move { while handler.next().await.is_some() {} });

    let result = async {
        let page = tokio::time::timeout(NAVIGATION_TIMEOUT, browser.new_page(url)).await??;
        // Let late hydration and lazy loaders fire before collecting.
        tokio::time::sleep(SETTLE_DELAY).await;
        let payload: String = page.evaluate(COLLECT_MEDIA_JS).await?.into_value()?;
        let found: Vec<FoundMedia> = serde_json::from_str(&payload)?;
        Ok::<_, anyhow::Error>(found)
    }
    .await;

    let _ = browser.close().await;
    driver.abort();

    let found = result?;
    let media = found
        .into_iter()
        .filter_map(|f| {
            let kind = MediaKind::parse_str(&f.kind)?;
            if kind == MediaKind::Img && !has_allowed_extension(&f.url, IMAGE_EXTENSIONS) {
                return None;
            }
            Some(MediaRef::new(f.url, kind))
        })
        .collect();
    Ok(media)
}

/// Discover media on a page after JavaScript execution.
///
/// Returns an empty set on any failure (no browser available, navigation
/// timeout, evaluation error); the rest of the pipeline operates unchanged.
pub async fn discover_media(url: &str) -> Vec<MediaRef> {
    match run_browser(url).await {
        Ok(media) => {
            tracing::info!("dynamic pass found {} media items on {}", media.len(), url);
            media
        }
        Err(e) => {
            tracing::warn!("dynamic media extraction failed for {}: {}", url, e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn found_media_filters_kinds_and_extensions() {
        let found = vec![
            FoundMedia {
                url: "https://a.example/pic.png".into(),
                kind: "img".into(),
            },
            FoundMedia {
                url: "https://a.example/endpoint".into(),
                kind: "img".into(),
            },
            FoundMedia {
                url: "https://a.example/clip.mp4".into(),
                kind: "video".into(),
            },
            FoundMedia {
                url: "https://a.example/x".into(),
                kind: "mystery".into(),
            },
        ];
        let media: Vec<MediaRef> = found
            .into_iter()
            .filter_map(|f| {
                let kind = MediaKind::parse_str(&f.kind)?;
                if kind == MediaKind::Img && !has_allowed_extension(&f.url, IMAGE_EXTENSIONS) {
                    return None;
                }
                Some(MediaRef::new(f.url, kind))
            })
            .collect();
        assert_eq!(media.len(), 2);
        assert!(media.iter().any(|m| m.kind == MediaKind::Video));
    }
}
