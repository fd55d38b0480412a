use readability::extractor;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use url::Url;

use crate::core::types::{MediaKind, MediaRef};
use crate::extract::{has_allowed_extension, StageError, IMAGE_EXTENSIONS};

/// Result of the structural clean-extractor pass: Markdown with inline media
/// markers retained, plus the media and links harvested from the readable
/// fragment.
#[derive(Debug, Clone, Default)]
pub struct CleanExtraction {
    pub markdown: String,
    pub links: Vec<String>,
    pub media: Vec<MediaRef>,
}

fn md_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(((?:https?|ftp)://[^\s)]+)\)").expect("md link regex"))
}

/// Extract URLs from Markdown link syntax `(...)(http...)`.
pub fn extract_md_links(markdown: &str) -> Vec<String> {
    md_link_re()
        .captures_iter(markdown)
        .map(|caps| caps[1].to_string())
        .filter(|u| u.starts_with("http"))
        .collect()
}

/// Harvest `<img>`, `<video>` and `<audio>` sources from an HTML fragment.
/// Images are filtered by allowed extension (or `data:` payloads); `srcset`
/// candidates and nested `<source>` elements are included.
fn harvest_media(fragment: &str) -> Vec<MediaRef> {
    let document = Html::parse_fragment(fragment);
    let mut out = Vec::new();

    let mut push = |src: &str, kind: MediaKind| {
        let src = src.trim();
        if src.is_empty() {
            return;
        }
        if kind == MediaKind::Img && !has_allowed_extension(src, IMAGE_EXTENSIONS) {
            return;
        }
        out.push(MediaRef::new(src, kind));
    };

    for (tag, kind) in [
        ("img", MediaKind::Img),
        ("video", MediaKind::Video),
        ("audio", MediaKind::Audio),
    ] {
        let Ok(sel) = Selector::parse(tag) else { continue };
        for element in document.select(&sel) {
            if let Some(src) = element.value().attr("src") {
                push(src, kind);
            }
            if tag == "img" {
                if let Some(srcset) = element.value().attr("srcset") {
                    for candidate in srcset.split(',') {
                        if let Some(u) = candidate.trim().split(' ').next() {
                            push(u, MediaKind::Img);
                        }
                    }
                }
            } else if let Ok(source_sel) = Selector::parse("source") {
                for source in element.select(&source_sel) {
                    if let Some(src) = source.value().attr("src") {
                        push(src, kind);
                    }
                }
            }
        }
    }
    out
}

/// Structural content extraction: readability on the raw HTML, the article
/// fragment converted to Markdown, media markers appended so the readable
/// text keeps its embedded-resource references.
pub fn clean_extract(html: &str, base_url: &Url) -> Result<CleanExtraction, StageError> {
    let product = extractor::extract(&mut html.as_bytes(), base_url)
        .map_err(|e| StageError::Failed(format!("readability: {}", e)))?;

    let mut markdown = html2md::parse_html(&product.content);
    if markdown.trim().is_empty() {
        return Err(StageError::Failed("empty readable fragment".into()));
    }

    let media = harvest_media(&product.content);
    let marker_lines: Vec<String> = media
        .iter()
        .map(|m| match m.kind {
            MediaKind::Img => format!("![IMAGE]({})", m.url),
            MediaKind::Video => format!("[VIDEO: {}]", m.url),
            MediaKind::Audio => format!("[AUDIO: {}]", m.url),
        })
        .collect();
    if !marker_lines.is_empty() {
        markdown.push_str("\n\n");
        markdown.push_str(&marker_lines.join("\n"));
    }

    let links = extract_md_links(&markdown);

    Ok(CleanExtraction {
        markdown,
        links,
        media,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md_links_extracted() {
        let md = "See [docs](https://a.example/docs) and [more](https://b.example/x?q=1).";
        assert_eq!(
            extract_md_links(md),
            vec![
                "https://a.example/docs".to_string(),
                "https://b.example/x?q=1".to_string()
            ]
        );
    }

    #[test]
    fn md_links_ignore_relative_and_images_share_syntax() {
        let md = "![alt](/local.png) [rel](/relative/path)";
        assert!(extract_md_links(md).is_empty());
    }

    #[test]
    fn harvest_media_filters_image_extensions() {
        let fragment = r#"
            <img src="https://a.example/pic.png">
            <img src="https://a.example/tracker">
            <img src="data:image/gif;base64,AA==">
            <video src="/clip.mp4"><source src="/clip.webm"></video>
            <audio src="/pod.mp3"></audio>
        "#;
        let media = harvest_media(fragment);
        let urls: Vec<&str> = media.iter().map(|m| m.url.as_str()).collect();
        assert!(urls.contains(&"https://a.example/pic.png"));
        // Extension-less image refused, data: accepted.
        assert!(!urls.contains(&"https://a.example/tracker"));
        assert!(urls.contains(&"data:image/gif;base64,AA=="));
        assert!(urls.contains(&"/clip.mp4"));
        assert!(urls.contains(&"/clip.webm"));
        assert!(urls.contains(&"/pod.mp3"));
    }

    #[test]
    fn clean_extract_appends_markers() {
        let html = r#"<html><body><article>
            <h1>Heading</h1>
            <p>A reasonably long paragraph of article text that the readability
            pass should keep as the main content of this page, with enough prose,
            commas, and sentences to score as a proper content candidate rather
            than boilerplate chrome around the edges of the document.</p>
            <p>More prose after the heading, again long enough to be scored as
            substantive content, with a <a href="https://b.example/ref">reference
            link</a> embedded in the middle of the sentence for good measure.
            <img src="https://a.example/figure.jpg"></p>
            <p>A closing paragraph that rounds out the article with yet more
            text, so the extraction has several candidates to choose from.</p>
        </article></body></html>"#;
        let base = Url::parse("https://a.example/post").unwrap();
        let out = clean_extract(html, &base).unwrap();
        assert!(out.markdown.contains("![IMAGE](https://a.example/figure.jpg)"));
        assert!(out.media.iter().any(|m| m.url.ends_with("figure.jpg")));
    }
}
