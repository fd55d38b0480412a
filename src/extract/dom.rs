use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::Html;

use crate::core::types::{MediaKind, MediaRef};
use crate::extract::{has_allowed_extension, StageError, IMAGE_EXTENSIONS};
use crate::urlnorm::is_crawlable;

/// Result of the naive DOM reader fallback.
#[derive(Debug, Clone, Default)]
pub struct DomExtraction {
    /// Text with media tags replaced by the clean pass's markers
    /// (`![IMAGE](…)`, `[VIDEO: …]`, `[AUDIO: …]`), one non-empty stripped
    /// line per line.
    pub text: String,
    /// `<a href>` targets filtered through the crawlability check.
    pub links: Vec<String>,
    pub media: Vec<MediaRef>,
}

/// Subtrees removed before text collection: non-content chrome.
fn is_stripped(name: &str, class: Option<&str>) -> bool {
    if matches!(name, "script" | "style" | "iframe" | "form" | "footer" | "nav") {
        return true;
    }
    let Some(class) = class else { return false };
    let lower = class.to_ascii_lowercase();
    ["footer", "nav", "menu", "social", "modal"]
        .iter()
        .any(|marker| lower.split_whitespace().any(|c| c == *marker))
}

fn marker_for(name: &str, src: &str) -> Option<String> {
    match name {
        "img" => Some(format!("![IMAGE]({})", src)),
        "video" => Some(format!("[VIDEO: {}]", src)),
        "audio" => Some(format!("[AUDIO: {}]", src)),
        _ => None,
    }
}

fn media_kind_for(name: &str) -> Option<MediaKind> {
    match name {
        "img" => Some(MediaKind::Img),
        "video" => Some(MediaKind::Video),
        "audio" => Some(MediaKind::Audio),
        _ => None,
    }
}

fn walk(node: NodeRef<'_, Node>, out: &mut String, links: &mut Vec<String>, media: &mut Vec<MediaRef>) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(el) => {
                let name = el.name();
                if is_stripped(name, el.attr("class")) {
                    continue;
                }
                if let Some(src) = el.attr("src") {
                    if let (Some(marker), Some(kind)) = (marker_for(name, src), media_kind_for(name))
                    {
                        if kind != MediaKind::Img || has_allowed_extension(src, IMAGE_EXTENSIONS) {
                            media.push(MediaRef::new(src, kind));
                        }
                        out.push('\n');
                        out.push_str(&marker);
                        out.push('\n');
                        continue;
                    }
                }
                if name == "a" {
                    if let Some(href) = el.attr("href") {
                        if is_crawlable(href) {
                            links.push(href.to_string());
                        }
                    }
                }
                walk(child, out, links, media);
            }
            _ => {}
        }
    }
}

/// Naive whole-document reader: strip non-content subtrees, replace media
/// tags with bracketed markers, collapse blank lines.
pub fn naive_readable(html: &str) -> Result<DomExtraction, StageError> {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    let mut links = Vec::new();
    let mut media = Vec::new();
    walk(document.tree.root(), &mut raw, &mut links, &mut media);

    let text = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if text.is_empty() {
        return Err(StageError::Failed("empty document text".into()));
    }
    Ok(DomExtraction { text, links, media })
}
