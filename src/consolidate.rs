use anyhow::Result;
use scraper::{Html, Selector};
use std::collections::HashSet;

use crate::core::types::{MediaKind, MediaRef, PipelineStats};
use crate::core::Context;
use crate::db::graph;
use crate::db::models::{Expression, Land};
use crate::extract::clean::extract_md_links;
use crate::extract::{has_allowed_extension, IMAGE_EXTENSIONS};
use crate::lexicon::{load_lexicon, Lexicon};
use crate::readable::media_from_markdown;
use crate::urlnorm::is_crawlable;

// ---------------------------------------------------------------------------
// Consolidator — offline pass that rebuilds the link graph and media set of
// a land from the stored readable content, and recomputes relevance, without
// fetching anything. Used to repair data after manual edits or lexicon
// changes.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ConsolidateOptions {
    /// 0 = unlimited.
    pub limit: usize,
    pub depth: Option<i64>,
    /// Only consolidate expressions at or above this relevance.
    pub min_relevance: i64,
}

/// Harvest `<a href>` targets from readable content that may embed HTML.
fn html_links(readable: &str) -> Vec<String> {
    let document = Html::parse_fragment(readable);
    let Ok(sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&sel)
        .filter_map(|el| el.value().attr("href"))
        .filter(|href| is_crawlable(href))
        .map(str::to_string)
        .collect()
}

/// Harvest embedded media references from readable content: HTML tags first,
/// then Markdown image syntax over the same text.
fn embedded_media(readable: &str, base_url: &str) -> Vec<MediaRef> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    let document = Html::parse_fragment(readable);
    for (tag, kind) in [
        ("img", MediaKind::Img),
        ("video", MediaKind::Video),
        ("audio", MediaKind::Audio),
    ] {
        let Ok(sel) = Selector::parse(tag) else { continue };
        for element in document.select(&sel) {
            let Some(src) = element.value().attr("src") else {
                continue;
            };
            if kind == MediaKind::Img && !has_allowed_extension(src, IMAGE_EXTENSIONS) {
                continue;
            }
            if seen.insert(src.to_string()) {
                out.push(MediaRef::new(src, kind));
            }
        }
    }

    for media in media_from_markdown(readable, base_url) {
        if seen.insert(media.url.clone()) {
            out.push(media);
        }
    }
    out
}

/// Rebuild one expression's graph neighborhood from its stored readable.
/// The delete-then-insert pairs run inside the transactional replace
/// helpers so a concurrent reader never sees a half-rebuilt expression.
async fn consolidate_expression(
    ctx: &Context,
    lexicon: &Lexicon,
    land: &Land,
    expression: &Expression,
) -> Result<(usize, usize)> {
    let relevance = lexicon.score(
        expression.title.as_deref().unwrap_or(""),
        expression.readable.as_deref().unwrap_or(""),
    );
    sqlx::query("UPDATE expression SET relevance = ? WHERE id = ?")
        .bind(relevance)
        .bind(expression.id)
        .execute(&ctx.db)
        .await?;

    let readable = expression.readable.as_deref().unwrap_or("");

    // Markdown links first, then HTML anchors over the same text.
    let mut links: Vec<String> = extract_md_links(readable);
    for url in html_links(readable) {
        if !links.contains(&url) {
            links.push(url);
        }
    }
    let unique: Vec<String> = {
        let mut seen = HashSet::new();
        links
            .into_iter()
            .filter(|u| is_crawlable(u) && seen.insert(u.clone()))
            .collect()
    };
    let nb_links = graph::replace_links(&ctx.db, &ctx.heuristics, land, expression, &unique).await?;

    let media = embedded_media(readable, &expression.url);
    let nb_media = graph::replace_media(&ctx.db, expression, &media).await?;

    Ok((nb_links, nb_media))
}

/// Consolidate a land. Returns `(attempted, processed)`.
pub async fn consolidate_land(
    ctx: &Context,
    land: &Land,
    options: &ConsolidateOptions,
) -> Result<PipelineStats> {
    tracing::info!("consolidating land {}", land.name);
    let lexicon = load_lexicon(ctx, land).await?;

    let mut sql =
        String::from("SELECT * FROM expression WHERE land_id = ? AND fetched_at IS NOT NULL");
    if options.depth.is_some() {
        sql.push_str(" AND depth = ?");
    }
    if options.min_relevance > 0 {
        sql.push_str(" AND COALESCE(relevance, 0) >= ?");
    }
    sql.push_str(" ORDER BY id");
    if options.limit > 0 {
        sql.push_str(" LIMIT ?");
    }
    let mut query = sqlx::query_as::<_, Expression>(&sql).bind(land.id);
    if let Some(depth) = options.depth {
        query = query.bind(depth);
    }
    if options.min_relevance > 0 {
        query = query.bind(options.min_relevance);
    }
    if options.limit > 0 {
        query = query.bind(options.limit as i64);
    }
    let candidates = query.fetch_all(&ctx.db).await?;

    let mut stats = PipelineStats::default();
    for expression in &candidates {
        stats.attempted += 1;
        match consolidate_expression(ctx, &lexicon, land, expression).await {
            Ok((nb_links, nb_media)) => {
                tracing::info!(
                    "expression #{}: {} links, {} media rebuilt",
                    expression.id,
                    nb_links,
                    nb_media
                );
                stats.processed += 1;
            }
            Err(e) => {
                tracing::error!("consolidation failed for #{}: {}", expression.id, e);
            }
        }
    }

    // Whatever happened above, leave the land with a coherent approval state.
    graph::sweep_approval(&ctx.db, land).await?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_links_filters_crawlability() {
        let readable = r#"
            <a href="https://a.example/keep">keep</a>
            <a href="https://a.example/skip.pdf">skip</a>
            <a href="mailto:x@example.com">mail</a>
        "#;
        assert_eq!(html_links(readable), vec!["https://a.example/keep".to_string()]);
    }

    #[test]
    fn embedded_media_merges_html_and_markdown() {
        let readable = r#"
            <img src="https://a.example/a.png">
            <video src="/v.mp4"></video>
            body text ![fig](https://a.example/b.jpg)
        "#;
        let media = embedded_media(readable, "https://a.example/post");
        let urls: Vec<&str> = media.iter().map(|m| m.url.as_str()).collect();
        assert!(urls.contains(&"https://a.example/a.png"));
        assert!(urls.contains(&"/v.mp4"));
        assert!(urls.contains(&"https://a.example/b.jpg"));
        assert_eq!(media.len(), 3);
    }

    #[test]
    fn embedded_media_dedupes() {
        let readable = r#"<img src="https://a.example/a.png"><img src="https://a.example/a.png">"#;
        assert_eq!(embedded_media(readable, "https://a.example/").len(), 1);
    }
}
