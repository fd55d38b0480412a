use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use crate::core::types::{GateVerdict, MediaKind, MediaRef, MergeStrategy, PipelineStats};
use crate::core::Context;
use crate::dates::{parse_published_date, prefer_earlier};
use crate::db::graph;
use crate::db::models::{Expression, Land};
use crate::extract::archive;
use crate::fetch::Fetcher;
use crate::gate::{RelevanceGate, VERDICT_NO, VERDICT_YES};
use crate::lexicon::{load_lexicon, Lexicon};
use crate::urlnorm::{is_crawlable, resolve_url};

// ---------------------------------------------------------------------------
// Readable Reprocessor — re-extracts already-fetched pages through an
// external clean-extractor CLI, merges the result into the stored expression
// under a configurable strategy, and rebuilds the page's media and links
// from the merged Markdown.
// ---------------------------------------------------------------------------

/// Structured document returned by the clean-extractor CLI.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CleanDoc {
    pub title: Option<String>,
    /// Main content as HTML.
    pub content: Option<String>,
    /// Main content as Markdown; falls back to `content` when absent.
    pub markdown: Option<String>,
    pub excerpt: Option<String>,
    pub date_published: Option<String>,
    /// Text direction (ltr/rtl) as reported by the extractor.
    pub direction: Option<String>,
    pub word_count: Option<i64>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub videos: Vec<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

/// External clean extractor. Abstracted so tests can inject canned documents.
#[async_trait]
pub trait CleanExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<CleanDoc, String>;
}

/// Production extractor: spawns the configured CLI and parses its stdout as
/// JSON. Non-zero exit or unparseable output is a failure. Retries with
/// exponential backoff.
pub struct CleanExtractorCli {
    pub command: String,
    pub max_retries: u32,
}

impl CleanExtractorCli {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            max_retries: 3,
        }
    }

    async fn run_once(&self, url: &str) -> Result<CleanDoc, String> {
        let output = tokio::process::Command::new(&self.command)
            .arg(url)
            .arg("--format=markdown")
            .arg("--extract-media")
            .arg("--extract-links")
            .output()
            .await
            .map_err(|e| format!("spawn failed: {}", e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("exit {}: {}", output.status, stderr.trim()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut doc: CleanDoc =
            serde_json::from_str(&stdout).map_err(|e| format!("invalid JSON: {}", e))?;
        if doc.markdown.is_none() {
            doc.markdown = doc.content.clone();
        }
        Ok(doc)
    }
}

#[async_trait]
impl CleanExtractor for CleanExtractorCli {
    async fn extract(&self, url: &str) -> Result<CleanDoc, String> {
        let mut last_err = String::new();
        for attempt in 0..self.max_retries {
            match self.run_once(url).await {
                Ok(doc) => return Ok(doc),
                Err(e) => {
                    last_err = e;
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(1u64 << attempt)).await;
                    }
                }
            }
        }
        Err(last_err)
    }
}

// ---------------------------------------------------------------------------
// Merge strategies
// ---------------------------------------------------------------------------

/// Text fields subject to merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeField {
    Title,
    Description,
    Readable,
    Lang,
}

/// Pick the final value of a text field given the stored and clean values.
///
/// An empty side always loses; with both sides present the strategy decides.
pub fn merge_text(
    strategy: MergeStrategy,
    field: MergeField,
    current: Option<&str>,
    clean: &str,
) -> String {
    let current = current.unwrap_or("").trim();
    if current.is_empty() {
        return clean.to_string();
    }
    if clean.trim().is_empty() {
        return current.to_string();
    }
    match strategy {
        MergeStrategy::MercuryPriority => clean.to_string(),
        MergeStrategy::PreserveExisting => current.to_string(),
        MergeStrategy::SmartMerge => match field {
            // Longer wins for titles and descriptions, clean always wins for
            // the body, clean value for everything else.
            MergeField::Title | MergeField::Description => {
                if clean.len() > current.len() {
                    clean.to_string()
                } else {
                    current.to_string()
                }
            }
            MergeField::Readable => clean.to_string(),
            MergeField::Lang => clean.to_string(),
        },
    }
}

/// Publication dates merge on their own axis: the smart strategy keeps the
/// earlier of the two datetimes.
pub fn merge_published(
    strategy: MergeStrategy,
    current: Option<NaiveDateTime>,
    clean: NaiveDateTime,
) -> NaiveDateTime {
    let Some(current) = current else { return clean };
    match strategy {
        MergeStrategy::MercuryPriority => clean,
        MergeStrategy::PreserveExisting => current,
        MergeStrategy::SmartMerge => {
            prefer_earlier(Some(current), Some(clean)).unwrap_or(clean)
        }
    }
}

// ---------------------------------------------------------------------------
// Markdown media / link harvesting
// ---------------------------------------------------------------------------

fn md_media_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // (!?)[text](url "title") — a leading bang marks an image.
    RE.get_or_init(|| {
        Regex::new(r#"(!?)\[[^\]]*\]\(([^)\s]+)(?:\s+"[^"]*")?\)"#).expect("md media regex")
    })
}

/// Extract image references `![alt](url "title")` from Markdown, resolved
/// absolute against the expression URL.
pub fn media_from_markdown(markdown: &str, base_url: &str) -> Vec<MediaRef> {
    let mut seen = HashSet::new();
    md_media_re()
        .captures_iter(markdown)
        .filter(|caps| &caps[1] == "!")
        .map(|caps| resolve_url(base_url, &caps[2]))
        .filter(|u| !u.is_empty() && seen.insert(u.clone()))
        .map(|u| MediaRef::new(u, MediaKind::Img))
        .collect()
}

/// Extract link targets `[text](url "title")` from Markdown (images
/// excluded), deduped by URL and filtered through the crawlability check.
pub fn links_from_markdown(markdown: &str, base_url: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    md_media_re()
        .captures_iter(markdown)
        .filter(|caps| caps[1].is_empty())
        .map(|caps| resolve_url(base_url, &caps[2]))
        .filter(|u| is_crawlable(u) && seen.insert(u.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ReadableOptions {
    /// 0 = unlimited.
    pub limit: usize,
    pub depth: Option<i64>,
    pub merge: MergeStrategy,
    /// Consult the relevance gate after recomputing relevance.
    pub use_gate: bool,
}

/// Reprocess fetched expressions that have no readable timestamp yet.
pub async fn process_land(
    ctx: &Context,
    extractor: &dyn CleanExtractor,
    fetcher: &dyn Fetcher,
    gate: &dyn RelevanceGate,
    land: &Land,
    options: &ReadableOptions,
) -> Result<PipelineStats> {
    tracing::info!(
        "readable pipeline for {} (merge: {})",
        land.name,
        options.merge.as_str()
    );
    let lexicon = load_lexicon(ctx, land).await?;

    let mut sql = String::from(
        "SELECT * FROM expression \
         WHERE land_id = ? AND fetched_at IS NOT NULL AND readable_at IS NULL",
    );
    if options.depth.is_some() {
        sql.push_str(" AND depth = ?");
    }
    sql.push_str(" ORDER BY fetched_at ASC, depth ASC");
    if options.limit > 0 {
        sql.push_str(" LIMIT ?");
    }
    let mut query = sqlx::query_as::<_, Expression>(&sql).bind(land.id);
    if let Some(depth) = options.depth {
        query = query.bind(depth);
    }
    if options.limit > 0 {
        query = query.bind(options.limit as i64);
    }
    let candidates = query.fetch_all(&ctx.db).await?;

    let mut stats = PipelineStats::default();
    let batch_size = ctx.config.parallel_connections.max(1);
    for batch in candidates.chunks(batch_size) {
        let results: Vec<bool> = stream::iter(batch)
            .map(|expr| process_expression(ctx, extractor, fetcher, gate, &lexicon, land, expr, options))
            .buffer_unordered(batch_size)
            .collect()
            .await;
        stats.attempted += results.len();
        stats.processed += results.iter().filter(|ok| **ok).count();
    }
    Ok(stats)
}

/// Clean-extract one expression with archive cascade, merge, and rebuild its
/// media and links. Always stamps `readable_at`, even on double failure.
#[allow(clippy::too_many_arguments)]
async fn process_expression(
    ctx: &Context,
    extractor: &dyn CleanExtractor,
    fetcher: &dyn Fetcher,
    gate: &dyn RelevanceGate,
    lexicon: &Lexicon,
    land: &Land,
    expression: &Expression,
    options: &ReadableOptions,
) -> bool {
    let doc = match extract_with_archive_fallback(ctx, extractor, fetcher, &expression.url).await {
        Some(doc) => doc,
        None => {
            // Both live and archive extraction failed: mark as processed so
            // the pipeline does not retry it forever.
            let now = chrono::Utc::now().naive_utc();
            if let Err(e) = sqlx::query("UPDATE expression SET readable_at = ? WHERE id = ?")
                .bind(now)
                .bind(expression.id)
                .execute(&ctx.db)
                .await
            {
                tracing::error!("CRITICAL: cannot stamp readable_at: {}", e);
            }
            return false;
        }
    };

    match apply_clean_doc(ctx, gate, lexicon, land, expression, &doc, options).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(
                "CRITICAL: failed to apply clean doc to #{}: {}",
                expression.id,
                e
            );
            false
        }
    }
}

async fn extract_with_archive_fallback(
    ctx: &Context,
    extractor: &dyn CleanExtractor,
    fetcher: &dyn Fetcher,
    url: &str,
) -> Option<CleanDoc> {
    match extractor.extract(url).await {
        Ok(doc) => Some(doc),
        Err(e) => {
            tracing::warn!("clean extraction failed for {}: {}", url, e);
            let timeout = Duration::from_secs(ctx.config.default_timeout);
            let snapshot = archive::earliest_snapshot(fetcher, url, timeout).await?;
            tracing::info!("archive snapshot {} for {}", snapshot.timestamp, url);
            match extractor.extract(&snapshot.url).await {
                Ok(doc) => Some(doc),
                Err(e) => {
                    tracing::warn!("clean extraction failed on snapshot of {}: {}", url, e);
                    None
                }
            }
        }
    }
}

async fn apply_clean_doc(
    ctx: &Context,
    gate: &dyn RelevanceGate,
    lexicon: &Lexicon,
    land: &Land,
    expression: &Expression,
    doc: &CleanDoc,
    options: &ReadableOptions,
) -> Result<()> {
    let strategy = options.merge;

    let title = doc
        .title
        .as_deref()
        .map(|clean| merge_text(strategy, MergeField::Title, expression.title.as_deref(), clean))
        .or_else(|| expression.title.clone());
    let description = doc
        .excerpt
        .as_deref()
        .map(|clean| {
            merge_text(
                strategy,
                MergeField::Description,
                expression.description.as_deref(),
                clean,
            )
        })
        .or_else(|| expression.description.clone());
    let readable = doc
        .markdown
        .as_deref()
        .map(|clean| {
            merge_text(
                strategy,
                MergeField::Readable,
                expression.readable.as_deref(),
                clean,
            )
        })
        .or_else(|| expression.readable.clone());
    let lang = doc
        .direction
        .as_deref()
        .map(|clean| merge_text(strategy, MergeField::Lang, expression.lang.as_deref(), clean))
        .or_else(|| expression.lang.clone());
    let published_at = doc
        .date_published
        .as_deref()
        .and_then(parse_published_date)
        .map(|clean| merge_published(strategy, expression.published_at, clean))
        .or(expression.published_at);

    let readable_changed = readable != expression.readable;
    let now = chrono::Utc::now().naive_utc();

    // Relevance only moves when the body moved.
    let mut relevance = expression.relevance;
    let mut approved_at = expression.approved_at;
    let mut validllm: Option<&str> = None;
    if readable_changed {
        let mut score = lexicon.score(
            title.as_deref().unwrap_or(""),
            readable.as_deref().unwrap_or(""),
        );
        if options.use_gate && gate.is_enabled() {
            match gate
                .verdict(land, title.as_deref().unwrap_or(""), readable.as_deref().unwrap_or(""))
                .await
            {
                GateVerdict::NotRelevant => {
                    score = 0;
                    validllm = Some(VERDICT_NO);
                }
                GateVerdict::Relevant => validllm = Some(VERDICT_YES),
                GateVerdict::Unknown => {}
            }
        }
        relevance = Some(score);
        approved_at = (score > 0).then_some(now);
    }

    sqlx::query(
        "UPDATE expression SET title = ?, description = ?, readable = ?, lang = ?, \
         published_at = ?, relevance = ?, approved_at = ?, readable_at = ?, \
         validllm = COALESCE(?, validllm), validmodel = COALESCE(?, validmodel) \
         WHERE id = ?",
    )
    .bind(&title)
    .bind(&description)
    .bind(&readable)
    .bind(&lang)
    .bind(published_at)
    .bind(relevance)
    .bind(approved_at)
    .bind(now)
    .bind(validllm)
    .bind(validllm.map(|_| gate.model_name()))
    .bind(expression.id)
    .execute(&ctx.db)
    .await?;

    // Media and links are rebuilt from the merged Markdown so they stay
    // consistent with what is actually stored.
    let merged = readable.as_deref().unwrap_or("");
    let media = media_from_markdown(merged, &expression.url);
    let links = links_from_markdown(merged, &expression.url);
    graph::replace_media(&ctx.db, expression, &media).await?;
    graph::replace_links(&ctx.db, &ctx.heuristics, land, expression, &links).await?;

    tracing::info!(
        "expression #{} reprocessed: {} media, {} links",
        expression.id,
        media.len(),
        links.len()
    );
    Ok(())
}
