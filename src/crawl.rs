use anyhow::Result;
use chrono::NaiveDateTime;
use futures::stream::{self, StreamExt};
use sqlx::Row;
use std::time::Duration;

use crate::core::types::{GateVerdict, PipelineStats};
use crate::core::Context;
use crate::db::graph;
use crate::db::models::{Expression, Land};
use crate::dynamic_media;
use crate::extract::{self, ExtractionOutcome};
use crate::fetch::Fetcher;
use crate::gate::{RelevanceGate, VERDICT_NO, VERDICT_YES};
use crate::lexicon::{load_lexicon, Lexicon};

// ---------------------------------------------------------------------------
// Crawl Orchestrator — depth-ordered batch scheduling with bounded parallel
// fetch. All expressions at depth D reach a terminal state before anything
// at depth D+1 starts; within a batch, interleaving is arbitrary. The
// per-expression pipeline never raises to the orchestrator.
// ---------------------------------------------------------------------------

/// Links are only followed below this depth; deeper pages are fetched and
/// scored but stop expanding the frontier.
const MAX_LINK_DEPTH: i64 = 3;

#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Cap on *attempts*, not successes. 0 = unlimited.
    pub limit: usize,
    /// Re-crawl mode: select by stored `http_status` instead of unfetched.
    pub http_status: Option<String>,
    /// Restrict the run to a single depth.
    pub depth: Option<i64>,
}

async fn candidate_depths(ctx: &Context, land: &Land, options: &CrawlOptions) -> Result<Vec<i64>> {
    if let Some(depth) = options.depth {
        return Ok(vec![depth]);
    }
    let rows = match &options.http_status {
        None => {
            sqlx::query(
                "SELECT DISTINCT depth FROM expression \
                 WHERE land_id = ? AND fetched_at IS NULL ORDER BY depth",
            )
            .bind(land.id)
            .fetch_all(&ctx.db)
            .await?
        }
        Some(status) => {
            sqlx::query(
                "SELECT DISTINCT depth FROM expression \
                 WHERE land_id = ? AND http_status = ? ORDER BY depth",
            )
            .bind(land.id)
            .bind(status)
            .fetch_all(&ctx.db)
            .await?
        }
    };
    Ok(rows.iter().map(|r| r.get::<i64, _>("depth")).collect())
}

async fn candidates_at_depth(
    ctx: &Context,
    land: &Land,
    options: &CrawlOptions,
    depth: i64,
) -> Result<Vec<Expression>> {
    let rows = match &options.http_status {
        None => {
            sqlx::query_as::<_, Expression>(
                "SELECT * FROM expression \
                 WHERE land_id = ? AND fetched_at IS NULL AND depth = ? ORDER BY id",
            )
            .bind(land.id)
            .bind(depth)
            .fetch_all(&ctx.db)
            .await?
        }
        Some(status) => {
            sqlx::query_as::<_, Expression>(
                "SELECT * FROM expression \
                 WHERE land_id = ? AND http_status = ? AND depth = ? ORDER BY id",
            )
            .bind(land.id)
            .bind(status)
            .bind(depth)
            .fetch_all(&ctx.db)
            .await?
        }
    };
    Ok(rows)
}

/// Crawl all pending expressions in a land, depth by depth.
///
/// Returns `(attempted, processed)`; errors are `attempted - processed`.
pub async fn crawl_land(
    ctx: &Context,
    fetcher: &dyn Fetcher,
    gate: &dyn RelevanceGate,
    land: &Land,
    options: &CrawlOptions,
) -> Result<PipelineStats> {
    tracing::info!("crawling land {} ({})", land.name, land.id);
    let lexicon = load_lexicon(ctx, land).await?;
    let mut stats = PipelineStats::default();

    let depths = candidate_depths(ctx, land, options).await?;
    for depth in depths {
        tracing::info!("processing depth {}", depth);
        let candidates = candidates_at_depth(ctx, land, options, depth).await?;
        if candidates.is_empty() {
            continue;
        }

        let batch_size = ctx.config.parallel_connections.max(1);
        for batch in candidates.chunks(batch_size) {
            // Enforce the attempt cap before dispatching the next batch.
            let batch: &[Expression] = if options.limit > 0 {
                let remaining = options.limit.saturating_sub(stats.attempted);
                if remaining == 0 {
                    return Ok(stats);
                }
                &batch[..batch.len().min(remaining)]
            } else {
                batch
            };

            let results: Vec<bool> = stream::iter(batch)
                .map(|expr| crawl_expression(ctx, fetcher, gate, &lexicon, land, expr))
                .buffer_unordered(batch_size)
                .collect()
                .await;

            stats.attempted += results.len();
            stats.processed += results.iter().filter(|ok| **ok).count();

            if options.limit > 0 && stats.attempted >= options.limit {
                return Ok(stats);
            }
        }
    }

    Ok(stats)
}

/// Fetch, extract, score and persist one expression. Never raises: every
/// failure mode is folded into the stored row, and the return value only
/// reports whether readable extraction succeeded.
async fn crawl_expression(
    ctx: &Context,
    fetcher: &dyn Fetcher,
    gate: &dyn RelevanceGate,
    lexicon: &Lexicon,
    land: &Land,
    expression: &Expression,
) -> bool {
    tracing::info!("crawling expression #{}: {}", expression.id, expression.url);
    let fetched_at = chrono::Utc::now().naive_utc();
    let archive_timeout = Duration::from_secs(ctx.config.default_timeout);

    let extraction = extract::extract_expression(fetcher, &expression.url, archive_timeout).await;

    if ctx.config.archive {
        archive_raw_html(ctx, land, expression, &extraction);
    }

    match persist_extraction(ctx, gate, lexicon, land, expression, &extraction, fetched_at).await {
        Ok(processed) => processed,
        Err(e) => {
            tracing::error!(
                "CRITICAL: failed to persist expression #{}: {}",
                expression.id,
                e
            );
            false
        }
    }
}

async fn persist_extraction(
    ctx: &Context,
    gate: &dyn RelevanceGate,
    lexicon: &Lexicon,
    land: &Land,
    expression: &Expression,
    extraction: &ExtractionOutcome,
    fetched_at: NaiveDateTime,
) -> Result<bool> {
    let status = extraction.outcome.as_status();
    let title = extraction
        .title
        .clone()
        .unwrap_or_else(|| expression.url.clone());

    let Some(readable) = extraction.readable.as_deref().filter(|r| !r.trim().is_empty()) else {
        // All extraction stages failed: the row still counts as fetched so a
        // plain re-run does not retry it.
        sqlx::query(
            "UPDATE expression SET fetched_at = ?, http_status = ?, \
             title = COALESCE(?, title), description = COALESCE(?, description), \
             keywords = COALESCE(?, keywords), lang = COALESCE(?, lang) \
             WHERE id = ?",
        )
        .bind(fetched_at)
        .bind(&status)
        .bind(&extraction.title)
        .bind(&extraction.description)
        .bind(&extraction.keywords)
        .bind(&extraction.lang)
        .bind(expression.id)
        .execute(&ctx.db)
        .await?;
        tracing::warn!(
            "all extraction stages failed for {} (status {})",
            expression.url,
            status
        );
        return Ok(false);
    };

    // Relevance: lexicon score, unless the gate vetoes it outright.
    let mut relevance = lexicon.score(&title, readable);
    let mut validllm: Option<&str> = None;
    if gate.is_enabled() {
        match gate.verdict(land, &title, readable).await {
            GateVerdict::NotRelevant => {
                relevance = 0;
                validllm = Some(VERDICT_NO);
            }
            GateVerdict::Relevant => validllm = Some(VERDICT_YES),
            GateVerdict::Unknown => {}
        }
    }
    let approved_at = (relevance > 0).then(|| chrono::Utc::now().naive_utc());

    sqlx::query(
        "UPDATE expression SET fetched_at = ?, http_status = ?, readable = ?, \
         title = ?, description = ?, keywords = ?, lang = ?, relevance = ?, \
         approved_at = ?, \
         validllm = COALESCE(?, validllm), validmodel = COALESCE(?, validmodel) \
         WHERE id = ?",
    )
    .bind(fetched_at)
    .bind(&status)
    .bind(readable)
    .bind(&title)
    .bind(&extraction.description)
    .bind(&extraction.keywords)
    .bind(&extraction.lang)
    .bind(relevance)
    .bind(approved_at)
    .bind(validllm)
    .bind(validllm.map(|_| gate.model_name()))
    .bind(expression.id)
    .execute(&ctx.db)
    .await?;

    // The outgoing edge set is rebuilt on every successful extraction; the
    // frontier only grows for approved pages above the link-depth cutoff.
    let links: &[String] = if relevance > 0 && expression.depth < MAX_LINK_DEPTH {
        &extraction.links
    } else {
        &[]
    };
    if !links.is_empty() {
        tracing::info!("linking {} discovered urls to #{}", links.len(), expression.id);
    }
    graph::replace_links(&ctx.db, &ctx.heuristics, land, expression, links).await?;

    graph::replace_media(&ctx.db, expression, &extraction.media).await?;

    // Best-effort dynamic pass for approved pages only.
    if relevance > 0 && ctx.config.dynamic_media_extraction {
        let discovered = dynamic_media::discover_media(&expression.url).await;
        for item in &discovered {
            if let Err(e) = graph::record_media(&ctx.db, expression, &item.url, item.kind).await {
                tracing::warn!("dynamic media insert failed: {}", e);
            }
        }
    }

    Ok(true)
}

/// Archive the raw fetched HTML under `lands/<land_id>/<expression_id>`.
fn archive_raw_html(
    ctx: &Context,
    land: &Land,
    expression: &Expression,
    extraction: &ExtractionOutcome,
) {
    let Some(html) = extraction.raw_html.as_deref() else {
        return;
    };
    let dir = ctx.land_dir(land.id);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!("cannot create archive dir {}: {}", dir.display(), e);
        return;
    }
    let path = dir.join(expression.id.to_string());
    if let Err(e) = std::fs::write(&path, html.trim()) {
        tracing::warn!("cannot archive raw html to {}: {}", path.display(), e);
    }
}
