use anyhow::Result;
use sqlx::Row;
use std::time::Duration;

use crate::core::Context;
use crate::db::models::Domain;
use crate::extract::{archive, metadata};
use crate::fetch::{FetchError, Fetcher};

// ---------------------------------------------------------------------------
// Domain Harvester — fetches homepage metadata for domains through three
// fallback stages: clean fetch (https then http), web-archive snapshot,
// direct GET with redirects. Failures record sentinel statuses; the row is
// always saved so the domain counts as fetched.
// ---------------------------------------------------------------------------

pub const ERR_TRAFI: &str = "ERR_TRAFI";
pub const ERR_ARCHIVE: &str = "ERR_ARCHIVE";
pub const ERR_ARCHIVE_NF: &str = "ERR_ARCHIVE_NF";
pub const ERR_ARCHIVE_TO: &str = "ERR_ARCHIVE_TO";
pub const ERR_ARCHIVE_REQ: &str = "ERR_ARCHIVE_REQ";
pub const ARC_NO_HTML: &str = "ARC_NO_HTML";
pub const REQ_NO_HTML: &str = "REQ_NO_HTML";
pub const ERR_UNKNOWN: &str = "ERR_UNKNOWN";
pub const ERR_PROCESS: &str = "ERR_PROCESS";
pub const ERR_NO_STATUS: &str = "ERR_NO_STATUS";
pub const ERR_ALL_FAILED: &str = "ERR_ALL_FAILED";

#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    /// 0 = unlimited.
    pub limit: usize,
    /// Re-crawl mode: select by stored `http_status` instead of unfetched.
    pub http_status: Option<String>,
}

struct StageHit {
    html: String,
    status: String,
    method: &'static str,
}

/// Stage 1 — polite clean fetch of the homepage, https then http.
/// Accepts 2xx HTML with a non-empty body.
async fn clean_fetch_stage(
    fetcher: &dyn Fetcher,
    name: &str,
    timeout: Duration,
) -> Result<Option<StageHit>, String> {
    for scheme in ["https", "http"] {
        let url = format!("{}://{}", scheme, name);
        match fetcher.fetch(&url, timeout).await {
            Ok(page) if (200..300).contains(&page.status) && page.is_html() => {
                if !page.body.trim().is_empty() {
                    return Ok(Some(StageHit {
                        html: page.body,
                        status: "200".to_string(),
                        method: "CLEAN_FETCH",
                    }));
                }
            }
            Ok(_) => continue,
            Err(FetchError::Other(e)) => return Err(e),
            Err(_) => continue,
        }
    }
    Ok(None)
}

/// Stage 2 — web-archive snapshot of the https homepage.
async fn archive_stage(
    fetcher: &dyn Fetcher,
    name: &str,
    timeout: Duration,
) -> Result<Option<StageHit>, &'static str> {
    let homepage = format!("https://{}", name);
    let Some(snapshot) = archive::earliest_snapshot(fetcher, &homepage, timeout).await else {
        return Err(ERR_ARCHIVE_NF);
    };
    match fetcher.fetch(&snapshot.url, timeout).await {
        Ok(page) if page.is_html() => Ok(Some(StageHit {
            html: page.body,
            status: page.status.to_string(),
            method: "ARCHIVE_ORG",
        })),
        Ok(_) => Err(ARC_NO_HTML),
        Err(FetchError::Timeout(_)) => Err(ERR_ARCHIVE_TO),
        Err(FetchError::Request(_)) => Err(ERR_ARCHIVE_REQ),
        Err(FetchError::Other(_)) => Err(ERR_ARCHIVE),
    }
}

/// Stage 3 — direct GET with redirects, https then http. Accepts only 2xx
/// responses whose content type contains `html`.
async fn direct_stage(
    fetcher: &dyn Fetcher,
    name: &str,
    timeout: Duration,
) -> (Option<StageHit>, Option<String>) {
    let mut last_status: Option<String> = None;
    for scheme in ["https", "http"] {
        let url = format!("{}://{}", scheme, name);
        match fetcher.fetch(&url, timeout).await {
            Ok(page) => {
                last_status = Some(page.status.to_string());
                if (200..300).contains(&page.status) {
                    if page.is_html() {
                        return (
                            Some(StageHit {
                                html: page.body,
                                status: page.status.to_string(),
                                method: "REQUESTS",
                            }),
                            last_status,
                        );
                    }
                    last_status = Some(REQ_NO_HTML.to_string());
                }
            }
            Err(FetchError::Timeout(_)) | Err(FetchError::Request(_)) => {
                last_status = Some("000".to_string());
            }
            Err(FetchError::Other(_)) => {
                last_status = Some(ERR_UNKNOWN.to_string());
            }
        }
    }
    (None, last_status)
}

/// Persist harvested homepage metadata on the domain row.
async fn process_domain_content(ctx: &Context, domain: &Domain, hit: &StageHit) -> Result<()> {
    let meta = metadata::combine(&hit.html);
    sqlx::query(
        "UPDATE domain SET title = ?, description = ?, keywords = ? WHERE id = ?",
    )
    .bind(&meta.title)
    .bind(&meta.description)
    .bind(&meta.keywords)
    .bind(domain.id)
    .execute(&ctx.db)
    .await?;
    Ok(())
}

/// Harvest homepage metadata for all domains matching the filter.
/// Returns the number of domains whose content was processed.
pub async fn crawl_domains(
    ctx: &Context,
    fetcher: &dyn Fetcher,
    options: &HarvestOptions,
) -> Result<usize> {
    let mut sql = String::from("SELECT * FROM domain");
    sql.push_str(match &options.http_status {
        Some(_) => " WHERE http_status = ?",
        None => " WHERE fetched_at IS NULL",
    });
    sql.push_str(" ORDER BY id");
    if options.limit > 0 {
        sql.push_str(" LIMIT ?");
    }
    let mut query = sqlx::query_as::<_, Domain>(&sql);
    if let Some(status) = &options.http_status {
        query = query.bind(status);
    }
    if options.limit > 0 {
        query = query.bind(options.limit as i64);
    }
    let domains = query.fetch_all(&ctx.db).await?;

    let timeout = Duration::from_secs(ctx.config.default_timeout);
    let mut processed = 0usize;

    for domain in &domains {
        let mut hit: Option<StageHit> = None;
        let mut status: Option<String> = None;

        tracing::info!("harvesting domain {}", domain.name);

        // Stage 1: clean fetch.
        match clean_fetch_stage(fetcher, &domain.name, timeout).await {
            Ok(Some(found)) => hit = Some(found),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("clean fetch failed for {}: {}", domain.name, e);
                status = Some(ERR_TRAFI.to_string());
            }
        }

        // Stage 2: archive snapshot.
        if hit.is_none() {
            match archive_stage(fetcher, &domain.name, timeout).await {
                Ok(found) => hit = found,
                Err(sentinel) => {
                    tracing::warn!("archive stage for {}: {}", domain.name, sentinel);
                    status = Some(sentinel.to_string());
                }
            }
        }

        // Stage 3: direct requests.
        if hit.is_none() {
            let (found, last_status) = direct_stage(fetcher, &domain.name, timeout).await;
            hit = found;
            if let Some(s) = last_status {
                status = Some(s);
            } else if status.is_none() {
                status = Some(ERR_ALL_FAILED.to_string());
            }
        }

        let mut final_status = match &hit {
            Some(found) => found.status.clone(),
            None => status.unwrap_or_else(|| ERR_NO_STATUS.to_string()),
        };

        if let Some(found) = &hit {
            match process_domain_content(ctx, domain, found).await {
                Ok(()) => {
                    tracing::info!("domain {} processed via {}", domain.name, found.method);
                    processed += 1;
                }
                Err(e) => {
                    tracing::error!("content processing failed for {}: {}", domain.name, e);
                    final_status = ERR_PROCESS.to_string();
                }
            }
        } else {
            tracing::warn!(
                "all harvest stages failed for {} (status {})",
                domain.name,
                final_status
            );
        }

        let now = chrono::Utc::now().naive_utc();
        if let Err(e) = sqlx::query("UPDATE domain SET http_status = ?, fetched_at = ? WHERE id = ?")
            .bind(&final_status)
            .bind(now)
            .bind(domain.id)
            .execute(&ctx.db)
            .await
        {
            tracing::error!("CRITICAL: failed to save domain {}: {}", domain.name, e);
        }
    }

    Ok(processed)
}

/// Re-run logical-domain extraction over every expression and reassign the
/// domain foreign key where the current heuristics disagree with the stored
/// assignment.
pub async fn update_heuristics(ctx: &Context) -> Result<usize> {
    let rows = sqlx::query(
        "SELECT e.id, e.url, d.name AS domain_name \
         FROM expression e JOIN domain d ON d.id = e.domain_id",
    )
    .fetch_all(&ctx.db)
    .await?;

    let mut updated = 0usize;
    for row in rows {
        let id: i64 = row.get("id");
        let url: String = row.get("url");
        let current: String = row.get("domain_name");
        let host = crate::urlnorm::domain_of(&url, &ctx.heuristics);
        if host.is_empty() || host == current {
            continue;
        }
        let mut conn = ctx.db.acquire().await?;
        sqlx::query("INSERT INTO domain (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(&host)
            .bind(chrono::Utc::now().naive_utc())
            .execute(&mut *conn)
            .await?;
        let domain_id: i64 = sqlx::query("SELECT id FROM domain WHERE name = ?")
            .bind(&host)
            .fetch_one(&mut *conn)
            .await?
            .get("id");
        sqlx::query("UPDATE expression SET domain_id = ? WHERE id = ?")
            .bind(domain_id)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        updated += 1;
    }
    tracing::info!("heuristic update reassigned {} expressions", updated);
    Ok(updated)
}
