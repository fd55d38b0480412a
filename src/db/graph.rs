use anyhow::Result;
use sqlx::sqlite::SqliteConnection;
use sqlx::{Row, SqlitePool};

use crate::core::context::Heuristic;
use crate::core::types::{MediaKind, MediaRef};
use crate::db::models::{Expression, Land};
use crate::urlnorm::{domain_of, is_crawlable, remove_anchor, resolve_url};

// ---------------------------------------------------------------------------
// Expression Graph Writer — idempotent creation of expressions, domains,
// links and media. Uniqueness constraints are the sole correctness guard
// under parallel fetch workers: racing inserts use ON CONFLICT DO NOTHING
// and must never fail the caller.
// ---------------------------------------------------------------------------

async fn select_expression(
    conn: &mut SqliteConnection,
    land_id: i64,
    url: &str,
) -> Result<Option<Expression>> {
    let expr = sqlx::query_as::<_, Expression>("SELECT * FROM expression WHERE land_id = ? AND url = ?")
        .bind(land_id)
        .bind(url)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(expr)
}

/// Get-or-create the domain row for a host. Returns its id.
async fn ensure_domain(conn: &mut SqliteConnection, host: &str) -> Result<i64> {
    sqlx::query("INSERT INTO domain (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
        .bind(host)
        .bind(chrono::Utc::now().naive_utc())
        .execute(&mut *conn)
        .await?;
    let id: i64 = sqlx::query("SELECT id FROM domain WHERE name = ?")
        .bind(host)
        .fetch_one(&mut *conn)
        .await?
        .get("id");
    Ok(id)
}

/// Get-or-create an expression for `(land, url)` at the supplied depth.
///
/// The URL is anchor-stripped first; non-crawlable URLs yield `None`. The
/// stored depth of an already-existing expression is never updated on
/// re-discovery.
pub async fn ensure_expression_conn(
    conn: &mut SqliteConnection,
    heuristics: &[Heuristic],
    land: &Land,
    url: &str,
    depth: i64,
) -> Result<Option<Expression>> {
    let url = remove_anchor(url);
    if !is_crawlable(url) {
        return Ok(None);
    }
    let host = domain_of(url, heuristics);
    if host.is_empty() {
        return Ok(None);
    }
    let domain_id = ensure_domain(conn, &host).await?;
    sqlx::query(
        "INSERT INTO expression (land_id, domain_id, url, depth, created_at) \
         VALUES (?, ?, ?, ?, ?) ON CONFLICT(land_id, url) DO NOTHING",
    )
    .bind(land.id)
    .bind(domain_id)
    .bind(url)
    .bind(depth)
    .bind(chrono::Utc::now().naive_utc())
    .execute(&mut *conn)
    .await?;
    select_expression(conn, land.id, url).await
}

/// Pool-level convenience wrapper around [`ensure_expression_conn`].
pub async fn ensure_expression(
    pool: &SqlitePool,
    heuristics: &[Heuristic],
    land: &Land,
    url: &str,
    depth: i64,
) -> Result<Option<Expression>> {
    let mut conn = pool.acquire().await?;
    ensure_expression_conn(&mut *conn, heuristics, land, url, depth).await
}

/// Create a directed link from `source` to the expression for `child_url`,
/// creating the child at `source.depth + 1` when needed. Self-links are
/// refused; an already-existing link is a silent no-op.
pub async fn link_conn(
    conn: &mut SqliteConnection,
    heuristics: &[Heuristic],
    land: &Land,
    source: &Expression,
    child_url: &str,
) -> Result<bool> {
    let Some(target) =
        ensure_expression_conn(conn, heuristics, land, child_url, source.depth + 1).await?
    else {
        return Ok(false);
    };
    if target.id == source.id {
        return Ok(false);
    }
    sqlx::query(
        "INSERT INTO expression_link (source_id, target_id) VALUES (?, ?) \
         ON CONFLICT(source_id, target_id) DO NOTHING",
    )
    .bind(source.id)
    .bind(target.id)
    .execute(&mut *conn)
    .await?;
    Ok(true)
}

pub async fn link(
    pool: &SqlitePool,
    heuristics: &[Heuristic],
    land: &Land,
    source: &Expression,
    child_url: &str,
) -> Result<bool> {
    let mut conn = pool.acquire().await?;
    link_conn(&mut *conn, heuristics, land, source, child_url).await
}

/// Record a media reference on an expression. The URL is resolved absolute
/// against the expression URL and lowercased; duplicates are silent no-ops.
pub async fn record_media_conn(
    conn: &mut SqliteConnection,
    expression: &Expression,
    raw_url: &str,
    kind: MediaKind,
) -> Result<()> {
    let resolved = resolve_url(&expression.url, raw_url).to_lowercase();
    if resolved.is_empty() {
        return Ok(());
    }
    sqlx::query(
        "INSERT INTO media (expression_id, url, kind) VALUES (?, ?, ?) \
         ON CONFLICT(expression_id, url) DO NOTHING",
    )
    .bind(expression.id)
    .bind(&resolved)
    .bind(kind.as_str())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn record_media(
    pool: &SqlitePool,
    expression: &Expression,
    raw_url: &str,
    kind: MediaKind,
) -> Result<()> {
    let mut conn = pool.acquire().await?;
    record_media_conn(&mut *conn, expression, raw_url, kind).await
}

/// Wipe and rebuild all outgoing links of an expression inside one
/// transaction, so a concurrent reader never observes a missing-link window.
pub async fn replace_links(
    pool: &SqlitePool,
    heuristics: &[Heuristic],
    land: &Land,
    expression: &Expression,
    urls: &[String],
) -> Result<usize> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM expression_link WHERE source_id = ?")
        .bind(expression.id)
        .execute(&mut *tx)
        .await?;
    let mut linked = 0usize;
    for url in urls {
        if link_conn(&mut *tx, heuristics, land, expression, url).await? {
            linked += 1;
        }
    }
    tx.commit().await?;
    Ok(linked)
}

/// Wipe and rebuild the media set of an expression inside one transaction.
pub async fn replace_media(
    pool: &SqlitePool,
    expression: &Expression,
    items: &[MediaRef],
) -> Result<usize> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM media WHERE expression_id = ?")
        .bind(expression.id)
        .execute(&mut *tx)
        .await?;
    for item in items {
        record_media_conn(&mut *tx, expression, &item.url, item.kind).await?;
    }
    let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM media WHERE expression_id = ?")
        .bind(expression.id)
        .fetch_one(&mut *tx)
        .await?
        .get("n");
    tx.commit().await?;
    Ok(count as usize)
}

/// Realign the approval invariant over a whole land:
/// `approved_at` is non-null iff `relevance > 0` and the page was fetched.
pub async fn sweep_approval(pool: &SqlitePool, land: &Land) -> Result<()> {
    let now = chrono::Utc::now().naive_utc();
    sqlx::query(
        "UPDATE expression SET approved_at = COALESCE(approved_at, ?) \
         WHERE land_id = ? AND fetched_at IS NOT NULL AND COALESCE(relevance, 0) > 0",
    )
    .bind(now)
    .bind(land.id)
    .execute(pool)
    .await?;
    sqlx::query(
        "UPDATE expression SET approved_at = NULL \
         WHERE land_id = ? AND (fetched_at IS NULL OR COALESCE(relevance, 0) = 0)",
    )
    .bind(land.id)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_land, open_memory_pool, setup};

    async fn fixture() -> (SqlitePool, Land) {
        let pool = open_memory_pool().await.unwrap();
        setup(&pool).await.unwrap();
        let land = create_land(&pool, "demo", "test land", "fr").await.unwrap();
        (pool, land)
    }

    #[tokio::test]
    async fn ensure_expression_is_idempotent_and_keeps_depth() {
        let (pool, land) = fixture().await;
        let first = ensure_expression(&pool, &[], &land, "https://a.example/x", 0)
            .await
            .unwrap()
            .unwrap();
        // Re-discovery at a greater depth must not change the stored depth.
        let second = ensure_expression(&pool, &[], &land, "https://a.example/x", 5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.depth, 0);
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM expression")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn anchors_are_stripped_before_dedup() {
        let (pool, land) = fixture().await;
        for url in [
            "https://a.example/x#s1",
            "https://a.example/x#s2",
            "https://a.example/x",
        ] {
            ensure_expression(&pool, &[], &land, url, 0).await.unwrap();
        }
        let rows = sqlx::query("SELECT url FROM expression")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<String, _>("url"), "https://a.example/x");
    }

    #[tokio::test]
    async fn non_crawlable_urls_are_refused() {
        let (pool, land) = fixture().await;
        assert!(ensure_expression(&pool, &[], &land, "https://a.example/doc.pdf", 0)
            .await
            .unwrap()
            .is_none());
        assert!(ensure_expression(&pool, &[], &land, "ftp://a.example/", 0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn link_refuses_self_loops_and_dedups() {
        let (pool, land) = fixture().await;
        let source = ensure_expression(&pool, &[], &land, "https://a.example/1", 0)
            .await
            .unwrap()
            .unwrap();
        assert!(!link(&pool, &[], &land, &source, "https://a.example/1#frag")
            .await
            .unwrap());
        assert!(link(&pool, &[], &land, &source, "https://b.example/2")
            .await
            .unwrap());
        // Linking twice leaves a single row.
        assert!(link(&pool, &[], &land, &source, "https://b.example/2")
            .await
            .unwrap());
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM expression_link")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n");
        assert_eq!(n, 1);
        // The child was created at depth 1.
        let child = ensure_expression(&pool, &[], &land, "https://b.example/2", 9)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(child.depth, 1);
    }

    #[tokio::test]
    async fn replace_links_is_idempotent() {
        let (pool, land) = fixture().await;
        let source = ensure_expression(&pool, &[], &land, "https://a.example/1", 0)
            .await
            .unwrap()
            .unwrap();
        let urls = vec![
            "https://b.example/2".to_string(),
            "https://c.example/3".to_string(),
        ];
        replace_links(&pool, &[], &land, &source, &urls).await.unwrap();
        replace_links(&pool, &[], &land, &source, &urls).await.unwrap();
        let n: i64 = sqlx::query("SELECT COUNT(*) AS n FROM expression_link WHERE source_id = ?")
            .bind(source.id)
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("n");
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn replace_media_resolves_and_lowercases() {
        let (pool, land) = fixture().await;
        let expr = ensure_expression(&pool, &[], &land, "https://a.example/dir/page", 0)
            .await
            .unwrap()
            .unwrap();
        let items = vec![
            MediaRef::new("/IMG/Pic.PNG", MediaKind::Img),
            MediaRef::new("/img/pic.png", MediaKind::Img),
        ];
        let n = replace_media(&pool, &expr, &items).await.unwrap();
        assert_eq!(n, 1);
        let url: String = sqlx::query("SELECT url FROM media WHERE expression_id = ?")
            .bind(expr.id)
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("url");
        assert_eq!(url, "https://a.example/img/pic.png");
    }

    #[tokio::test]
    async fn sweep_approval_enforces_invariant() {
        let (pool, land) = fixture().await;
        let e = ensure_expression(&pool, &[], &land, "https://a.example/1", 0)
            .await
            .unwrap()
            .unwrap();
        let now = chrono::Utc::now().naive_utc();
        sqlx::query("UPDATE expression SET fetched_at = ?, relevance = 3 WHERE id = ?")
            .bind(now)
            .bind(e.id)
            .execute(&pool)
            .await
            .unwrap();
        sweep_approval(&pool, &land).await.unwrap();
        let row = sqlx::query("SELECT approved_at FROM expression WHERE id = ?")
            .bind(e.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(row
            .get::<Option<chrono::NaiveDateTime>, _>("approved_at")
            .is_some());

        sqlx::query("UPDATE expression SET relevance = 0 WHERE id = ?")
            .bind(e.id)
            .execute(&pool)
            .await
            .unwrap();
        sweep_approval(&pool, &land).await.unwrap();
        let row = sqlx::query("SELECT approved_at FROM expression WHERE id = ?")
            .bind(e.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(row
            .get::<Option<chrono::NaiveDateTime>, _>("approved_at")
            .is_none());
    }
}
