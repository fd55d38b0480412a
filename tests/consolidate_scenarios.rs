mod common;

use common::*;
use sqlx::Row;

use landgraph::consolidate::{consolidate_land, ConsolidateOptions};
use landgraph::core::types::MediaKind;
use landgraph::db::graph;
use landgraph::lexicon;

/// Consolidation rebuilds the link graph and media set from the stored
/// readable, without fetching anything.
#[tokio::test]
async fn consolidation_rebuilds_graph_from_readable() {
    let (_dir, ctx) = test_context().await;
    let land = make_land(&ctx, "demo", "fr").await;
    lexicon::add_terms(&ctx, &land, "web").await.unwrap();

    let expr = graph::ensure_expression(&ctx.db, &ctx.heuristics, &land, "https://a.example/1", 0)
        .await
        .unwrap()
        .unwrap();

    // Pre-state: an old link and an old media row that the edited readable
    // no longer references.
    graph::link(&ctx.db, &ctx.heuristics, &land, &expr, "https://old.example/gone")
        .await
        .unwrap();
    graph::record_media(&ctx.db, &expr, "https://a.example/old.png", MediaKind::Img)
        .await
        .unwrap();

    // Manually edited readable embedding a brand new link and image.
    sqlx::query(
        "UPDATE expression SET fetched_at = ?, title = 'Edited', \
         readable = 'All about the web. [new](https://c.example/new) ![f](https://a.example/new.jpg)' \
         WHERE id = ?",
    )
    .bind(chrono::Utc::now().naive_utc())
    .bind(expr.id)
    .execute(&ctx.db)
    .await
    .unwrap();

    let stats = consolidate_land(&ctx, &land, &ConsolidateOptions::default())
        .await
        .unwrap();
    assert!(stats.processed >= 1);

    // Old rows are gone.
    let old_links: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM expression_link el \
         JOIN expression t ON t.id = el.target_id \
         WHERE el.source_id = ? AND t.url = 'https://old.example/gone'",
    )
    .bind(expr.id)
    .fetch_one(&ctx.db)
    .await
    .unwrap()
    .get("n");
    assert_eq!(old_links, 0);
    let old_media: i64 =
        sqlx::query("SELECT COUNT(*) AS n FROM media WHERE expression_id = ? AND url LIKE '%old%'")
            .bind(expr.id)
            .fetch_one(&ctx.db)
            .await
            .unwrap()
            .get("n");
    assert_eq!(old_media, 0);

    // The new child exists at depth + 1 and is linked.
    let child = sqlx::query("SELECT id, depth FROM expression WHERE url = 'https://c.example/new'")
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(child.get::<i64, _>("depth"), 1);
    let new_link: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM expression_link WHERE source_id = ? AND target_id = ?",
    )
    .bind(expr.id)
    .bind(child.get::<i64, _>("id"))
    .fetch_one(&ctx.db)
    .await
    .unwrap()
    .get("n");
    assert_eq!(new_link, 1);

    // Media rebuilt from the readable, relevance recomputed, approval swept.
    let media: Vec<String> = sqlx::query("SELECT url FROM media WHERE expression_id = ?")
        .bind(expr.id)
        .fetch_all(&ctx.db)
        .await
        .unwrap()
        .iter()
        .map(|r| r.get::<String, _>("url"))
        .collect();
    assert_eq!(media, vec!["https://a.example/new.jpg".to_string()]);

    let row = sqlx::query("SELECT relevance, approved_at FROM expression WHERE id = ?")
        .bind(expr.id)
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert!(row.get::<Option<i64>, _>("relevance").unwrap() > 0);
    assert!(row
        .get::<Option<chrono::NaiveDateTime>, _>("approved_at")
        .is_some());
}

/// The minimum-relevance filter narrows the candidate set.
#[tokio::test]
async fn min_relevance_filter_is_respected() {
    let (_dir, ctx) = test_context().await;
    let land = make_land(&ctx, "demo", "fr").await;

    for (url, relevance) in [("https://a.example/hi", 5), ("https://a.example/lo", 1)] {
        let e = graph::ensure_expression(&ctx.db, &ctx.heuristics, &land, url, 0)
            .await
            .unwrap()
            .unwrap();
        sqlx::query("UPDATE expression SET fetched_at = ?, relevance = ?, readable = 'x' WHERE id = ?")
            .bind(chrono::Utc::now().naive_utc())
            .bind(relevance)
            .bind(e.id)
            .execute(&ctx.db)
            .await
            .unwrap();
    }

    let stats = consolidate_land(
        &ctx,
        &land,
        &ConsolidateOptions {
            min_relevance: 3,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(stats.attempted, 1);
}

/// Consolidation touches nothing it should not: unfetched expressions are
/// not candidates.
#[tokio::test]
async fn unfetched_expressions_are_skipped() {
    let (_dir, ctx) = test_context().await;
    let land = make_land(&ctx, "demo", "fr").await;
    graph::ensure_expression(&ctx.db, &ctx.heuristics, &land, "https://a.example/new", 0)
        .await
        .unwrap()
        .unwrap();

    let stats = consolidate_land(&ctx, &land, &ConsolidateOptions::default())
        .await
        .unwrap();
    assert_eq!(stats.attempted, 0);
}
