mod common;

use common::*;
use sqlx::Row;

use landgraph::db::graph;
use landgraph::harvest::{crawl_domains, update_heuristics, HarvestOptions};

const HOMEPAGE: &str = r#"<html lang="en"><head>
    <title>Example Press</title>
    <meta property="og:title" content="Example Press — independent news">
    <meta name="description" content="Daily coverage">
    <meta name="keywords" content="news,press">
</head><body><p>hello</p></body></html>"#;

/// Stage 1 happy path: the https homepage answers with HTML and metadata is
/// combined through the fallback chain (OpenGraph first).
#[tokio::test]
async fn harvester_fills_metadata_from_homepage() {
    let (_dir, ctx) = test_context().await;
    let land = make_land(&ctx, "demo", "fr").await;
    graph::ensure_expression(&ctx.db, &ctx.heuristics, &land, "https://a.example/page", 0)
        .await
        .unwrap()
        .unwrap();

    let fetcher = MockFetcher::new().html("https://a.example", 200, HOMEPAGE);
    let processed = crawl_domains(&ctx, &fetcher, &HarvestOptions::default())
        .await
        .unwrap();
    assert_eq!(processed, 1);

    let row = sqlx::query("SELECT * FROM domain WHERE name = 'a.example'")
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(row.get::<Option<String>, _>("http_status").as_deref(), Some("200"));
    assert_eq!(
        row.get::<Option<String>, _>("title").as_deref(),
        Some("Example Press — independent news")
    );
    assert_eq!(
        row.get::<Option<String>, _>("description").as_deref(),
        Some("Daily coverage")
    );
    assert!(row
        .get::<Option<chrono::NaiveDateTime>, _>("fetched_at")
        .is_some());
}

/// Total failure: every stage misses, the domain still gets a sentinel
/// status and a fetched timestamp so it is not retried by default.
#[tokio::test]
async fn harvester_records_sentinel_on_total_failure() {
    let (_dir, ctx) = test_context().await;
    let land = make_land(&ctx, "demo", "fr").await;
    graph::ensure_expression(&ctx.db, &ctx.heuristics, &land, "https://dead.example/x", 0)
        .await
        .unwrap()
        .unwrap();

    let processed = crawl_domains(&ctx, &MockFetcher::new(), &HarvestOptions::default())
        .await
        .unwrap();
    assert_eq!(processed, 0);

    let row = sqlx::query("SELECT http_status, fetched_at FROM domain WHERE name = 'dead.example'")
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(row.get::<Option<String>, _>("http_status").as_deref(), Some("000"));
    assert!(row
        .get::<Option<chrono::NaiveDateTime>, _>("fetched_at")
        .is_some());

    // Default filter skips already-fetched domains on the next run.
    let second = MockFetcher::new();
    let processed = crawl_domains(&ctx, &second, &HarvestOptions::default())
        .await
        .unwrap();
    assert_eq!(processed, 0);
    assert!(second.requests.lock().unwrap().is_empty());
}

/// Archive fallback: homepage down, snapshot found and parsed.
#[tokio::test]
async fn harvester_archive_stage() {
    let (_dir, ctx) = test_context().await;
    let land = make_land(&ctx, "demo", "fr").await;
    graph::ensure_expression(&ctx.db, &ctx.heuristics, &land, "https://b.example/deep", 0)
        .await
        .unwrap()
        .unwrap();

    let cdx_payload = r#"[
        ["urlkey","timestamp","original"],
        ["example,b)/","20210101000000","https://b.example"]
    ]"#;
    let fetcher = MockFetcher::new()
        .network_error("https://b.example")
        .network_error("http://b.example")
        .json("cdx/search/cdx", cdx_payload)
        .html(
            "https://web.archive.org/web/20210101000000/https://b.example",
            200,
            HOMEPAGE,
        );

    let processed = crawl_domains(&ctx, &fetcher, &HarvestOptions::default())
        .await
        .unwrap();
    assert_eq!(processed, 1);
    let row = sqlx::query("SELECT title FROM domain WHERE name = 'b.example'")
        .fetch_one(&ctx.db)
        .await
        .unwrap();
    assert_eq!(
        row.get::<Option<String>, _>("title").as_deref(),
        Some("Example Press — independent news")
    );
}

/// `heuristic update` reassigns domains per the current heuristics table.
#[tokio::test]
async fn heuristic_update_reassigns_domains() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = landgraph::core::Config::default();
    config.data_location = dir.path().to_string_lossy().to_string();
    config.heuristics.insert(
        "twitter.com".into(),
        r"twitter\.com/([A-Za-z0-9_]+)".into(),
    );
    let pool = landgraph::db::open_pool(&config.data_location, 2).await.unwrap();
    landgraph::db::setup(&pool).await.unwrap();
    let ctx = landgraph::core::Context::new(config, pool);
    let land = make_land(&ctx, "demo", "fr").await;

    // Insert with no heuristics applied (simulate a pre-heuristics import).
    let expr = graph::ensure_expression(&ctx.db, &[], &land, "https://twitter.com/someone/status/1", 0)
        .await
        .unwrap()
        .unwrap();
    let before: String = sqlx::query("SELECT d.name AS name FROM domain d JOIN expression e ON e.domain_id = d.id WHERE e.id = ?")
        .bind(expr.id)
        .fetch_one(&ctx.db)
        .await
        .unwrap()
        .get("name");
    assert_eq!(before, "twitter.com");

    let updated = update_heuristics(&ctx).await.unwrap();
    assert_eq!(updated, 1);
    let after: String = sqlx::query("SELECT d.name AS name FROM domain d JOIN expression e ON e.domain_id = d.id WHERE e.id = ?")
        .bind(expr.id)
        .fetch_one(&ctx.db)
        .await
        .unwrap()
        .get("name");
    assert_eq!(after, "someone");
}
