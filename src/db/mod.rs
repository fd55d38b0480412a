pub mod graph;
pub mod models;

use anyhow::{Context as _, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

pub use models::{Domain, Expression, Land, Media, Word};

/// Open (creating if missing) the embedded database under `data_location`.
pub async fn open_pool(data_location: &str, max_connections: u32) -> Result<SqlitePool> {
    std::fs::create_dir_all(data_location)
        .with_context(|| format!("Failed to create data directory {}", data_location))?;
    let db_path = Path::new(data_location).join("landgraph.db");
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .context("Failed to open database")?;
    Ok(pool)
}

/// In-memory pool for tests.
pub async fn open_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    // A single connection keeps the in-memory database alive and shared.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    Ok(pool)
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS land (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL,
        lang TEXT NOT NULL DEFAULT 'fr',
        created_at TIMESTAMP NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS domain (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        http_status TEXT,
        title TEXT,
        description TEXT,
        keywords TEXT,
        created_at TIMESTAMP NOT NULL,
        fetched_at TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS word (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        term TEXT NOT NULL,
        lemma TEXT NOT NULL,
        UNIQUE (term, lemma)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS land_dictionary (
        land_id INTEGER NOT NULL REFERENCES land (id) ON DELETE CASCADE,
        word_id INTEGER NOT NULL REFERENCES word (id) ON DELETE CASCADE,
        PRIMARY KEY (land_id, word_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS expression (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        land_id INTEGER NOT NULL REFERENCES land (id) ON DELETE CASCADE,
        domain_id INTEGER NOT NULL REFERENCES domain (id),
        url TEXT NOT NULL,
        depth INTEGER NOT NULL DEFAULT 0,
        http_status TEXT,
        lang TEXT,
        title TEXT,
        description TEXT,
        keywords TEXT,
        readable TEXT,
        relevance INTEGER,
        created_at TIMESTAMP NOT NULL,
        published_at TIMESTAMP,
        fetched_at TIMESTAMP,
        approved_at TIMESTAMP,
        readable_at TIMESTAMP,
        validllm TEXT,
        validmodel TEXT,
        seorank TEXT,
        UNIQUE (land_id, url)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_expression_fetched
        ON expression (land_id, fetched_at)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_expression_status
        ON expression (land_id, http_status)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS expression_link (
        source_id INTEGER NOT NULL REFERENCES expression (id) ON DELETE CASCADE,
        target_id INTEGER NOT NULL REFERENCES expression (id) ON DELETE CASCADE,
        PRIMARY KEY (source_id, target_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS media (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        expression_id INTEGER NOT NULL REFERENCES expression (id) ON DELETE CASCADE,
        url TEXT NOT NULL,
        kind TEXT NOT NULL,
        width INTEGER,
        height INTEGER,
        file_size INTEGER,
        format TEXT,
        analyzed_at TIMESTAMP,
        analysis_error TEXT,
        UNIQUE (expression_id, url)
    )
    "#,
];

const TABLES: &[&str] = &[
    "media",
    "expression_link",
    "expression",
    "land_dictionary",
    "word",
    "domain",
    "land",
];

/// Destroy and recreate the schema. The caller is responsible for the typed
/// confirmation prompt.
pub async fn setup(pool: &SqlitePool) -> Result<()> {
    for table in TABLES {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(pool)
            .await?;
    }
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    tracing::info!("database schema created");
    Ok(())
}

/// Apply pending migrations. Idempotent: creates missing tables and adds
/// columns introduced after the initial schema (`validllm`, `validmodel`,
/// `seorank`) when absent.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    for column in ["validllm TEXT", "validmodel TEXT", "seorank TEXT"] {
        let name = column.split(' ').next().unwrap_or_default();
        if !column_exists(pool, "expression", name).await? {
            sqlx::query(&format!("ALTER TABLE expression ADD COLUMN {}", column))
                .execute(pool)
                .await?;
            tracing::info!("migration: added expression.{}", name);
        }
    }
    Ok(())
}

async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .any(|r| r.get::<String, _>("name").eq_ignore_ascii_case(column)))
}

// ---------------------------------------------------------------------------
// Land-level queries
// ---------------------------------------------------------------------------

pub async fn create_land(
    pool: &SqlitePool,
    name: &str,
    description: &str,
    lang: &str,
) -> Result<Land> {
    let now = chrono::Utc::now().naive_utc();
    sqlx::query("INSERT INTO land (name, description, lang, created_at) VALUES (?, ?, ?, ?)")
        .bind(name)
        .bind(description)
        .bind(lang)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create land")?;
    find_land(pool, name)
        .await?
        .context("Land vanished after insert")
}

pub async fn find_land(pool: &SqlitePool, name: &str) -> Result<Option<Land>> {
    let land = sqlx::query_as::<_, Land>(
        "SELECT id, name, description, lang, created_at FROM land WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;
    Ok(land)
}

pub async fn list_lands(pool: &SqlitePool, name: Option<&str>) -> Result<Vec<Land>> {
    let lands = match name {
        Some(n) => {
            sqlx::query_as::<_, Land>(
                "SELECT id, name, description, lang, created_at FROM land WHERE name = ? ORDER BY name",
            )
            .bind(n)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Land>(
                "SELECT id, name, description, lang, created_at FROM land ORDER BY name",
            )
            .fetch_all(pool)
            .await?
        }
    };
    Ok(lands)
}

pub async fn delete_land(pool: &SqlitePool, land: &Land) -> Result<()> {
    sqlx::query("DELETE FROM land WHERE id = ?")
        .bind(land.id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete fetched expressions below a relevance threshold.
pub async fn prune_low_relevance(pool: &SqlitePool, land: &Land, maxrel: i64) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM expression \
         WHERE land_id = ? AND fetched_at IS NOT NULL \
           AND COALESCE(relevance, 0) < ?",
    )
    .bind(land.id)
    .bind(maxrel)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Per-land counters shown by `land list`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LandSummary {
    pub expressions: i64,
    pub remaining: i64,
    pub terms: i64,
}

pub async fn land_summary(pool: &SqlitePool, land: &Land) -> Result<LandSummary> {
    let row = sqlx::query(
        r#"
        SELECT
            (SELECT COUNT(*) FROM expression WHERE land_id = l.id) AS expressions,
            (SELECT COUNT(*) FROM expression WHERE land_id = l.id AND fetched_at IS NULL) AS remaining,
            (SELECT COUNT(*) FROM land_dictionary WHERE land_id = l.id) AS terms
        FROM land l WHERE l.id = ?
        "#,
    )
    .bind(land.id)
    .fetch_one(pool)
    .await?;
    Ok(LandSummary {
        expressions: row.get("expressions"),
        remaining: row.get("remaining"),
        terms: row.get("terms"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn setup_and_migrate_are_idempotent() {
        let pool = open_memory_pool().await.unwrap();
        setup(&pool).await.unwrap();
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();
        assert!(column_exists(&pool, "expression", "validllm").await.unwrap());
        assert!(column_exists(&pool, "expression", "seorank").await.unwrap());
    }

    #[tokio::test]
    async fn land_crud_round_trip() {
        let pool = open_memory_pool().await.unwrap();
        setup(&pool).await.unwrap();
        let land = create_land(&pool, "demo", "a research project", "fr,en")
            .await
            .unwrap();
        assert_eq!(land.primary_lang(), "fr");
        assert!(find_land(&pool, "demo").await.unwrap().is_some());
        assert!(find_land(&pool, "missing").await.unwrap().is_none());
        assert_eq!(list_lands(&pool, None).await.unwrap().len(), 1);
        delete_land(&pool, &land).await.unwrap();
        assert!(find_land(&pool, "demo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_land_name_rejected() {
        let pool = open_memory_pool().await.unwrap();
        setup(&pool).await.unwrap();
        create_land(&pool, "demo", "d", "fr").await.unwrap();
        assert!(create_land(&pool, "demo", "d", "fr").await.is_err());
    }
}
