use anyhow::Result;

use crate::core::Context;
use crate::dates::{parse_result_date, prefer_earlier};
use crate::db::graph;
use crate::db::models::Land;

// ---------------------------------------------------------------------------
// Search-provider ingestion — seeds a land from the results of an external
// search adapter (SerpAPI/Bing/DuckDuckGo). Only `link`, `title` and `date`
// are consumed; dates arrive in wildly inconsistent formats, including
// relative English phrases, and unparseable ones are simply skipped.
// ---------------------------------------------------------------------------

/// One organic result from a search provider.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProviderResult {
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    pub link: String,
    #[serde(default)]
    pub date: Option<String>,
}

/// Insert provider results as depth-0 expressions.
///
/// Existing expressions are enriched, never downgraded: an empty title takes
/// the provider title, and `published_at` keeps the earlier of the stored
/// and provider dates. Returns the number of expressions touched.
pub async fn ingest_results(
    ctx: &Context,
    land: &Land,
    results: &[ProviderResult],
) -> Result<usize> {
    let mut touched = 0usize;
    for result in results {
        let Some(expression) =
            graph::ensure_expression(&ctx.db, &ctx.heuristics, land, &result.link, 0).await?
        else {
            continue;
        };

        let title = match (&expression.title, &result.title) {
            (Some(current), _) if !current.trim().is_empty() => Some(current.clone()),
            (_, Some(provided)) if !provided.trim().is_empty() => Some(provided.clone()),
            _ => expression.title.clone(),
        };
        let provider_date = result.date.as_deref().and_then(parse_result_date);
        let published_at = prefer_earlier(expression.published_at, provider_date);

        sqlx::query("UPDATE expression SET title = ?, published_at = ? WHERE id = ?")
            .bind(&title)
            .bind(published_at)
            .bind(expression.id)
            .execute(&ctx.db)
            .await?;
        touched += 1;
    }
    tracing::info!("{} provider results ingested into {}", touched, land.name);
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_result_deserializes_partial_payloads() {
        let json = r#"{"position": 3, "link": "https://a.example/x"}"#;
        let result: ProviderResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.link, "https://a.example/x");
        assert!(result.title.is_none());
        assert!(result.date.is_none());
    }
}
