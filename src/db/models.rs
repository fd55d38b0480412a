use chrono::NaiveDateTime;

/// A research project scoping a corpus of expressions.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Land {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Comma-separated BCP-47 codes; the first is the primary language.
    pub lang: String,
    pub created_at: NaiveDateTime,
}

impl Land {
    pub fn primary_lang(&self) -> &str {
        self.lang.split(',').next().unwrap_or("fr").trim()
    }
}

/// Unique-per-host record; metadata filled in by the domain harvester.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Domain {
    pub id: i64,
    pub name: String,
    /// String on purpose: mixes numeric statuses with sentinel vocabulary.
    pub http_status: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub created_at: NaiveDateTime,
    pub fetched_at: Option<NaiveDateTime>,
}

/// A single URL within a land, with its fetched content and metadata.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Expression {
    pub id: i64,
    pub land_id: i64,
    pub domain_id: i64,
    pub url: String,
    /// 0 = seed; child depth = parent depth + 1 at creation, never raised.
    pub depth: i64,
    pub http_status: Option<String>,
    pub lang: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Option<String>,
    pub readable: Option<String>,
    pub relevance: Option<i64>,
    pub created_at: NaiveDateTime,
    pub published_at: Option<NaiveDateTime>,
    pub fetched_at: Option<NaiveDateTime>,
    pub approved_at: Option<NaiveDateTime>,
    pub readable_at: Option<NaiveDateTime>,
    /// LLM gate verdict label ("oui" / "non").
    pub validllm: Option<String>,
    /// Model identifier that produced the verdict.
    pub validmodel: Option<String>,
    /// Opaque SEO payload written by the external enrichment adapter.
    pub seorank: Option<String>,
}

/// A reference to an embedded resource on an expression. The analysis
/// columns are written by the external media analyzer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Media {
    pub id: i64,
    pub expression_id: i64,
    pub url: String,
    /// "img" | "video" | "audio"
    pub kind: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub file_size: Option<i64>,
    pub format: Option<String>,
    pub analyzed_at: Option<NaiveDateTime>,
    pub analysis_error: Option<String>,
}

/// A `(term, lemma)` pair shared across lands through `land_dictionary`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Word {
    pub id: i64,
    pub term: String,
    pub lemma: String,
}
