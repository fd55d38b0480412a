use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use sqlx::Row;
use std::sync::OnceLock;

use crate::core::Context;
use crate::db::models::Land;

// ---------------------------------------------------------------------------
// Lexicon & Scorer — land terms are stemmed into lemmas under the land's
// primary-language stemmer; expressions are scored by weighted whole-word
// lemma hits (title ×10, readable ×1).
// ---------------------------------------------------------------------------

/// Maximal runs of Unicode letters including Latin-1 diacritics, lowercased
/// downstream. This is the deterministic word tokenizer used for scoring.
fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-zÀ-ÖØ-öø-ÿ]+").expect("token regex"))
}

/// Map a BCP-47 primary language code to a Snowball algorithm.
///
/// Unknown codes fall back to French, which the historical corpus was built
/// with; callers that need a no-op stemmer should not reach this table.
pub fn stemmer_for(lang: &str) -> Stemmer {
    let primary = lang
        .split(',')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let algorithm = match primary.split('-').next().unwrap_or("") {
        "ar" => Algorithm::Arabic,
        "da" => Algorithm::Danish,
        "nl" => Algorithm::Dutch,
        "en" => Algorithm::English,
        "fi" => Algorithm::Finnish,
        "fr" => Algorithm::French,
        "de" => Algorithm::German,
        "el" => Algorithm::Greek,
        "hu" => Algorithm::Hungarian,
        "it" => Algorithm::Italian,
        "no" => Algorithm::Norwegian,
        "pt" => Algorithm::Portuguese,
        "ro" => Algorithm::Romanian,
        "ru" => Algorithm::Russian,
        "es" => Algorithm::Spanish,
        "sv" => Algorithm::Swedish,
        "tr" => Algorithm::Turkish,
        _ => Algorithm::French,
    };
    Stemmer::create(algorithm)
}

/// Stem a single word: lowercase, then Snowball.
pub fn stem_word(stemmer: &Stemmer, word: &str) -> String {
    stemmer.stem(&word.to_lowercase()).to_string()
}

/// Lemma of a term: each whitespace-separated token stemmed, joined with
/// single spaces.
pub fn lemma_of(stemmer: &Stemmer, term: &str) -> String {
    term.split_whitespace()
        .map(|w| stem_word(stemmer, w))
        .collect::<Vec<_>>()
        .join(" ")
}

struct LexiconEntry {
    pattern: Regex,
}

/// A land's scoring lexicon: lemmas with precompiled whole-word patterns and
/// the land's stemmer. Read-only once built; safe to share across workers.
pub struct Lexicon {
    stemmer: Stemmer,
    entries: Vec<LexiconEntry>,
}

impl Lexicon {
    pub fn new(lang: &str, lemmas: Vec<String>) -> Self {
        let entries = lemmas
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|lemma| LexiconEntry {
                pattern: Regex::new(&format!(r"\b{}\b", regex::escape(lemma)))
                    .expect("escaped lemma regex"),
            })
            .collect();
        Self {
            stemmer: stemmer_for(lang),
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tokenize, lowercase and stem a text into a single space-joined string
    /// the lemma patterns match against.
    fn stem_text(&self, text: &str) -> String {
        token_re()
            .find_iter(text)
            .map(|m| stem_word(&self.stemmer, m.as_str()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn weighted_hits(&self, text: &str, weight: i64) -> i64 {
        if text.is_empty() {
            return 0;
        }
        let stemmed = self.stem_text(text);
        self.entries
            .iter()
            .map(|e| e.pattern.find_iter(&stemmed).count() as i64 * weight)
            .sum()
    }

    /// Relevance of an expression: title hits ×10 + readable hits ×1.
    /// An empty lexicon or empty texts score 0.
    pub fn score(&self, title: &str, readable: &str) -> i64 {
        self.weighted_hits(title, 10) + self.weighted_hits(readable, 1)
    }
}

/// Load the lexicon attached to a land.
pub async fn load_lexicon(ctx: &Context, land: &Land) -> anyhow::Result<Lexicon> {
    let rows = sqlx::query(
        r#"
        SELECT w.lemma FROM word w
        JOIN land_dictionary ld ON ld.word_id = w.id
        WHERE ld.land_id = ?
        "#,
    )
    .bind(land.id)
    .fetch_all(&ctx.db)
    .await?;
    let lemmas = rows.iter().map(|r| r.get::<String, _>("lemma")).collect();
    Ok(Lexicon::new(&land.lang, lemmas))
}

/// Add comma-separated terms to a land's dictionary.
///
/// Each trimmed, non-empty term is stemmed into a lemma, upserted into
/// `word` and attached to the land. Returns the number of terms attached.
/// The caller is expected to follow with [`recompute_land_relevance`].
pub async fn add_terms(ctx: &Context, land: &Land, terms: &str) -> anyhow::Result<usize> {
    let stemmer = stemmer_for(&land.lang);
    let mut added = 0usize;
    for term in terms.split(',') {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        let lemma = lemma_of(&stemmer, term);
        let mut tx = ctx.db.begin().await?;
        sqlx::query("INSERT INTO word (term, lemma) VALUES (?, ?) ON CONFLICT(term, lemma) DO NOTHING")
            .bind(term)
            .bind(&lemma)
            .execute(&mut *tx)
            .await?;
        let word_id: i64 = sqlx::query("SELECT id FROM word WHERE term = ? AND lemma = ?")
            .bind(term)
            .bind(&lemma)
            .fetch_one(&mut *tx)
            .await?
            .get("id");
        sqlx::query(
            "INSERT INTO land_dictionary (land_id, word_id) VALUES (?, ?) \
             ON CONFLICT(land_id, word_id) DO NOTHING",
        )
        .bind(land.id)
        .bind(word_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::info!("term \"{}\" added to land {} as \"{}\"", term, land.name, lemma);
        added += 1;
    }
    Ok(added)
}

/// Recompute relevance for every expression in the land with a non-null
/// readable. Approval is realigned with the new score.
pub async fn recompute_land_relevance(ctx: &Context, land: &Land) -> anyhow::Result<usize> {
    let lexicon = load_lexicon(ctx, land).await?;
    let rows = sqlx::query(
        "SELECT id, title, readable FROM expression \
         WHERE land_id = ? AND readable IS NOT NULL",
    )
    .bind(land.id)
    .fetch_all(&ctx.db)
    .await?;

    let count = rows.len();
    if count > 0 {
        tracing::info!("updating relevance for {} expressions in {}", count, land.name);
    }
    for row in rows {
        let id: i64 = row.get("id");
        let title: Option<String> = row.get("title");
        let readable: Option<String> = row.get("readable");
        let relevance = lexicon.score(
            title.as_deref().unwrap_or(""),
            readable.as_deref().unwrap_or(""),
        );
        sqlx::query("UPDATE expression SET relevance = ? WHERE id = ?")
            .bind(relevance)
            .bind(id)
            .execute(&ctx.db)
            .await?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lemma_of_stems_each_token() {
        let stemmer = stemmer_for("fr");
        let lemma = lemma_of(&stemmer, "données ouvertes");
        assert_eq!(lemma.split(' ').count(), 2);
        // Stems are lowercase and no longer than their source tokens.
        for (stem, tok) in lemma.split(' ').zip(["données", "ouvertes"]) {
            assert!(stem.len() <= tok.len());
            assert_eq!(stem, stem.to_lowercase());
        }
    }

    #[test]
    fn score_weights_title_ten_to_one() {
        let stemmer = stemmer_for("en");
        let lexicon = Lexicon::new("en", vec![stem_word(&stemmer, "web")]);
        // One hit in the title, one in the body.
        assert_eq!(lexicon.score("the web today", "about the web"), 11);
        // Title only.
        assert_eq!(lexicon.score("web", ""), 10);
        // No hits.
        assert_eq!(lexicon.score("nothing here", "still nothing"), 0);
    }

    #[test]
    fn empty_lexicon_scores_zero() {
        let lexicon = Lexicon::new("fr", vec![]);
        assert!(lexicon.is_empty());
        assert_eq!(lexicon.score("anything", "at all"), 0);
    }

    #[test]
    fn score_is_monotone_in_lexicon() {
        let stemmer = stemmer_for("en");
        let small = Lexicon::new("en", vec![stem_word(&stemmer, "data")]);
        let large = Lexicon::new(
            "en",
            vec![stem_word(&stemmer, "data"), stem_word(&stemmer, "web")],
        );
        let title = "open data on the web";
        let body = "the web is made of data";
        assert!(small.score(title, body) <= large.score(title, body));
    }

    #[test]
    fn whole_word_matching_only() {
        let lexicon = Lexicon::new("en", vec!["cat".to_string()]);
        // "catalog" stems to something starting with "cat" but the \b guard
        // must not count a prefix as a hit when the stem differs.
        assert_eq!(lexicon.score("", "cat"), 1);
        assert_eq!(lexicon.score("", "concatenation scattered"), 0);
    }

    #[test]
    fn diacritics_tokenize() {
        let stemmer = stemmer_for("fr");
        let lexicon = Lexicon::new("fr", vec![stem_word(&stemmer, "donnée")]);
        assert!(lexicon.score("", "les données publiques") > 0);
    }

    #[test]
    fn unknown_language_falls_back_to_french() {
        let a = stem_word(&stemmer_for("zz"), "données");
        let b = stem_word(&stemmer_for("fr"), "données");
        assert_eq!(a, b);
    }
}
