use std::sync::Arc;

use regex::Regex;
use sqlx::SqlitePool;

use super::config::Config;

/// A compiled logical-domain heuristic: when a host ends with `suffix`, the
/// regex runs against the full URL and its first capture replaces the host.
#[derive(Debug, Clone)]
pub struct Heuristic {
    pub suffix: String,
    pub pattern: Regex,
}

/// Process-wide context threaded through every component.
///
/// Carries the configuration, the database pool, the shared HTTP client and
/// the compiled heuristics table. Built once at startup; no hidden globals.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub db: SqlitePool,
    pub http: reqwest::Client,
    /// Sorted longest-suffix-first so the most specific heuristic wins.
    pub heuristics: Arc<Vec<Heuristic>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("data_location", &self.config.data_location)
            .field("parallel_connections", &self.config.parallel_connections)
            .field("heuristics", &self.heuristics.len())
            .finish()
    }
}

impl Context {
    pub fn new(config: Config, db: SqlitePool) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .pool_max_idle_per_host(config.parallel_connections)
            .build()
            .expect("Failed to create HTTP client");

        let heuristics = Arc::new(compile_heuristics(&config));

        Self {
            config: Arc::new(config),
            db,
            http,
            heuristics,
        }
    }

    /// Directory for a land's blobs (`<data_location>/lands/<land_id>`).
    pub fn land_dir(&self, land_id: i64) -> std::path::PathBuf {
        std::path::Path::new(&self.config.data_location)
            .join("lands")
            .join(land_id.to_string())
    }
}

/// Compile the config heuristics map once at startup. Invalid regexes are
/// logged and skipped rather than failing the process.
fn compile_heuristics(config: &Config) -> Vec<Heuristic> {
    let mut out: Vec<Heuristic> = config
        .heuristics
        .iter()
        .filter_map(|(suffix, pattern)| match Regex::new(pattern) {
            Ok(re) => Some(Heuristic {
                suffix: suffix.clone(),
                pattern: re,
            }),
            Err(e) => {
                tracing::warn!("invalid heuristic regex for suffix {}: {}", suffix, e);
                None
            }
        })
        .collect();
    out.sort_by(|a, b| b.suffix.len().cmp(&a.suffix.len()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristics_sorted_longest_suffix_first() {
        let mut config = Config::default();
        config
            .heuristics
            .insert("t.co".into(), r"(t\.co/[a-z]+)".into());
        config
            .heuristics
            .insert("twitter.com".into(), r"(twitter\.com/[A-Za-z0-9_]+)".into());
        let compiled = compile_heuristics(&config);
        assert_eq!(compiled.len(), 2);
        assert_eq!(compiled[0].suffix, "twitter.com");
    }

    #[test]
    fn invalid_heuristic_is_skipped() {
        let mut config = Config::default();
        config.heuristics.insert("x.com".into(), "(unclosed".into());
        assert!(compile_heuristics(&config).is_empty());
    }
}
