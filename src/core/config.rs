use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Config — file-based config loader (landgraph.json) with env-var fallback
// ---------------------------------------------------------------------------

/// Relevance-gate sub-config (mirrors the `relevance_gate` key in landgraph.json).
///
/// The gate is an optional external LLM classifier that can veto the lexicon
/// relevance of an expression. When disabled or unconfigured it is never
/// invoked and scoring is lexicon-only.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct GateConfig {
    /// Whether the gate is consulted at all. Defaults to `false`.
    pub enabled: Option<bool>,
    /// OpenAI-compatible endpoint — e.g. `https://openrouter.ai/api/v1`.
    pub api_url: Option<String>,
    /// API key. Never logged.
    pub api_key: Option<String>,
    /// Model name — e.g. `mistralai/mistral-7b-instruct`.
    pub model: Option<String>,
    /// Per-call timeout in seconds. Default: 30.
    pub timeout: Option<u64>,
    /// Minimum readable length (chars) below which the gate is skipped.
    pub readable_min_chars: Option<usize>,
}

impl GateConfig {
    /// API key: JSON field → `LANDGRAPH_GATE_API_KEY` env var → `None`.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(k) = &self.api_key {
            return Some(k.trim().to_string());
        }
        std::env::var("LANDGRAPH_GATE_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    pub fn resolve_timeout(&self) -> u64 {
        self.timeout.unwrap_or(30)
    }

    /// The gate runs only when enabled AND an endpoint, key and model are all present.
    pub fn is_operational(&self) -> bool {
        self.enabled.unwrap_or(false)
            && self.api_url.as_deref().is_some_and(|u| !u.trim().is_empty())
            && self.resolve_api_key().is_some()
            && self.model.as_deref().is_some_and(|m| !m.trim().is_empty())
    }
}

/// Top-level config loaded from `landgraph.json`.
#[derive(serde::Deserialize, Clone, Debug)]
pub struct Config {
    /// Directory holding the SQLite database file and the `lands/` blob tree.
    #[serde(default = "default_data_location")]
    pub data_location: String,
    /// User agent sent with every outbound request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Caps both the HTTP connection pool and in-flight tasks per batch.
    #[serde(default = "default_parallel_connections")]
    pub parallel_connections: usize,
    /// Timeout in seconds for archive lookups and domain-harvest requests.
    #[serde(default = "default_timeout")]
    pub default_timeout: u64,
    /// When `true`, raw fetched HTML is archived under `lands/<land>/<expression>`.
    #[serde(default)]
    pub archive: bool,
    /// Logical-domain heuristics: `{host_suffix → regex with one capture group}`.
    /// When a host ends with the suffix, the regex runs against the full URL and
    /// the first capture replaces the host (e.g. collapse `twitter.com/<handle>`
    /// into per-account logical domains).
    #[serde(default)]
    pub heuristics: HashMap<String, String>,
    /// Feature flag for the headless-browser media-discovery pass.
    #[serde(default)]
    pub dynamic_media_extraction: bool,
    /// External clean-extractor command (Mercury-compatible CLI). The command
    /// must print a JSON document on stdout.
    #[serde(default = "default_clean_extractor")]
    pub clean_extractor: String,
    #[serde(default)]
    pub relevance_gate: GateConfig,
    /// Media filters consumed by the external image analyzer, carried in the
    /// shared config so one file drives both processes.
    #[serde(default)]
    pub media_min_width: Option<u32>,
    #[serde(default)]
    pub media_min_height: Option<u32>,
    /// Maximum media file size in bytes.
    #[serde(default)]
    pub media_max_file_size: Option<u64>,
}

fn default_data_location() -> String {
    "./data".to_string()
}

fn default_user_agent() -> String {
    format!("landgraph/{}", env!("CARGO_PKG_VERSION"))
}

fn default_parallel_connections() -> usize {
    10
}

fn default_timeout() -> u64 {
    10
}

fn default_clean_extractor() -> String {
    "mercury-parser".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_location: default_data_location(),
            user_agent: default_user_agent(),
            parallel_connections: default_parallel_connections(),
            default_timeout: default_timeout(),
            archive: false,
            heuristics: HashMap::new(),
            dynamic_media_extraction: false,
            clean_extractor: default_clean_extractor(),
            relevance_gate: GateConfig::default(),
            media_min_width: None,
            media_min_height: None,
            media_max_file_size: None,
        }
    }
}

/// Load `landgraph.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `LANDGRAPH_CONFIG` env var path
/// 2. `./landgraph.json`  (process cwd)
/// 3. `../landgraph.json` (one level up)
///
/// Missing file → `Config::default()` (silent).
/// Parse error → log a warning, return `Config::default()`.
pub fn load_config() -> Config {
    let candidates: Vec<std::path::PathBuf> = {
        let mut v = vec![
            std::path::PathBuf::from("landgraph.json"),
            std::path::PathBuf::from("../landgraph.json"),
        ];
        if let Ok(env_path) = std::env::var("LANDGRAPH_CONFIG") {
            v.insert(0, std::path::PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Config>(&contents) {
                Ok(cfg) => {
                    tracing::info!("landgraph.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "landgraph.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return Config::default();
                }
            },
            Err(_) => continue, // file not found at this path — try next
        }
    }

    Config::default()
}
