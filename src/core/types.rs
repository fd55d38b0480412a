use serde::{Deserialize, Serialize};

/// Outcome of fetching a single URL, as stored in the `http_status` column.
///
/// The column is a string on purpose: it mixes integer HTTP statuses with a
/// sentinel vocabulary (`"000"` for request-level failures, `"ERR"` for
/// anything else). This enum is the in-memory face of that column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The server answered; carries the HTTP status code.
    Http(u16),
    /// The request itself failed (DNS, connect, timeout).
    NetworkError,
    /// A non-network failure while fetching or reading the body.
    Error,
}

impl FetchOutcome {
    pub fn as_status(&self) -> String {
        match self {
            FetchOutcome::Http(code) => code.to_string(),
            FetchOutcome::NetworkError => "000".to_string(),
            FetchOutcome::Error => "ERR".to_string(),
        }
    }

    pub fn is_ok_html_candidate(&self) -> bool {
        matches!(self, FetchOutcome::Http(200))
    }
}

impl std::fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_status())
    }
}

/// Kind of embedded resource referenced by an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Img,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Img => "img",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    pub fn parse_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "img" | "image" => Some(MediaKind::Img),
            "video" => Some(MediaKind::Video),
            "audio" => Some(MediaKind::Audio),
            _ => None,
        }
    }
}

/// A discovered media reference, pre-resolution (URL may still be relative).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub url: String,
    pub kind: MediaKind,
}

impl MediaRef {
    pub fn new(url: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }
}

/// How clean-extractor fields are merged into an already-populated expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Clean value replaces the current value unconditionally.
    MercuryPriority,
    /// The current value wins whenever it is non-empty.
    PreserveExisting,
    /// Field-specific fusion: earlier `published_at`, longer `title` and
    /// `description`, clean `readable`, clean value for everything else.
    #[default]
    SmartMerge,
}

impl MergeStrategy {
    pub fn parse_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mercury_priority" => Some(MergeStrategy::MercuryPriority),
            "preserve_existing" => Some(MergeStrategy::PreserveExisting),
            "smart_merge" => Some(MergeStrategy::SmartMerge),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::MercuryPriority => "mercury_priority",
            MergeStrategy::PreserveExisting => "preserve_existing",
            MergeStrategy::SmartMerge => "smart_merge",
        }
    }
}

/// Verdict from the external relevance gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Relevant,
    NotRelevant,
    /// Gate disabled, unconfigured, timed out, or answered something
    /// unparseable. The caller falls back to lexicon-only scoring.
    Unknown,
}

/// Aggregate counters returned by the batch pipelines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Expressions dispatched to a worker.
    pub attempted: usize,
    /// Expressions for which readable extraction eventually succeeded.
    pub processed: usize,
}

impl PipelineStats {
    pub fn errors(&self) -> usize {
        self.attempted.saturating_sub(self.processed)
    }
}
