use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::core::types::GateVerdict;
use crate::core::Context;
use crate::db::models::Land;

// ---------------------------------------------------------------------------
// Relevance Gate Adapter — a stateless predicate backed by an external LLM
// that can veto the lexicon relevance of an expression. Errors of any kind
// degrade to `Unknown` and the caller falls back to lexicon-only scoring.
// ---------------------------------------------------------------------------

/// Verdict labels stored in `expression.validllm`.
pub const VERDICT_YES: &str = "oui";
pub const VERDICT_NO: &str = "non";

#[async_trait]
pub trait RelevanceGate: Send + Sync {
    async fn verdict(&self, land: &Land, title: &str, readable: &str) -> GateVerdict;
    /// Identifier stored in `expression.validmodel` alongside a verdict.
    fn model_name(&self) -> &str;
    fn is_enabled(&self) -> bool;
}

/// Gate used when the feature flag is off or configuration is incomplete:
/// never invoked upstream, and answers `Unknown` defensively if it is.
pub struct DisabledGate;

#[async_trait]
impl RelevanceGate for DisabledGate {
    async fn verdict(&self, _land: &Land, _title: &str, _readable: &str) -> GateVerdict {
        GateVerdict::Unknown
    }

    fn model_name(&self) -> &str {
        ""
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Gate backed by an OpenAI-compatible chat-completion endpoint.
pub struct LlmGate {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    readable_min_chars: usize,
}

impl LlmGate {
    async fn ask(&self, land: &Land, title: &str, readable: &str) -> anyhow::Result<String> {
        let excerpt: String = readable.chars().take(2000).collect();
        let system = "You are a binary relevance classifier for a research corpus. \
                      Answer with exactly one word: 'oui' if the page belongs to the \
                      research topic, 'non' otherwise.";
        let user = format!(
            "Research topic: {}\nDescription: {}\n\nPage title: {}\nPage excerpt:\n{}",
            land.name, land.description, title, excerpt
        );
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": 4,
            "temperature": 0,
        });
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        let payload: serde_json::Value = response.json().await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        Ok(content)
    }
}

#[async_trait]
impl RelevanceGate for LlmGate {
    async fn verdict(&self, land: &Land, title: &str, readable: &str) -> GateVerdict {
        if readable.len() < self.readable_min_chars {
            return GateVerdict::Unknown;
        }
        match self.ask(land, title, readable).await {
            Ok(answer) if answer.starts_with("oui") || answer.starts_with("yes") => {
                GateVerdict::Relevant
            }
            Ok(answer) if answer.starts_with("non") || answer.starts_with("no") => {
                GateVerdict::NotRelevant
            }
            Ok(answer) => {
                tracing::warn!("gate answered something unparseable: {:?}", answer);
                GateVerdict::Unknown
            }
            Err(e) => {
                tracing::warn!("gate call failed: {}", e);
                GateVerdict::Unknown
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Build the gate from configuration. Incomplete configuration yields the
/// disabled gate, never an error.
pub fn build_gate(ctx: &Context) -> Box<dyn RelevanceGate> {
    let cfg = &ctx.config.relevance_gate;
    if !cfg.is_operational() {
        return Box::new(DisabledGate);
    }
    let Some(api_key) = cfg.resolve_api_key() else {
        return Box::new(DisabledGate);
    };
    Box::new(LlmGate {
        client: ctx.http.clone(),
        api_url: cfg.api_url.clone().unwrap_or_default(),
        api_key,
        model: cfg.model.clone().unwrap_or_default(),
        timeout: Duration::from_secs(cfg.resolve_timeout()),
        readable_min_chars: cfg.readable_min_chars.unwrap_or(0),
    })
}
