//! Analysis providers: summarization and entity-relation extraction.
//!
//! Implements the [`Summarizer`] and [`RelationExtractor`] traits:
//! - **[`DisabledAnalyzer`]**: returns errors; used when no model is configured.
//! - **[`OllamaAnalyzer`]**: calls a local Ollama server's `/api/generate`.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use docflow::config::AnalysisConfig;
//! # use docflow::analysis::create_analyzers;
//! let config = AnalysisConfig::default(); // provider = "disabled"
//! let analyzers = create_analyzers(&config).unwrap();
//! assert_eq!(analyzers.provider, "disabled");
//! ```
//!
//! # Summaries
//!
//! Summaries are built by refinement: the first segment is summarized, then
//! each following segment is offered to the model together with the running
//! summary, which it may revise.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::AnalysisConfig;
use crate::models::{DocumentSegment, EntityRelation};
use crate::traits::{RelationExtractor, Summarizer};

/// The pair of collaborators the workflow needs.
#[derive(Clone)]
pub struct Analyzers {
    pub provider: String,
    pub summarizer: Arc<dyn Summarizer>,
    pub extractor: Arc<dyn RelationExtractor>,
}

/// Create the configured analysis collaborators.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledAnalyzer`] |
/// | `"ollama"` | [`OllamaAnalyzer`] |
pub fn create_analyzers(config: &AnalysisConfig) -> Result<Analyzers> {
    match config.provider.as_str() {
        "disabled" => Ok(Analyzers {
            provider: "disabled".to_string(),
            summarizer: Arc::new(DisabledAnalyzer),
            extractor: Arc::new(DisabledAnalyzer),
        }),
        "ollama" => {
            let analyzer = Arc::new(OllamaAnalyzer::new(config)?);
            Ok(Analyzers {
                provider: "ollama".to_string(),
                summarizer: analyzer.clone(),
                extractor: analyzer,
            })
        }
        other => bail!("Unknown analysis provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// Fails every call. Tasks that need analysis end FAILED with a clear reason.
pub struct DisabledAnalyzer;

#[async_trait]
impl Summarizer for DisabledAnalyzer {
    async fn summarize(&self, _segments: &[DocumentSegment]) -> Result<String> {
        bail!("Analysis provider is disabled")
    }
}

#[async_trait]
impl RelationExtractor for DisabledAnalyzer {
    async fn extract(&self, _segments: &[DocumentSegment]) -> Result<Vec<EntityRelation>> {
        bail!("Analysis provider is disabled")
    }
}

// ============ Ollama Provider ============

const SUMMARY_PROMPT: &str = "Write a concise summary of the following:\n\
{text}\n\
CONCISE SUMMARY:";

const REFINE_PROMPT: &str = "Your job is to produce a final summary with key learnings.\n\
We have provided an existing summary up to a certain point: {existing}\n\
We have the opportunity to refine the existing summary (only if needed) with more context below.\n\
------------\n\
{text}\n\
------------\n\
Given the new context, refine the original summary. \
If the context isn't useful, return the original summary.";

const EXTRACTION_PROMPT: &str = "Extract relationships between entities found in the text below.\n\
Answer with one relationship per line, formatted as: entity|target|relationship\n\
Do not number the lines and do not add any other text.\n\
\n\
Example text: Born in Chicago in 1901, Disney developed an early interest in drawing.\n\
Example answer:\n\
Disney|1901|born in\n\
Disney|drawing|interest in\n\
\n\
Text:\n\
\"\"\"\n\
{text}\n\
\"\"\"\n\
Answer:";

pub struct OllamaAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_retries: u32,
}

impl OllamaAnalyzer {
    pub fn new(config: &AnalysisConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            bail!("analysis.model required for Ollama provider");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    /// Run one non-streaming completion with retry/backoff.
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": 0 },
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match self.client.post(&self.endpoint).json(&body).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_generate_response(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(%status, attempt, "Ollama request failed, retrying");
                        last_err = Some(anyhow::anyhow!(
                            "Ollama API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Ollama API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Ollama request failed, retrying");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Ollama request failed after retries")))
    }
}

fn parse_generate_response(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
}

#[async_trait]
impl Summarizer for OllamaAnalyzer {
    async fn summarize(&self, segments: &[DocumentSegment]) -> Result<String> {
        let mut summary = String::new();
        for (i, segment) in segments.iter().enumerate() {
            if segment.text.trim().is_empty() {
                continue;
            }
            let prompt = if summary.is_empty() {
                SUMMARY_PROMPT.replace("{text}", &segment.text)
            } else {
                REFINE_PROMPT
                    .replace("{existing}", &summary)
                    .replace("{text}", &segment.text)
            };
            let refined = self.generate(&prompt).await?;
            debug!(segment = i, chars = refined.len(), "summary refined");
            if !refined.is_empty() {
                summary = refined;
            }
        }
        Ok(summary)
    }
}

#[async_trait]
impl RelationExtractor for OllamaAnalyzer {
    /// Extract per segment. A failing segment is logged and skipped; the
    /// call fails only if every segment fails.
    async fn extract(&self, segments: &[DocumentSegment]) -> Result<Vec<EntityRelation>> {
        let mut relations = Vec::new();
        let mut last_err = None;
        let mut succeeded = 0usize;

        for (i, segment) in segments.iter().enumerate() {
            let prompt = EXTRACTION_PROMPT.replace("{text}", &segment.text);
            match self.generate(&prompt).await {
                Ok(answer) => {
                    succeeded += 1;
                    relations.extend(parse_relation_lines(&answer));
                }
                Err(e) => {
                    warn!(segment = i, error = %e, "relation extraction failed for segment");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if succeeded == 0 => Err(e),
            _ => Ok(relations),
        }
    }
}

/// Parse `entity|target|relationship` lines, dropping anything malformed.
pub fn parse_relation_lines(answer: &str) -> Vec<EntityRelation> {
    answer
        .lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(['-', '*', ' ']);
            let mut parts = line.split('|');
            let entity = parts.next()?;
            let target = parts.next()?;
            let relationship = parts.next()?;
            if parts.next().is_some() {
                return None;
            }
            if entity.trim().eq_ignore_ascii_case("entity")
                && target.trim().eq_ignore_ascii_case("target")
            {
                return None;
            }
            EntityRelation::new(entity, target, relationship)
        })
        .collect()
}
