//! Content generator abstraction and implementations.
//!
//! Defines the [`ContentGenerator`] trait and concrete implementations:
//! - **[`DisabledGenerator`]**: fails every call; used when no provider is configured.
//! - **[`OpenAiGenerator`]**: calls an OpenAI-compatible chat completions API.
//!
//! Generators perform exactly one call per [`ContentGenerator::generate`].
//! Retry, backoff, timeouts and cancellation are applied uniformly by
//! [`crate::synthesis`], so every backend (including test stubs) gets the
//! same treatment.
//!
//! # Error mapping (OpenAI provider)
//!
//! - HTTP 429 → [`GenerationError::RateLimited`]
//! - HTTP 5xx, network errors → [`GenerationError::Transient`]
//! - client timeout → [`GenerationError::Timeout`]
//! - other HTTP 4xx, unusable response envelope → [`GenerationError::Fatal`]
//! - missing message content → [`GenerationError::Malformed`]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use study_distill_core::models::{Chunk, Domain, MergedSummary, SourceDocument};
use study_distill_core::parse::INSUFFICIENT_CONTEXT_MARKER;
use study_distill_core::repair::{repair_instruction, RepairTarget};
use study_distill_core::text::truncate_chars;

use crate::config::GenerationConfig;
use crate::error::GenerationError;

/// Schema and rules shared by every request.
pub const SYSTEM_PROMPT: &str = r#"You write dense, exam-oriented study summaries.
Reply with a single JSON object and nothing else, using this shape:
{
  "title": string,
  "overview": string,
  "learning_objectives": [string],
  "themes": [string],
  "sections": [{"title": string, "concepts": [{"name": string, "explanation": string, "example": string,
      "citations": [{"source_id": string, "section_or_heading": string, "page_range": string, "evidence": string}]}]}],
  "formulas": [{"name": string, "expression": string, "variables": [{"symbol": string, "meaning": string}],
      "steps": [string], "worked_example": string}],
  "glossary": [{"term": string, "definition": string}],
  "citations": [same shape as concept citations]
}
Rules:
- Keep formula notation in "expression" and procedures in "steps".
- Examples carry concrete numbers or anchored facts from the source.
- Evidence excerpts are at most 200 characters, quoted from the source.
- "themes" lists every distinct topic the excerpt covers, in a few words each.
- If the excerpt is too short or fragmentary to summarize, reply {"status":"insufficient_context"}."#;

/// What a request is for. Carried for logging and prompt wording.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    /// Map-stage synthesis of one chunk.
    Chunk { ordinal: usize, total: usize },
    /// Targeted regeneration of one defective field.
    Repair { target: RepairTarget },
}

/// A single bounded generator request. Owns its data so it can move into
/// spawned tasks.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub kind: RequestKind,
    pub language: String,
    pub domain: Domain,
    pub instruction: Option<String>,
    /// Source excerpt, already bounded to the configured payload size.
    pub excerpt: String,
    /// Extra task text (repair asks); empty for chunk requests.
    pub task: String,
}

impl GenerationRequest {
    pub fn for_chunk(
        doc: &SourceDocument,
        chunk: &Chunk,
        total: usize,
        domain: Domain,
        max_payload_chars: usize,
    ) -> Self {
        Self {
            kind: RequestKind::Chunk {
                ordinal: chunk.ordinal,
                total,
            },
            language: doc.language.clone(),
            domain,
            instruction: doc.instruction.clone(),
            excerpt: truncate_chars(&chunk.text, max_payload_chars).to_string(),
            task: String::new(),
        }
    }

    pub fn for_repair(
        doc: &SourceDocument,
        summary: &MergedSummary,
        target: &RepairTarget,
        context: &str,
        max_payload_chars: usize,
    ) -> Self {
        let task = repair_instruction(target, summary);
        let room = max_payload_chars.saturating_sub(task.chars().count()).max(1000);
        Self {
            kind: RequestKind::Repair {
                target: target.clone(),
            },
            language: doc.language.clone(),
            domain: summary.domain,
            instruction: doc.instruction.clone(),
            excerpt: truncate_chars(context, room).to_string(),
            task,
        }
    }

    /// Render the user message.
    pub fn user_prompt(&self) -> String {
        let mut prompt = String::new();
        match &self.kind {
            RequestKind::Chunk { ordinal, total } => {
                prompt.push_str(&format!(
                    "Summarize excerpt {} of {} of a longer document.\n",
                    ordinal + 1,
                    total
                ));
            }
            RequestKind::Repair { .. } => {
                prompt.push_str("Improve one part of an existing study summary.\n");
                prompt.push_str(&self.task);
                prompt.push('\n');
            }
        }
        prompt.push_str(&format!("Write in language: {}\n", self.language));
        prompt.push_str(&format!("Material type: {}. {}\n", self.domain, domain_guidance(self.domain)));
        if let Some(instruction) = &self.instruction {
            prompt.push_str(&format!("Reader instruction: {}\n", instruction));
        }
        prompt.push_str(&format!(
            "If the excerpt cannot support a summary, reply {}.\n\nExcerpt:\n",
            INSUFFICIENT_CONTEXT_MARKER
        ));
        prompt.push_str(&self.excerpt);
        prompt
    }
}

fn domain_guidance(domain: Domain) -> &'static str {
    match domain {
        Domain::Quantitative => {
            "Most examples must be worked with numbers; give every formula its variables and a worked example."
        }
        Domain::Qualitative => {
            "Anchor examples in dated events, named cases or quoted positions; use numbers where the source has them."
        }
        Domain::Mixed => {
            "Balance worked numeric examples with anchored facts; give every formula its variables."
        }
    }
}

/// Backend that turns a [`GenerationRequest`] into raw response text.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Model identifier; participates in the request fingerprint.
    fn model_name(&self) -> &str;

    /// Perform one call. No retries.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// A generator that always fails.
///
/// Used when `generation.provider = "disabled"`, and by `distill run
/// --dry-run`, which plans a request under the configured model name
/// without contacting any provider.
pub struct DisabledGenerator {
    model: String,
}

impl DisabledGenerator {
    /// Report `model` as the model name, so fingerprints match the ones a
    /// real provider would produce.
    pub fn standing_in_for(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Default for DisabledGenerator {
    fn default() -> Self {
        Self::standing_in_for("disabled")
    }
}

#[async_trait]
impl ContentGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Fatal(
            "content generation is disabled; set generation.provider in the config".to_string(),
        ))
    }
}

// ============ OpenAI Provider ============

/// Generator using an OpenAI-compatible `POST {url}/chat/completions`.
///
/// Requires the API key in the environment variable named by
/// `generation.api_key_env`.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: u32,
    timeout_secs: u64,
}

impl OpenAiGenerator {
    /// # Errors
    ///
    /// Returns an error if the API key variable is unset or the HTTP
    /// client cannot be built.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_output_tokens,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": request.user_prompt() },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout {
                        secs: self.timeout_secs,
                    }
                } else {
                    GenerationError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(GenerationError::RateLimited);
        }
        if status.is_server_error() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Transient(format!(
                "API error {}: {}",
                status, body_text
            )));
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Fatal(format!(
                "API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Transient(e.to_string()))?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    let choices = json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| GenerationError::Fatal("invalid response: missing choices".to_string()))?;

    choices
        .first()
        .and_then(|choice| choice.pointer("/message/content"))
        .and_then(|content| content.as_str())
        .map(|content| content.to_string())
        .ok_or(GenerationError::Malformed)
}

/// Create the [`ContentGenerator`] named by `generation.provider`.
///
/// | Config Value | Generator |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledGenerator`] |
/// | `"openai"` | [`OpenAiGenerator`] |
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn ContentGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator::default())),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
