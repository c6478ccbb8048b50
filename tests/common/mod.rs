#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use study_distill::config::Config;
use study_distill::error::GenerationError;
use study_distill::generation::{ContentGenerator, GenerationRequest, RequestKind};

/// Twenty words, inside the default sentence band.
pub const SENTENCE: &str = "Marginal analysis compares the extra benefit of one more unit with its extra cost before any decision is finally made.";

pub type Reply = fn(&GenerationRequest) -> Result<String, GenerationError>;

/// Scripted generator with call counters.
pub struct Stub {
    pub calls: AtomicUsize,
    pub repair_calls: AtomicUsize,
    delay: Duration,
    reply: Reply,
}

impl Stub {
    pub fn new(reply: Reply) -> Arc<Self> {
        Self::slow(reply, Duration::ZERO)
    }

    pub fn slow(reply: Reply, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            repair_calls: AtomicUsize::new(0),
            delay,
            reply,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn repair_calls(&self) -> usize {
        self.repair_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentGenerator for Stub {
    fn model_name(&self) -> &str {
        "stub-model"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if matches!(request.kind, RequestKind::Repair { .. }) {
            self.repair_calls.fetch_add(1, Ordering::SeqCst);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.reply)(request)
    }
}

pub fn chunk_ordinal(request: &GenerationRequest) -> Option<usize> {
    match request.kind {
        RequestKind::Chunk { ordinal, .. } => Some(ordinal),
        RequestKind::Repair { .. } => None,
    }
}

pub fn insufficient() -> Result<String, GenerationError> {
    Ok(r#"{"status": "insufficient_context"}"#.to_string())
}

fn citation() -> serde_json::Value {
    serde_json::json!({
        "source_id": "lecture-notes",
        "section_or_heading": "Chapter 2",
        "page_range": "12-14",
        "evidence": "Firms expand output while marginal revenue exceeds marginal cost."
    })
}

/// A fragment that passes every quality check on its own.
pub fn compliant_json() -> String {
    let glossary: Vec<serde_json::Value> = (1..=8)
        .map(|i| serde_json::json!({"term": format!("Term {}", i), "definition": format!("Definition number {}.", i)}))
        .collect();
    serde_json::json!({
        "title": "Principles of Microeconomics",
        "overview": SENTENCE,
        "learning_objectives": [
            "Apply marginal reasoning to output decisions",
            "Find the equilibrium price of a competitive market"
        ],
        "themes": ["Marginal Analysis", "Market Equilibrium"],
        "sections": [
            {
                "title": "Marginal Analysis",
                "concepts": [{
                    "name": "Marginal cost",
                    "explanation": SENTENCE,
                    "example": "A bakery producing 120 loaves at a marginal cost of 4 dollars stops when the price falls below 4.",
                    "citations": [citation()]
                }]
            },
            {
                "title": "Market Equilibrium",
                "concepts": [{
                    "name": "Equilibrium price",
                    "explanation": SENTENCE,
                    "example": "With demand Q = 100 - 2P and supply Q = 3P, the market clears at P = 20.",
                    "citations": [citation()]
                }]
            }
        ],
        "glossary": glossary
    })
    .to_string()
}

pub fn compliant(request: &GenerationRequest) -> Result<String, GenerationError> {
    match chunk_ordinal(request) {
        Some(_) => Ok(compliant_json()),
        None => insufficient(),
    }
}

/// A valid but thin fragment; repairs get no material.
pub fn thin(request: &GenerationRequest) -> Result<String, GenerationError> {
    match chunk_ordinal(request) {
        Some(_) => Ok(r#"{"title": "Notes", "overview": "Short notes."}"#.to_string()),
        None => insufficient(),
    }
}

/// One section per chunk plus a side theme that no section covers.
pub fn topic_per_chunk(request: &GenerationRequest) -> Result<String, GenerationError> {
    let Some(n) = chunk_ordinal(request) else {
        return insufficient();
    };
    Ok(serde_json::json!({
        "title": "Course Reader",
        "overview": SENTENCE,
        "themes": [format!("Topic {}", n), format!("Side note {}", n)],
        "sections": [{
            "title": format!("Topic {}", n),
            "concepts": [{
                "name": format!("Concept {}", n),
                "explanation": SENTENCE,
                "example": format!("Case {} covers {} observations.", n, n * 10),
                "citations": [citation()]
            }]
        }]
    })
    .to_string())
}

/// Fails chunk 1 permanently; everything else is thin.
pub fn reject_chunk_one(request: &GenerationRequest) -> Result<String, GenerationError> {
    match chunk_ordinal(request) {
        Some(1) => Err(GenerationError::Fatal("content policy rejection".into())),
        _ => thin(request),
    }
}

/// Defaults with fast retries, persisting under `dir`.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::with_db_path(dir.join("data").join("distill.sqlite"));
    config.generation.max_retries = 1;
    config.generation.backoff_base_ms = 1;
    config.generation.timeout_secs = 5;
    config
}

/// Paragraphs of `paragraph` until at least `chars` characters.
pub fn repeat_paragraph(paragraph: &str, chars: usize) -> String {
    let mut text = String::new();
    let mut i = 0;
    while text.len() < chars {
        text.push_str(&format!("{} ({})\n\n", paragraph, i));
        i += 1;
    }
    text
}

/// Roughly `tokens` tokens, first half quantitative, second half narrative.
pub fn mixed_document(tokens: usize) -> String {
    let half = tokens * 4 / 2;
    let quantitative = repeat_paragraph(
        "The equation y = 3x + 2 gives y = 14 when x = 4, and the derivative dy/dx = 3 holds for all 25 rows of table 7.",
        half,
    );
    let qualitative = repeat_paragraph(
        "Historians argue that the reform movement reshaped religious authority, and according to Smith et al. the debate was bitter.",
        half,
    );
    format!("{}{}", quantitative, qualitative)
}
