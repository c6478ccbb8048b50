//! Core data models used throughout Study Distill.
//!
//! These types represent the source document, its chunks, the partial
//! results produced per chunk, and the merged study summary that flows
//! through validation, self-repair and the result cache.
//!
//! Everything the content generator produces is deserialized leniently:
//! missing fields default, and `null` or numeric values in string slots
//! are coerced, so a slightly off-schema response still yields a usable
//! [`SummaryFragment`].

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::text::{self, KeyIndex};

/// Title of the overflow section that absorbs themes without a primary home.
pub const ADDITIONAL_TOPICS_TITLE: &str = "Additional Topics (Condensed)";

/// Upper bound on the length of a citation evidence excerpt, in characters.
pub const MAX_EVIDENCE_CHARS: usize = 200;

/// Normalized input text plus the options that shape generation.
///
/// Immutable once built; the pipeline discards it after the run.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Normalized body text (see [`text::normalize_text`]).
    pub text: String,
    /// Target language for the generated summary (e.g. `"en"`).
    pub language: String,
    /// Free-form instruction forwarded to the generator.
    pub instruction: Option<String>,
    /// Planning token estimate of `text`.
    pub estimated_tokens: usize,
}

impl SourceDocument {
    pub fn new(raw: &str, language: &str, instruction: Option<String>) -> Self {
        let text = text::normalize_text(raw);
        let estimated_tokens = text::estimate_tokens(&text);
        Self {
            text,
            language: language.trim().to_string(),
            instruction: instruction
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            estimated_tokens,
        }
    }
}

/// A bounded, order-preserving slice of a [`SourceDocument`].
///
/// `start..end` is the chunk's own content (byte offsets into the
/// normalized text). `overlap_start..start` repeats the tail of the
/// previous chunk for context continuity and is empty for the first chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub ordinal: usize,
    pub start: usize,
    pub end: usize,
    pub overlap_start: usize,
    /// `normalized[overlap_start..end]`.
    pub text: String,
    /// Conservative token estimate of `text`.
    pub token_count: usize,
    /// SHA-256 of `text`.
    pub hash: String,
}

impl Chunk {
    pub fn overlap_len(&self) -> usize {
        self.start - self.overlap_start
    }

    pub fn has_overlap(&self) -> bool {
        self.overlap_len() > 0
    }

    /// The chunk text without the leading overlap.
    pub fn content(&self) -> &str {
        &self.text[self.overlap_len()..]
    }
}

/// Domain label driving the numeric-example policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Quantitative,
    Qualitative,
    Mixed,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Quantitative => write!(f, "quantitative"),
            Domain::Qualitative => write!(f, "qualitative"),
            Domain::Mixed => write!(f, "mixed"),
        }
    }
}

/// Merge density policy, chosen by total estimated input volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DensityPolicy {
    SoftMerge,
    DensityBoost,
    AggressiveDensityBoost,
}

impl fmt::Display for DensityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DensityPolicy::SoftMerge => write!(f, "soft-merge"),
            DensityPolicy::DensityBoost => write!(f, "density-boost"),
            DensityPolicy::AggressiveDensityBoost => write!(f, "aggressive-density-boost"),
        }
    }
}

/// Evidence pointer attached to a concept or to the summary.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default, deserialize_with = "lenient_string")]
    pub source_id: String,
    #[serde(default, alias = "section", deserialize_with = "lenient_string")]
    pub section_or_heading: String,
    #[serde(default, alias = "pages", deserialize_with = "lenient_string")]
    pub page_range: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub evidence: String,
}

impl Citation {
    /// Trim every field and bound the evidence excerpt.
    pub fn normalized(mut self) -> Self {
        self.source_id = self.source_id.trim().to_string();
        self.section_or_heading = self.section_or_heading.trim().to_string();
        self.page_range = self.page_range.trim().to_string();
        self.evidence = text::truncate_chars(self.evidence.trim(), MAX_EVIDENCE_CHARS).to_string();
        self
    }

    /// True when the citation points deeper than a bare source identifier.
    pub fn has_detail(&self) -> bool {
        !self.page_range.trim().is_empty() || !self.section_or_heading.trim().is_empty()
    }

    /// Identity used for deduplication.
    pub fn key(&self) -> (String, String, String) {
        (
            text::match_key(&self.source_id),
            text::match_key(&self.section_or_heading),
            text::match_key(&self.page_range),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Concept {
    #[serde(default, alias = "title", deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, alias = "description", deserialize_with = "lenient_string")]
    pub explanation: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub example: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl Concept {
    pub fn has_example(&self) -> bool {
        !self.example.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Section {
    #[serde(default, alias = "heading", deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default)]
    pub concepts: Vec<Concept>,
}

impl Section {
    pub fn is_additional_topics(&self) -> bool {
        self.title == ADDITIONAL_TOPICS_TITLE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Variable {
    #[serde(default, deserialize_with = "lenient_string")]
    pub symbol: String,
    #[serde(default, alias = "description", deserialize_with = "lenient_string")]
    pub meaning: String,
}

/// A formula entry. Mathematical notation (`expression`) and the
/// step-by-step procedure (`steps`) always live in separate fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Formula {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, alias = "notation", deserialize_with = "lenient_string")]
    pub expression: String,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub worked_example: String,
}

impl Formula {
    pub fn is_complete(&self) -> bool {
        !self.variables.is_empty() && !self.worked_example.trim().is_empty()
    }

    /// Move procedural lines out of `expression` into `steps`.
    ///
    /// The first line that is not a step stays as the notation; every
    /// step-looking line ("Step 1:", "1.", "- ") is appended to `steps`.
    pub fn separate_notation(mut self) -> Self {
        if !self.expression.contains('\n') {
            self.expression = self.expression.trim().to_string();
            return self;
        }
        let mut notation = Vec::new();
        let mut moved = Vec::new();
        for line in self.expression.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if text::looks_like_step(line) {
                moved.push(line.to_string());
            } else {
                notation.push(line.to_string());
            }
        }
        self.expression = notation.join(" ");
        self.steps.extend(moved);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GlossaryTerm {
    #[serde(default, deserialize_with = "lenient_string")]
    pub term: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub definition: String,
}

/// Structured output for one generation call, before merging.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SummaryFragment {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, alias = "summary", deserialize_with = "lenient_string")]
    pub overview: String,
    #[serde(default, alias = "objectives")]
    pub learning_objectives: Vec<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub formulas: Vec<Formula>,
    #[serde(default, alias = "terms")]
    pub glossary: Vec<GlossaryTerm>,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl SummaryFragment {
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty()
            && self.overview.trim().is_empty()
            && self.learning_objectives.is_empty()
            && self.themes.is_empty()
            && self.sections.is_empty()
            && self.formulas.is_empty()
            && self.glossary.is_empty()
            && self.citations.is_empty()
    }
}

/// Structured output for one chunk, tagged with the chunk's ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult {
    pub ordinal: usize,
    pub domain: Domain,
    pub fragment: SummaryFragment,
    /// The generator explicitly reported it could not summarize the chunk.
    pub insufficient_context: bool,
}

impl PartialResult {
    /// Themes detected in this chunk: declared themes, else section titles.
    pub fn themes(&self) -> Vec<String> {
        let declared: Vec<String> = self
            .fragment
            .themes
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if !declared.is_empty() {
            return declared;
        }
        self.fragment
            .sections
            .iter()
            .map(|s| s.title.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }
}

/// Document-level structured summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedSummary {
    pub title: String,
    pub overview: String,
    pub learning_objectives: Vec<String>,
    pub sections: Vec<Section>,
    pub formulas: Vec<Formula>,
    pub glossary: Vec<GlossaryTerm>,
    pub citations: Vec<Citation>,
    pub domain: Domain,
    pub policy: DensityPolicy,
    /// Union of themes detected across all chunks, in first-seen order.
    pub source_themes: Vec<String>,
}

impl MergedSummary {
    pub fn empty(domain: Domain, policy: DensityPolicy) -> Self {
        Self {
            title: String::new(),
            overview: String::new(),
            learning_objectives: Vec::new(),
            sections: Vec::new(),
            formulas: Vec::new(),
            glossary: Vec::new(),
            citations: Vec::new(),
            domain,
            policy,
            source_themes: Vec::new(),
        }
    }

    pub fn additional_topics(&self) -> Option<&Section> {
        self.sections.iter().find(|s| s.is_additional_topics())
    }

    /// Sections other than the overflow section.
    pub fn primary_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| !s.is_additional_topics())
    }

    /// All concepts across all sections, in order.
    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.sections.iter().flat_map(|s| s.concepts.iter())
    }

    /// Every topic the summary mentions: section titles, concept names, and
    /// the condensed descriptions inside the overflow section.
    pub fn topic_index(&self) -> KeyIndex {
        let mut items: Vec<&str> = Vec::new();
        for section in &self.sections {
            items.push(&section.title);
            for concept in &section.concepts {
                items.push(&concept.name);
                if section.is_additional_topics() {
                    items.push(&concept.explanation);
                }
            }
        }
        KeyIndex::new(items)
    }

    /// Source themes the summary does not mention, in first-seen order.
    pub fn missing_themes(&self) -> Vec<String> {
        let index = self.topic_index();
        self.source_themes
            .iter()
            .filter(|t| !index.contains(t))
            .cloned()
            .collect()
    }
}

/// Multi-metric assessment of a [`MergedSummary`]. Every component is in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub coverage: f64,
    pub numeric_density: f64,
    pub formula_completeness: f64,
    pub citation_depth: f64,
    pub readability: f64,
    pub completeness: f64,
    pub composite: f64,
    pub is_final_ready: bool,
}

/// Memoized pipeline result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    /// Serialized [`MergedSummary`] (JSON).
    pub result: String,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds.
    pub accessed_at: i64,
    pub access_count: i64,
}

/// Accept strings, `null`, numbers and booleans wherever a string is expected.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    })
}
