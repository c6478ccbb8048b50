//! Policy settings for chunking, merging and quality validation.
//!
//! The reference values below are defaults, not invariants. They are
//! deserialized from the `[chunking]`, `[merge]` and `[quality]` tables of
//! the application config, with every field optional.

use serde::Deserialize;

use crate::models::Domain;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Target chunk size in tokens.
    pub target_tokens: usize,
    /// Tokens repeated from the previous chunk.
    pub overlap_tokens: usize,
    /// Hard per-chunk ceiling; oversized chunks are split again.
    pub max_tokens: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            target_tokens: 2400,
            overlap_tokens: 120,
            max_tokens: 3200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MergeSettings {
    /// At or below this volume the Soft-Merge policy applies.
    pub soft_threshold_tokens: usize,
    /// Above this volume the Aggressive Density-Boost policy applies.
    pub aggressive_threshold_tokens: usize,
    pub sentence_tokens_min: usize,
    pub sentence_tokens_max: usize,
    /// Entry cap for "Additional Topics (Condensed)" under the aggressive policy.
    pub additional_topics_cap: usize,
    /// Primary sections beyond this count are demoted under density-boost policies.
    pub max_primary_sections: usize,
    /// Name similarity at which two concepts count as near-duplicates.
    pub near_duplicate_similarity: f64,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            soft_threshold_tokens: 15_000,
            aggressive_threshold_tokens: 40_000,
            sentence_tokens_min: 18,
            sentence_tokens_max: 28,
            additional_topics_cap: 12,
            max_primary_sections: 12,
            near_duplicate_similarity: 0.6,
        }
    }
}

impl MergeSettings {
    pub fn sentence_band(&self) -> SentenceBand {
        SentenceBand {
            min: self.sentence_tokens_min,
            max: self.sentence_tokens_max,
        }
    }
}

/// Target sentence density, in tokens per sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentenceBand {
    pub min: usize,
    pub max: usize,
}

impl Default for SentenceBand {
    fn default() -> Self {
        Self { min: 18, max: 28 }
    }
}

/// Weights of the composite score. Must sum to 1.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub coverage: f64,
    pub numeric_density: f64,
    pub formula_completeness: f64,
    pub citation_depth: f64,
    pub readability: f64,
    pub completeness: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            coverage: 0.25,
            numeric_density: 0.15,
            formula_completeness: 0.15,
            citation_depth: 0.15,
            readability: 0.10,
            completeness: 0.20,
        }
    }
}

impl QualityWeights {
    pub fn sum(&self) -> f64 {
        self.coverage
            + self.numeric_density
            + self.formula_completeness
            + self.citation_depth
            + self.readability
            + self.completeness
    }

    pub fn all_non_negative(&self) -> bool {
        [
            self.coverage,
            self.numeric_density,
            self.formula_completeness,
            self.citation_depth,
            self.readability,
            self.completeness,
        ]
        .iter()
        .all(|w| *w >= 0.0)
    }
}

/// Target share of concept examples carrying a number or anchored fact.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NumericTargets {
    pub quantitative: f64,
    pub qualitative: f64,
    pub mixed: f64,
}

impl Default for NumericTargets {
    fn default() -> Self {
        Self {
            quantitative: 0.70,
            qualitative: 0.20,
            mixed: 0.50,
        }
    }
}

impl NumericTargets {
    pub fn for_domain(&self, domain: Domain) -> f64 {
        match domain {
            Domain::Quantitative => self.quantitative,
            Domain::Qualitative => self.qualitative,
            Domain::Mixed => self.mixed,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub final_ready_threshold: f64,
    pub min_objectives: usize,
    pub min_sections: usize,
    pub min_glossary_terms: usize,
    pub weights: QualityWeights,
    pub numeric_targets: NumericTargets,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            final_ready_threshold: 0.90,
            min_objectives: 2,
            min_sections: 2,
            min_glossary_terms: 8,
            weights: QualityWeights::default(),
            numeric_targets: NumericTargets::default(),
        }
    }
}
