//! Multi-metric quality validation and structural defect scan.
//!
//! [`validate`] scores a [`MergedSummary`] on six components, each in
//! `[0, 1]`, and combines them with configured weights into a composite.
//! The same pass lists every under-populated field as a [`Defect`] with a
//! typed [`Field`] so self-repair can target it precisely.
//!
//! A summary below the configured minimum of learning objectives or
//! primary sections is never final-ready, whatever its composite.
//!
//! The overflow section ("Additional Topics (Condensed)") is an index of
//! demoted topics rather than teaching content: it counts for coverage but
//! not for sections, examples or readability.

use serde::Serialize;
use std::fmt;

use crate::classify::DomainProfile;
use crate::models::{Citation, MergedSummary, QualityScore};
use crate::settings::{QualitySettings, QualityWeights, SentenceBand};
use crate::text::{average_sentence_tokens, has_anchor};

/// Location of a citation inside a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum CitationSlot {
    Summary {
        index: usize,
    },
    Concept {
        section: usize,
        concept: usize,
        index: usize,
    },
}

/// A field the validator can flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum Field {
    Overview,
    LearningObjectives,
    Sections,
    Glossary,
    FormulaVariables { formula: usize },
    FormulaWorkedExample { formula: usize },
    ConceptExample { section: usize, concept: usize },
    CitationDetail { slot: CitationSlot },
    Themes,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Overview => write!(f, "overview"),
            Field::LearningObjectives => write!(f, "learning_objectives"),
            Field::Sections => write!(f, "sections"),
            Field::Glossary => write!(f, "glossary"),
            Field::FormulaVariables { formula } => write!(f, "formulas[{}].variables", formula),
            Field::FormulaWorkedExample { formula } => {
                write!(f, "formulas[{}].worked_example", formula)
            }
            Field::ConceptExample { section, concept } => {
                write!(f, "sections[{}].concepts[{}].example", section, concept)
            }
            Field::CitationDetail {
                slot: CitationSlot::Summary { index },
            } => write!(f, "citations[{}].page_range", index),
            Field::CitationDetail {
                slot:
                    CitationSlot::Concept {
                        section,
                        concept,
                        index,
                    },
            } => write!(
                f,
                "sections[{}].concepts[{}].citations[{}].page_range",
                section, concept, index
            ),
            Field::Themes => write!(f, "themes.missing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectKind {
    /// The field is empty.
    Missing,
    /// The field has fewer entries than required.
    TooFew,
    /// The field is present but lacks a number or anchored fact.
    Unanchored,
}

/// One structural defect: where, what, and current vs. required count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Defect {
    pub path: String,
    #[serde(skip)]
    pub field: Field,
    pub kind: DefectKind,
    pub current: usize,
    pub required: usize,
}

impl Defect {
    pub fn new(field: Field, kind: DefectKind, current: usize, required: usize) -> Self {
        Self {
            path: field.to_string(),
            field,
            kind,
            current,
            required,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub score: QualityScore,
    pub defects: Vec<Defect>,
    pub missing_themes: Vec<String>,
}

impl QualityReport {
    pub fn is_final_ready(&self) -> bool {
        self.score.is_final_ready
    }
}

/// Component scores before weighting, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Components {
    pub coverage: f64,
    pub numeric_density: f64,
    pub formula_completeness: f64,
    pub citation_depth: f64,
    pub readability: f64,
    pub completeness: f64,
}

/// Weighted sum of the components.
pub fn composite(weights: &QualityWeights, c: &Components) -> f64 {
    weights.coverage * c.coverage
        + weights.numeric_density * c.numeric_density
        + weights.formula_completeness * c.formula_completeness
        + weights.citation_depth * c.citation_depth
        + weights.readability * c.readability
        + weights.completeness * c.completeness
}

/// Score a summary and scan it for defects. The numeric-example target
/// comes from `profile`.
pub fn validate(
    summary: &MergedSummary,
    profile: &DomainProfile,
    settings: &QualitySettings,
    band: SentenceBand,
) -> QualityReport {
    let mut defects = Vec::new();

    let missing_themes = summary.missing_themes();
    let coverage = coverage_score(summary.source_themes.len(), missing_themes.len());
    if !missing_themes.is_empty() {
        let total = summary.source_themes.len();
        defects.push(Defect::new(
            Field::Themes,
            DefectKind::Missing,
            total - missing_themes.len(),
            total,
        ));
    }

    let numeric_density = numeric_density_score(summary, profile.numeric_target);
    if numeric_density < 1.0 {
        scan_examples(summary, &mut defects);
    }

    let formula_completeness = formula_completeness_score(summary, &mut defects);
    let citation_depth = citation_depth_score(summary, &mut defects);
    let readability = readability_score(&teaching_text(summary), band);
    let completeness = completeness_score(summary, settings, &mut defects);

    if summary.overview.trim().is_empty() {
        defects.push(Defect::new(Field::Overview, DefectKind::Missing, 0, 1));
    }

    let composite = composite(
        &settings.weights,
        &Components {
            coverage,
            numeric_density,
            formula_completeness,
            citation_depth,
            readability,
            completeness,
        },
    );
    let is_final_ready =
        meets_structural_minimums(summary, settings) && composite >= settings.final_ready_threshold;

    QualityReport {
        score: QualityScore {
            coverage,
            numeric_density,
            formula_completeness,
            citation_depth,
            readability,
            completeness,
            composite,
            is_final_ready,
        },
        defects,
        missing_themes,
    }
}

/// Learning objectives and primary sections reach their minimums.
fn meets_structural_minimums(summary: &MergedSummary, settings: &QualitySettings) -> bool {
    summary.learning_objectives.len() >= settings.min_objectives
        && summary.primary_sections().count() >= settings.min_sections
}

fn coverage_score(themes: usize, missing: usize) -> f64 {
    if themes == 0 {
        return 1.0;
    }
    (themes - missing) as f64 / themes as f64
}

/// Share of anchored concept examples, relative to the domain target.
fn numeric_density_score(summary: &MergedSummary, target: f64) -> f64 {
    if target <= 0.0 {
        return 1.0;
    }
    let (anchored, total) = summary
        .primary_sections()
        .flat_map(|s| s.concepts.iter())
        .fold((0usize, 0usize), |(a, t), c| {
            (a + usize::from(has_anchor(&c.example)), t + 1)
        });
    if total == 0 {
        return 0.0;
    }
    (anchored as f64 / total as f64 / target).min(1.0)
}

fn scan_examples(summary: &MergedSummary, defects: &mut Vec<Defect>) {
    for (si, section) in summary.sections.iter().enumerate() {
        if section.is_additional_topics() {
            continue;
        }
        for (ci, concept) in section.concepts.iter().enumerate() {
            let field = Field::ConceptExample {
                section: si,
                concept: ci,
            };
            if !concept.has_example() {
                defects.push(Defect::new(field, DefectKind::Missing, 0, 1));
            } else if !has_anchor(&concept.example) {
                defects.push(Defect::new(field, DefectKind::Unanchored, 0, 1));
            }
        }
    }
}

fn formula_completeness_score(summary: &MergedSummary, defects: &mut Vec<Defect>) -> f64 {
    if summary.formulas.is_empty() {
        return 1.0;
    }
    let mut complete = 0;
    for (i, formula) in summary.formulas.iter().enumerate() {
        if formula.is_complete() {
            complete += 1;
            continue;
        }
        if formula.variables.is_empty() {
            defects.push(Defect::new(
                Field::FormulaVariables { formula: i },
                DefectKind::Missing,
                0,
                1,
            ));
        }
        if formula.worked_example.trim().is_empty() {
            defects.push(Defect::new(
                Field::FormulaWorkedExample { formula: i },
                DefectKind::Missing,
                0,
                1,
            ));
        }
    }
    complete as f64 / summary.formulas.len() as f64
}

fn citation_depth_score(summary: &MergedSummary, defects: &mut Vec<Defect>) -> f64 {
    let mut slots: Vec<(CitationSlot, &Citation)> = summary
        .citations
        .iter()
        .enumerate()
        .map(|(index, c)| (CitationSlot::Summary { index }, c))
        .collect();
    for (si, section) in summary.sections.iter().enumerate() {
        for (ci, concept) in section.concepts.iter().enumerate() {
            for (index, c) in concept.citations.iter().enumerate() {
                slots.push((
                    CitationSlot::Concept {
                        section: si,
                        concept: ci,
                        index,
                    },
                    c,
                ));
            }
        }
    }
    if slots.is_empty() {
        return 0.0;
    }
    let mut detailed = 0;
    for (slot, citation) in &slots {
        if citation.has_detail() {
            detailed += 1;
        } else {
            defects.push(Defect::new(
                Field::CitationDetail { slot: *slot },
                DefectKind::Missing,
                0,
                1,
            ));
        }
    }
    detailed as f64 / slots.len() as f64
}

/// Overview plus primary concept explanations.
fn teaching_text(summary: &MergedSummary) -> String {
    let mut parts: Vec<&str> = vec![summary.overview.as_str()];
    parts.extend(
        summary
            .primary_sections()
            .flat_map(|s| s.concepts.iter())
            .map(|c| c.explanation.as_str()),
    );
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Closeness of the average sentence length to the band.
pub fn readability_score(text: &str, band: SentenceBand) -> f64 {
    let Some(avg) = average_sentence_tokens(text) else {
        return 0.0;
    };
    let (min, max) = (band.min as f64, band.max as f64);
    if avg < min {
        avg / min
    } else if avg > max {
        max / avg
    } else {
        1.0
    }
}

fn completeness_score(
    summary: &MergedSummary,
    settings: &QualitySettings,
    defects: &mut Vec<Defect>,
) -> f64 {
    let checks = [
        (
            Field::LearningObjectives,
            summary.learning_objectives.len(),
            settings.min_objectives,
        ),
        (
            Field::Sections,
            summary.primary_sections().count(),
            settings.min_sections,
        ),
        (Field::Glossary, summary.glossary.len(), settings.min_glossary_terms),
    ];
    let mut total = 0.0;
    for (field, current, required) in checks {
        if required == 0 {
            total += 1.0;
            continue;
        }
        if current < required {
            let kind = if current == 0 {
                DefectKind::Missing
            } else {
                DefectKind::TooFew
            };
            defects.push(Defect::new(field, kind, current, required));
        }
        total += (current as f64 / required as f64).min(1.0);
    }
    total / checks.len() as f64
}
