//! Typed self-repair: targets, patches and the bounded state machine.
//!
//! Validator defects become [`RepairTarget`]s. Each target names exactly
//! the part of the summary to regenerate; the generator's answer is a
//! [`SummaryFragment`] applied by [`apply_repair`] as a structured patch.
//!
//! The loop itself is the [`RepairState`] machine:
//!
//! ```text
//! Validated(n) ──final-ready──────────────▶ FinalReady
//!      │ defects and n < budget
//!      ▼
//! TargetedRegeneration(n+1) ──────────────▶ Validated(n+1)
//!      otherwise (budget spent / nothing targetable) ─▶ BestEffort
//! ```
//!
//! Every transition either ends the loop or raises the attempt counter,
//! so the machine terminates within `budget` regenerations.

use serde::Serialize;
use std::fmt;

use crate::merge::{merge_citations, resolve_duplicate};
use crate::models::{MergedSummary, Section, SummaryFragment, ADDITIONAL_TOPICS_TITLE};
use crate::quality::{CitationSlot, Defect, Field, QualityReport};
use crate::text::match_key;

/// One targeted regeneration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum RepairTarget {
    FormulaDetails { index: usize },
    LearningObjectives { needed: usize },
    Sections { needed: usize },
    Glossary { needed: usize },
    ConceptExample { section: usize, concept: usize },
    CitationDetail { slot: CitationSlot },
    MissingThemes { themes: Vec<String> },
    Overview,
}

impl fmt::Display for RepairTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairTarget::FormulaDetails { index } => write!(f, "formulas[{}]", index),
            RepairTarget::LearningObjectives { needed } => {
                write!(f, "learning_objectives(+{})", needed)
            }
            RepairTarget::Sections { needed } => write!(f, "sections(+{})", needed),
            RepairTarget::Glossary { needed } => write!(f, "glossary(+{})", needed),
            RepairTarget::ConceptExample { section, concept } => {
                write!(f, "sections[{}].concepts[{}].example", section, concept)
            }
            RepairTarget::CitationDetail { slot } => {
                write!(f, "{}", Field::CitationDetail { slot: *slot })
            }
            RepairTarget::MissingThemes { themes } => write!(f, "themes({})", themes.len()),
            RepairTarget::Overview => write!(f, "overview"),
        }
    }
}

const TARGET_CLASSES: usize = 8;

impl RepairTarget {
    /// Share class under the target cap; lower classes are served first
    /// within each round.
    fn class(&self) -> usize {
        match self {
            RepairTarget::MissingThemes { .. } => 0,
            RepairTarget::FormulaDetails { .. } => 1,
            RepairTarget::LearningObjectives { .. } => 2,
            RepairTarget::Sections { .. } => 3,
            RepairTarget::Glossary { .. } => 4,
            RepairTarget::ConceptExample { .. } => 5,
            RepairTarget::CitationDetail { .. } => 6,
            RepairTarget::Overview => 7,
        }
    }
}

/// Translate a validation report into deduplicated targets, capped at
/// `max_targets`.
///
/// The cap is shared round-robin across target classes, so a long run of
/// one kind of defect (say, dozens of missing examples) cannot starve the
/// others. Targets come out grouped by class, in defect order within each.
pub fn build_repair_targets(report: &QualityReport, max_targets: usize) -> Vec<RepairTarget> {
    let mut classes: Vec<Vec<RepairTarget>> = vec![Vec::new(); TARGET_CLASSES];
    for defect in &report.defects {
        let target = target_for(defect, report);
        let class = &mut classes[target.class()];
        if !class.contains(&target) {
            class.push(target);
        }
    }

    let mut taken = [0usize; TARGET_CLASSES];
    let mut remaining = max_targets;
    while remaining > 0 {
        let mut progressed = false;
        for (class, n) in classes.iter().zip(taken.iter_mut()) {
            if remaining == 0 {
                break;
            }
            if *n < class.len() {
                *n += 1;
                remaining -= 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    classes
        .into_iter()
        .zip(taken)
        .flat_map(|(class, n)| class.into_iter().take(n))
        .collect()
}

fn target_for(defect: &Defect, report: &QualityReport) -> RepairTarget {
    let needed = defect.required.saturating_sub(defect.current).max(1);
    match defect.field {
        Field::Overview => RepairTarget::Overview,
        Field::LearningObjectives => RepairTarget::LearningObjectives { needed },
        Field::Sections => RepairTarget::Sections { needed },
        Field::Glossary => RepairTarget::Glossary { needed },
        Field::FormulaVariables { formula } | Field::FormulaWorkedExample { formula } => {
            RepairTarget::FormulaDetails { index: formula }
        }
        Field::ConceptExample { section, concept } => {
            RepairTarget::ConceptExample { section, concept }
        }
        Field::CitationDetail { slot } => RepairTarget::CitationDetail { slot },
        Field::Themes => RepairTarget::MissingThemes {
            themes: report.missing_themes.clone(),
        },
    }
}

/// Instruction text for a target, plus the current JSON of the entity it
/// concerns. The generator answers with a fragment in the usual schema.
pub fn repair_instruction(target: &RepairTarget, summary: &MergedSummary) -> String {
    let current = current_entity_json(target, summary);
    let ask = match target {
        RepairTarget::FormulaDetails { .. } => "Complete this formula entry. Return it as the single item of \"formulas\", with a \"variables\" list (symbol and meaning for every symbol) and a numeric \"worked_example\". Keep notation in \"expression\" and procedure in \"steps\".".to_string(),
        RepairTarget::LearningObjectives { needed } => format!("Write {} additional learning objectives in \"learning_objectives\", distinct from the existing ones.", needed),
        RepairTarget::Sections { needed } => format!("Write {} additional sections in \"sections\", each with at least one concept that has an explanation, an example and a citation.", needed),
        RepairTarget::Glossary { needed } => format!("Write {} additional glossary terms in \"glossary\", distinct from the existing ones.", needed),
        RepairTarget::ConceptExample { .. } => "Write a concrete example for this concept, containing a number, date or quoted fact. Return the concept as the single concept of a single section.".to_string(),
        RepairTarget::CitationDetail { .. } => "Add the page range and section heading for this citation. Return it as the single item of \"citations\".".to_string(),
        RepairTarget::MissingThemes { themes } => format!("Write one section per theme for these themes: {}.", themes.join("; ")),
        RepairTarget::Overview => "Write a short overview paragraph in \"overview\".".to_string(),
    };
    format!("{}\n\nCurrent value:\n{}", ask, current)
}

fn current_entity_json(target: &RepairTarget, summary: &MergedSummary) -> String {
    let value = match target {
        RepairTarget::FormulaDetails { index } => serde_json::to_value(summary.formulas.get(*index)),
        RepairTarget::LearningObjectives { .. } => serde_json::to_value(&summary.learning_objectives),
        RepairTarget::Sections { .. } | RepairTarget::MissingThemes { .. } => {
            let titles: Vec<&str> = summary.primary_sections().map(|s| s.title.as_str()).collect();
            serde_json::to_value(titles)
        }
        RepairTarget::Glossary { .. } => serde_json::to_value(&summary.glossary),
        RepairTarget::ConceptExample { section, concept } => serde_json::to_value(
            summary
                .sections
                .get(*section)
                .and_then(|s| s.concepts.get(*concept)),
        ),
        RepairTarget::CitationDetail { slot } => serde_json::to_value(citation_at(summary, *slot)),
        RepairTarget::Overview => serde_json::to_value(&summary.title),
    };
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn citation_at(summary: &MergedSummary, slot: CitationSlot) -> Option<&crate::models::Citation> {
    match slot {
        CitationSlot::Summary { index } => summary.citations.get(index),
        CitationSlot::Concept {
            section,
            concept,
            index,
        } => summary
            .sections
            .get(section)?
            .concepts
            .get(concept)?
            .citations
            .get(index),
    }
}

/// Apply a repair fragment to the summary. Returns whether anything changed.
///
/// Only the targeted part is touched; existing content is never replaced
/// by empty values.
pub fn apply_repair(summary: &mut MergedSummary, target: &RepairTarget, fragment: SummaryFragment) -> bool {
    match target {
        RepairTarget::FormulaDetails { index } => {
            let (Some(existing), Some(patch)) =
                (summary.formulas.get_mut(*index), fragment.formulas.into_iter().next())
            else {
                return false;
            };
            let patch = patch.separate_notation();
            let mut changed = false;
            if existing.variables.is_empty() && !patch.variables.is_empty() {
                existing.variables = patch.variables;
                changed = true;
            }
            if existing.worked_example.trim().is_empty() && !patch.worked_example.trim().is_empty() {
                existing.worked_example = patch.worked_example.trim().to_string();
                changed = true;
            }
            if existing.steps.is_empty() && !patch.steps.is_empty() {
                existing.steps = patch.steps;
                changed = true;
            }
            changed
        }
        RepairTarget::LearningObjectives { .. } => {
            let before = summary.learning_objectives.len();
            for objective in fragment.learning_objectives {
                let objective = objective.trim();
                let key = match_key(objective);
                if !key.is_empty()
                    && !summary.learning_objectives.iter().any(|o| match_key(o) == key)
                {
                    summary.learning_objectives.push(objective.to_string());
                }
            }
            summary.learning_objectives.len() > before
        }
        RepairTarget::Sections { .. } | RepairTarget::MissingThemes { .. } => {
            let mut changed = false;
            for section in fragment.sections {
                changed |= add_primary_section(summary, section);
            }
            changed
        }
        RepairTarget::Glossary { .. } => {
            let before = summary.glossary.len();
            for term in fragment.glossary {
                let key = match_key(&term.term);
                if !key.is_empty() && !summary.glossary.iter().any(|g| match_key(&g.term) == key) {
                    summary.glossary.push(term);
                }
            }
            summary.glossary.len() > before
        }
        RepairTarget::ConceptExample { section, concept } => {
            let Some(existing) = summary
                .sections
                .get_mut(*section)
                .and_then(|s| s.concepts.get_mut(*concept))
            else {
                return false;
            };
            let Some(patch) = fragment.sections.into_iter().flat_map(|s| s.concepts).next() else {
                return false;
            };
            if !patch.has_example() {
                return false;
            }
            existing.example = patch.example.trim().to_string();
            merge_citations(&mut existing.citations, patch.citations);
            true
        }
        RepairTarget::CitationDetail { slot } => {
            let Some(patch) = fragment.citations.into_iter().next().map(|c| c.normalized()) else {
                return false;
            };
            let Some(existing) = citation_at_mut(summary, *slot) else {
                return false;
            };
            let mut changed = false;
            if existing.page_range.is_empty() && !patch.page_range.is_empty() {
                existing.page_range = patch.page_range;
                changed = true;
            }
            if existing.section_or_heading.is_empty() && !patch.section_or_heading.is_empty() {
                existing.section_or_heading = patch.section_or_heading;
                changed = true;
            }
            changed
        }
        RepairTarget::Overview => {
            let overview = fragment.overview.trim();
            if overview.is_empty() || !summary.overview.trim().is_empty() {
                return false;
            }
            summary.overview = overview.to_string();
            true
        }
    }
}

fn citation_at_mut(summary: &mut MergedSummary, slot: CitationSlot) -> Option<&mut crate::models::Citation> {
    match slot {
        CitationSlot::Summary { index } => summary.citations.get_mut(index),
        CitationSlot::Concept {
            section,
            concept,
            index,
        } => summary
            .sections
            .get_mut(section)?
            .concepts
            .get_mut(concept)?
            .citations
            .get_mut(index),
    }
}

/// Add a section ahead of the overflow section, or fold its concepts into
/// a primary section with the same title.
fn add_primary_section(summary: &mut MergedSummary, section: Section) -> bool {
    let key = match_key(&section.title);
    if key.is_empty() || section.title == ADDITIONAL_TOPICS_TITLE {
        return false;
    }
    if let Some(existing) = summary
        .sections
        .iter_mut()
        .find(|s| !s.is_additional_topics() && match_key(&s.title) == key)
    {
        let mut changed = false;
        for concept in section.concepts {
            let ckey = match_key(&concept.name);
            match existing.concepts.iter().position(|c| match_key(&c.name) == ckey) {
                Some(pos) => {
                    let current = std::mem::take(&mut existing.concepts[pos]);
                    existing.concepts[pos] = resolve_duplicate(current, concept);
                }
                None => existing.concepts.push(concept),
            }
            changed = true;
        }
        return changed;
    }
    let at = summary
        .sections
        .iter()
        .position(|s| s.is_additional_topics())
        .unwrap_or(summary.sections.len());
    summary.sections.insert(
        at,
        Section {
            title: section.title.trim().to_string(),
            concepts: section.concepts,
        },
    );
    true
}

/// Self-repair loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RepairState {
    Validated { attempt: u32 },
    TargetedRegeneration { attempt: u32 },
    FinalReady,
    BestEffort,
}

impl RepairState {
    pub fn start() -> Self {
        RepairState::Validated { attempt: 0 }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RepairState::FinalReady | RepairState::BestEffort)
    }
}

impl fmt::Display for RepairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairState::Validated { attempt } => write!(f, "validated({})", attempt),
            RepairState::TargetedRegeneration { attempt } => {
                write!(f, "targeted-regeneration({})", attempt)
            }
            RepairState::FinalReady => write!(f, "final-ready"),
            RepairState::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// The single transition function of the repair loop.
///
/// `report` is the latest validation of the summary; it is only consulted
/// from `Validated`.
pub fn transition(state: RepairState, report: &QualityReport, budget: u32) -> RepairState {
    match state {
        RepairState::Validated { attempt } => {
            if report.is_final_ready() {
                RepairState::FinalReady
            } else if !report.defects.is_empty() && attempt < budget {
                RepairState::TargetedRegeneration {
                    attempt: attempt + 1,
                }
            } else {
                RepairState::BestEffort
            }
        }
        RepairState::TargetedRegeneration { attempt } => RepairState::Validated { attempt },
        terminal => terminal,
    }
}
