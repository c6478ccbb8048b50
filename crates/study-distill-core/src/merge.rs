//! Reduce stage: combine per-chunk partial results into one summary.
//!
//! Partials are folded in ordinal order under one of three density
//! policies, chosen by the total estimated input volume:
//!
//! | Volume                       | Policy                        |
//! |------------------------------|-------------------------------|
//! | `<= soft_threshold`          | [`DensityPolicy::SoftMerge`]   |
//! | `<= aggressive_threshold`    | [`DensityPolicy::DensityBoost`] |
//! | above                        | [`DensityPolicy::AggressiveDensityBoost`] |
//!
//! Every policy deduplicates sections, concepts, formulas, glossary terms
//! and citations. The density policies additionally fold concepts from
//! different chunks whose names share the same content words, demote
//! overflow sections into "Additional Topics (Condensed)" and tighten very
//! short sentences. The aggressive policy also folds nested names across
//! adjacent chunks (one name's content words contained in the other's) and
//! caps the overflow section.
//!
//! Concepts from the same chunk are never folded. A folded concept whose
//! name carries different content words keeps its name and explanation in
//! the overflow section, and any detected theme that loses its primary
//! home is named there too, so coverage never decreases.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::models::{
    Citation, Concept, DensityPolicy, Domain, Formula, GlossaryTerm, MergedSummary,
    PartialResult, Section, SummaryFragment, ADDITIONAL_TOPICS_TITLE,
};
use crate::settings::{MergeSettings, SentenceBand};
use crate::text::{content_jaccard, content_tokens, match_key, split_sentences, word_count};

/// Similarity relaxation applied to concepts that meet at a chunk boundary.
const BOUNDARY_RELAXATION: f64 = 0.15;

/// Name of the entry that absorbs overflow beyond the Additional Topics cap.
pub const ALSO_COVERED: &str = "Also covered";

pub fn select_policy(total_tokens: usize, settings: &MergeSettings) -> DensityPolicy {
    if total_tokens <= settings.soft_threshold_tokens {
        DensityPolicy::SoftMerge
    } else if total_tokens <= settings.aggressive_threshold_tokens {
        DensityPolicy::DensityBoost
    } else {
        DensityPolicy::AggressiveDensityBoost
    }
}

/// Which concepts from different chunks are folded together.
#[derive(Debug, Clone, Copy)]
struct FoldRule {
    /// Names with identical content words, from any two chunks.
    same_content: bool,
    /// Nested names from adjacent chunks at or above this similarity.
    boundary: Option<f64>,
}

impl FoldRule {
    fn for_policy(policy: DensityPolicy, settings: &MergeSettings) -> Self {
        match policy {
            DensityPolicy::SoftMerge => Self {
                same_content: false,
                boundary: None,
            },
            DensityPolicy::DensityBoost => Self {
                same_content: true,
                boundary: None,
            },
            DensityPolicy::AggressiveDensityBoost => Self {
                same_content: true,
                boundary: Some(
                    (settings.near_duplicate_similarity - BOUNDARY_RELAXATION).max(0.0),
                ),
            },
        }
    }

    fn is_active(&self) -> bool {
        self.same_content || self.boundary.is_some()
    }
}

/// Merge partial results into one [`MergedSummary`].
///
/// `partials` may arrive in any order; they are folded by ordinal.
pub fn merge(
    partials: &[PartialResult],
    total_tokens: usize,
    domain: Domain,
    settings: &MergeSettings,
) -> MergedSummary {
    let policy = select_policy(total_tokens, settings);
    let mut ordered: Vec<&PartialResult> = partials.iter().collect();
    ordered.sort_by_key(|p| p.ordinal);

    let mut acc = Accumulator::new(
        MergedSummary::empty(domain, policy),
        FoldRule::for_policy(policy, settings),
    );
    let mut previous: Option<usize> = None;

    for partial in ordered {
        for theme in partial.themes() {
            acc.add_theme(theme);
        }
        acc.absorb(partial.fragment.clone(), partial.ordinal, previous);
        previous = Some(partial.ordinal);
    }

    let (mut summary, displaced) = acc.finish();
    if policy != DensityPolicy::SoftMerge {
        demote_overflow_sections(&mut summary, settings.max_primary_sections);
    }
    for concept in displaced {
        push_additional_topic(&mut summary, concept);
    }
    rescue_unmapped_themes(&mut summary);
    if policy == DensityPolicy::AggressiveDensityBoost {
        compress_additional_topics(&mut summary, settings.additional_topics_cap);
    }
    if policy != DensityPolicy::SoftMerge {
        tighten_summary(&mut summary, settings.sentence_band());
    }
    summary
}

/// Order-preserving, key-deduplicating fold over fragments.
struct Accumulator {
    summary: MergedSummary,
    rule: FoldRule,
    /// Ordinal of the chunk that introduced each concept, parallel to
    /// `summary.sections[i].concepts`.
    origins: Vec<Vec<usize>>,
    /// Folded concepts whose names carry their own content words.
    displaced: Vec<Concept>,
    overviews: Vec<String>,
    seen_overviews: HashSet<String>,
    seen_objectives: HashSet<String>,
    seen_themes: HashSet<String>,
    section_index: HashMap<String, usize>,
    formula_index: HashMap<String, usize>,
    glossary_index: HashMap<String, usize>,
}

/// Where an incoming concept folds, and whether its name is distinct.
struct FoldTarget {
    section: usize,
    concept: usize,
    distinct: bool,
}

impl Accumulator {
    fn new(summary: MergedSummary, rule: FoldRule) -> Self {
        Self {
            summary,
            rule,
            origins: Vec::new(),
            displaced: Vec::new(),
            overviews: Vec::new(),
            seen_overviews: HashSet::new(),
            seen_objectives: HashSet::new(),
            seen_themes: HashSet::new(),
            section_index: HashMap::new(),
            formula_index: HashMap::new(),
            glossary_index: HashMap::new(),
        }
    }

    fn add_theme(&mut self, theme: String) {
        let key = match_key(&theme);
        if !key.is_empty() && self.seen_themes.insert(key) {
            self.summary.source_themes.push(theme);
        }
    }

    fn absorb(&mut self, fragment: SummaryFragment, ordinal: usize, previous: Option<usize>) {
        let title = fragment.title.trim();
        if self.summary.title.is_empty() && !title.is_empty() {
            self.summary.title = title.to_string();
        }

        let overview = fragment.overview.trim();
        if !overview.is_empty() && self.seen_overviews.insert(match_key(overview)) {
            self.overviews.push(overview.to_string());
        }

        for objective in fragment.learning_objectives {
            let objective = objective.trim();
            if !objective.is_empty() && self.seen_objectives.insert(match_key(objective)) {
                self.summary.learning_objectives.push(objective.to_string());
            }
        }

        for section in fragment.sections {
            self.absorb_section(section, ordinal, previous);
        }
        for formula in fragment.formulas {
            self.absorb_formula(formula);
        }
        for term in fragment.glossary {
            self.absorb_term(term);
        }
        merge_citations(&mut self.summary.citations, fragment.citations);
    }

    /// Sections are created when a concept lands in them, so a section
    /// whose concepts all fold elsewhere does not appear empty.
    fn absorb_section(&mut self, section: Section, ordinal: usize, previous: Option<usize>) {
        let title = section.title.trim().to_string();
        if section.concepts.is_empty() {
            self.section_slot(&title);
            return;
        }
        for concept in section.concepts {
            let concept = normalize_concept(concept);
            match self.fold_target(&concept, ordinal, previous) {
                Some(target) => self.fold(target, concept),
                None => {
                    let si = self.section_slot(&title);
                    if add_concept(&mut self.summary.sections[si].concepts, concept) {
                        self.origins[si].push(ordinal);
                    }
                }
            }
        }
    }

    fn section_slot(&mut self, title: &str) -> usize {
        let key = match_key(title);
        if let Some(&idx) = self.section_index.get(&key) {
            return idx;
        }
        self.summary.sections.push(Section {
            title: title.to_string(),
            concepts: Vec::new(),
        });
        self.origins.push(Vec::new());
        let idx = self.summary.sections.len() - 1;
        self.section_index.insert(key, idx);
        idx
    }

    /// An earlier concept from another chunk that `concept` duplicates.
    /// Identical content words win over a boundary match.
    fn fold_target(
        &self,
        concept: &Concept,
        ordinal: usize,
        previous: Option<usize>,
    ) -> Option<FoldTarget> {
        if !self.rule.is_active() {
            return None;
        }
        let tokens = content_tokens(&concept.name);
        if tokens.is_empty() {
            return None;
        }

        let mut boundary = None;
        for (si, section) in self.summary.sections.iter().enumerate() {
            for (ci, existing) in section.concepts.iter().enumerate() {
                let origin = self.origins[si][ci];
                if origin == ordinal {
                    continue;
                }
                let other = content_tokens(&existing.name);
                if other.is_empty() {
                    continue;
                }
                if self.rule.same_content && other == tokens {
                    return Some(FoldTarget {
                        section: si,
                        concept: ci,
                        distinct: false,
                    });
                }
                let nested_at_boundary = self.rule.boundary.is_some_and(|threshold| {
                    is_nested(&tokens, &other) && content_jaccard(&tokens, &other) >= threshold
                });
                if boundary.is_none() && Some(origin) == previous && nested_at_boundary {
                    boundary = Some(FoldTarget {
                        section: si,
                        concept: ci,
                        distinct: true,
                    });
                }
            }
        }
        boundary
    }

    fn fold(&mut self, target: FoldTarget, incoming: Concept) {
        let slot = &mut self.summary.sections[target.section].concepts[target.concept];
        let existing = std::mem::take(slot);
        let names = [
            (existing.name.clone(), existing.explanation.clone()),
            (incoming.name.clone(), incoming.explanation.clone()),
        ];
        let merged = resolve_duplicate(existing, incoming);
        if target.distinct {
            for (name, explanation) in names {
                if match_key(&name) != match_key(&merged.name) {
                    self.displaced.push(Concept {
                        name,
                        explanation,
                        ..Default::default()
                    });
                }
            }
        }
        *slot = merged;
    }

    fn absorb_formula(&mut self, formula: Formula) {
        let formula = formula.separate_notation();
        let key = formula_key(&formula);
        if key.is_empty() {
            return;
        }
        match self.formula_index.get(&key) {
            Some(&idx) => {
                let existing = std::mem::take(&mut self.summary.formulas[idx]);
                self.summary.formulas[idx] = resolve_formula(existing, formula);
            }
            None => {
                self.summary.formulas.push(formula);
                self.formula_index.insert(key, self.summary.formulas.len() - 1);
            }
        }
    }

    fn absorb_term(&mut self, term: GlossaryTerm) {
        let term = GlossaryTerm {
            term: term.term.trim().to_string(),
            definition: term.definition.trim().to_string(),
        };
        let key = match_key(&term.term);
        if key.is_empty() {
            return;
        }
        match self.glossary_index.get(&key) {
            Some(&idx) => {
                let existing = &mut self.summary.glossary[idx];
                if term.definition.chars().count() > existing.definition.chars().count() {
                    existing.definition = term.definition;
                }
            }
            None => {
                self.summary.glossary.push(term);
                self.glossary_index.insert(key, self.summary.glossary.len() - 1);
            }
        }
    }

    fn finish(mut self) -> (MergedSummary, Vec<Concept>) {
        self.summary.overview = self.overviews.join(" ");
        (self.summary, self.displaced)
    }
}

fn normalize_concept(mut concept: Concept) -> Concept {
    concept.name = concept.name.trim().to_string();
    concept.explanation = concept.explanation.trim().to_string();
    concept.example = concept.example.trim().to_string();
    let citations = std::mem::take(&mut concept.citations);
    merge_citations(&mut concept.citations, citations);
    concept
}

/// Insert `concept`, resolving a same-name duplicate with the tie-break
/// rule. Returns whether it was appended.
fn add_concept(concepts: &mut Vec<Concept>, concept: Concept) -> bool {
    let key = match_key(&concept.name);
    let existing = concepts
        .iter()
        .position(|c| !key.is_empty() && match_key(&c.name) == key);
    match existing {
        Some(pos) => {
            let current = std::mem::take(&mut concepts[pos]);
            concepts[pos] = resolve_duplicate(current, concept);
            false
        }
        None => {
            concepts.push(concept);
            true
        }
    }
}

/// One name's content words contain the other's.
fn is_nested(a: &BTreeSet<String>, b: &BTreeSet<String>) -> bool {
    a.is_subset(b) || b.is_subset(a)
}

/// Tie-break for duplicate concepts.
///
/// The occurrence with at least one citation and the longer explanation
/// wins; equal ranks keep the earlier one. The loser's unique citations
/// (and its example, when the winner has none) are carried over.
pub fn resolve_duplicate(first: Concept, second: Concept) -> Concept {
    let rank = |c: &Concept| (!c.citations.is_empty(), c.explanation.trim().chars().count());
    let (mut winner, loser) = if rank(&second) > rank(&first) {
        (second, first)
    } else {
        (first, second)
    };
    if !winner.has_example() && loser.has_example() {
        winner.example = loser.example;
    }
    merge_citations(&mut winner.citations, loser.citations);
    winner
}

fn formula_key(formula: &Formula) -> String {
    let by_expression = match_key(&formula.expression);
    if by_expression.is_empty() {
        match_key(&formula.name)
    } else {
        by_expression
    }
}

fn resolve_formula(first: Formula, second: Formula) -> Formula {
    let rank = |f: &Formula| {
        (
            f.is_complete(),
            f.variables.len(),
            !f.worked_example.trim().is_empty(),
        )
    };
    let (mut winner, loser) = if rank(&second) > rank(&first) {
        (second, first)
    } else {
        (first, second)
    };
    if winner.name.trim().is_empty() {
        winner.name = loser.name;
    }
    if winner.variables.is_empty() {
        winner.variables = loser.variables;
    }
    if winner.steps.is_empty() {
        winner.steps = loser.steps;
    }
    if winner.worked_example.trim().is_empty() {
        winner.worked_example = loser.worked_example;
    }
    winner
}

/// Append citations not already present by (source, section, pages).
pub fn merge_citations(target: &mut Vec<Citation>, extra: Vec<Citation>) {
    for citation in extra {
        let citation = citation.normalized();
        if citation.source_id.is_empty() && !citation.has_detail() {
            continue;
        }
        let key = citation.key();
        if !target.iter().any(|c| c.key() == key) {
            target.push(citation);
        }
    }
}

/// Move the smallest primary sections beyond `max_primary` into the overflow section.
fn demote_overflow_sections(summary: &mut MergedSummary, max_primary: usize) {
    let primary: Vec<usize> = summary
        .sections
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_additional_topics())
        .map(|(i, _)| i)
        .collect();
    if primary.len() <= max_primary {
        return;
    }

    let mut by_size = primary;
    by_size.sort_by_key(|&i| (summary.sections[i].concepts.len(), Reverse(i)));
    let excess = by_size.len() - max_primary;
    let demote: HashSet<usize> = by_size.into_iter().take(excess).collect();

    let mut kept = Vec::new();
    let mut demoted = Vec::new();
    for (i, section) in summary.sections.drain(..).enumerate() {
        if demote.contains(&i) {
            demoted.push(section);
        } else {
            kept.push(section);
        }
    }
    summary.sections = kept;
    for section in demoted {
        push_additional_topic(summary, condense_section(section));
    }
}

fn condense_section(section: Section) -> Concept {
    let names: Vec<&str> = section
        .concepts
        .iter()
        .map(|c| c.name.as_str())
        .filter(|n| !n.is_empty())
        .collect();
    let explanation = if names.is_empty() {
        String::new()
    } else {
        format!("Covers {}.", names.join("; "))
    };
    let mut citations = Vec::new();
    for concept in &section.concepts {
        merge_citations(&mut citations, concept.citations.clone());
    }
    Concept {
        name: section.title,
        explanation,
        example: String::new(),
        citations,
    }
}

fn push_additional_topic(summary: &mut MergedSummary, concept: Concept) {
    let idx = match summary.sections.iter().position(|s| s.is_additional_topics()) {
        Some(idx) => idx,
        None => {
            summary.sections.push(Section {
                title: ADDITIONAL_TOPICS_TITLE.to_string(),
                concepts: Vec::new(),
            });
            summary.sections.len() - 1
        }
    };
    add_concept(&mut summary.sections[idx].concepts, concept);
}

/// Name every detected theme that no longer has a home.
fn rescue_unmapped_themes(summary: &mut MergedSummary) {
    for theme in summary.missing_themes() {
        push_additional_topic(
            summary,
            Concept {
                name: theme,
                ..Default::default()
            },
        );
    }
}

/// Cap the overflow section, folding the excess into one entry that still
/// names every folded topic.
fn compress_additional_topics(summary: &mut MergedSummary, cap: usize) {
    let cap = cap.max(1);
    let Some(section) = summary.sections.iter_mut().find(|s| s.is_additional_topics()) else {
        return;
    };
    if section.concepts.len() <= cap {
        return;
    }

    let folded = section.concepts.split_off(cap - 1);
    let items: Vec<String> = folded
        .iter()
        .filter(|c| !c.name.is_empty())
        .map(|c| {
            let detail = c.explanation.trim().trim_end_matches(['.', '!', '?']);
            if detail.is_empty() {
                c.name.clone()
            } else {
                format!("{} ({})", c.name, detail)
            }
        })
        .collect();
    let mut entry = Concept {
        name: ALSO_COVERED.to_string(),
        explanation: format!("{}: {}.", ALSO_COVERED, items.join("; ")),
        ..Default::default()
    };
    for concept in folded {
        merge_citations(&mut entry.citations, concept.citations);
    }
    section.concepts.push(entry);
}

fn tighten_summary(summary: &mut MergedSummary, band: SentenceBand) {
    summary.overview = tighten_sentences(&summary.overview, band);
    for section in summary.sections.iter_mut().filter(|s| !s.is_additional_topics()) {
        for concept in &mut section.concepts {
            concept.explanation = tighten_sentences(&concept.explanation, band);
        }
    }
}

/// Join sentences shorter than half the band minimum with a neighbour,
/// as long as the result stays within the band maximum.
pub fn tighten_sentences(text: &str, band: SentenceBand) -> String {
    let sentences = split_sentences(text);
    if sentences.len() < 2 {
        return text.to_string();
    }
    let short = band.min / 2;
    let join = |a: &str, b: &str| format!("{}; {}", a.trim_end_matches(['.', '!', '?']), b);

    let mut changed = false;
    let mut out: Vec<String> = Vec::new();
    let mut pending: Option<String> = None;
    for sentence in sentences {
        let current = match pending.take() {
            Some(prev) => {
                let joined = join(&prev, sentence);
                if word_count(&joined) <= band.max {
                    changed = true;
                    joined
                } else {
                    out.push(prev);
                    sentence.to_string()
                }
            }
            None => sentence.to_string(),
        };
        if word_count(&current) < short {
            pending = Some(current);
        } else {
            out.push(current);
        }
    }
    if let Some(prev) = pending {
        match out.pop() {
            Some(last) if word_count(&last) + word_count(&prev) <= band.max => {
                out.push(join(&last, &prev));
                changed = true;
            }
            Some(last) => {
                out.push(last);
                out.push(prev);
            }
            None => out.push(prev),
        }
    }

    if changed {
        out.join(" ")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Variable;

    fn concept(name: &str, explanation: &str, citations: &[&str]) -> Concept {
        Concept {
            name: name.into(),
            explanation: explanation.into(),
            example: String::new(),
            citations: citations
                .iter()
                .map(|p| Citation {
                    source_id: "doc".into(),
                    page_range: p.to_string(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn partial(ordinal: usize, sections: Vec<Section>, themes: &[&str]) -> PartialResult {
        PartialResult {
            ordinal,
            domain: Domain::Mixed,
            fragment: SummaryFragment {
                title: format!("Part {}", ordinal),
                themes: themes.iter().map(|t| t.to_string()).collect(),
                sections,
                ..Default::default()
            },
            insufficient_context: false,
        }
    }

    fn section(title: &str, concepts: Vec<Concept>) -> Section {
        Section {
            title: title.into(),
            concepts,
        }
    }

    #[test]
    fn test_policy_boundaries() {
        let s = MergeSettings::default();
        assert_eq!(select_policy(15_000, &s), DensityPolicy::SoftMerge);
        assert_eq!(select_policy(15_001, &s), DensityPolicy::DensityBoost);
        assert_eq!(select_policy(40_000, &s), DensityPolicy::DensityBoost);
        assert_eq!(select_policy(40_001, &s), DensityPolicy::AggressiveDensityBoost);
    }

    #[test]
    fn test_folds_in_ordinal_order() {
        let partials = vec![
            partial(1, vec![section("Demand", vec![])], &[]),
            partial(0, vec![section("Supply", vec![])], &[]),
        ];
        let merged = merge(&partials, 100, Domain::Mixed, &MergeSettings::default());
        assert_eq!(merged.title, "Part 0");
        let titles: Vec<&str> = merged.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Supply", "Demand"]);
    }

    #[test]
    fn test_duplicate_concept_tie_break_keeps_citations() {
        let short_cited = concept("Elasticity", "Short.", &["p. 3"]);
        let long_uncited = concept("Elasticity", "A much longer explanation of elasticity.", &[]);
        let long_cited = concept("elasticity", "A longer explanation with a citation.", &["p. 9"]);

        let winner = resolve_duplicate(short_cited.clone(), long_uncited);
        assert_eq!(winner.explanation, "Short.");

        let winner = resolve_duplicate(short_cited, long_cited);
        assert_eq!(winner.explanation, "A longer explanation with a citation.");
        let pages: Vec<&str> = winner.citations.iter().map(|c| c.page_range.as_str()).collect();
        assert_eq!(pages, vec!["p. 9", "p. 3"]);
    }

    #[test]
    fn test_duplicate_carries_example_and_citations_from_loser() {
        let winner = concept("Elasticity", "The longer explanation wins the tie-break.", &["p. 4"]);
        let mut loser = concept("Elasticity", "Short.", &["p. 8"]);
        loser.example = "A 10% price rise cut sales by 5%.".into();

        let merged = resolve_duplicate(winner, loser);
        assert_eq!(merged.explanation, "The longer explanation wins the tie-break.");
        assert_eq!(merged.example, "A 10% price rise cut sales by 5%.");
        let pages: Vec<&str> = merged.citations.iter().map(|c| c.page_range.as_str()).collect();
        assert_eq!(pages, vec!["p. 4", "p. 8"]);
    }

    #[test]
    fn test_same_titled_sections_merge() {
        let partials = vec![
            partial(0, vec![section("Markets", vec![concept("Supply", "S.", &[])])], &[]),
            partial(1, vec![section("markets", vec![concept("Demand", "D.", &[])])], &[]),
        ];
        let merged = merge(&partials, 100, Domain::Mixed, &MergeSettings::default());
        assert_eq!(merged.sections.len(), 1);
        assert_eq!(merged.sections[0].concepts.len(), 2);
    }

    #[test]
    fn test_formulas_dedupe_and_fill_gaps() {
        let mut a = partial(0, vec![], &[]);
        a.fragment.formulas.push(Formula {
            name: "Mean".into(),
            expression: "μ = Σx / n\nStep 1: add the values".into(),
            ..Default::default()
        });
        let mut b = partial(1, vec![], &[]);
        b.fragment.formulas.push(Formula {
            expression: "μ = Σx / n".into(),
            variables: vec![Variable {
                symbol: "n".into(),
                meaning: "count".into(),
            }],
            worked_example: "(2 + 4) / 2 = 3".into(),
            ..Default::default()
        });
        let merged = merge(&[a, b], 100, Domain::Quantitative, &MergeSettings::default());
        assert_eq!(merged.formulas.len(), 1);
        let f = &merged.formulas[0];
        assert_eq!(f.name, "Mean");
        assert_eq!(f.expression, "μ = Σx / n");
        assert_eq!(f.steps, vec!["Step 1: add the values"]);
        assert!(f.is_complete());
    }

    fn primary_concepts(merged: &MergedSummary) -> Vec<&Concept> {
        merged.primary_sections().flat_map(|s| s.concepts.iter()).collect()
    }

    #[test]
    fn test_density_boost_folds_same_content_across_chunks() {
        let partials = vec![
            partial(
                0,
                vec![section("Demand", vec![concept("Price elasticity of demand", "Long form.", &["p. 1"])])],
                &[],
            ),
            partial(
                1,
                vec![section("Pricing", vec![concept("Price elasticity demand", "Short.", &["p. 7"])])],
                &[],
            ),
        ];
        let soft = merge(&partials, 1_000, Domain::Mixed, &MergeSettings::default());
        assert_eq!(primary_concepts(&soft).len(), 2);

        let boosted = merge(&partials, 20_000, Domain::Mixed, &MergeSettings::default());
        let primary = primary_concepts(&boosted);
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].name, "Price elasticity of demand");
        assert_eq!(primary[0].citations.len(), 2);
        // "Pricing" lost its only concept; its title is still covered.
        let extra = boosted.additional_topics().expect("overflow section");
        assert!(extra.concepts.iter().any(|c| c.name == "Pricing"));
        assert!(boosted.missing_themes().is_empty());
    }

    #[test]
    fn test_distinct_concepts_sharing_words_are_kept() {
        let same_chunk = vec![partial(
            0,
            vec![section(
                "Elasticity",
                vec![
                    concept("Price elasticity of demand", "Response to price.", &["p. 1"]),
                    concept("Income elasticity of demand", "Response to income.", &["p. 2"]),
                ],
            )],
            &[],
        )];
        let cross_chunk = vec![
            partial(
                0,
                vec![section("Elasticity", vec![concept("Price elasticity of demand", "Response to price.", &[])])],
                &[],
            ),
            partial(
                1,
                vec![section("Elasticity", vec![concept("Income elasticity of demand", "Response to income.", &[])])],
                &[],
            ),
        ];
        for partials in [&same_chunk, &cross_chunk] {
            for volume in [20_000, 50_000] {
                let merged = merge(partials, volume, Domain::Mixed, &MergeSettings::default());
                let names: Vec<&str> = primary_concepts(&merged).iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, vec!["Price elasticity of demand", "Income elasticity of demand"]);
            }
        }
    }

    #[test]
    fn test_same_chunk_duplicates_are_not_folded() {
        let partials = vec![partial(
            0,
            vec![
                section("Demand", vec![concept("Price elasticity of demand", "First.", &[])]),
                section("Pricing", vec![concept("Price elasticity demand", "Second.", &[])]),
            ],
            &[],
        )];
        let merged = merge(&partials, 50_000, Domain::Mixed, &MergeSettings::default());
        assert_eq!(primary_concepts(&merged).len(), 2);
    }

    #[test]
    fn test_additional_topics_only_when_a_theme_is_unmapped() {
        let mapped = vec![partial(0, vec![section("Supply", vec![concept("Curves", "C.", &[])])], &["supply"])];
        let merged = merge(&mapped, 20_000, Domain::Mixed, &MergeSettings::default());
        assert!(merged.additional_topics().is_none());

        let unmapped = vec![partial(
            0,
            vec![section("Supply", vec![concept("Curves", "C.", &[])])],
            &["supply", "trade policy"],
        )];
        let merged = merge(&unmapped, 20_000, Domain::Mixed, &MergeSettings::default());
        let extra = merged.additional_topics().expect("overflow section");
        assert_eq!(extra.concepts[0].name, "trade policy");
        assert!(merged.missing_themes().is_empty());
    }

    #[test]
    fn test_overflow_sections_demoted_smallest_first() {
        let settings = MergeSettings {
            max_primary_sections: 2,
            ..Default::default()
        };
        let partials = vec![partial(
            0,
            vec![
                section("Big", vec![concept("A", "a.", &[]), concept("B", "b.", &[])]),
                section("Small", vec![concept("Lone idea", "c.", &[])]),
                section("Medium", vec![concept("D", "d.", &[]), concept("E", "e.", &[])]),
            ],
            &[],
        )];
        let merged = merge(&partials, 20_000, Domain::Mixed, &settings);
        let primary: Vec<&str> = merged.primary_sections().map(|s| s.title.as_str()).collect();
        assert_eq!(primary, vec!["Big", "Medium"]);
        let extra = merged.additional_topics().unwrap();
        assert_eq!(extra.concepts[0].name, "Small");
        assert_eq!(extra.concepts[0].explanation, "Covers Lone idea.");
        assert!(merged.missing_themes().is_empty());
    }

    #[test]
    fn test_aggressive_caps_additional_topics_without_losing_coverage() {
        let settings = MergeSettings {
            additional_topics_cap: 3,
            ..Default::default()
        };
        let themes = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];
        let partials = vec![partial(0, vec![section("Core", vec![concept("Core idea", "x.", &[])])], &themes)];
        let merged = merge(&partials, 50_000, Domain::Mixed, &settings);
        let extra = merged.additional_topics().unwrap();
        assert_eq!(extra.concepts.len(), 3);
        assert_eq!(extra.concepts[2].name, ALSO_COVERED);
        assert!(extra.concepts[2].explanation.contains("epsilon"));
        assert!(merged.missing_themes().is_empty());
    }

    #[test]
    fn test_aggressive_folds_nested_names_at_chunk_boundary() {
        let partials = vec![
            partial(0, vec![section("Growth", vec![concept("Solow growth model", "Long explanation.", &["p. 2"])])], &[]),
            partial(1, vec![section("Growth", vec![concept("Solow model of long run growth", "Short.", &[])])], &[]),
        ];
        let boosted = merge(&partials, 20_000, Domain::Mixed, &MergeSettings::default());
        assert_eq!(primary_concepts(&boosted).len(), 2);

        let aggressive = merge(&partials, 50_000, Domain::Mixed, &MergeSettings::default());
        let primary = primary_concepts(&aggressive);
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].name, "Solow growth model");
        // The folded name keeps its own entry.
        let extra = aggressive.additional_topics().expect("overflow section");
        let kept = extra
            .concepts
            .iter()
            .find(|c| c.name == "Solow model of long run growth")
            .expect("folded name kept");
        assert_eq!(kept.explanation, "Short.");
    }

    #[test]
    fn test_aggressive_never_renames_unrelated_boundary_concepts() {
        let partials = vec![
            partial(0, vec![section("Markets", vec![concept("Law of demand", "Buyers.", &[])])], &[]),
            partial(1, vec![section("Markets", vec![concept("Law of supply", "Sellers.", &[])])], &[]),
        ];
        let merged = merge(&partials, 50_000, Domain::Mixed, &MergeSettings::default());
        let names: Vec<&str> = primary_concepts(&merged).iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Law of demand", "Law of supply"]);
        assert_eq!(merged.concepts().find(|c| c.name == "Law of supply").unwrap().explanation, "Sellers.");
    }

    #[test]
    fn test_nested_names_fold_only_between_adjacent_chunks() {
        let partials = vec![
            partial(0, vec![section("Growth", vec![concept("Solow growth model", "Long explanation.", &[])])], &[]),
            partial(1, vec![section("Trade", vec![concept("Comparative advantage", "Trade.", &[])])], &[]),
            partial(2, vec![section("Growth", vec![concept("Solow model of long run growth", "Short.", &[])])], &[]),
        ];
        let merged = merge(&partials, 50_000, Domain::Mixed, &MergeSettings::default());
        assert_eq!(primary_concepts(&merged).len(), 3);
    }

    #[test]
    fn test_tighten_joins_fragments() {
        let band = SentenceBand { min: 18, max: 28 };
        let text = "Prices rose. Demand fell sharply in the following quarter as households cut spending on durable goods and services.";
        let out = tighten_sentences(text, band);
        assert!(out.starts_with("Prices rose; Demand fell"));
        let untouched = "One complete sentence that is already long enough to sit comfortably inside the band.";
        assert_eq!(tighten_sentences(untouched, band), untouched);
    }
}
