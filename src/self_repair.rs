//! Self-repair driver.
//!
//! Runs the bounded state machine from [`study_distill_core::repair`]:
//! validate, and while the summary is not final-ready, has defects and
//! budget remains, regenerate only the defective fields, then validate
//! again. Each target is sent with the current entity JSON and the chunk
//! that best matches it; answers are applied through typed patches.
//!
//! Repair calls share the synthesis retry policy. A failed repair call is
//! logged and consumes the attempt; it never fails the run.

use std::cmp::Reverse;
use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use study_distill_core::classify::DomainProfile;
use study_distill_core::models::{Chunk, MergedSummary, SourceDocument};
use study_distill_core::quality::{validate, CitationSlot, QualityReport};
use study_distill_core::repair::{apply_repair, build_repair_targets, transition, RepairState, RepairTarget};
use study_distill_core::settings::{QualitySettings, SentenceBand};
use study_distill_core::text::match_key;

use crate::error::GenerationError;
use crate::generation::{ContentGenerator, GenerationRequest};
use crate::synthesis::{generate_with_retry, Generated, RetryPolicy};

pub struct RepairContext<'a> {
    pub generator: &'a dyn ContentGenerator,
    pub doc: &'a SourceDocument,
    pub chunks: &'a [Chunk],
    pub profile: DomainProfile,
    pub quality: &'a QualitySettings,
    pub band: SentenceBand,
    pub budget: u32,
    pub max_targets: usize,
    pub retry: &'a RetryPolicy,
    pub max_payload_chars: usize,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub summary: MergedSummary,
    pub report: QualityReport,
    /// Always terminal.
    pub state: RepairState,
    /// Targeted regeneration rounds performed.
    pub attempts: u32,
}

/// Drive `summary` to a terminal repair state.
pub async fn run(summary: MergedSummary, ctx: &RepairContext<'_>) -> RepairOutcome {
    let mut summary = summary;
    let mut report = validate(&summary, &ctx.profile, ctx.quality, ctx.band);
    let mut state = RepairState::start();
    let mut attempts = 0;

    loop {
        let next = transition(state, &report, ctx.budget);
        debug!(from = %state, to = %next, composite = report.score.composite, "repair transition");
        state = next;

        match state {
            RepairState::FinalReady | RepairState::BestEffort => break,
            RepairState::TargetedRegeneration { attempt } => {
                if ctx.cancel.is_cancelled() {
                    state = RepairState::BestEffort;
                    break;
                }
                attempts = attempt;
                regenerate(&mut summary, &report, ctx).await;
            }
            RepairState::Validated { .. } => {
                report = validate(&summary, &ctx.profile, ctx.quality, ctx.band);
            }
        }
    }

    info!(
        state = %state,
        attempts,
        composite = report.score.composite,
        defects = report.defects.len(),
        "self-repair finished"
    );
    RepairOutcome {
        summary,
        report,
        state,
        attempts,
    }
}

async fn regenerate(summary: &mut MergedSummary, report: &QualityReport, ctx: &RepairContext<'_>) {
    let mut targets = build_repair_targets(report, ctx.max_targets);
    // Inserting sections can shift later indices, so index-addressed
    // targets go first.
    targets.sort_by_key(|t| {
        matches!(
            t,
            RepairTarget::Sections { .. } | RepairTarget::MissingThemes { .. }
        )
    });

    for target in targets {
        let context = best_context(&target, summary, ctx.chunks);
        let request =
            GenerationRequest::for_repair(ctx.doc, summary, &target, context, ctx.max_payload_chars);
        match generate_with_retry(ctx.generator, &request, ctx.retry, ctx.cancel).await {
            Ok(Generated::Fragment(fragment)) => {
                let changed = apply_repair(summary, &target, fragment);
                debug!(%target, changed, "repair applied");
            }
            Ok(Generated::InsufficientContext) => {
                debug!(%target, "generator had no material for repair");
            }
            Err(GenerationError::Cancelled) => return,
            Err(e) => warn!(%target, error = %e, "repair call failed"),
        }
    }
}

/// Words that locate a target in the source.
fn target_query(target: &RepairTarget, summary: &MergedSummary) -> String {
    let specific = match target {
        RepairTarget::FormulaDetails { index } => summary
            .formulas
            .get(*index)
            .map(|f| format!("{} {}", f.name, f.expression)),
        RepairTarget::ConceptExample { section, concept } => summary
            .sections
            .get(*section)
            .and_then(|s| s.concepts.get(*concept))
            .map(|c| format!("{} {}", c.name, c.explanation)),
        RepairTarget::CitationDetail { slot } => {
            let citation = match *slot {
                CitationSlot::Summary { index } => summary.citations.get(index),
                CitationSlot::Concept {
                    section,
                    concept,
                    index,
                } => summary
                    .sections
                    .get(section)
                    .and_then(|s| s.concepts.get(concept))
                    .and_then(|c| c.citations.get(index)),
            };
            citation.map(|c| format!("{} {}", c.section_or_heading, c.evidence))
        }
        RepairTarget::MissingThemes { themes } => Some(themes.join(" ")),
        RepairTarget::LearningObjectives { .. }
        | RepairTarget::Sections { .. }
        | RepairTarget::Glossary { .. }
        | RepairTarget::Overview => None,
    };
    specific.unwrap_or_else(|| format!("{} {}", summary.title, summary.overview))
}

/// The chunk sharing the most distinctive words with the target; the
/// earliest chunk wins ties.
fn best_context<'c>(target: &RepairTarget, summary: &MergedSummary, chunks: &'c [Chunk]) -> &'c str {
    let query = match_key(&target_query(target, summary));
    let words: HashSet<&str> = query.split(' ').filter(|w| w.chars().count() > 3).collect();

    chunks
        .iter()
        .enumerate()
        .max_by_key(|(i, chunk)| {
            let key = match_key(&chunk.text);
            let hits = key
                .split(' ')
                .collect::<HashSet<&str>>()
                .intersection(&words)
                .count();
            (hits, Reverse(*i))
        })
        .map(|(_, chunk)| chunk.text.as_str())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::RequestKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use study_distill_core::models::{DensityPolicy, Domain, Formula};

    fn chunk(ordinal: usize, text: &str) -> Chunk {
        Chunk {
            ordinal,
            start: 0,
            end: text.len(),
            overlap_start: 0,
            text: text.to_string(),
            token_count: text.len() / 4,
            hash: String::new(),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            backoff_base: Duration::from_millis(1),
            call_timeout: Duration::from_secs(1),
        }
    }

    fn thin_summary() -> MergedSummary {
        let mut summary = MergedSummary::empty(Domain::Qualitative, DensityPolicy::SoftMerge);
        summary.title = "The Reformation".into();
        summary.overview = "Religious reform reshaped sixteenth century Europe.".into();
        summary
    }

    /// Answers objectives and glossary asks; nothing else.
    struct Tutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ContentGenerator for Tutor {
        fn model_name(&self) -> &str {
            "tutor"
        }
        async fn generate(&self, r: &GenerationRequest) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = match &r.kind {
                RequestKind::Repair {
                    target: RepairTarget::LearningObjectives { .. },
                } => r#"{"learning_objectives": ["Explain the causes of the Reformation", "Compare Luther and Calvin"]}"#.to_string(),
                RequestKind::Repair {
                    target: RepairTarget::Glossary { .. },
                } => {
                    let terms: Vec<String> = (0..8)
                        .map(|i| format!(r#"{{"term": "term {}", "definition": "definition {}"}}"#, i, i))
                        .collect();
                    format!(r#"{{"glossary": [{}]}}"#, terms.join(","))
                }
                _ => r#"{"status": "insufficient_context"}"#.to_string(),
            };
            Ok(reply)
        }
    }

    #[tokio::test]
    async fn test_repair_fills_targeted_fields_within_budget() {
        let doc = SourceDocument::new("source", "en", None);
        let chunks = vec![chunk(0, "Luther posted theses in 1517.")];
        let generator = Tutor {
            calls: AtomicUsize::new(0),
        };
        let quality = QualitySettings::default();
        let cancel = CancellationToken::new();
        let profile = DomainProfile::new(Domain::Qualitative, &quality.numeric_targets);
        let ctx = RepairContext {
            generator: &generator,
            doc: &doc,
            chunks: &chunks,
            profile,
            quality: &quality,
            band: SentenceBand::default(),
            budget: 2,
            max_targets: 8,
            retry: &policy(),
            max_payload_chars: 16_000,
            cancel: &cancel,
        };

        let before = validate(&thin_summary(), &profile, &quality, SentenceBand::default());
        let outcome = run(thin_summary(), &ctx).await;

        assert!(outcome.state.is_terminal());
        assert!(outcome.attempts >= 1 && outcome.attempts <= 2);
        assert_eq!(outcome.summary.learning_objectives.len(), 2);
        assert_eq!(outcome.summary.glossary.len(), 8);
        assert!(outcome.report.score.completeness > before.score.completeness);
        assert!(generator.calls.load(Ordering::SeqCst) <= 2 * 8);
    }

    struct Silent;

    #[async_trait]
    impl ContentGenerator for Silent {
        fn model_name(&self) -> &str {
            "silent"
        }
        async fn generate(&self, _r: &GenerationRequest) -> Result<String, GenerationError> {
            Err(GenerationError::Fatal("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_exhausted_budget_ends_best_effort() {
        let doc = SourceDocument::new("source", "en", None);
        let quality = QualitySettings::default();
        let cancel = CancellationToken::new();
        let retry = policy();
        for budget in [0, 1, 3] {
            let ctx = RepairContext {
                generator: &Silent,
                doc: &doc,
                chunks: &[],
                profile: DomainProfile::new(Domain::Qualitative, &quality.numeric_targets),
                quality: &quality,
                band: SentenceBand::default(),
                budget,
                max_targets: 4,
                retry: &retry,
                max_payload_chars: 16_000,
                cancel: &cancel,
            };
            let outcome = run(thin_summary(), &ctx).await;
            assert_eq!(outcome.state, RepairState::BestEffort);
            assert_eq!(outcome.attempts, budget);
        }
    }

    #[test]
    fn test_best_context_prefers_matching_chunk() {
        let mut summary = thin_summary();
        summary.formulas.push(Formula {
            name: "Compound interest".into(),
            expression: "A = P(1 + r)^t".into(),
            ..Formula::default()
        });
        let chunks = vec![
            chunk(0, "The printing press spread pamphlets quickly."),
            chunk(1, "Compound interest grows principal each period."),
            chunk(2, "Interest rates moved."),
        ];
        let target = RepairTarget::FormulaDetails { index: 0 };
        assert_eq!(
            best_context(&target, &summary, &chunks),
            "Compound interest grows principal each period."
        );
        assert_eq!(best_context(&target, &summary, &[]), "");
        // No overlap at all: first chunk.
        let overview = RepairTarget::Overview;
        let unrelated = vec![chunk(0, "alpha"), chunk(1, "beta")];
        assert_eq!(best_context(&overview, &summary, &unrelated), "alpha");
    }
}
