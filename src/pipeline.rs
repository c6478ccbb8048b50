//! The pipeline service.
//!
//! A [`Distiller`] owns the configuration, the content generator and the
//! result cache for its lifetime. It is constructed explicitly with
//! [`Distiller::init`] (or [`Distiller::open`] for the configured
//! backends) and released with [`Distiller::shutdown`].
//!
//! # Run
//!
//! ```text
//! text ─► normalize ─► chunk ─► classify ─► fingerprint
//!                                               │
//!                      ┌──── hit / attached ◄───┤ result cache (single-flight)
//!                      │                        │ lead
//!                      │                        ▼
//!                      │        synthesize (bounded fan-out, one call per chunk)
//!                      │                        ▼
//!                      │        merge (density policy by input volume)
//!                      │                        ▼
//!                      │        validate ⇄ targeted repair (bounded)
//!                      │                        ▼
//!                      │                 write cache entry
//!                      ▼                        ▼
//!                  DistillOutput { summary, quality, status, cache, … }
//! ```
//!
//! The whole run is bounded by `pipeline.timeout_secs` and can be
//! cancelled by the caller; both cancel a [`CancellationToken`] that the
//! generator calls observe.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use study_distill_core::chunk::chunk_document;
use study_distill_core::classify::{classify_chunks, DomainProfile};
use study_distill_core::fingerprint::{self, short, FingerprintOptions};
use study_distill_core::merge::{merge, select_policy};
use study_distill_core::models::{
    Chunk, DensityPolicy, Domain, MergedSummary, PartialResult, SourceDocument, SummaryFragment,
};
use study_distill_core::quality::{validate, QualityReport};
use study_distill_core::repair::RepairState;
use study_distill_core::store::CacheStore;

use crate::cache::{CacheLookup, ResultCache};
use crate::config::Config;
use crate::error::{GenerationError, PipelineError};
use crate::generation::{create_generator, ContentGenerator, GenerationRequest};
use crate::self_repair::{self, RepairContext, RepairOutcome};
use crate::sqlite_store::SqliteCacheStore;
use crate::synthesis::{generate_with_retry, synthesize, Generated, SynthesisOptions};

/// Input of one run.
#[derive(Debug, Clone)]
pub struct DistillRequest {
    pub text: String,
    /// Target language of the summary. Defaults to `"en"`.
    pub language: String,
    pub instruction: Option<String>,
    /// Skip the result cache entirely (no lookup, no write).
    pub bypass_cache: bool,
}

impl DistillRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: "en".to_string(),
            instruction: None,
            bypass_cache: false,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn bypassing_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    FinalReady,
    /// Repair budget exhausted with defects remaining; the summary is
    /// returned with its quality report rather than as an error.
    BestEffort,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::FinalReady => write!(f, "final-ready"),
            RunStatus::BestEffort => write!(f, "best-effort"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CacheStatus {
    Hit { access_count: i64 },
    /// Shared the result of a concurrent identical run.
    Attached,
    Miss,
    Bypassed,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStatus::Hit { access_count } => write!(f, "hit ({} accesses)", access_count),
            CacheStatus::Attached => write!(f, "attached to concurrent run"),
            CacheStatus::Miss => write!(f, "miss"),
            CacheStatus::Bypassed => write!(f, "bypassed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DistillOutput {
    pub run_id: String,
    pub fingerprint: String,
    pub status: RunStatus,
    pub cache: CacheStatus,
    pub chunk_count: usize,
    pub domain: Domain,
    pub policy: DensityPolicy,
    pub repair_attempts: u32,
    pub quality: QualityReport,
    pub summary: MergedSummary,
}

/// Everything decided before any generator call.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub fingerprint: String,
    pub estimated_tokens: usize,
    pub chunk_count: usize,
    pub profile: DomainProfile,
    pub chunk_domains: Vec<Domain>,
    pub policy: DensityPolicy,
    #[serde(skip)]
    pub doc: SourceDocument,
    #[serde(skip)]
    pub chunks: Vec<Chunk>,
}

impl Plan {
    pub fn is_single_pass(&self) -> bool {
        self.chunks.len() == 1
    }
}

struct Resolved {
    summary: MergedSummary,
    report: QualityReport,
    cache: CacheStatus,
    attempts: u32,
    status: RunStatus,
}

impl Resolved {
    fn computed(outcome: RepairOutcome, cache: CacheStatus) -> Self {
        let status = match outcome.state {
            RepairState::FinalReady => RunStatus::FinalReady,
            _ => RunStatus::BestEffort,
        };
        Self {
            summary: outcome.summary,
            report: outcome.report,
            cache,
            attempts: outcome.attempts,
            status,
        }
    }
}

pub struct Distiller {
    config: Config,
    generator: Arc<dyn ContentGenerator>,
    cache: ResultCache,
}

impl Distiller {
    /// Build a service from explicit parts. `store` is ignored when
    /// `cache.enabled = false`.
    pub fn init(
        config: Config,
        generator: Arc<dyn ContentGenerator>,
        store: Option<Arc<dyn CacheStore>>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = ResultCache::new(store, &config.cache);
        Ok(Self {
            config,
            generator,
            cache,
        })
    }

    /// Build a service from configuration: the configured generator and,
    /// when enabled, the SQLite cache store. An unavailable store degrades
    /// to running without persistence.
    pub async fn open(config: Config) -> Result<Self> {
        let generator = create_generator(&config.generation)?;
        let store: Option<Arc<dyn CacheStore>> = if config.cache.enabled {
            match SqliteCacheStore::open(&config.db).await {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    warn!(error = %e, "cache store unavailable; continuing without persistence");
                    None
                }
            }
        } else {
            None
        };
        Self::init(config, generator, store)
    }

    pub async fn shutdown(self) {
        self.cache.close().await;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Normalize, chunk, classify and fingerprint a request.
    pub fn plan(&self, request: &DistillRequest) -> Plan {
        let language = match request.language.trim() {
            "" => "en",
            language => language,
        };
        let doc = SourceDocument::new(&request.text, language, request.instruction.clone());
        let chunks = chunk_document(&doc.text, &self.config.chunking);
        let (profile, chunk_domains) =
            classify_chunks(&chunks, &self.config.quality.numeric_targets);
        let policy = select_policy(doc.estimated_tokens, &self.config.merge);
        let fingerprint = fingerprint::fingerprint(
            &doc,
            &FingerprintOptions {
                model: self.generator.model_name().to_string(),
                temperature: self.config.generation.temperature,
                max_output_tokens: self.config.generation.max_output_tokens,
                target_tokens: self.config.chunking.target_tokens,
                overlap_tokens: self.config.chunking.overlap_tokens,
            },
        );

        Plan {
            fingerprint,
            estimated_tokens: doc.estimated_tokens,
            chunk_count: chunks.len(),
            profile,
            chunk_domains,
            policy,
            doc,
            chunks,
        }
    }

    pub async fn distill(&self, request: DistillRequest) -> Result<DistillOutput, PipelineError> {
        self.distill_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Run the pipeline. Cancelling `cancel` aborts the run with
    /// [`PipelineError::Cancelled`].
    pub async fn distill_with_cancel(
        &self,
        request: DistillRequest,
        cancel: CancellationToken,
    ) -> Result<DistillOutput, PipelineError> {
        let plan = self.plan(&request);
        if plan.doc.text.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("distill", run_id = %run_id, fingerprint = short(&plan.fingerprint));

        async {
            info!(
                tokens = plan.estimated_tokens,
                chunks = plan.chunk_count,
                domain = %plan.profile.domain,
                policy = %plan.policy,
                "run started"
            );

            let run_token = cancel.child_token();
            let secs = self.config.pipeline.timeout_secs;
            let run = tokio::time::timeout(
                self.config.pipeline.timeout(),
                self.resolve(&plan, request.bypass_cache, &run_token),
            );
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PipelineError::Cancelled),
                result = run => match result {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::Timeout { secs }),
                },
            };
            run_token.cancel();

            let resolved = match result {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!(error = %e, "run failed");
                    return Err(e);
                }
            };
            info!(
                status = %resolved.status,
                cache = %resolved.cache,
                composite = resolved.report.score.composite,
                "run finished"
            );

            Ok(DistillOutput {
                run_id: run_id.clone(),
                fingerprint: plan.fingerprint.clone(),
                status: resolved.status,
                cache: resolved.cache,
                chunk_count: plan.chunk_count,
                domain: plan.profile.domain,
                policy: resolved.summary.policy,
                repair_attempts: resolved.attempts,
                quality: resolved.report,
                summary: resolved.summary,
            })
        }
        .instrument(span)
        .await
    }

    async fn resolve(
        &self,
        plan: &Plan,
        bypass: bool,
        token: &CancellationToken,
    ) -> Result<Resolved, PipelineError> {
        if bypass {
            let outcome = self.compute(plan, token).await?;
            return Ok(Resolved::computed(outcome, CacheStatus::Bypassed));
        }

        let mut discarded = false;
        loop {
            match self.cache.lookup(&plan.fingerprint).await {
                CacheLookup::Hit(entry) => match serde_json::from_str::<MergedSummary>(&entry.result) {
                    Ok(summary) => {
                        return Ok(self.reuse(
                            summary,
                            &plan.profile,
                            CacheStatus::Hit {
                                access_count: entry.access_count,
                            },
                        ))
                    }
                    Err(e) if !discarded => {
                        warn!(error = %e, "discarding unreadable cache entry");
                        self.cache.invalidate(&plan.fingerprint).await;
                        discarded = true;
                    }
                    Err(e) => {
                        warn!(error = %e, "cache entry still unreadable; computing without cache");
                        let outcome = self.compute(plan, token).await?;
                        return Ok(Resolved::computed(outcome, CacheStatus::Bypassed));
                    }
                },
                CacheLookup::Attached(result) => {
                    let summary = serde_json::from_str::<MergedSummary>(&result)
                        .map_err(|e| PipelineError::Internal(e.into()))?;
                    return Ok(self.reuse(summary, &plan.profile, CacheStatus::Attached));
                }
                CacheLookup::Lead(guard) => {
                    let outcome = self.compute(plan, token).await?;
                    let result = serde_json::to_string(&outcome.summary)
                        .map_err(|e| PipelineError::Internal(e.into()))?;
                    self.cache.complete(guard, result).await;
                    return Ok(Resolved::computed(outcome, CacheStatus::Miss));
                }
            }
        }
    }

    /// Re-score a stored summary.
    fn reuse(&self, summary: MergedSummary, profile: &DomainProfile, cache: CacheStatus) -> Resolved {
        let report = validate(
            &summary,
            profile,
            &self.config.quality,
            self.config.merge.sentence_band(),
        );
        let status = if report.is_final_ready() {
            RunStatus::FinalReady
        } else {
            RunStatus::BestEffort
        };
        Resolved {
            summary,
            report,
            cache,
            attempts: 0,
            status,
        }
    }

    async fn compute(
        &self,
        plan: &Plan,
        token: &CancellationToken,
    ) -> Result<RepairOutcome, PipelineError> {
        let options = SynthesisOptions::from_config(&self.config.generation);

        let partials = if plan.is_single_pass() {
            vec![self.single_pass(plan, &options, token).await?]
        } else {
            synthesize(
                Arc::clone(&self.generator),
                &plan.doc,
                &plan.chunks,
                &plan.chunk_domains,
                &options,
                token,
            )
            .await?
        };

        let merged = merge(
            &partials,
            plan.estimated_tokens,
            plan.profile.domain,
            &self.config.merge,
        );
        info!(
            sections = merged.sections.len(),
            formulas = merged.formulas.len(),
            policy = %merged.policy,
            "merged partial results"
        );

        let ctx = RepairContext {
            generator: self.generator.as_ref(),
            doc: &plan.doc,
            chunks: &plan.chunks,
            profile: plan.profile,
            quality: &self.config.quality,
            band: self.config.merge.sentence_band(),
            budget: self.config.pipeline.repair_budget,
            max_targets: self.config.pipeline.max_repair_targets,
            retry: &options.retry,
            max_payload_chars: options.max_payload_chars,
            cancel: token,
        };
        let outcome = self_repair::run(merged, &ctx).await;

        if token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(outcome)
    }

    /// One call over the whole document, without the fan-out machinery.
    async fn single_pass(
        &self,
        plan: &Plan,
        options: &SynthesisOptions,
        token: &CancellationToken,
    ) -> Result<PartialResult, PipelineError> {
        let chunk = &plan.chunks[0];
        let request = GenerationRequest::for_chunk(
            &plan.doc,
            chunk,
            1,
            plan.profile.domain,
            options.max_payload_chars,
        );
        let (fragment, insufficient_context) =
            match generate_with_retry(self.generator.as_ref(), &request, &options.retry, token).await {
                Ok(Generated::Fragment(fragment)) => (fragment, false),
                Ok(Generated::InsufficientContext) => (SummaryFragment::default(), true),
                Err(GenerationError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    return Err(PipelineError::ChunkFailures {
                        ordinals: vec![chunk.ordinal],
                        causes: vec![e],
                    })
                }
            };
        Ok(PartialResult {
            ordinal: chunk.ordinal,
            domain: plan.profile.domain,
            fragment,
            insufficient_context,
        })
    }
}
