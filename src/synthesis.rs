//! Map stage: one generator call per chunk, fanned out under a bound.
//!
//! At most `max_concurrency` calls are in flight per run (a
//! [`Semaphore`] shared by the chunk tasks of a [`JoinSet`]). Every call
//! goes through [`generate_with_retry`], which applies the per-call
//! timeout, exponential backoff and cooperative cancellation.
//!
//! Backoff: `backoff_base · 2^(attempt-1)`, capped at 32× the base.
//! Malformed output is retried like a transient fault. Partial results are
//! never returned silently: if any chunk exhausts its retries, the run
//! fails with [`PipelineError::ChunkFailures`] naming every failed ordinal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use study_distill_core::models::{Chunk, Domain, PartialResult, SourceDocument, SummaryFragment};
use study_distill_core::parse::{parse_response, GenerationOutcome};

use crate::config::GenerationConfig;
use crate::error::{GenerationError, PipelineError};
use crate::generation::{ContentGenerator, GenerationRequest};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            call_timeout: config.call_timeout(),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff_base * (1u32 << attempt.saturating_sub(1).min(5))
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub retry: RetryPolicy,
    pub max_concurrency: usize,
    pub max_payload_chars: usize,
}

impl SynthesisOptions {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            retry: RetryPolicy::from_config(config),
            max_concurrency: config.max_concurrency.max(1),
            max_payload_chars: config.max_payload_chars,
        }
    }
}

/// Successful result of a generator call after parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum Generated {
    Fragment(SummaryFragment),
    /// The generator declared the excerpt too thin to summarize.
    InsufficientContext,
}

/// Call the generator until it yields a usable response, the retries run
/// out, a non-retryable error occurs, or `cancel` fires.
pub async fn generate_with_retry(
    generator: &dyn ContentGenerator,
    request: &GenerationRequest,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Generated, GenerationError> {
    let mut last_err = GenerationError::Malformed;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                _ = tokio::time::sleep(policy.delay(attempt)) => {}
            }
        }

        let call = tokio::time::timeout(policy.call_timeout, generator.generate(request));
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            result = call => result,
        };

        let err = match result {
            Err(_) => GenerationError::Timeout {
                secs: policy.call_timeout.as_secs(),
            },
            Ok(Ok(raw)) => match parse_response(&raw) {
                GenerationOutcome::Valid(fragment) => return Ok(Generated::Fragment(fragment)),
                GenerationOutcome::InsufficientContext => return Ok(Generated::InsufficientContext),
                GenerationOutcome::Malformed(reason) => {
                    debug!(kind = ?request.kind, %reason, "malformed generator response");
                    GenerationError::Malformed
                }
            },
            Ok(Err(err)) => err,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if attempt < policy.max_retries {
            warn!(kind = ?request.kind, attempt = attempt + 1, error = %err, "generator call failed; retrying");
        }
        last_err = err;
    }

    Err(last_err)
}

/// Synthesize every chunk concurrently and return partial results in
/// ordinal order.
pub async fn synthesize(
    generator: Arc<dyn ContentGenerator>,
    doc: &SourceDocument,
    chunks: &[Chunk],
    domains: &[Domain],
    options: &SynthesisOptions,
    cancel: &CancellationToken,
) -> Result<Vec<PartialResult>, PipelineError> {
    let total = chunks.len();
    let semaphore = Arc::new(Semaphore::new(options.max_concurrency));
    let mut tasks = JoinSet::new();

    for (chunk, domain) in chunks.iter().zip(domains) {
        let request =
            GenerationRequest::for_chunk(doc, chunk, total, *domain, options.max_payload_chars);
        let generator = Arc::clone(&generator);
        let semaphore = Arc::clone(&semaphore);
        let policy = options.retry.clone();
        let cancel = cancel.clone();
        let ordinal = chunk.ordinal;
        let domain = *domain;

        tasks.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    generate_with_retry(generator.as_ref(), &request, &policy, &cancel).await
                }
                Err(_) => Err(GenerationError::Cancelled),
            };
            (ordinal, domain, result)
        });
    }

    let mut partials = Vec::with_capacity(total);
    let mut failures: Vec<(usize, GenerationError)> = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        let (ordinal, domain, result) = joined
            .map_err(|e| PipelineError::Internal(anyhow::anyhow!("chunk task failed: {}", e)))?;
        match result {
            Ok(Generated::Fragment(fragment)) => {
                debug!(ordinal, "chunk synthesized");
                partials.push(PartialResult {
                    ordinal,
                    domain,
                    fragment,
                    insufficient_context: false,
                });
            }
            Ok(Generated::InsufficientContext) => {
                info!(ordinal, "chunk reported insufficient context");
                partials.push(PartialResult {
                    ordinal,
                    domain,
                    fragment: SummaryFragment::default(),
                    insufficient_context: true,
                });
            }
            Err(err) => {
                warn!(ordinal, error = %err, "chunk synthesis failed");
                failures.push((ordinal, err));
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    if !failures.is_empty() {
        failures.sort_by_key(|(ordinal, _)| *ordinal);
        let (ordinals, causes) = failures.into_iter().unzip();
        return Err(PipelineError::ChunkFailures { ordinals, causes });
    }

    partials.sort_by_key(|p| p.ordinal);
    Ok(partials)
}
