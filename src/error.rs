//! Typed errors that callers are expected to match on.
//!
//! Plumbing (config, database, CLI) uses `anyhow`; these enums cover the
//! failure modes of content generation and of a pipeline run, where the
//! caller needs to tell a retryable hiccup from a hard failure or learn
//! which chunks could not be synthesized.

use std::fmt;

/// Failure of a single content-generator call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("content generator rate limited the request")]
    RateLimited,

    #[error("content generator call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("transient content generator failure: {0}")]
    Transient(String),

    #[error("content generator returned malformed output")]
    Malformed,

    #[error("content generator failed: {0}")]
    Fatal(String),

    #[error("content generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Rate limits, timeouts, transient faults and malformed output are
    /// retried with backoff; everything else fails the call immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited
                | GenerationError::Timeout { .. }
                | GenerationError::Transient(_)
                | GenerationError::Malformed
        )
    }
}

/// Failure of a whole pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// One or more chunks exhausted their retries. `causes[i]` belongs to
    /// `ordinals[i]`; both are sorted by ordinal.
    #[error("synthesis failed for chunk(s) {}", Ordinals(.ordinals))]
    ChunkFailures {
        ordinals: Vec<usize>,
        causes: Vec<GenerationError>,
    },

    #[error("input text is empty after normalization")]
    EmptyInput,

    #[error("pipeline run timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("pipeline run cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

struct Ordinals<'a>(&'a [usize]);

impl fmt::Display for Ordinals<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, ordinal) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", ordinal)?;
        }
        Ok(())
    }
}
