//! Deterministic request fingerprints used as result-cache keys.
//!
//! The fingerprint is a SHA-256 over a versioned, field-separated encoding
//! of the normalized request: a digest of the normalized text, the target
//! language, the instruction, and the generation options that change the
//! output. Each field is length-prefixed so no two distinct requests share
//! an encoding.

use sha2::{Digest, Sha256};

use crate::models::SourceDocument;

const FINGERPRINT_VERSION: &str = "v2";

/// Generation options that participate in the fingerprint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FingerprintOptions {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub target_tokens: usize,
    pub overlap_tokens: usize,
}

/// SHA-256 (lowercase hex) of the normalized text.
pub fn content_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fingerprint a normalized request.
pub fn fingerprint(doc: &SourceDocument, options: &FingerprintOptions) -> String {
    let mut hasher = Sha256::new();
    let mut field = |name: &str, value: &str| {
        hasher.update(name.as_bytes());
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    };
    field("version", FINGERPRINT_VERSION);
    field("content", &content_digest(&doc.text));
    field("language", &doc.language.to_lowercase());
    field("instruction", doc.instruction.as_deref().unwrap_or(""));
    field("model", &options.model);
    field("temperature", &format!("{:.3}", options.temperature));
    field("max_output_tokens", &options.max_output_tokens.to_string());
    field("target_tokens", &options.target_tokens.to_string());
    field("overlap_tokens", &options.overlap_tokens.to_string());
    format!("{:x}", hasher.finalize())
}

/// Short prefix for logs.
pub fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}
