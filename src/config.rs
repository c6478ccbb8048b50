//! Configuration parsing and validation.
//!
//! Study Distill is configured via a TOML file (default: `config/distill.toml`).
//! Only `[db]` is required; every other table and field falls back to the
//! reference values documented on each `default_*` function or on the
//! core settings types.
//!
//! ```toml
//! [db]
//! path = "./data/distill.sqlite"
//!
//! [chunking]
//! target_tokens = 2400
//! overlap_tokens = 120
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use study_distill_core::settings::{ChunkingSettings, MergeSettings, QualitySettings};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingSettings,
    #[serde(default)]
    pub merge: MergeSettings,
    #[serde(default)]
    pub quality: QualitySettings,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Entries older than this (by creation time) are treated as misses.
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    /// LRU cap enforced after every write.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: default_retention_days(),
            max_entries: default_max_entries(),
        }
    }
}

impl CacheConfig {
    pub fn retention_ms(&self) -> i64 {
        (self.retention_days as i64).saturating_mul(86_400_000)
    }
}

fn default_true() -> bool {
    true
}
fn default_retention_days() -> u64 {
    7
}
fn default_max_entries() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI-compatible base URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-call timeout.
    #[serde(default = "default_call_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on simultaneous in-flight generator calls per run.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Upper bound on the source text carried by one request.
    #[serde(default = "default_max_payload_chars")]
    pub max_payload_chars: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion length limit sent with every call.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            url: default_url(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_call_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            max_concurrency: default_max_concurrency(),
            max_payload_chars: default_max_payload_chars(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_call_timeout_secs() -> u64 {
    60
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_max_concurrency() -> usize {
    4
}
fn default_max_payload_chars() -> usize {
    16_000
}
fn default_temperature() -> f32 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    4096
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Wall-clock bound on one whole run.
    #[serde(default = "default_pipeline_timeout_secs")]
    pub timeout_secs: u64,
    /// Targeted regeneration attempts before settling for best-effort.
    #[serde(default = "default_repair_budget")]
    pub repair_budget: u32,
    #[serde(default = "default_max_repair_targets")]
    pub max_repair_targets: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_pipeline_timeout_secs(),
            repair_budget: default_repair_budget(),
            max_repair_targets: default_max_repair_targets(),
        }
    }
}

impl PipelineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_pipeline_timeout_secs() -> u64 {
    900
}
fn default_repair_budget() -> u32 {
    2
}
fn default_max_repair_targets() -> usize {
    8
}

impl Config {
    /// Defaults everywhere, persisting the cache at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingSettings::default(),
            merge: MergeSettings::default(),
            quality: QualitySettings::default(),
            cache: CacheConfig::default(),
            generation: GenerationConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }

    /// Range checks shared by [`load_config`] and programmatic construction.
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.target_tokens == 0 {
            anyhow::bail!("chunking.target_tokens must be > 0");
        }
        if chunking.max_tokens < chunking.target_tokens {
            anyhow::bail!("chunking.max_tokens must be >= chunking.target_tokens");
        }
        if chunking.overlap_tokens >= chunking.target_tokens {
            anyhow::bail!("chunking.overlap_tokens must be < chunking.target_tokens");
        }

        let merge = &self.merge;
        if merge.soft_threshold_tokens > merge.aggressive_threshold_tokens {
            anyhow::bail!("merge.soft_threshold_tokens must be <= merge.aggressive_threshold_tokens");
        }
        if merge.sentence_tokens_min == 0 || merge.sentence_tokens_min > merge.sentence_tokens_max {
            anyhow::bail!("merge.sentence_tokens_min must be > 0 and <= merge.sentence_tokens_max");
        }
        if !(merge.near_duplicate_similarity > 0.0 && merge.near_duplicate_similarity <= 1.0) {
            anyhow::bail!("merge.near_duplicate_similarity must be in (0.0, 1.0]");
        }

        let quality = &self.quality;
        if !(0.0..=1.0).contains(&quality.final_ready_threshold) {
            anyhow::bail!("quality.final_ready_threshold must be in [0.0, 1.0]");
        }
        if !quality.weights.all_non_negative() {
            anyhow::bail!("quality.weights must all be >= 0");
        }
        if (quality.weights.sum() - 1.0).abs() > 1e-6 {
            anyhow::bail!(
                "quality.weights must sum to 1.0 (got {:.6})",
                quality.weights.sum()
            );
        }
        let targets = &quality.numeric_targets;
        for (name, value) in [
            ("quantitative", targets.quantitative),
            ("qualitative", targets.qualitative),
            ("mixed", targets.mixed),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                anyhow::bail!("quality.numeric_targets.{} must be in (0.0, 1.0]", name);
            }
        }

        if self.cache.enabled {
            if self.cache.retention_days == 0 {
                anyhow::bail!("cache.retention_days must be >= 1 when the cache is enabled");
            }
            if self.cache.max_entries == 0 {
                anyhow::bail!("cache.max_entries must be >= 1 when the cache is enabled");
            }
        }

        let generation = &self.generation;
        match generation.provider.as_str() {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown generation provider: '{}'. Must be disabled or openai.",
                other
            ),
        }
        if generation.is_enabled() && generation.model.trim().is_empty() {
            anyhow::bail!(
                "generation.model must be specified when provider is '{}'",
                generation.provider
            );
        }
        if generation.max_concurrency == 0 {
            anyhow::bail!("generation.max_concurrency must be >= 1");
        }
        if generation.timeout_secs == 0 {
            anyhow::bail!("generation.timeout_secs must be > 0");
        }
        if generation.max_output_tokens == 0 {
            anyhow::bail!("generation.max_output_tokens must be > 0");
        }
        if generation.max_payload_chars < 1000 {
            anyhow::bail!("generation.max_payload_chars must be >= 1000");
        }

        if self.pipeline.timeout_secs == 0 {
            anyhow::bail!("pipeline.timeout_secs must be > 0");
        }
        if self.pipeline.max_repair_targets == 0 {
            anyhow::bail!("pipeline.max_repair_targets must be >= 1");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Config {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn test_minimal_config_uses_reference_defaults() {
        let config = parse("[db]\npath = \"data/distill.sqlite\"\n");
        config.validate().unwrap();
        assert_eq!(config.chunking.target_tokens, 2400);
        assert_eq!(config.merge.soft_threshold_tokens, 15_000);
        assert_eq!(config.quality.final_ready_threshold, 0.90);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.retention_days, 7);
        assert_eq!(config.generation.provider, "disabled");
        assert_eq!(config.generation.max_concurrency, 4);
        assert_eq!(config.pipeline.repair_budget, 2);
    }

    #[test]
    fn test_partial_tables_merge_with_defaults() {
        let config = parse(
            r#"
[db]
path = "x.sqlite"

[merge]
aggressive_threshold_tokens = 50000

[quality.weights]
coverage = 0.30
completeness = 0.15
"#,
        );
        config.validate().unwrap();
        assert_eq!(config.merge.aggressive_threshold_tokens, 50_000);
        assert_eq!(config.merge.soft_threshold_tokens, 15_000);
        assert_eq!(config.quality.weights.numeric_density, 0.15);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let config = parse("[db]\npath = \"x\"\n[quality.weights]\ncoverage = 0.9\n");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("sum to 1.0"), "{}", err);
    }

    #[test]
    fn test_rejects_inverted_thresholds_and_unknown_provider() {
        let config = parse(
            "[db]\npath = \"x\"\n[merge]\nsoft_threshold_tokens = 50000\n",
        );
        assert!(config.validate().is_err());

        let config = parse("[db]\npath = \"x\"\n[generation]\nprovider = \"carrier-pigeon\"\n");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("carrier-pigeon"));
    }

    #[test]
    fn test_overlap_must_be_below_target() {
        let config = parse("[db]\npath = \"x\"\n[chunking]\ntarget_tokens = 100\noverlap_tokens = 100\nmax_tokens = 200\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_reports_path() {
        let err = load_config(Path::new("/nonexistent/distill.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/distill.toml"));
    }
}
