//! `distill run`: summarize one text or Markdown file.
//!
//! Prints a readable outline of the summary and its quality report, or the
//! full [`DistillOutput`] as JSON with `--json`. `--dry-run` prints the
//! plan (fingerprint, token estimate, chunking, domain, density policy)
//! without calling the generator or touching the cache.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use study_distill_core::fingerprint::short;

use crate::config::Config;
use crate::generation::DisabledGenerator;
use crate::pipeline::{DistillOutput, DistillRequest, Distiller, Plan};

pub struct RunArgs {
    pub file: PathBuf,
    pub language: String,
    pub instruction: Option<String>,
    pub no_cache: bool,
    pub json: bool,
    pub dry_run: bool,
}

pub async fn run_summarize(config: Config, args: RunArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read input file: {}", args.file.display()))?;

    let mut request = DistillRequest::new(text).with_language(&args.language);
    if let Some(instruction) = &args.instruction {
        request = request.with_instruction(instruction);
    }
    if args.no_cache {
        request = request.bypassing_cache();
    }

    if args.dry_run {
        let model = if config.generation.is_enabled() {
            config.generation.model.clone()
        } else {
            "disabled".to_string()
        };
        let distiller = Distiller::init(config, Arc::new(DisabledGenerator::standing_in_for(model)), None)?;
        let plan = distiller.plan(&request);
        if args.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            print_plan(&args.file, &plan);
        }
        return Ok(());
    }

    if !config.generation.is_enabled() {
        bail!("Content generation is disabled. Set [generation] provider = \"openai\" in the config, or use --dry-run.");
    }
    let distiller = Distiller::open(config).await?;
    let result = distiller.distill(request).await;
    distiller.shutdown().await;
    let output = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_output(&args.file, &output);
    }
    Ok(())
}

fn print_plan(file: &std::path::Path, plan: &Plan) {
    println!("Plan for {}", file.display());
    println!("  fingerprint:  {}", plan.fingerprint);
    println!("  tokens:       ~{}", plan.estimated_tokens);
    println!(
        "  chunks:       {}{}",
        plan.chunk_count,
        if plan.is_single_pass() { " (single pass)" } else { "" }
    );
    println!(
        "  domain:       {} (numeric target {:.2})",
        plan.profile.domain, plan.profile.numeric_target
    );
    println!("  policy:       {}", plan.policy);
    println!("ok");
}

fn print_output(file: &std::path::Path, output: &DistillOutput) {
    let summary = &output.summary;
    let score = &output.quality.score;

    println!("Summary of {}", file.display());
    println!("  fingerprint:  {}", short(&output.fingerprint));
    println!("  status:       {} (composite {:.2})", output.status, score.composite);
    println!("  cache:        {}", output.cache);
    println!(
        "  chunks: {} · domain: {} · policy: {} · repair attempts: {}",
        output.chunk_count, output.domain, output.policy, output.repair_attempts
    );
    println!();

    if !summary.title.is_empty() {
        println!("# {}", summary.title);
        println!();
    }
    if !summary.overview.is_empty() {
        println!("{}", summary.overview);
        println!();
    }
    if !summary.learning_objectives.is_empty() {
        println!("Learning objectives:");
        for objective in &summary.learning_objectives {
            println!("  - {}", objective);
        }
        println!();
    }
    for section in &summary.sections {
        println!("## {}", section.title);
        for concept in &section.concepts {
            println!("  - {}: {}", concept.name, concept.explanation);
            if concept.has_example() {
                println!("      e.g. {}", concept.example);
            }
        }
    }
    if !summary.formulas.is_empty() {
        println!();
        println!("Formulas:");
        for formula in &summary.formulas {
            println!("  {}: {}", formula.name, formula.expression);
        }
    }
    if !summary.glossary.is_empty() {
        println!();
        println!("Glossary: {} terms", summary.glossary.len());
    }

    println!();
    println!(
        "Quality: coverage {:.2} · numeric {:.2} · formulas {:.2} · citations {:.2} · readability {:.2} · completeness {:.2}",
        score.coverage,
        score.numeric_density,
        score.formula_completeness,
        score.citation_depth,
        score.readability,
        score.completeness
    );
    if !output.quality.defects.is_empty() {
        println!("Open defects:");
        for defect in &output.quality.defects {
            println!(
                "  {} ({:?}: {} of {})",
                defect.path, defect.kind, defect.current, defect.required
            );
        }
    }
}
