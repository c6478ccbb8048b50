use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn distill_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_distill"))
}

fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let notes_dir = root.join("notes");
    fs::create_dir_all(&notes_dir).unwrap();
    fs::write(
        notes_dir.join("elasticity.md"),
        "# Elasticity\n\nPrice elasticity of demand is E = %ΔQ / %ΔP. A 10% price rise that cuts quantity by 20% gives E = -2.\n\nGoods with |E| > 1 are elastic.",
    )
    .unwrap();
    fs::write(notes_dir.join("blank.txt"), "\n\n   \n").unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/distill.sqlite"

[chunking]
target_tokens = 800
overlap_tokens = 60
max_tokens = 1000

[cache]
retention_days = 7
max_entries = 100
{}
"#,
        root.display(),
        extra
    );

    let config_path = config_dir.join("distill.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_distill(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = distill_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run distill binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn notes(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .and_then(Path::parent)
        .unwrap()
        .join("notes")
        .join(name)
        .to_string_lossy()
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_distill(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("distill.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("");

    let (_, _, success1) = run_distill(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_distill(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_dry_run_prints_plan() {
    let (_tmp, config_path) = setup_test_env("");
    let file = notes(&config_path, "elasticity.md");

    let (stdout, stderr, success) = run_distill(&config_path, &["run", &file, "--dry-run"]);
    assert!(success, "dry run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("fingerprint:"));
    assert!(stdout.contains("chunks:       1 (single pass)"));
    assert!(stdout.contains("policy:       soft-merge"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_dry_run_is_deterministic() {
    let (_tmp, config_path) = setup_test_env("");
    let file = notes(&config_path, "elasticity.md");

    let (first, _, _) = run_distill(&config_path, &["run", &file, "--dry-run", "--json"]);
    let (second, _, _) = run_distill(&config_path, &["run", &file, "--dry-run", "--json"]);
    let (german, _, _) = run_distill(
        &config_path,
        &["run", &file, "--dry-run", "--json", "--language", "de"],
    );

    let parse = |s: &str| serde_json::from_str::<serde_json::Value>(s).unwrap();
    let (first, second, german) = (parse(&first), parse(&second), parse(&german));
    assert_eq!(first["fingerprint"], second["fingerprint"]);
    assert_ne!(first["fingerprint"], german["fingerprint"]);
    assert_eq!(first["chunk_count"], 1);
    assert_eq!(first["fingerprint"].as_str().unwrap().len(), 64);
}

#[test]
fn test_run_with_generation_disabled_fails() {
    let (_tmp, config_path) = setup_test_env("");
    let file = notes(&config_path, "elasticity.md");

    let (_, stderr, success) = run_distill(&config_path, &["run", &file]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);
}

#[test]
fn test_run_without_api_key_fails() {
    let (_tmp, config_path) = setup_test_env(
        r#"
[generation]
provider = "openai"
api_key_env = "STUDY_DISTILL_TEST_UNSET_KEY"
"#,
    );
    let file = notes(&config_path, "elasticity.md");

    let (_, stderr, success) = run_distill(&config_path, &["run", &file]);
    assert!(!success);
    assert!(stderr.contains("STUDY_DISTILL_TEST_UNSET_KEY"), "stderr: {}", stderr);
}

#[test]
fn test_missing_input_file_fails() {
    let (_tmp, config_path) = setup_test_env("");

    let (_, stderr, success) = run_distill(&config_path, &["run", "/nonexistent/chapter.md", "--dry-run"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read input file"));
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env("");
    let broken = fs::read_to_string(&config_path)
        .unwrap()
        .replace("overlap_tokens = 60", "overlap_tokens = 900");
    fs::write(&config_path, broken).unwrap();

    let (_, stderr, success) = run_distill(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("overlap_tokens"), "stderr: {}", stderr);
}

#[test]
fn test_cache_stats_on_fresh_database() {
    let (_tmp, config_path) = setup_test_env("");

    run_distill(&config_path, &["init"]);
    let (stdout, stderr, success) = run_distill(&config_path, &["cache", "stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Entries:       0"));
    assert!(stdout.contains("Total hits:    0"));
    assert!(stdout.contains("Oldest access: never"));
}

#[test]
fn test_cache_prune_on_fresh_database() {
    let (_tmp, config_path) = setup_test_env("");

    run_distill(&config_path, &["init"]);
    let (stdout, stderr, success) = run_distill(&config_path, &["cache", "prune"]);
    assert!(success, "prune failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("expired entries removed: 0"));
    assert!(stdout.contains("lru entries evicted: 0"));
    assert!(stdout.contains("entries remaining: 0"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_logs_go_to_stderr() {
    let (_tmp, config_path) = setup_test_env("");
    let file = notes(&config_path, "elasticity.md");

    let (stdout, _, success) = run_distill(&config_path, &["-vv", "run", &file, "--dry-run", "--json"]);
    assert!(success);
    // stdout stays machine-readable at any verbosity
    serde_json::from_str::<serde_json::Value>(&stdout).unwrap();
}
