use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn sctx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sctx");
    path
}

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let mut source = String::from("The Holy Bible, King James Version\n\n");
    for v in 1..=12 {
        writeln!(source, "Psalms 23:{} The LORD [is] my shepherd, line {}", v, v).unwrap();
    }
    for v in 1..=16 {
        writeln!(source, "Psalms 24:{} The earth and the fulness thereof, line {}", v, v).unwrap();
    }
    source.push_str("not a verse at all\n");
    let source_path = root.join("kjv.txt");
    fs::write(&source_path, source).unwrap();

    let config_content = format!(
        r#"[corpus]
dir = "{}/processed"

[context]
provider = "disabled"

[embedding]
provider = "hash"
dims = 64

[retrieval]
top_k = 3
"#,
        root.display()
    );
    let config_path = config_dir.join("sctx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, source_path)
}

fn run_sctx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sctx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sctx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn ingest(config_path: &Path, source_path: &Path) {
    let (stdout, stderr, success) = run_sctx(
        config_path,
        &[
            "ingest",
            source_path.to_str().unwrap(),
            "--skip-context",
            "--index",
            "--progress",
            "off",
        ],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_ingest_reports_chunks() {
    let (_tmp, config_path, source_path) = setup_test_env();

    let (stdout, stderr, success) = run_sctx(
        &config_path,
        &["ingest", source_path.to_str().unwrap(), "--skip-context", "--index"],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("verses parsed: 28"));
    assert!(stdout.contains("malformed lines skipped: 1"));
    assert!(stdout.contains("chunks: 5 (1 passages, 4 windows)"));
    assert!(stdout.contains("context generation: skipped"));
    assert!(stdout.contains("chunks indexed: 5"));
    assert!(stdout.trim_end().ends_with("ok"));
}

#[test]
fn test_ingest_requires_context_provider_unless_skipped() {
    let (_tmp, config_path, source_path) = setup_test_env();

    let (_, stderr, success) = run_sctx(&config_path, &["ingest", source_path.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("--skip-context"));
}

#[test]
fn test_ingest_window_override() {
    let (_tmp, config_path, source_path) = setup_test_env();

    let (stdout, stderr, success) = run_sctx(
        &config_path,
        &[
            "ingest",
            source_path.to_str().unwrap(),
            "--skip-context",
            "--max-passage-size",
            "20",
        ],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("chunks: 2 (2 passages, 0 windows)"));
}

#[test]
fn test_invalid_overlap_rejected() {
    let (_tmp, config_path, source_path) = setup_test_env();

    let (_, _, success) = run_sctx(
        &config_path,
        &[
            "ingest",
            source_path.to_str().unwrap(),
            "--skip-context",
            "--overlap-fraction",
            "1.0",
        ],
    );
    assert!(!success);
}

#[test]
fn test_query_before_ingest_fails() {
    let (_tmp, config_path, _) = setup_test_env();

    let (_, stderr, success) = run_sctx(&config_path, &["query", "shepherd"]);
    assert!(!success);
    assert!(stderr.contains("sctx ingest"));
}

#[test]
fn test_query_prints_ranked_hits() {
    let (_tmp, config_path, source_path) = setup_test_env();
    ingest(&config_path, &source_path);

    let (stdout, stderr, success) =
        run_sctx(&config_path, &["query", "my shepherd", "--explain"]);
    assert!(success, "query failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.starts_with("1. ["));
    assert!(stdout.contains("Psalms 23:1-12"));
    assert!(stdout.contains("ranks: vector"));
    assert!(!stdout.contains("4. ["));
}

#[test]
fn test_query_json_output() {
    let (_tmp, config_path, source_path) = setup_test_env();
    ingest(&config_path, &source_path);

    let (stdout, stderr, success) = run_sctx(
        &config_path,
        &["query", "fulness thereof", "--json", "--top-k", "2"],
    );
    assert!(success, "query failed: stdout={}, stderr={}", stdout, stderr);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let hits = parsed["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(parsed["partial"], false);
    for hit in hits {
        assert!(hit["reference"].as_str().unwrap().starts_with("Psalms 24"));
        assert_eq!(hit["metadata"]["book"], "Psalms");
        assert!(hit["explain"]["bm25_rank"].is_number());
    }
}

#[test]
fn test_empty_query_no_results() {
    let (_tmp, config_path, source_path) = setup_test_env();
    ingest(&config_path, &source_path);

    let (stdout, _, success) = run_sctx(&config_path, &["query", "   "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_stopword_query_no_results() {
    let (_tmp, config_path, source_path) = setup_test_env();
    ingest(&config_path, &source_path);

    let (stdout, stderr, success) = run_sctx(&config_path, &["query", "the and"]);
    assert!(success, "query failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("No results."));
    assert!(!stdout.contains("1. ["));
}

#[test]
fn test_stats_reports_current_snapshot() {
    let (_tmp, config_path, source_path) = setup_test_env();
    ingest(&config_path, &source_path);

    let (stdout, stderr, success) = run_sctx(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Verses:      28"));
    assert!(stdout.contains("Windows:     4"));
    assert!(stdout.contains("Context:     0 / 5 (0%)"));
    assert!(stdout.contains("Snapshot:    current"));
    assert!(stdout.contains("hash (64 dims)"));
}

#[test]
fn test_stats_flags_stale_snapshot() {
    let (_tmp, config_path, source_path) = setup_test_env();
    ingest(&config_path, &source_path);

    let (_, _, success) = run_sctx(
        &config_path,
        &[
            "ingest",
            source_path.to_str().unwrap(),
            "--skip-context",
            "--sample-size",
            "10",
        ],
    );
    assert!(success);

    let (stdout, _, _) = run_sctx(&config_path, &["stats"]);
    assert!(stdout.contains("stale"));

    let (_, stderr, success) = run_sctx(&config_path, &["query", "shepherd"]);
    assert!(!success);
    assert!(stderr.contains("sctx index"));

    let (stdout, stderr, success) = run_sctx(&config_path, &["index"]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("chunks indexed: 1"));

    let (_, _, success) = run_sctx(&config_path, &["query", "shepherd"]);
    assert!(success);
}

#[test]
fn test_completions_without_config() {
    let missing = PathBuf::from("/nonexistent/sctx.toml");
    let (stdout, stderr, success) = run_sctx(&missing, &["completions", "bash"]);
    assert!(success, "completions failed: {}", stderr);
    assert!(stdout.contains("sctx"));
}
