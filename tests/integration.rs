use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn logsift_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("logsift");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let logs_dir = root.join("logs");
    fs::create_dir_all(logs_dir.join("api")).unwrap();
    fs::write(
        logs_dir.join("api/server.log"),
        "2024-03-01 10:00:00 INFO starting api on :8080\n\
         2024-03-01 10:00:05 INFO GET /orders 200\n",
    )
    .unwrap();
    fs::write(
        logs_dir.join("api/worker.log"),
        "Traceback (most recent call last):\n  \
         File \"/srv/app/worker.py\", line 42, in run\n    \
         job.execute()\n\
         TimeoutError: job 17 exceeded deadline\n",
    )
    .unwrap();
    fs::write(
        logs_dir.join("payments.log"),
        "java.lang.IllegalStateException: ledger closed\n\tat com.acme.pay.Ledger.post(Ledger.java:51)\n",
    )
    .unwrap();
    fs::write(logs_dir.join("notes.md"), "not a log\n").unwrap();

    let config_content = format!(
        r#"[paths]
log_folder = "{root}/logs"
data_dir = "{root}/data"

[chunking]
chunk_size = 4096
overlap = 1024

[embedding]
provider = "hashing"
dims = 256
"#,
        root = root.display()
    );

    let config_path = config_dir.join("logsift.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_logsift(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = logsift_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run logsift binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run_json(config_path: &Path, args: &[&str]) -> serde_json::Value {
    let (stdout, stderr, success) = run_logsift(config_path, args);
    assert!(success, "{:?} failed: {}", args, stderr);
    serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("{:?} printed invalid JSON ({}): {}", args, e, stdout))
}

#[test]
fn test_ingest_writes_chunks() {
    let (_tmp, config) = setup_test_env();
    let report = run_json(&config, &["ingest"]);
    assert_eq!(report["files_processed"], 3);
    assert_eq!(report["files_failed"], 0);
    assert_eq!(report["chunks_written"], 3);
    assert!(Path::new(report["output"].as_str().unwrap()).exists());
}

#[test]
fn test_ingest_rejects_bad_overlap() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) =
        run_logsift(&config, &["ingest", "--chunk-size", "100", "--overlap", "100"]);
    assert!(!success);
    assert!(stderr.contains("overlap"), "stderr: {}", stderr);
}

#[test]
fn test_ingest_word_windows() {
    let (_tmp, config) = setup_test_env();
    let report = run_json(
        &config,
        &["ingest", "--unit", "words", "--chunk-size", "4", "--overlap", "1"],
    );
    assert!(report["chunks_written"].as_u64().unwrap() > 3);
}

#[test]
fn test_query_before_vectorize_reports_no_data() {
    let (_tmp, config) = setup_test_env();
    run_json(&config, &["ingest"]);
    let response = run_json(&config, &["query", "what failed"]);
    assert_eq!(response["query"], "what failed");
    assert_eq!(response["error"], "no vector data");
}

#[test]
fn test_vectorize_builds_snapshot_and_index() {
    let (_tmp, config) = setup_test_env();
    run_json(&config, &["ingest"]);

    let report = run_json(&config, &["vectorize", "--progress", "off"]);
    assert_eq!(report["total"], 3);
    assert_eq!(report["newly_embedded"], 3);
    assert_eq!(report["failed"], 0);
    assert!(Path::new(report["snapshot"].as_str().unwrap()).exists());
    assert_eq!(report["index_stats"]["total_vectors"], 3);
    assert_eq!(report["index_stats"]["topology"], "flat");
}

#[test]
fn test_vectorize_second_run_hits_cache() {
    let (_tmp, config) = setup_test_env();
    run_json(&config, &["ingest"]);
    run_json(&config, &["vectorize", "--progress", "off"]);

    let report = run_json(&config, &["vectorize", "--progress", "off"]);
    assert_eq!(report["cached"], 3);
    assert_eq!(report["newly_embedded"], 0);
}

#[test]
fn test_vectorize_without_ingest_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, _, success) = run_logsift(&config, &["vectorize", "--progress", "off"]);
    assert!(!success);
}

#[test]
fn test_query_returns_error_patterns() {
    let (_tmp, config) = setup_test_env();
    run_json(&config, &["ingest"]);
    run_json(&config, &["vectorize", "--progress", "off"]);

    let response = run_json(&config, &["query", "ledger closed IllegalStateException"]);
    let analysis = &response["error_analysis"];
    assert!(analysis["total_errors"].as_u64().unwrap() >= 1);
    let types: Vec<&str> = analysis["clusters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["error_type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"java.lang.IllegalStateException"), "types: {:?}", types);
    assert_eq!(analysis["retrieval_stats"]["path"], "index");
    assert_eq!(analysis["retrieval_stats"]["total_chunks"], 3);
}

#[test]
fn test_query_compact_is_one_line() {
    let (_tmp, config) = setup_test_env();
    run_json(&config, &["ingest"]);
    run_json(&config, &["vectorize", "--progress", "off"]);

    let (stdout, _, success) = run_logsift(&config, &["query", "--compact", "all errors"]);
    assert!(success);
    assert_eq!(stdout.trim_end().lines().count(), 1);
}

#[test]
fn test_query_empty_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_logsift(&config, &["query", "   "]);
    assert!(!success);
    assert!(stderr.contains("query must not be empty"), "stderr: {}", stderr);
}

#[test]
fn test_stats_json() {
    let (_tmp, config) = setup_test_env();
    let before = run_json(&config, &["stats", "--json"]);
    assert!(before["chunks"].is_null());
    assert!(before["index"].is_null());

    run_json(&config, &["ingest"]);
    run_json(&config, &["vectorize", "--progress", "off"]);

    let after = run_json(&config, &["stats", "--json"]);
    assert_eq!(after["chunks"], 3);
    assert_eq!(after["snapshots"], 1);
    assert_eq!(after["index"]["total_vectors"], 3);
    assert_eq!(after["cache"]["cache_size"], 3);
}

#[test]
fn test_stats_human() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _, success) = run_logsift(&config, &["stats"]);
    assert!(success);
    assert!(stdout.contains("logsift data stats"));
    assert!(stdout.contains("none (run ingest)"));
}

#[test]
fn test_cache_clear() {
    let (_tmp, config) = setup_test_env();
    run_json(&config, &["ingest"]);
    run_json(&config, &["vectorize", "--progress", "off"]);

    let (stdout, _, success) = run_logsift(&config, &["cache", "clear"]);
    assert!(success);
    assert!(stdout.contains("Cleared 3 cached embeddings"));

    let stats = run_json(&config, &["stats", "--json"]);
    assert_eq!(stats["cache"]["cache_size"], 0);
}

#[test]
fn test_missing_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let output = Command::new(logsift_binary())
        .current_dir(tmp.path())
        .args(["--config", "missing.toml", "stats", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["data_dir"], "./data");
    assert_eq!(report["snapshots"], 0);
}
