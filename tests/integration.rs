use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn remap_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("remap");
    path
}

/// Config pointing at a port nothing listens on.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(
        root.join("mapping.json"),
        r#"{"properties":{"title":{"type":"keyword"},"id":{"type":"long"}}}"#,
    )
    .unwrap();

    let config_content = r#"[connection]
url = "http://127.0.0.1:1"
timeout_secs = 2

[remap]
batch_size = 1000
slices = 2
poll_interval_secs = 1

[logging]
level = "warn"
"#;

    let config_path = config_dir.join("remap.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_remap(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = remap_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("ELASTICSEARCH_URL")
        .env_remove("CLOUD_ID")
        .env_remove("ELASTICSEARCH_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run remap binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_help_lists_commands() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_remap(&config_path, &["--help"]);
    assert!(success);
    for cmd in ["check", "indices", "mapping", "pipeline", "run", "alias"] {
        assert!(stdout.contains(cmd), "missing {} in help: {}", cmd, stdout);
    }
}

#[test]
fn test_mapping_fmt_reindents() {
    let (tmp, config_path) = setup_test_env();
    let mapping = tmp.path().join("mapping.json");

    let (stdout, stderr, success) =
        run_remap(&config_path, &["mapping", "fmt", mapping.to_str().unwrap()]);
    assert!(success, "fmt failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("\n    \"properties\": {"), "{}", stdout);
    // key order from the file is kept
    let title = stdout.find("\"title\"").unwrap();
    let id = stdout.find("\"id\"").unwrap();
    assert!(title < id);
}

#[test]
fn test_mapping_fmt_works_without_config() {
    let (tmp, _) = setup_test_env();
    let mapping = tmp.path().join("mapping.json");
    let missing = tmp.path().join("nope.toml");

    let (stdout, _, success) = run_remap(&missing, &["mapping", "fmt", mapping.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("\"keyword\""));
}

#[test]
fn test_mapping_fmt_rejects_non_object() {
    let (tmp, config_path) = setup_test_env();
    let bad = tmp.path().join("bad.json");
    fs::write(&bad, "[]").unwrap();

    let (_, stderr, success) = run_remap(&config_path, &["mapping", "fmt", bad.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Invalid mapping file"), "{}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let (tmp, _) = setup_test_env();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_remap(&missing, &["check"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}

#[test]
fn test_check_unreachable_cluster() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_remap(&config_path, &["check"]);
    assert!(!success);
    assert!(stderr.contains("Cannot reach http://127.0.0.1:1"), "{}", stderr);
}

#[test]
fn test_run_same_source_and_target_fails_before_any_request() {
    let (tmp, config_path) = setup_test_env();
    let mapping = tmp.path().join("mapping.json");

    let (_, stderr, success) = run_remap(
        &config_path,
        &[
            "run",
            "--source",
            "products",
            "--target",
            "products",
            "--mapping",
            mapping.to_str().unwrap(),
            "--progress",
            "off",
        ],
    );
    assert!(!success);
    assert!(stderr.contains("stage:  precondition"), "{}", stderr);
    assert!(stderr.contains("must differ"), "{}", stderr);
}

#[test]
fn test_run_against_unreachable_cluster_reports_stage() {
    let (tmp, config_path) = setup_test_env();
    let mapping = tmp.path().join("mapping.json");

    let (stdout, stderr, success) = run_remap(
        &config_path,
        &["run", "--source", "products", "--mapping", mapping.to_str().unwrap()],
    );
    assert!(!success);
    // default target name
    assert!(stdout.contains("products_remapped"), "{}", stdout);
    assert!(stderr.contains("stage:  create"), "{}", stderr);
    assert!(stderr.contains("store-unavailable"), "{}", stderr);
}
