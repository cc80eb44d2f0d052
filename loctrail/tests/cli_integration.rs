//! Integration tests for loctrail CLI

use std::fs;
use std::path::Path;
use std::process::Command;

fn run_loctrail_in(dir: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_loctrail"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("LOCTRAIL_CACHE_URL")
        .env_remove("LOCTRAIL_WRITE_TOKEN")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();

    (stdout, stderr, success)
}

fn run_loctrail(args: &[&str]) -> (String, String, bool) {
    run_loctrail_in(Path::new(env!("CARGO_MANIFEST_DIR")), args)
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str], date: &str) {
    let status = Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(["-c", "init.defaultBranch=main", "-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_DATE", date)
        .env("GIT_COMMITTER_DATE", date)
        .status()
        .expect("Failed to run git");
    assert!(status.success());
}

fn sample_repo(dir: &Path) {
    git(dir, &["init", "-q"], "2024-03-01T12:00:00+00:00");
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::write(dir.join("src/main.rs"), "fn main() {\n    println!(\"hi\");\n}\n").unwrap();
    git(dir, &["add", "-A"], "2024-03-01T12:00:00+00:00");
    git(dir, &["commit", "-q", "-m", "first"], "2024-03-01T12:00:00+00:00");

    fs::write(dir.join("src/util.py"), "def f():\n    return 1\n").unwrap();
    fs::write(dir.join("src/test_util.py"), "def test_f():\n    assert True\n").unwrap();
    git(dir, &["add", "-A"], "2024-03-03T12:00:00+00:00");
    git(dir, &["commit", "-q", "-m", "python"], "2024-03-03T12:00:00+00:00");
}

fn sample_entry() -> serde_json::Value {
    serde_json::json!({
        "version": 1,
        "repoUrl": "https://github.com/owner/project",
        "headCommit": "0123456789abcdef0123456789abcdef01234567",
        "updatedAt": "2024-01-02T10:00:00Z",
        "result": {
            "repoUrl": "https://github.com/owner/project",
            "defaultBranch": "main",
            "analyzedAt": "2024-01-02T10:00:00Z",
            "headCommit": "0123456789abcdef0123456789abcdef01234567",
            "detectedLanguages": ["rust"],
            "days": [{
                "date": "2024-01-01",
                "total": 12,
                "languages": { "rust": { "total": 12, "prod": 8, "test": 4 } },
                "comments": ["init"]
            }]
        }
    })
}

#[test]
fn test_cli_help() {
    let (stdout, _, success) = run_loctrail(&["--help"]);

    assert!(success);
    assert!(stdout.contains("loctrail"));
    assert!(stdout.contains("analyze"));
    assert!(stdout.contains("serve"));
    assert!(stdout.contains("key"));
    assert!(stdout.contains("validate"));
}

#[test]
fn test_cli_version() {
    let (stdout, _, success) = run_loctrail(&["--version"]);

    assert!(success);
    assert!(stdout.contains("loctrail"));
}

#[test]
fn test_analyze_help_lists_flags() {
    let (stdout, _, success) = run_loctrail(&["analyze", "--help"]);

    assert!(success);
    for flag in ["--branch", "--repo-url", "--resume", "--cache", "--push", "--output"] {
        assert!(stdout.contains(flag), "missing {}", flag);
    }
}

#[test]
fn test_key_is_spelling_independent() {
    let (a, _, ok_a) = run_loctrail(&["key", "https://github.com/Rust-Lang/Cargo.git"]);
    let (b, _, ok_b) = run_loctrail(&["key", "git@github.com:rust-lang/cargo"]);

    assert!(ok_a && ok_b);
    assert_eq!(a, b);
    let lines: Vec<&str> = a.lines().collect();
    assert_eq!(lines[0], "https://github.com/rust-lang/cargo");
    assert_eq!(lines[1].len(), 64);
    assert_eq!(lines[2], format!("results/v1/{}.json.gz", lines[1]));
}

#[test]
fn test_key_rejects_unknown_host() {
    let (_, stderr, success) = run_loctrail(&["key", "https://example.com/a/b"]);

    assert!(!success);
    assert!(stderr.contains("repoUrl"));
}

#[test]
fn test_validate_accepts_good_entry() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("entry.json");
    fs::write(&file, sample_entry().to_string()).unwrap();

    let (stdout, _, success) = run_loctrail(&["validate", file.to_str().unwrap()]);

    assert!(success);
    assert!(stdout.contains("valid:"));
    assert!(stdout.contains("1 days"));
}

#[test]
fn test_validate_names_offending_field() {
    let mut entry = sample_entry();
    entry["result"]["days"][0]["languages"]["rust"]["test"] = serde_json::json!(5);
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("entry.json");
    fs::write(&file, entry.to_string()).unwrap();

    let (_, stderr, success) = run_loctrail(&["validate", file.to_str().unwrap()]);

    assert!(!success);
    assert!(stderr.contains("result.days[0].languages.rust"));
}

#[test]
fn test_validate_rejects_unknown_language() {
    let mut entry = sample_entry();
    entry["result"]["detectedLanguages"] = serde_json::json!(["cobol"]);
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("entry.json");
    fs::write(&file, entry.to_string()).unwrap();

    let (_, stderr, success) = run_loctrail(&["validate", file.to_str().unwrap()]);

    assert!(!success);
    assert!(stderr.contains("unknown language"));
}

#[test]
fn test_analyze_writes_json() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());

    let (stdout, stderr, success) = run_loctrail_in(
        dir.path(),
        &["analyze", ".", "--repo-url", "https://github.com/test/sample"],
    );
    assert!(success, "{}", stderr);

    let json: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(json["repoUrl"], "https://github.com/test/sample");
    assert_eq!(json["defaultBranch"], "main");

    let days = json["days"].as_array().unwrap();
    assert_eq!(days.len(), 3);
    assert_eq!(days[0]["date"], "2024-03-01");
    assert_eq!(days[2]["languages"]["python"]["test"], 2);
    assert_eq!(days[2]["languages"]["python"]["prod"], 2);
    assert_eq!(days[2]["languages"]["rust"]["total"], 3);
}

#[test]
fn test_analyze_output_and_resume() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let out = dir.path().join("history.json");
    let out = out.to_str().unwrap();

    let args = ["analyze", ".", "--repo-url", "https://github.com/test/sample", "-q"];
    let (_, stderr, success) = run_loctrail_in(dir.path(), &[&args[..], &["--output", out][..]].concat());
    assert!(success, "{}", stderr);
    let first: serde_json::Value = serde_json::from_str(&fs::read_to_string(out).unwrap()).unwrap();

    let (stdout, stderr, success) =
        run_loctrail_in(dir.path(), &[&args[..], &["--resume", out][..]].concat());
    assert!(success, "{}", stderr);
    let resumed: serde_json::Value = serde_json::from_str(&stdout).unwrap();

    assert_eq!(resumed["days"], first["days"]);
    assert_eq!(resumed["headCommit"], first["headCommit"]);
}

#[test]
fn test_analyze_outside_repository_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, success) = run_loctrail_in(dir.path(), &["analyze", "."]);

    assert!(!success);
    assert!(stderr.contains("Error"));
}
