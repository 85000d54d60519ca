use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn test_replay_items_merges_stream_and_drops_duplicates() {
    let dir = tempdir().unwrap();

    let expected = [
        "you: Add a retry to the fetcher",
        "",
        "thinking: Look at fetch.rs first",
        "",
        "agent: I'll wrap the call in a retry loop.",
        "",
        r#"system: {"total":42,"type":"token_count"}"#,
        "",
    ]
    .join("\n");

    cargo_bin_cmd!("tether")
        .env("TETHER_HOME", dir.path())
        .arg("replay")
        .arg(fixture("items.jsonl"))
        .args(["--kind", "items"])
        .assert()
        .success()
        .stdout(expected);
}

#[test]
fn test_replay_protocol_reports_error_and_approval() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("tether")
        .env("TETHER_HOME", dir.path())
        .arg("replay")
        .arg(fixture("protocol.jsonl"))
        .assert()
        .success()
        .stdout(predicate::str::contains("you: Run the tests"))
        .stdout(predicate::str::contains("thinking: Checking the test command"))
        .stdout(predicate::str::contains("agent: Running cargo test.\n"))
        .stdout(predicate::str::contains("approval: cargo test\n          cwd: /repo"))
        .stdout(predicate::str::contains("Running cargo test.Running").not())
        .stderr(predicate::str::contains("pending approval: cargo test"))
        .stderr(predicate::str::contains("error: sandbox denied"));
}

#[test]
fn test_replay_one_message_per_tick_gives_same_transcript() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("tether")
        .env("TETHER_HOME", dir.path())
        .arg("replay")
        .arg(fixture("protocol.jsonl"))
        .args(["--max-per-tick", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("agent: Running cargo test.\n"));
}

#[test]
fn test_replay_log_shows_tail_from_config() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("config.toml"),
        "[projection]\ndebug_panel_collapsed_lines = 2\n",
    )
    .unwrap();

    cargo_bin_cmd!("tether")
        .env("TETHER_HOME", dir.path())
        .arg("replay")
        .arg(fixture("build.log"))
        .args(["--kind", "log"])
        .assert()
        .success()
        .stdout("… 3 earlier lines\ncompiling tether\nbuild finished\n");
}

#[test]
fn test_replay_log_full_flushes_trailing_line() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("tether")
        .env("TETHER_HOME", dir.path())
        .arg("replay")
        .arg(fixture("build.log"))
        .args(["--kind", "log", "--full"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("build started\n"))
        .stdout(predicate::str::ends_with("build finished\n"));
}

#[test]
fn test_replay_malformed_line_fails_with_line_number() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("tether")
        .env("TETHER_HOME", dir.path())
        .arg("replay")
        .arg(fixture("malformed.jsonl"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn test_replay_missing_file_fails() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("tether")
        .env("TETHER_HOME", dir.path())
        .args(["replay", "does-not-exist.jsonl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn test_replay_log_formats_every_json_line() {
    let dir = tempdir().unwrap();

    let output = cargo_bin_cmd!("tether")
        .env("TETHER_HOME", dir.path())
        .arg("replay")
        .arg(fixture("json.log"))
        .args(["--kind", "log", "--full"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let formatted = stdout
        .lines()
        .filter(|line| line.starts_with("  \"k\": "))
        .count();
    assert_eq!(formatted, 400);
    assert!(stdout.starts_with("line 0 {\n  \"k\": 0\n}\n"));
    assert!(!stdout.contains(r#"{"k":"#));
}
