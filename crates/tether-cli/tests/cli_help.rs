use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_shows_all_commands() {
    cargo_bin_cmd!("tether")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("replay"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_replay_help_shows_options() {
    cargo_bin_cmd!("tether")
        .args(["replay", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--kind"))
        .stdout(predicate::str::contains("--max-per-tick"))
        .stdout(predicate::str::contains("protocol"))
        .stdout(predicate::str::contains("items"));
}

#[test]
fn test_config_help_shows_subcommands() {
    cargo_bin_cmd!("tether")
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("path"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn test_version_flag() {
    cargo_bin_cmd!("tether")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}
