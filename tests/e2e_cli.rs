//! CLI end-to-end tests for the livecast binary.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[allow(deprecated)]
fn livecast_cmd() -> Command {
    Command::cargo_bin("livecast").unwrap()
}

#[test]
fn no_args_shows_help() {
    livecast_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn version_command() {
    livecast_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "livecast {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn check_tools_reports_ffmpeg() {
    livecast_cmd()
        .arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("ffmpeg"));
}

#[test]
fn validate_without_file_uses_defaults() {
    livecast_cmd()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"))
        .stdout(predicate::str::contains("Ingest: 0.0.0.0:1935 (control 8000)"));
}

#[test]
fn validate_reports_warnings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("livecast.json");
    fs::write(
        &path,
        r#"{"server": {"port": 9000}, "ingest": {"control_port": 9000}}"#,
    )
    .unwrap();

    livecast_cmd()
        .args(["validate", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Server: 0.0.0.0:9000"))
        .stdout(predicate::str::contains("server.port and ingest.control_port are both 9000"));
}

#[test]
fn validate_rejects_broken_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{not json").unwrap();

    livecast_cmd()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config parse error"));
}

#[test]
fn start_fails_when_port_is_taken() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let dir = tempdir().unwrap();
    let config = dir.path().join("livecast.json");
    let root = dir.path().display().to_string();
    fs::write(
        &config,
        format!(
            r#"{{
                "server": {{"host": "127.0.0.1", "port": {port}, "db_path": "{root}/db/livecast.db"}},
                "ingest": {{"host": "127.0.0.1", "port": 0, "control_port": 0}},
                "media": {{"media_root": "{root}/media", "output_root": "{root}/video"}},
                "storage": {{"root": "{root}/uploads"}},
                "tools": {{"ffmpeg_path": "/bin/sh"}}
            }}"#
        ),
    )
    .unwrap();

    livecast_cmd()
        .arg("--config")
        .arg(&config)
        .arg("start")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to bind"));
}
