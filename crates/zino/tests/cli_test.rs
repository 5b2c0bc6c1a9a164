//! CLI-level tests of the `zino` binary: argument parsing, help text,
//! and startup failure exit codes. No sockets are bound here.
#![allow(clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn zino_cmd() -> Command {
    let mut cmd = Command::cargo_bin("zino").unwrap();
    cmd.env_remove("ZINO_PERSISTENCE_FILE")
        .env_remove("ZINO_POLLING_FILE")
        .env_remove("ZINO_SNMP_BACKEND");
    cmd
}

#[test]
fn version_flag_reports_the_package_version() {
    zino_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn help_lists_the_documented_flags() {
    zino_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("--polldevs")
            .and(predicate::str::contains("--config-file"))
            .and(predicate::str::contains("--stop-in"))
            .and(predicate::str::contains("--trap-port"))
            .and(predicate::str::contains("--debug")),
    );
}

#[test]
fn missing_secrets_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    zino_cmd()
        .current_dir(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn broken_pollfile_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("secrets"), "user1 password123\n").unwrap();
    std::fs::write(dir.path().join("polldevs.cf"), "name: broken\nbogus: 1\n").unwrap();

    zino_cmd()
        .current_dir(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("configuration error"));
}

#[test]
fn unknown_snmp_backend_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("secrets"), "user1 password123\n").unwrap();
    std::fs::write(
        dir.path().join("polldevs.cf"),
        "name: sw1\naddress: 10.0.0.1\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("zino.toml"), "[snmp]\nbackend = \"netsnmp\"\n").unwrap();

    zino_cmd()
        .current_dir(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown SNMP backend"));
}
