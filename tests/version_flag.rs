use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn prints_version() {
    Command::cargo_bin("reel-feed")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    Command::cargo_bin("reel-feed")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("reel-feed"))
        .stdout(predicate::str::contains("--watch"));
}

#[test]
fn rejects_unknown_arguments() {
    Command::cargo_bin("reel-feed")
        .unwrap()
        .arg("--frobnicate")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown argument"));
}

#[test]
fn seeds_and_lists_a_local_store() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("feed.db");
    Command::cargo_bin("reel-feed")
        .unwrap()
        .env("REEL_FEED_POLLER__ENABLED", "false")
        .env("XDG_CONFIG_HOME", dir.path())
        .env("HOME", dir.path())
        .args(["--db", db.to_str().unwrap(), "--seed", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("demo-0003"))
        .stdout(predicate::str::contains("demo-0001"))
        .stdout(predicate::str::contains("@demo"));
}
