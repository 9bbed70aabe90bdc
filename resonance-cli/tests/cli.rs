//! CLI integration tests.
//!
//! These run the `resonance` binary end-to-end with the simulated bus, so
//! nothing here needs a broker or open ports.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

// ============================================================================
// Test Utilities
// ============================================================================

fn cli_cmd() -> Command {
    Command::cargo_bin("resonance").expect("Failed to find resonance binary")
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

// ============================================================================
// Config Command Tests
// ============================================================================

#[test]
fn config_shows_defaults() {
    cli_cmd()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Resonance Parameters:"))
        .stdout(predicate::str::contains("anchor: BOLZANO_71"))
        .stdout(predicate::str::contains("state_sync: resonance.state.sync"))
        .stdout(predicate::str::contains("lexamoris: ws://lexamoris-node:8766"))
        .stdout(predicate::str::contains("nexus: ws://nexus-node:8767"));
}

#[test]
fn config_reads_file() {
    let file = config_file(
        r#"
[resonance]
anchor = "TRIESTE_9"

[nodes.relay]
websocket = "ws://relay:9000"
topic = "resonance.relay"
"#,
    );

    cli_cmd()
        .arg("--config")
        .arg(file.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("anchor: TRIESTE_9"))
        .stdout(predicate::str::contains("relay: ws://relay:9000"))
        .stdout(predicate::str::contains("lexamoris").not());
}

#[test]
fn bad_config_file_fails() {
    let file = config_file("[resonance\nanchor = ");

    cli_cmd()
        .arg("--config")
        .arg(file.path())
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

// ============================================================================
// Send Command Tests
// ============================================================================

#[test]
fn send_state_in_simulation() {
    cli_cmd()
        .args(["send", "--type", "state", "--message", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("State update sent"))
        .stderr(predicate::str::contains("[SIMULATED] Would send to resonance.state.sync"))
        .stderr(predicate::str::contains("\"content\":\"hello\""));
}

#[test]
fn send_frequency_in_simulation() {
    cli_cmd()
        .args(["send", "--type", "frequency"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Frequency sync sent"));
}

#[test]
fn send_event_to_known_target() {
    cli_cmd()
        .args(["send", "--type", "event", "--target", "nexus"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Repository event sent"))
        .stderr(predicate::str::contains("Would send to resonance.nexus"));
}

#[test]
fn send_event_to_unknown_target_fails() {
    cli_cmd()
        .args(["send", "--type", "event", "--target", "atlantis"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Repository event failed"))
        .stderr(predicate::str::contains("Unknown target node: atlantis"));
}

#[test]
fn send_requires_type() {
    cli_cmd()
        .arg("send")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--type"));
}

// ============================================================================
// Start Command Tests
// ============================================================================

#[test]
fn start_fails_when_port_is_taken() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    let file = config_file(&format!(
        "[socket]\nhost = \"127.0.0.1\"\nport = {port}\n\n[nodes]\n"
    ));

    cli_cmd()
        .arg("--config")
        .arg(file.path())
        .arg("start")
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .failure()
        .stdout(predicate::str::contains("Anchor: BOLZANO_71"))
        .stderr(predicate::str::contains("Pipeline failed to start"));
}
