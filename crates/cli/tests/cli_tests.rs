//! CLI integration tests

use std::process::Command;

fn healctl(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "-q", "-p", "autoheal-cli", "--"])
        .args(args)
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = healctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("Autoheal remediation engine"),
        "Should show app description"
    );
    for command in [
        "status",
        "anomalies",
        "detect",
        "policies",
        "actions",
        "evaluate",
        "toggle",
        "health",
    ] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = healctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("healctl"), "Should show binary name");
}

#[test]
fn test_anomalies_help() {
    let output = healctl(&["anomalies", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Anomalies help should succeed");
    assert!(stdout.contains("--all"), "Should show all flag");
    assert!(stdout.contains("--service"), "Should show service option");
}

#[test]
fn test_detect_help() {
    let output = healctl(&["detect", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Detect help should succeed");
    assert!(stdout.contains("--service"), "Should show service option");
    assert!(stdout.contains("--metric"), "Should show metric option");
}

#[test]
fn test_actions_help() {
    let output = healctl(&["actions", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Actions help should succeed");
    assert!(stdout.contains("--service"), "Should show service option");
    assert!(stdout.contains("--limit"), "Should show limit option");
}

/// Test format option
#[test]
fn test_format_option() {
    let output = healctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--format"), "Should show format option");
    assert!(stdout.contains("table"), "Should show table format");
    assert!(stdout.contains("json"), "Should show json format");
}

/// Test api-url option
#[test]
fn test_api_url_option() {
    let output = healctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("--api-url"), "Should show api-url option");
    assert!(stdout.contains("HEALCTL_API_URL"), "Should show env var");
}

/// Test invalid command error handling
#[test]
fn test_invalid_command() {
    let output = healctl(&["invalid-command"]);

    assert!(!output.status.success(), "Invalid command should fail");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("invalid"),
        "Should show error message"
    );
}

/// An unreachable engine is reported as an error, not a panic
#[test]
fn test_unreachable_engine() {
    let output = healctl(&["--api-url", "http://127.0.0.1:9", "status"]);

    assert!(!output.status.success(), "Status should fail without an engine");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to send request"));
}
