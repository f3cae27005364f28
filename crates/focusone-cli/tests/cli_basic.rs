//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against a throwaway HOME so config and
//! database files never touch the real user directory.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Run a CLI command and return (exit code, stdout, stderr).
fn run_cli(home: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_focusone-cli"))
        .args(args)
        .env("HOME", home)
        .env_remove("FOCUSONE_ENV")
        .env_remove("FOCUSONE_LOG")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

fn add_weekday_plan(home: &Path) -> String {
    let (code, stdout, stderr) = run_cli(
        home,
        &[
            "plan", "add", "Deep work", "--start", "09:00", "--end", "10:00", "--days", "1,2,3,4,5",
        ],
    );
    assert_eq!(code, 0, "plan add failed: {stderr}");
    stdout
        .trim()
        .strip_prefix("Plan created: ")
        .expect("plan id in output")
        .to_string()
}

#[test]
fn test_plan_add_and_list() {
    let home = TempDir::new().unwrap();
    let id = add_weekday_plan(home.path());

    let (code, stdout, _) = run_cli(home.path(), &["plan", "list", "--json"]);
    assert_eq!(code, 0);
    let plans: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(plans.as_array().unwrap().len(), 1);
    assert_eq!(plans[0]["id"], id.as_str());
}

#[test]
fn test_overlapping_plan_is_rejected() {
    let home = TempDir::new().unwrap();
    add_weekday_plan(home.path());

    let (code, _, stderr) = run_cli(
        home.path(),
        &["plan", "add", "Overlap", "--start", "09:55", "--end", "10:50", "--days", "1"],
    );
    assert_ne!(code, 0);
    assert!(stderr.contains("error:"), "stderr: {stderr}");
}

#[test]
fn test_too_short_plan_is_rejected() {
    let home = TempDir::new().unwrap();
    let (code, _, _) = run_cli(
        home.path(),
        &["plan", "add", "Short", "--start", "12:00", "--end", "12:10"],
    );
    assert_ne!(code, 0);
}

#[test]
fn test_plan_match_at() {
    let home = TempDir::new().unwrap();
    let id = add_weekday_plan(home.path());

    let (code, stdout, stderr) = run_cli(
        home.path(),
        &["plan", "match", "--at", "09:10", "--date", "2026-03-02"],
    );
    assert_eq!(code, 0, "plan match failed: {stderr}");
    let matched: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(matched["current"]["id"], id.as_str());
    assert!(matched["next"].is_null());
}

#[test]
fn test_plan_remove() {
    let home = TempDir::new().unwrap();
    let id = add_weekday_plan(home.path());

    let (code, _, _) = run_cli(home.path(), &["plan", "remove", &id]);
    assert_eq!(code, 0);
    let (code, _, _) = run_cli(home.path(), &["plan", "remove", &id]);
    assert_ne!(code, 0);
}

#[test]
fn test_config_get_set() {
    let home = TempDir::new().unwrap();

    let (code, stdout, _) = run_cli(home.path(), &["config", "get", "retry.max_retries"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "2");

    let (code, _, _) = run_cli(home.path(), &["config", "set", "pause.penalty", "5"]);
    assert_eq!(code, 0);
    let (_, stdout, _) = run_cli(home.path(), &["config", "get", "pause.penalty"]);
    assert_eq!(stdout.trim(), "5");

    let (code, _, _) = run_cli(home.path(), &["config", "get", "no.such.key"]);
    assert_ne!(code, 0);
}

#[test]
fn test_config_reset() {
    let home = TempDir::new().unwrap();
    run_cli(home.path(), &["config", "set", "plans.min_duration_min", "5"]);
    let (code, _, _) = run_cli(home.path(), &["config", "reset"]);
    assert_eq!(code, 0);
    let (_, stdout, _) = run_cli(home.path(), &["config", "get", "plans.min_duration_min"]);
    assert_eq!(stdout.trim(), "20");
}

#[test]
fn test_session_replay_persists_state() {
    let home = TempDir::new().unwrap();
    add_weekday_plan(home.path());

    let script = home.path().join("script.jsonl");
    std::fs::write(
        &script,
        concat!(
            r#"{"step":"push","at":"2026-03-02T09:10:00","state":"started"}"#,
            "\n",
            r#"{"step":"tick","at":"2026-03-02T09:11:00"}"#,
            "\n",
            r#"{"step":"push","at":"2026-03-02T09:12:00","state":"paused"}"#,
            "\n",
        ),
    )
    .unwrap();

    let (code, stdout, stderr) =
        run_cli(home.path(), &["session", "replay", script.to_str().unwrap()]);
    assert_eq!(code, 0, "replay failed: {stderr}");
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["state"]["status"], "active");
    assert_eq!(lines[1]["state"]["elapsed_minutes"], 1);
    assert_eq!(lines[2]["state"]["status"], "paused");
    assert_eq!(lines[2]["balance"], -1);

    let (code, stdout, _) = run_cli(home.path(), &["session", "show"]);
    assert_eq!(code, 0);
    let state: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(state["status"], "paused");
}

#[test]
fn test_completions_generated() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["completions", "bash"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("focusone-cli"));
}
