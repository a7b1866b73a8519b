use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};

fn toolbridge(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("toolbridge").unwrap();
    cmd.current_dir(dir)
        .env_remove("LS_IMPORT_STRATEGY")
        .env_remove("LS_SHOW_NOTIFICATION")
        .env_remove("LS_MODULE_PATH");
    cmd
}

#[test]
fn test_version_command() {
    let dir = tempfile::tempdir().unwrap();
    toolbridge(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("toolbridge "));
}

#[test]
fn test_run_passes_extra_args() {
    let dir = tempfile::tempdir().unwrap();
    toolbridge(dir.path())
        .args(["run", "--", "--flag", "-x"])
        .assert()
        .success()
        .stderr(predicate::str::contains("flags: --flag -x"));
}

#[test]
fn test_check_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("notes.txt"), "line one\nline two\n").unwrap();

    toolbridge(dir.path())
        .args(["check", "notes.txt"])
        .assert()
        .success()
        .stdout("line one\nline two\n");
}

#[test]
fn test_check_over_stdin() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("notes.txt"), "piped\n").unwrap();

    toolbridge(dir.path())
        .args(["check", "--stdin", "notes.txt", "--", "--strict"])
        .assert()
        .success()
        .stdout("piped\n")
        .stderr(predicate::str::contains("flags: --strict"));
}

#[test]
fn test_check_missing_file_is_tool_error() {
    let dir = tempfile::tempdir().unwrap();
    toolbridge(dir.path())
        .args(["check", "absent.txt"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to read absent.txt"));
}

#[test]
fn test_missing_config_file_is_tool_error() {
    let dir = tempfile::tempdir().unwrap();
    toolbridge(dir.path())
        .args(["run", "--config", "nowhere.toml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration file not found: nowhere.toml"));
}

#[test]
fn test_invalid_config_file_is_tool_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("toolbridge.toml"), "[tool\nmodule = ").unwrap();

    toolbridge(dir.path()).arg("run").assert().code(2);
}

#[test]
fn test_in_process_fault_is_tool_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("toolbridge.toml"), "[tool]\nmodule = \"missing\"\n").unwrap();
    fs::write(dir.path().join("a.txt"), "x").unwrap();

    toolbridge(dir.path())
        .args(["check", "a.txt"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No module named 'missing'"));
}

#[cfg(unix)]
#[test]
fn test_direct_path_nonzero_exit_is_invocation_failure() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("toolbridge.toml"),
        "[global]\npath = [\"sh\", \"-c\", \"echo found-issue; exit 3\"]\n",
    )
    .unwrap();
    fs::write(dir.path().join("a.txt"), "x").unwrap();

    toolbridge(dir.path())
        .args(["check", "a.txt"])
        .assert()
        .code(1)
        .stdout("found-issue\n");
}

#[test]
fn test_runner_serves_requests() {
    let dir = tempfile::tempdir().unwrap();
    let request = json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "run",
        "params": {
            "module": "echo",
            "argv": ["echo", "--check"],
            "useStdin": true,
            "cwd": dir.path(),
            "source": "hi"
        }
    });
    let input = format!("not json\n{request}\n{}\n", json!({"jsonrpc": "2.0", "method": "exit"}));

    let output = toolbridge(dir.path()).arg("runner").write_stdin(input).assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let responses: Vec<Value> = stdout.lines().map(|l| serde_json::from_str(l).unwrap()).collect();

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["error"]["code"], -32700);
    assert_eq!(responses[1]["id"], 7);
    assert_eq!(responses[1]["result"]["stdout"], "hi");
    assert_eq!(responses[1]["result"]["stderr"], "flags: --check\n");
}
