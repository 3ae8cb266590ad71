use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;

use tempfile::NamedTempFile;

fn bin_path() -> PathBuf {
    if let Some(path) = std::env::var_os("CARGO_BIN_EXE_tmux-fleet-rs") {
        return PathBuf::from(path);
    }
    if let Some(path) = std::env::var_os("CARGO_BIN_EXE_tmux_fleet_rs") {
        return PathBuf::from(path);
    }
    let exe = std::env::current_exe().expect("current exe");
    let target_dir = exe.parent().and_then(|p| p.parent()).expect("target dir");
    let mut bin = target_dir.join("tmux-fleet-rs");
    if cfg!(windows) {
        bin.set_extension("exe");
    }
    bin
}

fn run_with_stdin_closed(args: &[&str]) -> std::process::Output {
    let mut child = Command::new(bin_path())
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn binary");
    drop(child.stdin.take());
    child.wait_with_output().expect("wait for output")
}

#[test]
fn cli_rejects_missing_config() {
    let output = Command::new(bin_path())
        .args(["--config", "does-not-exist.toml"])
        .output()
        .expect("run binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error loading config file"));
}

#[test]
fn cli_rejects_invalid_config() {
    let mut file = NamedTempFile::new().expect("temp config");
    writeln!(file, "not = = valid").expect("write config");

    let output = Command::new(bin_path())
        .args(["--config", file.path().to_str().unwrap()])
        .output()
        .expect("run binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error loading config file"));
}

#[test]
fn cli_exits_when_stdio_closed() {
    let output = run_with_stdin_closed(&[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to start server"));
}

#[test]
fn cli_reads_valid_config_and_exits_when_stdio_closed() {
    let mut file = NamedTempFile::new().expect("temp config");
    writeln!(file, "[defaults]\nsession = \"work\"").expect("write config");

    let output = run_with_stdin_closed(&["--config", file.path().to_str().unwrap()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to start server"));
}

#[test]
fn cli_accepts_target_and_transport_flags() {
    let output = run_with_stdin_closed(&[
        "--host",
        "build-01",
        "--session",
        "ci",
        "--tmux",
        "/usr/bin/tmux",
        "--timeout-ms",
        "30000",
    ]);
    // Flags parse; the server still fails to start on closed stdio.
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to start server"));
}
