//! End-to-end runs of the `blurdev` binary.

use std::path::Path;
use std::process::{Command, Output};
use std::time::{Duration, Instant};

fn blurdev(log_dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_blurdev"));
    cmd.env_remove("RUST_LOG")
        .env_remove("LOG_FORMAT")
        .env_remove("BLURDEV_TOOLS")
        .env_remove("BLURDEV_CHILD_EXE")
        .env("BLURDEV_LOG_DIR", log_dir);
    cmd
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn protocol_writes_message_to_stdout() {
    let logs = tempfile::tempdir().unwrap();
    let output = blurdev(logs.path())
        .args(["protocol", "blurdev://stdoutput/write?msg=hi%20there"])
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "hi there");

    let log = std::fs::read_to_string(logs.path().join("blurdev_protocol.log")).unwrap();
    assert!(log.contains("stdoutput"), "log: {log}");
}

#[test]
fn protocol_ignores_unknown_handler() {
    let logs = tempfile::tempdir().unwrap();
    let output = blurdev(logs.path())
        .args(["protocol", "blurdev://nobody/anything?x=1"])
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).is_empty());
    let log = std::fs::read_to_string(logs.path().join("blurdev_protocol.log")).unwrap();
    assert!(log.contains("nobody"), "log: {log}");
}

#[test]
fn protocol_handler_failure_exits_non_zero() {
    let logs = tempfile::tempdir().unwrap();
    let output = blurdev(logs.path())
        .args(["protocol", "blurdev://stdoutput/write"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(stderr(&output).contains("missing parameter 'msg'"), "stderr: {}", stderr(&output));
}

#[test]
fn protocol_rejects_bad_tool_index() {
    let dir = tempfile::tempdir().unwrap();
    let tools = dir.path().join("tools.toml");
    std::fs::write(&tools, "[tools.Broken]\nargs = 3\n").unwrap();

    let output = blurdev(dir.path())
        .env("BLURDEV_TOOLS", &tools)
        .args(["protocol", "blurdev://treegrunt/Broken"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(stderr(&output).contains("failed to parse tool index"), "stderr: {}", stderr(&output));
}

#[cfg(unix)]
#[test]
fn protocol_launches_treegrunt_tool() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("launched");
    let tools = dir.path().join("tools.toml");
    std::fs::write(
        &tools,
        format!(
            "[tools.DailyTool]\nprogram = \"touch\"\nargs = [{:?}]\n",
            marker.display().to_string()
        ),
    )
    .unwrap();

    let output = blurdev(dir.path())
        .env("BLURDEV_TOOLS", &tools)
        .args(["protocol", "blurdev://treegrunt/dailytool"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    // The tool is launched detached; give it a moment to run.
    let deadline = Instant::now() + Duration::from_secs(10);
    while !marker.exists() {
        assert!(Instant::now() < deadline, "tool never ran");
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn send_runs_commands_in_child() {
    let logs = tempfile::tempdir().unwrap();
    let output = blurdev(logs.path())
        .args([
            "send",
            "--linger-ms",
            "300",
            "blurdev://stdoutput/write?msg=hello-from-child",
        ])
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    // The child's stdout is the channel, so output lands on the shared stderr.
    assert!(stderr(&output).contains("hello-from-child"), "stderr: {}", stderr(&output));
    assert!(stdout(&output).is_empty());
}

#[test]
fn send_reports_child_failures() {
    let logs = tempfile::tempdir().unwrap();
    let output = blurdev(logs.path())
        .args([
            "send",
            "--linger-ms",
            "1500",
            "blurdev://stdoutput/write?msg=ok",
            "blurdev://stdoutput/write",
        ])
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(stderr(&output).contains("1 command(s) failed"), "stderr: {}", stderr(&output));
}

#[test]
fn send_requires_a_url() {
    let logs = tempfile::tempdir().unwrap();
    let output = blurdev(logs.path()).arg("send").output().unwrap();
    assert!(!output.status.success());
}
