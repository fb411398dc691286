// End-to-end runs of the instance-guard binary as separate processes.
//
// Every test gets its own runtime dir, so the lock and wake names never
// collide with another test or with a real instance on the machine.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

const APP_ID: &str = "com.example.cli";
const TIMEOUT: Duration = Duration::from_secs(10);

fn guard_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_instance-guard"));
    cmd.arg("--config")
        .arg(dir.path().join("missing.toml"))
        .arg("--runtime-dir")
        .arg(runtime_dir(dir))
        .arg("--app-id")
        .arg(APP_ID)
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

fn runtime_dir(dir: &TempDir) -> PathBuf {
    dir.path().join("run")
}

/// A long-running launch whose log lines are collected on a background thread.
struct Running {
    child: Child,
    lines: Receiver<String>,
}

impl Running {
    fn start(dir: &TempDir) -> Self {
        let mut child = guard_cmd(dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let stderr = child.stderr.take().unwrap();
        let (tx, lines) = mpsc::channel();
        std::thread::spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        Self { child, lines }
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Block until a log line containing `needle` shows up.
    fn expect_log(&self, needle: &str) {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(left) {
                Ok(line) if line.contains(needle) => return,
                Ok(_) => {}
                Err(e) => panic!("no log line containing {needle:?}: {e}"),
            }
        }
    }

    fn terminate(&mut self) -> ExitStatus {
        kill(Pid::from_raw(self.pid() as i32), Signal::SIGTERM).unwrap();
        let deadline = Instant::now() + TIMEOUT;
        loop {
            if let Some(status) = self.child.try_wait().unwrap() {
                return status;
            }
            assert!(Instant::now() < deadline, "instance did not exit on SIGTERM");
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn status(dir: &TempDir) -> Value {
    let output = guard_cmd(dir).arg("--status").output().unwrap();
    assert!(output.status.success(), "--status failed: {output:?}");
    serde_json::from_slice(&output.stdout).unwrap()
}

fn wait_for_primary(dir: &TempDir, pid: u32) {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let status = status(dir);
        if status["state"] == "running" && status["record"]["pid"] == pid {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "pid {pid} never became primary, last status {status}"
        );
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn lock_path(dir: &TempDir) -> PathBuf {
    runtime_dir(dir).join(format!("{APP_ID}.lock"))
}

fn assert_missing(path: &Path) {
    assert!(!path.exists(), "{} should not exist", path.display());
}

#[test]
fn test_status_without_instance_is_not_running() {
    let dir = tempdir().unwrap();

    assert_eq!(status(&dir)["state"], "not_running");
    assert_missing(&lock_path(&dir));
}

#[test]
fn test_second_launch_wakes_first_and_relaunch_takes_over() {
    let dir = tempdir().unwrap();

    let mut first = Running::start(&dir);
    wait_for_primary(&dir, first.pid());

    let second = guard_cmd(&dir).output().unwrap();
    assert!(second.status.success(), "secondary failed: {second:?}");
    let second_log = String::from_utf8_lossy(&second.stderr);
    assert!(
        second_log.contains("already running"),
        "unexpected secondary log: {second_log}"
    );

    first.expect_log("foreground requested by another launch");

    let exit = first.terminate();
    assert!(exit.success(), "primary exited with {exit}");
    first.expect_log("released instance lock");
    assert_eq!(status(&dir)["state"], "not_running");

    let mut third = Running::start(&dir);
    wait_for_primary(&dir, third.pid());
    let exit = third.terminate();
    assert!(exit.success(), "relaunched primary exited with {exit}");
}

#[test]
fn test_only_one_primary_among_concurrent_launches() {
    let dir = tempdir().unwrap();

    let mut first = Running::start(&dir);
    wait_for_primary(&dir, first.pid());

    let secondaries: Vec<Child> = (0..4)
        .map(|_| {
            guard_cmd(&dir)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .unwrap()
        })
        .collect();
    for mut child in secondaries {
        assert!(child.wait().unwrap().success());
    }

    // Still the original owner.
    wait_for_primary(&dir, first.pid());
    assert!(first.terminate().success());
}
