#![allow(dead_code)]

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub fn adapter_bin() -> &'static str {
    env!("CARGO_BIN_EXE_process-adapter")
}

pub fn crashy_bin() -> &'static str {
    env!("CARGO_BIN_EXE_crashy")
}

pub fn good_citizen_bin() -> &'static str {
    env!("CARGO_BIN_EXE_good-citizen")
}

pub fn slow_citizen_bin() -> &'static str {
    env!("CARGO_BIN_EXE_slow-citizen")
}

pub fn bad_citizen_bin() -> &'static str {
    env!("CARGO_BIN_EXE_bad-citizen")
}

/// A fixture process that has installed its signal handlers.
pub struct RunningFixture {
    pub child: Child,
    pub stderr: Arc<Mutex<Vec<String>>>,
}

impl RunningFixture {
    pub fn pid(&self) -> i32 {
        self.child.id() as i32
    }

    pub fn signal(&self, signo: i32) {
        let rc = unsafe { libc::kill(self.pid(), signo) };
        assert_eq!(rc, 0, "failed to send signal {} to {}", signo, self.pid());
    }

    /// Poll for exit for at most `within`.
    pub fn wait_timeout(&mut self, within: Duration) -> Option<ExitStatus> {
        let deadline = Instant::now() + within;
        loop {
            if let Some(status) = self.child.try_wait().unwrap() {
                return Some(status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    pub fn stdout(&mut self) -> String {
        let mut out = String::new();
        if let Some(mut stdout) = self.child.stdout.take() {
            std::io::Read::read_to_string(&mut stdout, &mut out).unwrap();
        }
        out
    }

    /// Stderr is drained on a separate thread, so give it a moment.
    pub fn stderr_contains(&self, needle: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if self.stderr.lock().unwrap().iter().any(|l| l.contains(needle)) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for RunningFixture {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Spawn a fixture and block until it logs that it is ready for signals.
pub fn spawn_fixture(bin: &str, envs: &[(&str, &str)]) -> RunningFixture {
    let mut child = Command::new(bin)
        .env("TRELLIS_LOG", "info")
        .env_remove("TRELLIS_ARGS")
        .envs(envs.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let stderr = child.stderr.take().unwrap();
    let lines = Arc::new(Mutex::new(Vec::new()));
    let (ready_tx, ready_rx) = mpsc::channel();

    let sink = Arc::clone(&lines);
    thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            if line.contains("worker started") {
                let _ = ready_tx.send(());
            }
            sink.lock().unwrap().push(line);
        }
    });

    ready_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("fixture did not report readiness");

    RunningFixture {
        child,
        stderr: lines,
    }
}
