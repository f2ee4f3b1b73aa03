//! Real subprocesses under supervision.

use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tracing::debug;
use trellis_process::{ExitKind, Invocation, Supervised};

/// What to run: a program and its fixed arguments.
///
/// Parameters never go on the command line; they travel in the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build the command with the invocation encoded into its environment.
    pub fn command(&self, invocation: &Invocation) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(invocation.to_env())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

/// A spawned child the escalation ladder can drive.
#[derive(Debug)]
pub struct SupervisedChild {
    child: Child,
    pid: Option<u32>,
    exit: Option<ExitKind>,
}

impl SupervisedChild {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            exit: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    /// Deliver `signo`. `Ok(false)` if the process is already gone.
    #[cfg(unix)]
    pub fn send_signal(&mut self, signo: i32) -> io::Result<bool> {
        if self.try_exit()?.is_some() {
            return Ok(false);
        }
        let Some(pid) = self.child.id() else {
            return Ok(false);
        };

        let rc = unsafe { libc::kill(pid as i32, signo) };
        if rc == 0 {
            debug!(pid, signo, "signal sent");
            return Ok(true);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(false)
        } else {
            Err(err)
        }
    }
}

impl Supervised for SupervisedChild {
    #[cfg(unix)]
    fn request_termination(&mut self) -> io::Result<bool> {
        self.send_signal(libc::SIGTERM)
    }

    /// No interceptable termination request exists here; the ladder goes
    /// straight to waiting out the grace period.
    #[cfg(not(unix))]
    fn request_termination(&mut self) -> io::Result<bool> {
        Ok(false)
    }

    fn force_kill(&mut self) -> io::Result<()> {
        if self.try_exit()?.is_some() {
            return Ok(());
        }
        match self.child.start_kill() {
            Ok(()) => {
                debug!(pid = ?self.pid, "forced kill sent");
                Ok(())
            }
            // Exited between the check and the kill
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn try_exit(&mut self) -> io::Result<Option<ExitKind>> {
        if self.exit.is_none() {
            self.exit = self.child.try_wait()?.map(exit_kind);
        }
        Ok(self.exit)
    }
}

pub fn exit_kind(status: ExitStatus) -> ExitKind {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signo) = status.signal() {
            return if signo == libc::SIGKILL {
                ExitKind::Killed
            } else {
                ExitKind::Signalled(signo)
            };
        }
    }
    ExitKind::Exited(status.code().unwrap_or(-1))
}
