//! Process launching seam
//!
//! The installer talks to the operating system through [`ProcessLauncher`]
//! so tests can script child processes instead of spawning real ones.

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use tracing::debug;

/// What to launch and how.
///
/// `elevated` and `visible` are hints for platforms that distinguish them;
/// the portable launcher runs the process directly either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub elevated: bool,
    pub visible: bool,
}

/// Exit status of a launched process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Code(u32),
    /// The process ended but no exit code could be obtained.
    Unknown,
}

/// A launched process that can be polled and killed.
pub trait ChildProcess: Send {
    /// Non-blocking poll. `Ok(None)` while the process is still running.
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;

    fn kill(&mut self);
}

/// Launches installer processes.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ChildProcess>>;
}

/// Launcher backed by [`std::process::Command`].
#[derive(Debug, Default)]
pub struct SystemLauncher;

impl SystemLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ChildProcess>> {
        debug!(
            "launching {} {:?} (elevated={}, visible={})",
            spec.program.display(),
            spec.args,
            spec.elevated,
            spec.visible
        );
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(Box::new(SystemChild(child)))
    }
}

struct SystemChild(Child);

impl ChildProcess for SystemChild {
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        match self.0.try_wait()? {
            Some(status) => Ok(Some(match status.code() {
                Some(code) => ProcessExit::Code(code as u32),
                // Ended without a code, e.g. killed by a signal.
                None => ProcessExit::Unknown,
            })),
            None => Ok(None),
        }
    }

    fn kill(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}
