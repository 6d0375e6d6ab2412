//! Driver installation
//!
//! [`DriverInstaller`] runs one elevated installer process at a time on a
//! dedicated worker thread. `start` builds the command line for the chosen
//! mechanism and returns immediately; the classified [`InstallOutcome`] is
//! delivered through a channel once the process exits. At most one install
//! runs system-wide; a second `start` while one is in flight is a no-op
//! that returns `false`.

pub mod launcher;

pub use launcher::{ChildProcess, LaunchSpec, ProcessExit, ProcessLauncher, SystemLauncher};

use crate::config::InstallerSettings;
use common::{TaskWorker, WorkerContext, WorkerOptions};
use protocol::{InstallErrorName, InstallMechanism, InstallOutcome};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exit-code placeholder when no code was obtainable.
pub const NO_EXIT_CODE: u32 = u32::MAX;

/// Poll step while waiting for the installer process to exit.
const WAIT_POLL: Duration = Duration::from_millis(200);

/// Quiet-mode flags passed to the staged installer ahead of the package
/// path.
const STAGED_INSTALLER_ARGS: [&str; 3] = ["/Q", "/SH", "/C"];

/// Runs driver installer processes, one at a time.
pub struct DriverInstaller {
    launcher: Arc<dyn ProcessLauncher>,
    worker: TaskWorker,
    /// True from a successful `start` until its outcome was delivered.
    running: Arc<AtomicBool>,
    outcome_tx: async_channel::Sender<InstallOutcome>,
    staged_installer: PathBuf,
    package_root: PathBuf,
}

impl DriverInstaller {
    pub fn new(
        settings: &InstallerSettings,
        launcher: Arc<dyn ProcessLauncher>,
        outcome_tx: async_channel::Sender<InstallOutcome>,
    ) -> Self {
        let opts = WorkerOptions {
            name: "driver-install".to_string(),
            queue_capacity: 1,
            stop_timeout: settings.stop_timeout(),
            ..WorkerOptions::default()
        };
        Self {
            launcher,
            worker: TaskWorker::reactive(opts),
            running: Arc::new(AtomicBool::new(false)),
            outcome_tx,
            staged_installer: settings.staged_installer_path(),
            package_root: settings.package_root(),
        }
    }

    /// Start an installation. Returns `false` without side effects when one
    /// is already running or the worker is unavailable.
    ///
    /// Relative package paths are resolved against the configured package
    /// root.
    pub fn start(&self, mechanism: InstallMechanism, path: &str) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("install already running, rejecting {}", path);
            return false;
        }

        let package = self.resolve_package_path(path);
        let spec = match mechanism {
            InstallMechanism::StagedInstaller => staged_spec(&self.staged_installer, &package),
            InstallMechanism::DirectExecutable => LaunchSpec {
                program: package,
                args: Vec::new(),
                elevated: true,
                visible: true,
            },
        };

        info!(
            "starting driver install: {:?} {}",
            mechanism,
            spec.program.display()
        );
        let mut job = InstallJob {
            launcher: self.launcher.clone(),
            spec,
            mechanism,
            running: self.running.clone(),
            outcome_tx: self.outcome_tx.clone(),
        };
        match self.worker.push(move |ctx: &WorkerContext| job.run(ctx)) {
            Ok(_) => true,
            Err(e) => {
                warn!("could not queue driver install: {}", e);
                self.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the worker. An in-flight installer process is killed; the
    /// return value reports whether the worker wound down within its
    /// timeout.
    pub fn stop(&mut self) -> bool {
        self.worker.stop()
    }

    fn resolve_package_path(&self, path: &str) -> PathBuf {
        let given = Path::new(path);
        if given.is_absolute() {
            given.to_path_buf()
        } else {
            self.package_root.join(given)
        }
    }
}

fn staged_spec(staged_installer: &Path, package: &Path) -> LaunchSpec {
    let mut args: Vec<String> = STAGED_INSTALLER_ARGS.iter().map(|s| s.to_string()).collect();
    args.push("/PATH".to_string());
    args.push(quote_spaces(&package.to_string_lossy()));
    LaunchSpec {
        program: staged_installer.to_path_buf(),
        args,
        elevated: true,
        visible: false,
    }
}

/// Escape embedded spaces the way the staged installer's argument parser
/// expects: each space wrapped in a closing and reopening quote.
pub fn quote_spaces(path: &str) -> String {
    path.replace(' ', "\" \"")
}

/// One queued installation, executed on the worker thread.
struct InstallJob {
    launcher: Arc<dyn ProcessLauncher>,
    spec: LaunchSpec,
    mechanism: InstallMechanism,
    running: Arc<AtomicBool>,
    outcome_tx: async_channel::Sender<InstallOutcome>,
}

impl InstallJob {
    fn run(&mut self, ctx: &WorkerContext) {
        let outcome = self.execute(ctx);
        info!(
            "driver install finished: {:?} exit_code={:#010x}",
            outcome.error_name, outcome.exit_code
        );
        if self.outcome_tx.send_blocking(outcome).is_err() {
            warn!("install outcome dropped, receiver gone");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn execute(&mut self, ctx: &WorkerContext) -> InstallOutcome {
        let mut child = match self.launcher.launch(&self.spec) {
            Ok(child) => child,
            Err(e) => {
                return InstallOutcome {
                    error_name: InstallErrorName::ErrorMessage,
                    error_message: e.to_string(),
                    exit_code: NO_EXIT_CODE,
                };
            }
        };

        loop {
            if ctx.is_stopping() {
                child.kill();
                return InstallOutcome {
                    error_name: InstallErrorName::NoExitCode,
                    error_message: "installation aborted".to_string(),
                    exit_code: NO_EXIT_CODE,
                };
            }
            match child.try_wait() {
                Ok(Some(exit)) => return classify_exit(self.mechanism, exit),
                Ok(None) => thread::sleep(WAIT_POLL),
                Err(e) => {
                    return InstallOutcome {
                        error_name: InstallErrorName::ErrorMessage,
                        error_message: e.to_string(),
                        exit_code: NO_EXIT_CODE,
                    };
                }
            }
        }
    }
}

/// Classify an installer exit for the given mechanism.
///
/// The staged installer reports through the high byte of its exit code:
/// 0x80 set means nothing was installed, 0x40 set means a restart is still
/// required, anything else counts as success. A direct executable fails on
/// any non-zero code.
pub fn classify_exit(mechanism: InstallMechanism, exit: ProcessExit) -> InstallOutcome {
    let code = match exit {
        ProcessExit::Code(code) => code,
        ProcessExit::Unknown => {
            return InstallOutcome {
                error_name: InstallErrorName::NoExitCode,
                error_message: "no exit code".to_string(),
                exit_code: NO_EXIT_CODE,
            };
        }
    };

    match mechanism {
        InstallMechanism::StagedInstaller => {
            let flags = (code >> 24) & 0xff;
            if flags & 0x80 != 0 {
                InstallOutcome {
                    error_name: InstallErrorName::NotInstalled,
                    error_message: "driver package could not be installed".to_string(),
                    exit_code: code,
                }
            } else if flags & 0x40 != 0 {
                InstallOutcome {
                    error_name: InstallErrorName::NeedsRestart,
                    error_message: "a restart is needed to finish the installation".to_string(),
                    exit_code: code,
                }
            } else {
                InstallOutcome::success(code)
            }
        }
        InstallMechanism::DirectExecutable => {
            if code == 0 {
                InstallOutcome::success(code)
            } else {
                InstallOutcome {
                    error_name: InstallErrorName::ExeError,
                    error_message: format!("installer exited with code {:#010x}", code),
                    exit_code: code,
                }
            }
        }
    }
}
