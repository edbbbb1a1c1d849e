// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The command runner: spawn one external process in a controlled
//! environment, capture or stream its output, enforce timeouts, and
//! propagate interrupts.
//!
//! This is the only place the driver blocks. The executor owns a
//! current-thread tokio runtime; each `run` call drives a single child to
//! completion under `block_on`, so sessions stay strictly sequential while
//! the async machinery handles pipes, timers and signal streams.

use crate::{
    errors::{CommandError, ExitReason},
    signal::{ShutdownEvent, SignalHandler},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
    io,
    process::{ExitStatus, Stdio},
    time::Duration,
};
use tokio::{io::AsyncReadExt, process::Child, runtime::Runtime, time::timeout};
use tracing::{debug, warn};

/// Policy for commands that resolve outside the session's bin dir.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExternalPolicy {
    /// Fail with an external-use error before the subprocess is launched.
    Strict,
    /// Log a warning and run the command.
    Warn,
    /// Run silently (the caller passed `external = true`).
    Allow,
}

/// One command invocation, fully composed by the caller.
#[derive(Debug)]
pub struct CommandInvocation<'a> {
    /// The argv to run. Must be non-empty.
    pub argv: &'a [String],
    /// Working directory for the child.
    pub cwd: &'a Utf8Path,
    /// The complete child environment (the runner does not add to it).
    pub env: BTreeMap<String, String>,
    /// The session's scripts directory, if the session has an environment.
    pub bin_dir: Option<&'a Utf8Path>,
    /// What to do when argv[0] resolves outside `bin_dir`.
    pub external_policy: ExternalPolicy,
    /// Exit codes other than zero that count as success.
    pub success_codes: &'a [i32],
    /// Buffer output instead of streaming it.
    pub silent: bool,
    /// Let the child read the driver's stdin.
    pub interactive: bool,
    /// Optional wall-clock limit for the child.
    pub timeout: Option<Duration>,
}

/// What a successful command run produced.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    /// The child's exit code.
    pub exit_code: i32,
    /// Captured output, present when the command ran silently.
    pub output: Option<String>,
}

/// Drives child processes for the whole run.
pub struct Executor {
    runtime: Runtime,
    signals: RefCell<SignalHandler>,
    interrupted: Cell<bool>,
    grace: Duration,
}

impl Executor {
    /// Creates an executor with the given interrupt grace period.
    pub fn new(grace: Duration) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let signals = runtime.block_on(async { SignalHandler::new() })?;
        Ok(Self {
            runtime,
            signals: RefCell::new(signals),
            interrupted: Cell::new(false),
            grace,
        })
    }

    /// An executor that ignores signals. Useful for tests.
    pub fn new_detached(grace: Duration) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            signals: RefCell::new(SignalHandler::noop()),
            interrupted: Cell::new(false),
            grace,
        })
    }

    /// True once a shutdown signal has been observed. The runner loop checks
    /// this between sessions and aborts the remainder.
    pub fn interrupted(&self) -> bool {
        self.interrupted.get()
    }

    /// Runs one command to completion.
    pub fn run(&self, invocation: CommandInvocation<'_>) -> Result<RunOutcome, CommandError> {
        let Some(program) = invocation.argv.first() else {
            return Err(CommandError::ProgramNotFound {
                program: String::new(),
            });
        };
        let command_display = shell_words::join(invocation.argv);

        let resolved = resolve_program(
            program,
            invocation.bin_dir,
            invocation.env.get("PATH").map(String::as_str),
            invocation.cwd,
        )?;
        if let (Resolved::Searched(path), Some(bin_dir)) = (&resolved, invocation.bin_dir)
            && !path.starts_with(bin_dir)
        {
            match invocation.external_policy {
                ExternalPolicy::Strict => {
                    return Err(CommandError::ExternalUse {
                        program: program.clone(),
                        resolved: path.clone(),
                    });
                }
                ExternalPolicy::Warn => {
                    warn!(
                        "`{program}` resolved to `{path}`, outside the session environment; \
                         pass `external = true` to silence this warning"
                    );
                }
                ExternalPolicy::Allow => {}
            }
        }

        debug!("running: {command_display}");

        let mut command = tokio::process::Command::new(resolved.path().as_std_path());
        command
            .args(&invocation.argv[1..])
            .env_clear()
            .envs(&invocation.env)
            .current_dir(invocation.cwd)
            .stdin(if invocation.interactive {
                Stdio::inherit()
            } else {
                Stdio::null()
            });
        if invocation.silent {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let mut signals = self.signals.borrow_mut();
        let grace = self.grace;
        let outcome = self.runtime.block_on(async {
            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(CommandError::ProgramNotFound {
                        program: program.clone(),
                    });
                }
                Err(err) => {
                    return Err(CommandError::Spawn {
                        command: command_display.clone(),
                        err,
                    });
                }
            };

            // Reading the pipes happens in spawned tasks so the wait/signal
            // select below keeps sole access to the child.
            let stdout_task = child.stdout.take().map(|mut pipe| {
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let _ = pipe.read_to_end(&mut buf).await;
                    buf
                })
            });
            let stderr_task = child.stderr.take().map(|mut pipe| {
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let _ = pipe.read_to_end(&mut buf).await;
                    buf
                })
            });

            let deadline = async {
                match invocation.timeout {
                    Some(limit) => {
                        tokio::time::sleep(limit).await;
                        limit
                    }
                    None => std::future::pending().await,
                }
            };

            let status = tokio::select! {
                status = child.wait() => {
                    match status {
                        Ok(status) => status,
                        Err(err) => {
                            return Err(CommandError::Spawn {
                                command: command_display.clone(),
                                err,
                            });
                        }
                    }
                }
                limit = deadline => {
                    terminate(&mut child, grace).await;
                    return Err(CommandError::TimedOut {
                        command: command_display.clone(),
                        timeout: limit,
                    });
                }
                event = signals.recv() => {
                    self.interrupted.set(true);
                    debug!("received {event:?}, terminating child");
                    terminate(&mut child, grace).await;
                    return Err(CommandError::Interrupted {
                        command: command_display.clone(),
                    });
                }
            };

            let output = match (stdout_task, stderr_task) {
                (Some(stdout), Some(stderr)) => {
                    let mut bytes = stdout.await.unwrap_or_default();
                    bytes.extend(stderr.await.unwrap_or_default());
                    Some(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => None,
            };

            Ok(classify(status, &command_display, invocation.success_codes, output))
        });

        match outcome {
            Ok(Ok(run)) => Ok(run),
            Ok(Err(err)) | Err(err) => Err(err),
        }
    }
}

fn classify(
    status: ExitStatus,
    command: &str,
    success_codes: &[i32],
    output: Option<String>,
) -> Result<RunOutcome, CommandError> {
    if let Some(code) = status.code() {
        if code == 0 || success_codes.contains(&code) {
            return Ok(RunOutcome {
                exit_code: code,
                output,
            });
        }
        return Err(CommandError::Failed {
            command: command.to_owned(),
            reason: ExitReason::Code(code),
            output,
        });
    }

    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use std::os::unix::process::ExitStatusExt;
            let reason = match status.signal() {
                Some(signal) => ExitReason::Signal(signal),
                None => ExitReason::Code(-1),
            };
        } else {
            let reason = ExitReason::Code(-1);
        }
    }
    Err(CommandError::Failed {
        command: command.to_owned(),
        reason,
        output,
    })
}

/// How argv[0] was turned into a path.
enum Resolved {
    /// An explicit or absolute path, used as-is.
    Explicit(Utf8PathBuf),
    /// Found by searching bin_dir followed by the inherited `PATH`.
    Searched(Utf8PathBuf),
}

impl Resolved {
    fn path(&self) -> &Utf8Path {
        match self {
            Self::Explicit(path) | Self::Searched(path) => path,
        }
    }
}

fn resolve_program(
    program: &str,
    bin_dir: Option<&Utf8Path>,
    path_env: Option<&str>,
    cwd: &Utf8Path,
) -> Result<Resolved, CommandError> {
    let as_path = Utf8Path::new(program);
    let explicit = as_path.is_absolute()
        || ["./", "../", ".\\", "..\\"]
            .iter()
            .any(|prefix| program.starts_with(prefix));
    if explicit {
        return Ok(Resolved::Explicit(as_path.to_owned()));
    }

    let mut search = String::new();
    if let Some(bin_dir) = bin_dir {
        search.push_str(bin_dir.as_str());
    }
    if let Some(path_env) = path_env {
        if !search.is_empty() {
            search.push(PATH_SEPARATOR);
        }
        search.push_str(path_env);
    }

    let found = which::which_in(program, Some(&search), cwd.as_std_path()).map_err(|_| {
        CommandError::ProgramNotFound {
            program: program.to_owned(),
        }
    })?;
    let found = Utf8PathBuf::try_from(found).map_err(|_| CommandError::ProgramNotFound {
        program: program.to_owned(),
    })?;
    Ok(Resolved::Searched(found))
}

#[cfg(windows)]
const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_SEPARATOR: char = ':';

/// Terminates a child with the interrupt escalation ladder: SIGINT, wait up
/// to the grace period, SIGTERM, wait again, SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            let pid = Pid::from_raw(pid as i32);
            for signal in [Signal::SIGINT, Signal::SIGTERM] {
                let _ = kill(pid, signal);
                if timeout(grace, child.wait()).await.is_ok() {
                    return;
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = grace;
    }
    // SIGKILL (or TerminateProcess on windows), then reap.
    let _ = child.kill().await;
}
