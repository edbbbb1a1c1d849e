// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-run session handle and the step interpreter that drives it.
//!
//! The handle is the API boundary the session body runs against: install and
//! run primitives, working-directory changes, notifications, and the skip /
//! error exits. Steps from the declaration lower onto handle methods one at
//! a time; control flow out of the body is a typed [`BodyOutcome`], never an
//! unwind.

use crate::{
    backends::{BackendKind, Environment, VenvBackend},
    command::{CommandInvocation, Executor, ExternalPolicy},
    config::{LogLevel, RunDetails, Step},
    envbuild::EnvBuilder,
    errors::CommandError,
    expand::SessionInstance,
    options::{InvocationOptions, ScriptMode},
    scripts::ScriptMetadata,
};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// A `notify` recorded while the body ran, drained by the runner loop after
/// the session finishes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    /// The target session name (possibly with an argument suffix).
    pub target: String,
    /// Posargs to forward, replacing the target's own.
    pub posargs: Option<Vec<String>>,
}

/// How a session body ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BodyOutcome {
    /// Ran to completion.
    Success,
    /// A `skip` step fired.
    Skipped {
        /// The skip message, if one was given.
        reason: Option<String>,
    },
    /// A command failed, an `error` step fired, or setup inside the body
    /// failed.
    Failed {
        /// A short reason, prefixed with the error kind.
        reason: String,
        /// Captured output of the failing command, when it ran silently.
        excerpt: Option<String>,
    },
    /// The driver was interrupted while a command ran.
    Interrupted,
}

/// The per-instance façade the session body runs against.
pub struct SessionHandle<'a> {
    instance: &'a SessionInstance,
    env: &'a Environment,
    backend: &'a dyn VenvBackend,
    exec: &'a Executor,
    options: &'a InvocationOptions,
    /// stdin is a tty and `--non-interactive` was not given.
    interactive: bool,
    /// The working directory for subsequent commands. `chdir` steps change
    /// it; the original directory is restored simply by this value dying
    /// with the handle.
    cwd: Utf8PathBuf,
    tmp: Option<Utf8PathBuf>,
    notifications: Vec<Notification>,
}

impl<'a> SessionHandle<'a> {
    pub fn new(
        instance: &'a SessionInstance,
        env: &'a Environment,
        backend: &'a dyn VenvBackend,
        exec: &'a Executor,
        options: &'a InvocationOptions,
        interactive: bool,
    ) -> Self {
        Self {
            instance,
            env,
            backend,
            exec,
            options,
            interactive,
            cwd: options.invoked_from.clone(),
            tmp: None,
            notifications: Vec::new(),
        }
    }

    /// The canonical instance name.
    pub fn name(&self) -> &str {
        &self.instance.name
    }

    /// The interpreter spec this instance runs against, if any.
    pub fn python(&self) -> Option<&str> {
        self.instance.python.as_deref()
    }

    /// The backend serving this session.
    pub fn venv_backend(&self) -> BackendKind {
        self.backend.kind()
    }

    /// The environment directory.
    pub fn env_dir(&self) -> &Utf8Path {
        &self.env.location
    }

    /// This instance's positional arguments.
    pub fn posargs(&self) -> &[String] {
        &self.instance.posargs
    }

    /// The directory senv was invoked from; commands start here.
    pub fn invoked_from(&self) -> &Utf8Path {
        &self.options.invoked_from
    }

    /// Whether the session may prompt on stdin.
    pub fn interactive(&self) -> bool {
        self.interactive
    }

    /// Notifications recorded by the body, in order.
    pub fn into_notifications(self) -> Vec<Notification> {
        self.notifications
    }

    /// Runs the session body to a typed outcome.
    pub fn run_body(&mut self) -> BodyOutcome {
        let steps = self.instance.decl.steps.clone();
        for step in &steps {
            let outcome = self.run_step(step);
            if !matches!(outcome, BodyOutcome::Success) {
                return outcome;
            }
        }
        BodyOutcome::Success
    }

    fn run_step(&mut self, step: &Step) -> BodyOutcome {
        match step {
            Step::Install(details) => self.install(details),
            Step::CondaInstall { details, channels } => self.conda_install(details, channels),
            Step::Run(details) => {
                if self.options.install_only {
                    debug!("skipping `run` step (--install-only)");
                    return BodyOutcome::Success;
                }
                self.run_argv(details, false)
            }
            Step::RunInstall(details) => {
                if self.skip_install_phase() {
                    debug!("skipping `run-install` step (environment reused)");
                    return BodyOutcome::Success;
                }
                self.run_argv(details, false)
            }
            Step::RunScript { path, details } => self.run_script(path, details),
            Step::Chdir(path) => self.chdir(path),
            Step::Notify { target, posargs } => {
                self.notifications.push(Notification {
                    target: target.clone(),
                    posargs: posargs.clone(),
                });
                BodyOutcome::Success
            }
            Step::Log { level, message } => {
                match level {
                    LogLevel::Debug => debug!("{message}"),
                    LogLevel::Info => info!("{message}"),
                    LogLevel::Warn => warn!("{message}"),
                }
                BodyOutcome::Success
            }
            Step::Error { message } => BodyOutcome::Failed {
                reason: message.clone(),
                excerpt: None,
            },
            Step::Skip { message } => BodyOutcome::Skipped {
                reason: (!message.is_empty()).then(|| message.clone()),
            },
        }
    }

    /// True when install primitives should be skipped: the environment was
    /// reused and `--no-install` is in effect.
    fn skip_install_phase(&self) -> bool {
        self.env.reused && self.options.no_install
    }

    fn install(&mut self, details: &RunDetails) -> BodyOutcome {
        if self.skip_install_phase() {
            debug!("skipping `install` step (environment reused)");
            return BodyOutcome::Success;
        }

        let argv = match self.backend.install_argv(self.env, &details.argv) {
            Ok(argv) => argv,
            Err(err) if self.backend.kind() == BackendKind::None && details.external => {
                // The documented escape hatch: an explicitly external
                // install mutates the host interpreter.
                warn!(
                    "session `{}` installs into the host interpreter; this is deprecated",
                    self.instance.name
                );
                let _ = err;
                let mut argv = vec![
                    host_python().to_owned(),
                    "-m".to_owned(),
                    "pip".to_owned(),
                    "install".to_owned(),
                ];
                argv.extend(details.argv.iter().cloned());
                argv
            }
            Err(err) => {
                return BodyOutcome::Failed {
                    reason: format!("unsupported-operation: {err}"),
                    excerpt: None,
                };
            }
        };
        self.run_resolved(argv, details, true)
    }

    fn conda_install(&mut self, details: &RunDetails, channels: &[String]) -> BodyOutcome {
        if self.skip_install_phase() {
            debug!("skipping `conda-install` step (environment reused)");
            return BodyOutcome::Success;
        }
        if channels.is_empty() {
            warn!(
                "session `{}` uses conda-install without channels; the tool's defaults apply",
                self.instance.name
            );
        }
        let argv = match self
            .backend
            .conda_install_argv(self.env, &details.argv, channels)
        {
            Ok(argv) => argv,
            Err(err) => {
                return BodyOutcome::Failed {
                    reason: format!("unsupported-operation: {err}"),
                    excerpt: None,
                };
            }
        };
        self.run_resolved(argv, details, true)
    }

    fn run_script(&mut self, path: &str, details: &RunDetails) -> BodyOutcome {
        let path = match self.expand_one(path) {
            Ok(path) => Utf8PathBuf::from(path),
            Err(reason) => return BodyOutcome::Failed { reason, excerpt: None },
        };
        let metadata = match ScriptMetadata::load(&path) {
            Ok(metadata) => metadata,
            Err(err) => {
                return BodyOutcome::Failed {
                    reason: format!("command-failed: {err}"),
                    excerpt: None,
                };
            }
        };

        if let Some(spec) = &self.instance.python
            && let Err(err) =
                metadata.check_requires_python(&crate::interpreter::InterpreterSpec::new(spec))
        {
            return BodyOutcome::Failed {
                reason: format!("command-failed: {err}"),
                excerpt: None,
            };
        }

        let install_deps = match self.options.script_mode {
            ScriptMode::None => false,
            ScriptMode::Fresh => !metadata.dependencies.is_empty(),
            ScriptMode::Reuse => {
                !metadata.dependencies.is_empty() && !self.skip_install_phase()
            }
        };
        if install_deps {
            let install_details = RunDetails {
                argv: metadata.dependencies.clone(),
                ..details.clone()
            };
            // `fresh` mode reinstalls even when installs are skipped, so go
            // through the backend directly rather than `install`.
            let argv = match self.backend.install_argv(self.env, &install_details.argv) {
                Ok(argv) => argv,
                Err(err) => {
                    return BodyOutcome::Failed {
                        reason: format!("unsupported-operation: {err}"),
                        excerpt: None,
                    };
                }
            };
            let outcome = self.run_resolved(argv, &install_details, true);
            if !matches!(outcome, BodyOutcome::Success) {
                return outcome;
            }
        }

        let interpreter = self
            .env
            .interpreter
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| host_python().to_owned());
        self.run_resolved(vec![interpreter, path.to_string()], details, false)
    }

    fn chdir(&mut self, path: &str) -> BodyOutcome {
        let path = match self.expand_one(path) {
            Ok(path) => path,
            Err(reason) => return BodyOutcome::Failed { reason, excerpt: None },
        };
        let target = self.cwd.join(path);
        if !target.is_dir() {
            return BodyOutcome::Failed {
                reason: format!("command-failed: `{target}` is not a directory"),
                excerpt: None,
            };
        }
        debug!("changing directory to {target}");
        self.cwd = target;
        BodyOutcome::Success
    }

    fn run_argv(&mut self, details: &RunDetails, install_phase: bool) -> BodyOutcome {
        let argv = match self.expand_argv(&details.argv) {
            Ok(argv) => argv,
            Err(reason) => return BodyOutcome::Failed { reason, excerpt: None },
        };
        self.run_resolved(argv, details, install_phase)
    }

    /// Runs an already-expanded argv under the step's settings.
    fn run_resolved(
        &mut self,
        argv: Vec<String>,
        details: &RunDetails,
        install_phase: bool,
    ) -> BodyOutcome {
        // Install output is noise unless something goes wrong; run output is
        // the point of the session.
        let silent = details
            .silent
            .unwrap_or(install_phase && !self.options.verbose);

        let external_policy = if details.external {
            ExternalPolicy::Allow
        } else if self.options.error_on_external_run {
            ExternalPolicy::Strict
        } else {
            ExternalPolicy::Warn
        };

        let invocation = CommandInvocation {
            argv: &argv,
            cwd: &self.cwd,
            env: self.compose_env(details),
            bin_dir: self.env.bin_dir.as_deref(),
            external_policy,
            success_codes: &details.success_codes,
            silent,
            interactive: self.interactive,
            timeout: details.timeout,
        };

        match self.exec.run(invocation) {
            Ok(_) => BodyOutcome::Success,
            Err(err) => self.failed_command(err),
        }
    }

    fn failed_command(&self, err: CommandError) -> BodyOutcome {
        if err.is_interrupt() {
            return BodyOutcome::Interrupted;
        }
        // Buffered output surfaces at warning level no matter what the
        // reporter does with the excerpt.
        if let Some(output) = err.captured_output()
            && !output.trim().is_empty()
        {
            warn!("{}", output.trim_end());
        }
        let excerpt = err.captured_output().map(str::to_owned);
        let reason = match &err {
            CommandError::ExternalUse { .. } => format!("external-use: {err}"),
            CommandError::ProgramNotFound { .. }
            | CommandError::Spawn { .. }
            | CommandError::Failed { .. }
            | CommandError::TimedOut { .. } => format!("command-failed: {err}"),
            CommandError::Interrupted { .. } => "interrupted".to_owned(),
        };
        BodyOutcome::Failed { reason, excerpt }
    }

    fn compose_env(&self, details: &RunDetails) -> BTreeMap<String, String> {
        let mut builder = if details.include_outer_env {
            EnvBuilder::from_host()
        } else {
            EnvBuilder::empty()
        };
        builder.apply_overlay(
            self.backend
                .env_overlay(self.env)
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        let decl_env = self.instance.decl.env.clone();
        builder.apply_calls(decl_env.iter().map(|(k, v)| (k.as_str(), v)));
        builder.apply_calls(details.env.iter().map(|(k, v)| (k.as_str(), v)));
        builder.finish()
    }

    /// Creates (once) and returns the per-session scratch directory inside
    /// the environment.
    pub fn create_tmp(&mut self) -> Result<Utf8PathBuf, String> {
        if let Some(tmp) = &self.tmp {
            return Ok(tmp.clone());
        }
        let tmp = self.env.location.join("tmp");
        if tmp.exists() {
            fs_err::remove_dir_all(&tmp)
                .map_err(|err| format!("command-failed: could not clear `{tmp}`: {err}"))?;
        }
        fs_err::create_dir_all(&tmp)
            .map_err(|err| format!("command-failed: could not create `{tmp}`: {err}"))?;
        self.tmp = Some(tmp.clone());
        Ok(tmp)
    }

    fn expand_argv(&mut self, argv: &[String]) -> Result<Vec<String>, String> {
        let mut out = Vec::with_capacity(argv.len());
        for element in argv {
            if element == "{posargs}" {
                out.extend(self.instance.posargs.iter().cloned());
            } else {
                out.push(self.expand_one(element)?);
            }
        }
        Ok(out)
    }

    fn expand_one(&mut self, element: &str) -> Result<String, String> {
        let mut value = element.to_owned();
        if value.contains("{posargs}") {
            value = value.replace("{posargs}", &self.instance.posargs.join(" "));
        }
        if value.contains("{python}") {
            value = value.replace("{python}", self.instance.python.as_deref().unwrap_or(""));
        }
        if value.contains("{envdir}") {
            value = value.replace("{envdir}", self.env.location.as_str());
        }
        if value.contains("{tmp}") {
            let tmp = self.create_tmp()?;
            value = value.replace("{tmp}", tmp.as_str());
        }
        Ok(value)
    }
}

/// The host's default interpreter name, for passthrough sessions.
fn host_python() -> &'static str {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            "python"
        } else {
            "python3"
        }
    }
}

/// Whether sessions run interactively: stdin is a tty and the invocation
/// did not pass `--non-interactive`.
pub fn stdin_interactive(options: &InvocationOptions) -> bool {
    use std::io::IsTerminal;
    std::io::stdin().is_terminal() && !options.non_interactive
}
