// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing and the top-level run flow.

use crate::{
    errors::{ExpectedError, Result},
    output::OutputOpts,
};
use camino::Utf8PathBuf;
use clap::Parser;
use senv_metadata::SenvExitCode;
use senv_runner::{
    command::Executor,
    config::{CheckError, SenvConfig, check_needs_version, current_version, discover_config_file},
    expand::expand,
    list::{write_human_list, write_json_list},
    manifest::Manifest,
    options::{CliOverrides, InvocationOptions, current_dir_utf8},
    reporter::{Reporter, write_report},
    runner::{SessionRunner, run_succeeded},
    selector::select,
    session::stdin_interactive,
    signal::reraise_interrupt,
};
use std::sync::Arc;
use supports_color::Stream;
use tracing::debug;

/// senv: run sessions in isolated per-task environments.
///
/// Sessions are declared in `senv.toml`. A bare `senv` runs every
/// default-selected session; filters narrow the set down. Trailing
/// arguments after `--` are passed through to the sessions as posargs.
#[derive(Debug, Parser)]
#[command(name = "senv", version, about, max_term_width = 100)]
pub struct CliOpts {
    /// Select sessions by name (repeatable; patterns include parametric
    /// tails like `tests(old)`)
    #[arg(
        long = "sessions",
        short = 's',
        short_alias = 'e',
        value_name = "NAME",
        num_args = 1..,
        env = "SENV_SESSION",
        value_delimiter = ',',
        help_heading = "Selection"
    )]
    sessions: Option<Vec<String>>,

    /// Select sessions by interpreter version
    #[arg(
        long = "python",
        short = 'p',
        value_name = "VERSION",
        num_args = 1..,
        env = "SENV_PYTHON",
        value_delimiter = ',',
        help_heading = "Selection"
    )]
    pythons: Option<Vec<String>>,

    /// Boolean expression over name substrings and tags, e.g. `tests and
    /// not slow`
    #[arg(
        long,
        short = 'k',
        value_name = "EXPR",
        env = "SENV_KEYWORDS",
        help_heading = "Selection"
    )]
    keywords: Option<String>,

    /// Select sessions carrying any of these tags
    #[arg(
        long,
        short = 't',
        value_name = "TAG",
        num_args = 1..,
        env = "SENV_TAGS",
        value_delimiter = ',',
        help_heading = "Selection"
    )]
    tags: Option<Vec<String>>,

    /// List sessions instead of running them
    #[arg(long, short = 'l', help_heading = "Listing")]
    list: bool,

    /// With --list, emit machine-readable JSON
    #[arg(long, requires = "list", help_heading = "Listing")]
    json: bool,

    /// Path to the configuration file [default: nearest senv.toml]
    #[arg(long = "config-file", short = 'f', value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    /// Root directory for session environments
    #[arg(long, value_name = "DIR", env = "SENV_ENVDIR", help_heading = "Environments")]
    envdir: Option<Utf8PathBuf>,

    /// Reuse policy for existing environments
    #[arg(
        long = "reuse-venv",
        value_name = "WHEN",
        env = "SENV_REUSE_VENV",
        value_parser = ["always", "yes", "no", "never"],
        help_heading = "Environments"
    )]
    reuse_venv: Option<String>,

    /// Shorthand for --reuse-venv yes
    #[arg(short = 'r', help_heading = "Environments")]
    reuse_existing: bool,

    /// Shorthand for --reuse-venv yes --no-install
    #[arg(short = 'R', help_heading = "Environments")]
    reuse_and_skip_installs: bool,

    /// Skip install primitives when an environment is reused
    #[arg(long = "no-install", help_heading = "Environments")]
    no_install: bool,

    /// Backend for sessions that do not declare one
    #[arg(
        long = "default-venv-backend",
        alias = "db",
        value_name = "BACKEND",
        env = "SENV_DEFAULT_VENV_BACKEND",
        help_heading = "Environments"
    )]
    default_venv_backend: Option<String>,

    /// Backend override for every session, regardless of declarations
    #[arg(
        long = "force-venv-backend",
        alias = "fb",
        value_name = "BACKEND",
        env = "SENV_FORCE_VENV_BACKEND",
        help_heading = "Environments"
    )]
    force_venv_backend: Option<String>,

    /// Run every session directly on the host, with no environment
    #[arg(long = "no-venv", help_heading = "Environments")]
    no_venv: bool,

    /// Fail (instead of skip) sessions whose interpreter is missing
    #[arg(
        long = "error-on-missing-interpreters",
        overrides_with = "no_error_on_missing_interpreters",
        env = "SENV_ERROR_ON_MISSING_INTERPRETER",
        help_heading = "Policies"
    )]
    error_on_missing_interpreters: bool,

    /// Skip sessions whose interpreter is missing (the default off CI)
    #[arg(long = "no-error-on-missing-interpreters", help_heading = "Policies")]
    no_error_on_missing_interpreters: bool,

    /// Fail commands that resolve outside the session environment
    #[arg(
        long = "error-on-external-run",
        overrides_with = "no_error_on_external_run",
        env = "SENV_ERROR_ON_EXTERNAL_RUN",
        help_heading = "Policies"
    )]
    error_on_external_run: bool,

    /// Only warn about commands that resolve outside the environment
    #[arg(long = "no-error-on-external-run", help_heading = "Policies")]
    no_error_on_external_run: bool,

    /// Abort the remaining sessions after the first failure
    #[arg(
        long = "stop-on-first-error",
        overrides_with = "no_stop_on_first_error",
        env = "SENV_STOP_ON_FIRST_ERROR",
        help_heading = "Policies"
    )]
    stop_on_first_error: bool,

    /// Keep running the remaining sessions after a failure
    #[arg(long = "no-stop-on-first-error", help_heading = "Policies")]
    no_stop_on_first_error: bool,

    /// Policy for auto-downloading missing interpreters
    #[arg(
        long = "download-python",
        value_name = "WHEN",
        env = "SENV_DOWNLOAD_PYTHON",
        value_parser = ["auto", "always", "never"],
        help_heading = "Policies"
    )]
    download_python: Option<String>,

    /// Write a JSON status report to this path
    #[arg(long, value_name = "PATH", env = "SENV_REPORT")]
    report: Option<Utf8PathBuf>,

    /// Skip `run` steps; only install primitives execute
    #[arg(long = "install-only", env = "SENV_INSTALL_ONLY")]
    install_only: bool,

    /// Never treat stdin as interactive, even on a tty
    #[arg(long = "non-interactive", env = "SENV_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Add interpreters to every session's declared list
    #[arg(
        long = "extra-pythons",
        value_name = "VERSION",
        num_args = 1..,
        value_delimiter = ',',
        help_heading = "Selection"
    )]
    extra_pythons: Vec<String>,

    /// Replace every session's interpreter with this one
    #[arg(long = "force-python", value_name = "VERSION", help_heading = "Selection")]
    force_python: Option<String>,

    /// Dependency policy for `run-script` steps
    #[arg(
        long = "script-mode",
        value_name = "MODE",
        env = "SENV_SCRIPT_MODE",
        value_parser = ["reuse", "fresh", "none"],
        help_heading = "Policies"
    )]
    script_mode: Option<String>,

    /// Backend for script-step dependency installs (currently informational)
    #[arg(long = "script-venv-backend", value_name = "BACKEND", hide = true)]
    script_venv_backend: Option<String>,

    #[clap(flatten)]
    output: OutputOpts,

    /// Arguments to forward to the sessions
    #[arg(last = true, value_name = "POSARGS")]
    posargs: Vec<String>,
}

impl CliOpts {
    fn to_overrides(&self) -> CliOverrides {
        let reuse = if let Some(value) = &self.reuse_venv {
            Some(value.clone())
        } else if self.reuse_existing || self.reuse_and_skip_installs {
            Some("yes".to_owned())
        } else {
            None
        };
        CliOverrides {
            envdir: self.envdir.clone(),
            sessions: self.sessions.clone(),
            pythons: self.pythons.clone(),
            keywords: self.keywords.clone(),
            tags: self.tags.clone(),
            default_backend: self.default_venv_backend.clone(),
            force_backend: self.force_venv_backend.clone(),
            no_venv: self.no_venv,
            reuse,
            no_install: self.no_install || self.reuse_and_skip_installs,
            stop_on_first_error: flag_pair(self.stop_on_first_error, self.no_stop_on_first_error),
            error_on_missing_interpreters: flag_pair(
                self.error_on_missing_interpreters,
                self.no_error_on_missing_interpreters,
            ),
            error_on_external_run: flag_pair(
                self.error_on_external_run,
                self.no_error_on_external_run,
            ),
            download_python: self.download_python.clone(),
            report: self.report.clone(),
            verbose: self.output.verbose,
            non_interactive: self.non_interactive,
            install_only: self.install_only,
            script_mode: self.script_mode.clone(),
            extra_pythons: self.extra_pythons.clone(),
            force_python: self.force_python.clone(),
            posargs: self.posargs.clone(),
        }
    }
}

fn flag_pair(on: bool, off: bool) -> Option<bool> {
    if on {
        Some(true)
    } else if off {
        Some(false)
    } else {
        None
    }
}

/// Runs the invocation to an exit code.
pub fn run(opts: CliOpts) -> Result<i32> {
    let output = opts.output.init();
    if let Some(backend) = &opts.script_venv_backend {
        debug!("--script-venv-backend {backend} has no effect with declarative configuration");
    }

    let invoked_from = current_dir_utf8();
    let config_file = discover_config_file(opts.config_file.as_deref(), &invoked_from)?;
    let config = SenvConfig::from_file(&config_file)?;

    if let Some(requirement) = &config.needs_version {
        match check_needs_version(&config_file, requirement, &current_version()) {
            Ok(()) => {}
            Err(CheckError::Invalid(err)) => return Err(err.into()),
            Err(CheckError::Mismatch(err)) => return Err(err.into()),
        }
    }

    let options = InvocationOptions::merge(opts.to_overrides(), &config.options, invoked_from)?;
    let decls: Vec<Arc<_>> = config.sessions.into_iter().map(Arc::new).collect();
    let all = expand(&decls, &options);
    let selected = select(&all, &options)?;

    let colorize = output.color.should_colorize(Stream::Stderr);

    if opts.list {
        let mut stdout = std::io::stdout();
        if opts.json {
            write_json_list(&mut stdout, &selected).map_err(write_failed)?;
        } else {
            write_human_list(&mut stdout, &all, &selected, colorize).map_err(write_failed)?;
        }
        return Ok(SenvExitCode::OK);
    }

    if selected.is_empty() {
        // An explicitly empty selection lists the sessions and runs
        // nothing, successfully.
        let mut stderr = std::io::stderr();
        write_human_list(&mut stderr, &all, &selected, colorize).map_err(write_failed)?;
        return Ok(SenvExitCode::OK);
    }

    let manifest = Manifest::build(selected, &all)?;
    debug!(
        "manifest: {}",
        manifest.names().collect::<Vec<_>>().join(", ")
    );

    let exec = Executor::new(options.interrupt_grace).map_err(ExpectedError::ExecutorSetup)?;
    debug!(
        "interactive: {}",
        stdin_interactive(&options),
    );

    let mut reporter = Reporter::new(std::io::stderr(), colorize);
    let runner = SessionRunner::new(&options, &all, &exec);
    let results = runner.run(manifest, &mut reporter);
    reporter.summary(&results);

    if let Some(path) = &options.report {
        write_report(path, &results)?;
    }

    if exec.interrupted() {
        // Children are cleaned up; die by the signal we were sent.
        drop(exec);
        reraise_interrupt();
    }

    Ok(if run_succeeded(&results) {
        SenvExitCode::OK
    } else {
        SenvExitCode::RUN_FAILED
    })
}

fn write_failed(err: std::io::Error) -> ExpectedError {
    ExpectedError::WriteOutput(err)
}
