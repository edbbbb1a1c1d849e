// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by senv.

use crate::backends::BackendKind;
use camino::Utf8PathBuf;
use senv_filtering::errors::KeywordParseError;
use std::fmt;
use thiserror::Error;

/// An error that occurred while locating or evaluating the configuration
/// file.
///
/// These abort the run before any session executes, with exit code 3.
#[derive(Debug, Error)]
#[error("failed to load configuration at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigLoadError {
    /// The file that failed to load (or the directory searched, for
    /// [`ConfigLoadErrorKind::NotFound`]).
    pub config_file: Utf8PathBuf,

    /// The underlying cause.
    #[source]
    pub kind: ConfigLoadErrorKind,
}

impl ConfigLoadError {
    pub fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigLoadErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }
}

/// The ways configuration loading can fail.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigLoadErrorKind {
    /// No `senv.toml` was found scanning upward from the invocation
    /// directory.
    #[error("no `senv.toml` found here or in any parent directory")]
    NotFound,

    /// The file could not be read.
    #[error("could not read the file")]
    Io(#[source] std::io::Error),

    /// The file is not valid TOML for the expected schema.
    #[error(transparent)]
    Parse(#[from] Box<toml::de::Error>),

    /// The file parsed but a session declaration is not valid.
    #[error("invalid session `{session}`: {message}")]
    InvalidDecl {
        /// The declared session name.
        session: String,
        /// What is wrong with it.
        message: String,
    },
}

/// An option was unrecognized or ill-typed, in any of the three option
/// layers.
#[derive(Clone, Debug, Error)]
#[error("invalid option `{key}`: {message}")]
pub struct InvalidOptionError {
    /// The option key.
    pub key: String,

    /// What is wrong with the value.
    pub message: String,
}

impl InvalidOptionError {
    pub(crate) fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// The configuration's `needs-version` requirement is not satisfied by this
/// driver.
#[derive(Clone, Debug, Error)]
#[error("this senv is version {current}, but the configuration requires `{required}`")]
pub struct VersionMismatchError {
    /// The requirement string from the configuration.
    pub required: String,

    /// The running driver version.
    pub current: semver::Version,
}

/// Session selection failed: a name was not found, or an explicit selection
/// matched nothing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InvalidSessionError {
    /// A requested session name matched nothing in the registry.
    #[error("session `{name}` not found (known sessions: {})", known.join(", "))]
    UnknownSession {
        /// The requested name.
        name: String,
        /// All known canonical and base names.
        known: Vec<String>,
    },

    /// Filters were given explicitly but selected nothing.
    #[error("no sessions matched the given filters")]
    NoMatch,

    /// The keyword expression failed to parse.
    #[error(transparent)]
    Keyword(#[from] KeywordParseError),
}

/// A problem in the `requires` graph, detected before anything runs.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ScheduleError {
    /// The `requires` edges form a cycle.
    #[error("session requirements form a cycle: {}", cycle.join(" -> "))]
    RequiresCycle {
        /// One cycle, as a witness.
        cycle: Vec<String>,
    },

    /// A `requires` template matched no session instance.
    #[error("session `{session}` requires `{target}`, which matched no session")]
    RequiresMissing {
        /// The requiring instance.
        session: String,
        /// The template, with `{python}` already substituted.
        target: String,
    },
}

/// Every backend in a preference chain reported itself unavailable.
#[derive(Clone, Debug, Error)]
#[error("no virtualenv backend available from chain [{}]", chain.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(", "))]
pub struct BackendUnavailableError {
    /// The chain that was exhausted.
    pub chain: Vec<BackendKind>,
}

/// An interpreter spec did not resolve to an executable.
#[derive(Clone, Debug, Error)]
#[error("no interpreter found for `{spec}`")]
pub struct InterpreterNotFoundError {
    /// The requested spec, e.g. `3.12` or `pypy-3.10`.
    pub spec: String,
}

/// An operation was invoked on a backend that does not support it.
#[derive(Clone, Debug, Error)]
#[error("`{operation}` is not supported by the {backend} backend")]
pub struct UnsupportedOperationError {
    /// The backend in use.
    pub backend: BackendKind,

    /// The operation that was attempted.
    pub operation: &'static str,
}

/// How a finished child process exited.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExitReason {
    /// Exited with the contained non-zero code.
    Code(i32),
    /// Terminated by the contained signal (unix only).
    Signal(i32),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// An error from running one external command.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CommandError {
    /// The program was not found on the composed search path.
    #[error("program `{program}` not found")]
    ProgramNotFound {
        /// The program as given in argv[0].
        program: String,
    },

    /// The program resolved outside the session's bin dir while the external
    /// policy is strict. The subprocess is not launched.
    #[error(
        "`{program}` resolved to `{resolved}`, outside the session environment; \
         pass `external = true` to allow this"
    )]
    ExternalUse {
        /// The program as given in argv[0].
        program: String,
        /// Where it resolved to.
        resolved: Utf8PathBuf,
    },

    /// Spawning the child failed for a reason other than "not found".
    #[error("failed to spawn `{command}`")]
    Spawn {
        /// The rendered command line.
        command: String,
        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The child exited unsuccessfully.
    #[error("command `{command}` failed with {reason}")]
    Failed {
        /// The rendered command line.
        command: String,
        /// How it exited.
        reason: ExitReason,
        /// Captured output, present if the command ran silently.
        output: Option<String>,
    },

    /// The per-command timeout elapsed; the child was terminated.
    #[error("command `{command}` timed out after {}s", timeout.as_secs())]
    TimedOut {
        /// The rendered command line.
        command: String,
        /// The configured timeout.
        timeout: std::time::Duration,
    },

    /// The driver received an interrupt while the child was running; the
    /// child was terminated and the run is being wound down.
    #[error("command `{command}` was interrupted")]
    Interrupted {
        /// The rendered command line.
        command: String,
    },
}

impl CommandError {
    /// Returns the captured output of the failed command, if any.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::Failed { output, .. } => output.as_deref(),
            _ => None,
        }
    }

    /// True if this error is an interrupt (the whole run should wind down).
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

/// An error creating or rebuilding a session environment.
#[derive(Debug, Error)]
#[error("failed to create {backend} environment at `{location}`")]
pub struct EnvCreateError {
    /// The backend that was asked to create the environment.
    pub backend: BackendKind,

    /// The target location under the env root.
    pub location: Utf8PathBuf,

    /// The underlying cause.
    #[source]
    pub kind: EnvCreateErrorKind,
}

/// The ways environment creation can fail.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnvCreateErrorKind {
    /// A filesystem operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The backend's creation tool failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The backend cannot create an environment for this interpreter.
    #[error("{0}")]
    Unsupported(String),
}

/// An error parsing the inline metadata block of a runnable script.
#[derive(Debug, Error)]
#[error("invalid inline metadata in `{script}`")]
pub struct ScriptMetadataError {
    /// The script file.
    pub script: Utf8PathBuf,

    /// The underlying cause.
    #[source]
    pub kind: ScriptMetadataErrorKind,
}

/// The ways inline script metadata can be malformed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScriptMetadataErrorKind {
    /// The script could not be read.
    #[error(transparent)]
    Read(#[from] std::io::Error),

    /// An opening `# /// script` line has no closing `# ///`.
    #[error("metadata block is never closed with `# ///`")]
    Unclosed,

    /// The block's body is not valid key-value metadata.
    #[error("metadata block is not valid TOML")]
    Toml(#[source] toml::de::Error),

    /// The session interpreter does not satisfy `requires-python`.
    #[error("interpreter {python} does not satisfy `requires-python = \"{requirement}\"`")]
    RequiresPython {
        /// The session's interpreter spec.
        python: String,
        /// The script's requirement.
        requirement: String,
    },
}

/// Failure to write the machine-readable report.
#[derive(Debug, Error)]
#[error("failed to write report to `{path}`")]
pub struct ReportWriteError {
    /// The requested report path.
    pub path: Utf8PathBuf,

    /// The underlying error.
    #[source]
    pub err: std::io::Error,
}
