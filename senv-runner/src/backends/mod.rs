// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pluggable virtual-environment backends.
//!
//! A backend knows how to create an isolated environment at a location,
//! which executable inside it is the interpreter, which directory holds its
//! scripts, which process-environment keys it wants injected, and how to
//! build an install command. The engine drives backends through the
//! [`VenvBackend`] trait; which backend serves a session is decided by the
//! session's preference chain and the invocation options.

mod conda;
mod passthrough;
mod uv;
mod venv;
mod virtualenv;

pub use conda::CondaBackend;
pub use passthrough::PassthroughBackend;
pub use uv::UvBackend;
pub use venv::VenvModuleBackend;
pub use virtualenv::VirtualenvBackend;

use crate::{
    command::Executor,
    errors::{
        BackendUnavailableError, EnvCreateError, EnvCreateErrorKind, UnsupportedOperationError,
    },
    options::{DownloadPython, ReusePolicy},
};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

/// The name of the hidden metadata file recording an environment's
/// fingerprint, used for staleness detection.
const MARKER_FILE: &str = ".senv-info.json";

/// The shared cross-session cache directory under an env root. Backends may
/// park downloadable artifacts (e.g. managed interpreters) here.
pub const CACHE_DIR_NAME: &str = ".cache";

/// The shared cache directory for an env root.
pub fn shared_cache_dir(envroot: &Utf8Path) -> Utf8PathBuf {
    envroot.join(CACHE_DIR_NAME)
}

/// Opens the advisory lock guarding writes into the shared cache. The env
/// directory itself is session-exclusive, but the cache is not, so creators
/// serialize on this file.
fn cache_lock(envroot: &Utf8Path) -> std::io::Result<fd_lock::RwLock<std::fs::File>> {
    let cache = shared_cache_dir(envroot);
    fs_err::create_dir_all(&cache)?;
    let file = fs_err::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(cache.join(".lock"))?;
    Ok(fd_lock::RwLock::new(file.into_parts().0))
}

/// The kinds of environment backends senv knows about.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The external `virtualenv` tool. The default.
    Virtualenv,
    /// The interpreter's own `venv` module.
    Venv,
    /// `conda`.
    Conda,
    /// `mamba`.
    Mamba,
    /// `micromamba`.
    Micromamba,
    /// The uv resolver's venv support.
    Uv,
    /// No environment; commands run against the host.
    None,
}

impl BackendKind {
    /// Every kind, in display order.
    pub const ALL: &'static [Self] = &[
        Self::Virtualenv,
        Self::Venv,
        Self::Conda,
        Self::Mamba,
        Self::Micromamba,
        Self::Uv,
        Self::None,
    ];

    /// True for backends that can never be unavailable. These may only
    /// appear last in a preference chain.
    pub fn always_available(self) -> bool {
        matches!(self, Self::Virtualenv | Self::Venv | Self::None)
    }

    /// True for the conda family of backends.
    pub fn is_conda_family(self) -> bool {
        matches!(self, Self::Conda | Self::Mamba | Self::Micromamba)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Virtualenv => "virtualenv",
            Self::Venv => "venv",
            Self::Conda => "conda",
            Self::Mamba => "mamba",
            Self::Micromamba => "micromamba",
            Self::Uv => "uv",
            Self::None => "none",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "virtualenv" => Ok(Self::Virtualenv),
            "venv" => Ok(Self::Venv),
            "conda" => Ok(Self::Conda),
            "mamba" => Ok(Self::Mamba),
            "micromamba" => Ok(Self::Micromamba),
            "uv" => Ok(Self::Uv),
            "none" => Ok(Self::None),
            other => Err(format!(
                "unknown backend `{other}` (known backends: {})",
                BackendKind::ALL
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

/// The per-instance filesystem state of a session environment.
#[derive(Clone, Debug)]
pub struct Environment {
    /// Which backend produced this environment.
    pub kind: BackendKind,
    /// Absolute directory under the env root.
    pub location: Utf8PathBuf,
    /// The resolved interpreter inside the environment, when it has one.
    pub interpreter: Option<Utf8PathBuf>,
    /// The platform scripts directory, when the environment has one.
    pub bin_dir: Option<Utf8PathBuf>,
    /// Whether this run reused a previously created environment.
    pub reused: bool,
}

/// Everything a backend needs to create an environment.
pub struct CreateContext<'a> {
    /// Used to invoke the backend's creation tool.
    pub exec: &'a Executor,
    /// The target location.
    pub location: &'a Utf8Path,
    /// The interpreter spec as declared (e.g. `3.12`), if any.
    pub interpreter_spec: Option<&'a str>,
    /// The resolved host interpreter, when resolution succeeded.
    pub interpreter: Option<&'a Utf8Path>,
    /// Extra creation parameters from the declaration.
    pub params: &'a [String],
    /// The interpreter auto-download policy (honored by uv).
    pub download: DownloadPython,
    /// The host environment for the creation tool itself.
    pub env: &'a BTreeMap<String, String>,
}

impl CreateContext<'_> {
    pub(crate) fn run_tool(
        &self,
        argv: Vec<String>,
        location: &Utf8Path,
        kind: BackendKind,
    ) -> Result<(), EnvCreateError> {
        let cwd = crate::options::current_dir_utf8();
        let invocation = crate::command::CommandInvocation {
            argv: &argv,
            cwd: &cwd,
            env: self.env.clone(),
            bin_dir: None,
            external_policy: crate::command::ExternalPolicy::Allow,
            success_codes: &[],
            silent: true,
            interactive: false,
            timeout: None,
        };
        match self.exec.run(invocation) {
            Ok(_) => Ok(()),
            Err(err) => {
                if let Some(output) = err.captured_output() {
                    tracing::warn!("{}", output.trim_end());
                }
                Err(EnvCreateError {
                    backend: kind,
                    location: location.to_owned(),
                    kind: EnvCreateErrorKind::Command(err),
                })
            }
        }
    }
}

/// Capability set common to every backend.
pub trait VenvBackend {
    /// Which kind this backend is.
    fn kind(&self) -> BackendKind;

    /// Whether the backend's tooling is present on this host.
    fn is_available(&self) -> bool;

    /// Creates a fresh environment at `cx.location`. The location does not
    /// exist when this is called.
    fn create(&self, cx: &CreateContext<'_>) -> Result<(), EnvCreateError>;

    /// Destroys an existing environment ahead of a rebuild. The default is
    /// a plain directory delete; conda-family backends go through the tool.
    fn destroy(&self, cx: &CreateContext<'_>) -> Result<(), EnvCreateError> {
        fs_err::remove_dir_all(cx.location).map_err(|err| EnvCreateError {
            backend: self.kind(),
            location: cx.location.to_owned(),
            kind: EnvCreateErrorKind::Io(err.into()),
        })
    }

    /// The scripts directory inside an environment, if the backend has one.
    fn bin_dir(&self, location: &Utf8Path) -> Option<Utf8PathBuf>;

    /// The interpreter path inside an environment, if the backend has one.
    fn interpreter_path(&self, location: &Utf8Path) -> Option<Utf8PathBuf>;

    /// Process-environment keys to inject for commands run in `env`. `PATH`
    /// entries are prepended, not replaced.
    fn env_overlay(&self, env: &Environment) -> Vec<(String, String)>;

    /// Builds the argv for the backend's install primitive.
    fn install_argv(
        &self,
        env: &Environment,
        args: &[String],
    ) -> Result<Vec<String>, UnsupportedOperationError>;

    /// Builds the argv for a conda-channel install. Conda-family only.
    fn conda_install_argv(
        &self,
        _env: &Environment,
        _args: &[String],
        _channels: &[String],
    ) -> Result<Vec<String>, UnsupportedOperationError> {
        Err(UnsupportedOperationError {
            backend: self.kind(),
            operation: "conda_install",
        })
    }
}

/// Returns the backend implementation for a kind.
pub fn backend_for(kind: BackendKind) -> &'static dyn VenvBackend {
    static VIRTUALENV: VirtualenvBackend = VirtualenvBackend;
    static VENV: VenvModuleBackend = VenvModuleBackend;
    static CONDA: CondaBackend = CondaBackend::new(BackendKind::Conda);
    static MAMBA: CondaBackend = CondaBackend::new(BackendKind::Mamba);
    static MICROMAMBA: CondaBackend = CondaBackend::new(BackendKind::Micromamba);
    static UV: UvBackend = UvBackend;
    static PASSTHROUGH: PassthroughBackend = PassthroughBackend;

    match kind {
        BackendKind::Virtualenv => &VIRTUALENV,
        BackendKind::Venv => &VENV,
        BackendKind::Conda => &CONDA,
        BackendKind::Mamba => &MAMBA,
        BackendKind::Micromamba => &MICROMAMBA,
        BackendKind::Uv => &UV,
        BackendKind::None => &PASSTHROUGH,
    }
}

/// Walks a preference chain and returns the first available backend. The
/// forced backend, when set, overrides the chain unconditionally.
pub fn select_backend(
    chain: &[BackendKind],
    forced: Option<BackendKind>,
) -> Result<&'static dyn VenvBackend, BackendUnavailableError> {
    if let Some(kind) = forced {
        return Ok(backend_for(kind));
    }
    for &kind in chain {
        let backend = backend_for(kind);
        if backend.is_available() {
            debug!("selected {kind} backend");
            return Ok(backend);
        }
    }
    Err(BackendUnavailableError {
        chain: chain.to_vec(),
    })
}

/// The persisted creation fingerprint of an environment.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub(crate) struct EnvFingerprint {
    backend: String,
    interpreter: String,
    params_digest: u64,
}

impl EnvFingerprint {
    pub(crate) fn compute(
        kind: BackendKind,
        interpreter_spec: Option<&str>,
        params: &[String],
    ) -> Self {
        let joined = params.join("\0");
        Self {
            backend: kind.to_string(),
            interpreter: interpreter_spec.unwrap_or_default().to_owned(),
            params_digest: xxh64(joined.as_bytes(), 0),
        }
    }

    fn load(location: &Utf8Path) -> Option<Self> {
        let data = fs_err::read_to_string(location.join(MARKER_FILE)).ok()?;
        serde_json::from_str(&data).ok()
    }

    fn store(&self, location: &Utf8Path) -> std::io::Result<()> {
        let data = serde_json::to_string(self).expect("fingerprint serializes");
        fs_err::write(location.join(MARKER_FILE), data)
    }
}

/// Creates or reuses the environment for one session instance.
///
/// The reuse decision combines the effective reuse policy with the stored
/// fingerprint: `always` reuses any existing environment, `yes` reuses only
/// when the fingerprint matches, and `no`/`never` always rebuild.
pub fn provision(
    backend: &dyn VenvBackend,
    cx: &CreateContext<'_>,
    reuse: ReusePolicy,
) -> Result<Environment, EnvCreateError> {
    let kind = backend.kind();
    let location = cx.location.to_owned();

    if kind == BackendKind::None {
        // Passthrough still owns a directory, for tmp dirs and chdir
        // targets, but there is nothing to build or fingerprint.
        let existed = location.exists();
        if !existed {
            fs_err::create_dir_all(&location).map_err(|err| EnvCreateError {
                backend: kind,
                location: location.clone(),
                kind: EnvCreateErrorKind::Io(err.into()),
            })?;
        }
        return Ok(Environment {
            kind,
            location,
            interpreter: None,
            bin_dir: None,
            reused: existed,
        });
    }

    let fingerprint = EnvFingerprint::compute(kind, cx.interpreter_spec, cx.params);
    let exists = location.exists();
    let fresh = exists && EnvFingerprint::load(&location).as_ref() == Some(&fingerprint);
    let reused = match reuse {
        ReusePolicy::Always => exists,
        ReusePolicy::Yes => fresh,
        ReusePolicy::No | ReusePolicy::Never => false,
    };

    if !reused {
        if exists {
            debug!("removing stale environment at {location}");
            backend.destroy(cx)?;
        }
        if let Some(parent) = location.parent() {
            fs_err::create_dir_all(parent).map_err(|err| EnvCreateError {
                backend: kind,
                location: location.clone(),
                kind: EnvCreateErrorKind::Io(err.into()),
            })?;
        }
        // Creation may populate the shared cache (interpreter downloads and
        // the like); writers serialize on its advisory lock.
        let mut lock = location
            .parent()
            .map(cache_lock)
            .transpose()
            .map_err(|err| EnvCreateError {
                backend: kind,
                location: location.clone(),
                kind: EnvCreateErrorKind::Io(err),
            })?;
        let _cache_guard = match &mut lock {
            Some(lock) => Some(lock.write().map_err(|err| EnvCreateError {
                backend: kind,
                location: location.clone(),
                kind: EnvCreateErrorKind::Io(err),
            })?),
            None => None,
        };
        backend.create(cx)?;
        fingerprint.store(&location).map_err(|err| EnvCreateError {
            backend: kind,
            location: location.clone(),
            kind: EnvCreateErrorKind::Io(err),
        })?;
    } else {
        debug!("reusing environment at {location}");
    }

    Ok(Environment {
        kind,
        location: location.clone(),
        interpreter: backend.interpreter_path(&location),
        bin_dir: backend.bin_dir(&location),
        reused,
    })
}

/// The scripts directory of a venv-layout environment.
pub(crate) fn venv_bin_dir(location: &Utf8Path) -> Utf8PathBuf {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            location.join("Scripts")
        } else {
            location.join("bin")
        }
    }
}

/// The interpreter of a venv-layout environment.
pub(crate) fn venv_python(location: &Utf8Path) -> Utf8PathBuf {
    cfg_if::cfg_if! {
        if #[cfg(windows)] {
            location.join("Scripts").join("python.exe")
        } else {
            location.join("bin").join("python")
        }
    }
}

/// The overlay shared by all venv-layout backends: `VIRTUAL_ENV` plus a
/// `PATH` prepend of the scripts directory.
pub(crate) fn venv_overlay(env: &Environment) -> Vec<(String, String)> {
    let mut overlay = vec![("VIRTUAL_ENV".to_owned(), env.location.to_string())];
    if let Some(bin_dir) = &env.bin_dir {
        overlay.push(("PATH".to_owned(), bin_dir.to_string()));
    }
    overlay
}

/// The standard pip-driven install primitive: `<env python> -m pip install`.
pub(crate) fn pip_install_argv(
    env: &Environment,
    args: &[String],
) -> Result<Vec<String>, UnsupportedOperationError> {
    let Some(python) = &env.interpreter else {
        return Err(UnsupportedOperationError {
            backend: env.kind,
            operation: "install",
        });
    };
    let mut argv = vec![
        python.to_string(),
        "-m".to_owned(),
        "pip".to_owned(),
        "install".to_owned(),
    ];
    argv.extend(args.iter().cloned());
    Ok(argv)
}

/// Maps a canonical session name onto a directory name that is safe on all
/// supported filesystems.
pub fn sanitize_location_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '(' | ')' | '\'' | '"' | ',' | ' ' | '/' | '\\' | '<' | '>' | ':' | '|' | '?'
            | '*' => '-',
            c => c,
        })
        .collect()
}
