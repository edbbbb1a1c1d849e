// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session declarations: the typed form of `[[session]]` tables.

use crate::{
    backends::BackendKind,
    envbuild::EnvValue,
    expand::ParamValue,
    options::ReusePolicy,
};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};

/// One session declaration, validated.
#[derive(Clone, Debug)]
pub struct SessionDecl {
    /// The declared name.
    pub name: String,
    /// Free text; the first line is the short description.
    pub description: Option<String>,
    /// The interpreter axis.
    pub python: PythonAxis,
    /// Per-declaration reuse policy, overriding the global mode.
    pub reuse: Option<ReusePolicy>,
    /// Backend preference chain. Empty means "use the default backend".
    pub backend: Vec<BackendKind>,
    /// Opaque parameters passed to the backend at creation.
    pub venv_params: Vec<String>,
    /// Labels for tag-based selection.
    pub tags: BTreeSet<String>,
    /// Whether a bare invocation includes this session.
    pub default_selected: bool,
    /// Session-name templates that must run before this one. May contain
    /// the `{python}` placeholder.
    pub requires: Vec<String>,
    /// Environment overrides applied to every command in the session.
    pub env: IndexMap<String, EnvValue>,
    /// Stacked parametrization layers, in declaration order.
    pub parametrize: Vec<ParamSet>,
    /// The session body.
    pub steps: Vec<Step>,
}

impl SessionDecl {
    /// The first line of the description.
    pub fn short_description(&self) -> Option<&str> {
        self.description
            .as_deref()
            .and_then(|d| d.lines().next())
            .map(str::trim)
            .filter(|line| !line.is_empty())
    }
}

/// The interpreter axis of a declaration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum PythonAxis {
    /// No `python` key: one environment built on the default host
    /// interpreter.
    #[default]
    Current,
    /// `python = false` or `"none"`: no environment, run on the host.
    Disabled,
    /// A single interpreter spec; the session name is not suffixed.
    Single(String),
    /// A list of specs; one instance per spec, names suffixed `-<spec>`.
    List(Vec<String>),
}

/// One validated parametrization layer.
#[derive(Clone, Debug)]
pub struct ParamSet {
    /// The parameter names this layer binds.
    pub args: Vec<String>,
    /// One bundle per declared value row.
    pub bundles: Vec<ParamBundle>,
}

/// One value row of a parametrization layer.
#[derive(Clone, Debug)]
pub struct ParamBundle {
    /// The values, parallel to the layer's `args`.
    pub values: Vec<ParamValue>,
    /// A custom id rendered instead of `key='value'` pairs.
    pub id: Option<String>,
    /// Extra tags contributed by this bundle.
    pub tags: Vec<String>,
}

/// Options shared by the command-shaped steps.
#[derive(Clone, Debug, Default)]
pub struct RunDetails {
    /// The command line. Elements may contain the `{posargs}`, `{python}`,
    /// `{envdir}`, and `{tmp}` placeholders.
    pub argv: Vec<String>,
    /// Per-command environment overrides.
    pub env: IndexMap<String, EnvValue>,
    /// Exit codes besides zero that count as success.
    pub success_codes: Vec<i32>,
    /// Allow the command to resolve outside the environment's bin dir.
    pub external: bool,
    /// Start from the (deny-list filtered) host environment. On by default.
    pub include_outer_env: bool,
    /// Optional wall-clock limit.
    pub timeout: Option<Duration>,
    /// Buffer output instead of streaming; `None` picks the step-kind
    /// default.
    pub silent: Option<bool>,
}

/// Severity of a `log`-family step.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

/// One step of a session body.
#[derive(Clone, Debug)]
pub enum Step {
    /// Install packages through the backend's install primitive.
    Install(RunDetails),
    /// Install packages through conda with optional channels.
    CondaInstall {
        details: RunDetails,
        channels: Vec<String>,
    },
    /// Run a command.
    Run(RunDetails),
    /// Run a command, but skip it when the environment was reused and
    /// `--no-install` is in effect.
    RunInstall(RunDetails),
    /// Parse a script's inline metadata, install its dependencies, and run
    /// it with the session interpreter.
    RunScript { path: String, details: RunDetails },
    /// Change the working directory for the rest of the session.
    Chdir(String),
    /// Enqueue another session after this one.
    Notify {
        target: String,
        posargs: Option<Vec<String>>,
    },
    /// Emit a log line.
    Log { level: LogLevel, message: String },
    /// End the session with a failed result.
    Error { message: String },
    /// End the session with a skipped result.
    Skip { message: String },
}

// ---------------------------------------------------------------------------
// Raw (serde) forms
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub(crate) struct RawSessionDecl {
    pub(crate) name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    python: Option<RawPython>,
    #[serde(default)]
    reuse: Option<ReusePolicy>,
    #[serde(default)]
    backend: Option<RawBackend>,
    #[serde(default)]
    venv_params: Vec<String>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default = "default_true", rename = "default")]
    default_selected: bool,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    env: IndexMap<String, EnvValue>,
    #[serde(default)]
    parametrize: Vec<RawParametrize>,
    #[serde(default)]
    steps: Vec<RawStep>,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum RawPython {
    Toggle(bool),
    One(String),
    Many(Vec<String>),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum RawBackend {
    One(String),
    Chain(Vec<String>),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawParametrize {
    #[serde(default)]
    arg: Option<String>,
    #[serde(default)]
    args: Option<Vec<String>>,
    values: Vec<RawValues>,
    #[serde(default)]
    ids: Option<Vec<String>>,
    #[serde(default)]
    tags: Option<Vec<Vec<String>>>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum RawValues {
    Scalar(ParamValue),
    Row(Vec<ParamValue>),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawStep {
    #[serde(default)]
    install: Option<Vec<String>>,
    #[serde(default)]
    conda_install: Option<Vec<String>>,
    #[serde(default)]
    channels: Option<Vec<String>>,
    #[serde(default)]
    run: Option<Vec<String>>,
    #[serde(default)]
    run_install: Option<Vec<String>>,
    #[serde(default)]
    run_script: Option<String>,
    #[serde(default)]
    chdir: Option<String>,
    #[serde(default)]
    notify: Option<String>,
    #[serde(default)]
    posargs: Option<Vec<String>>,
    #[serde(default)]
    log: Option<String>,
    #[serde(default)]
    warn: Option<String>,
    #[serde(default)]
    debug: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    skip: Option<String>,
    #[serde(default)]
    env: IndexMap<String, EnvValue>,
    #[serde(default)]
    success_codes: Option<Vec<i32>>,
    #[serde(default)]
    external: Option<bool>,
    #[serde(default)]
    include_outer_env: Option<bool>,
    #[serde(default, with = "humantime_serde::option")]
    timeout: Option<Duration>,
    #[serde(default)]
    silent: Option<bool>,
}

impl RawSessionDecl {
    /// Validates the raw declaration. Error messages are wrapped with the
    /// session name by the caller.
    pub(crate) fn validate(self) -> Result<SessionDecl, String> {
        let python = match self.python {
            None => PythonAxis::Current,
            Some(RawPython::Toggle(false)) => PythonAxis::Disabled,
            Some(RawPython::Toggle(true)) => {
                return Err("`python = true` is not meaningful; use a version string".to_owned());
            }
            Some(RawPython::One(spec)) if spec == "none" => PythonAxis::Disabled,
            Some(RawPython::One(spec)) => PythonAxis::Single(spec),
            Some(RawPython::Many(specs)) => PythonAxis::List(specs),
        };

        let backend = match self.backend {
            None => Vec::new(),
            Some(RawBackend::One(name)) => vec![parse_backend(&name)?],
            Some(RawBackend::Chain(names)) => {
                let chain: Vec<BackendKind> = names
                    .iter()
                    .map(|name| parse_backend(name))
                    .collect::<Result<_, _>>()?;
                // An always-available backend anywhere but last would mask
                // the rest of the chain.
                if let Some(position) = chain
                    .iter()
                    .position(|kind| kind.always_available())
                    .filter(|&position| position + 1 != chain.len())
                {
                    return Err(format!(
                        "backend `{}` never fails and may only appear last in a chain",
                        chain[position]
                    ));
                }
                chain
            }
        };

        validate_env(&self.env)?;

        let parametrize: Vec<ParamSet> = self
            .parametrize
            .into_iter()
            .map(RawParametrize::validate)
            .collect::<Result<_, _>>()?;

        let binds_python = parametrize
            .iter()
            .any(|set| set.args.iter().any(|arg| arg == "python"));
        if binds_python {
            if !matches!(python, PythonAxis::Current) {
                return Err(
                    "a `python` parameter cannot be combined with a `python` field".to_owned(),
                );
            }
            if let Some(set) = parametrize
                .iter()
                .find(|set| set.args.len() > 1 && set.args.iter().any(|arg| arg == "python"))
            {
                return Err(format!(
                    "the `python` parameter must be its own layer, not bundled with `{}`",
                    set.args.join(", ")
                ));
            }
        }

        let steps: Vec<Step> = self
            .steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| {
                step.validate()
                    .map_err(|message| format!("step {}: {message}", index + 1))
            })
            .collect::<Result<_, _>>()?;

        Ok(SessionDecl {
            name: self.name,
            description: self.description,
            python,
            reuse: self.reuse,
            backend,
            venv_params: self.venv_params,
            tags: self.tags,
            default_selected: self.default_selected,
            requires: self.requires,
            env: self.env,
            parametrize,
            steps,
        })
    }
}

fn parse_backend(name: &str) -> Result<BackendKind, String> {
    name.parse()
}

fn validate_env(env: &IndexMap<String, EnvValue>) -> Result<(), String> {
    for (key, value) in env {
        if matches!(value, EnvValue::Unset(true)) {
            return Err(format!(
                "env key `{key}`: `true` is not a valid value; use `false` to unset"
            ));
        }
    }
    Ok(())
}

impl RawParametrize {
    fn validate(self) -> Result<ParamSet, String> {
        let args = match (self.arg, self.args) {
            (Some(arg), None) => vec![arg],
            (None, Some(args)) if !args.is_empty() => args,
            (None, Some(_)) => return Err("parametrize `args` must not be empty".to_owned()),
            (Some(_), Some(_)) => {
                return Err("parametrize takes `arg` or `args`, not both".to_owned());
            }
            (None, None) => return Err("parametrize needs `arg` or `args`".to_owned()),
        };

        let mut rows = Vec::with_capacity(self.values.len());
        for value in self.values {
            let row = match value {
                RawValues::Scalar(value) if args.len() == 1 => vec![value],
                RawValues::Scalar(_) => {
                    return Err(format!(
                        "parametrize over {} args needs one value row per bundle",
                        args.len()
                    ));
                }
                RawValues::Row(row) => {
                    if row.len() != args.len() {
                        return Err(format!(
                            "value row has {} entries for {} args",
                            row.len(),
                            args.len()
                        ));
                    }
                    row
                }
            };
            rows.push(row);
        }

        if let Some(ids) = &self.ids
            && ids.len() != rows.len()
        {
            return Err(format!(
                "parametrize has {} ids for {} values",
                ids.len(),
                rows.len()
            ));
        }
        if let Some(tags) = &self.tags
            && tags.len() != rows.len()
        {
            return Err(format!(
                "parametrize has {} tag lists for {} values",
                tags.len(),
                rows.len()
            ));
        }

        let bundles = rows
            .into_iter()
            .enumerate()
            .map(|(index, values)| ParamBundle {
                values,
                id: self.ids.as_ref().map(|ids| ids[index].clone()),
                tags: self
                    .tags
                    .as_ref()
                    .map(|tags| tags[index].clone())
                    .unwrap_or_default(),
            })
            .collect();

        Ok(ParamSet { args, bundles })
    }
}

impl RawStep {
    fn validate(self) -> Result<Step, String> {
        validate_env(&self.env)?;
        let details = |argv: Vec<String>| RunDetails {
            argv,
            env: self.env.clone(),
            success_codes: self.success_codes.clone().unwrap_or_default(),
            external: self.external.unwrap_or(false),
            include_outer_env: self.include_outer_env.unwrap_or(true),
            timeout: self.timeout,
            silent: self.silent,
        };

        let mut kinds = Vec::new();
        if self.install.is_some() {
            kinds.push("install");
        }
        if self.conda_install.is_some() {
            kinds.push("conda-install");
        }
        if self.run.is_some() {
            kinds.push("run");
        }
        if self.run_install.is_some() {
            kinds.push("run-install");
        }
        if self.run_script.is_some() {
            kinds.push("run-script");
        }
        if self.chdir.is_some() {
            kinds.push("chdir");
        }
        if self.notify.is_some() {
            kinds.push("notify");
        }
        if self.log.is_some() {
            kinds.push("log");
        }
        if self.warn.is_some() {
            kinds.push("warn");
        }
        if self.debug.is_some() {
            kinds.push("debug");
        }
        if self.error.is_some() {
            kinds.push("error");
        }
        if self.skip.is_some() {
            kinds.push("skip");
        }
        match kinds.as_slice() {
            [_] => {}
            [] => return Err("step does nothing; give it exactly one action".to_owned()),
            many => {
                return Err(format!(
                    "step mixes actions ({}); give it exactly one",
                    many.join(", ")
                ));
            }
        }

        if self.channels.is_some() && self.conda_install.is_none() {
            return Err("`channels` only applies to `conda-install` steps".to_owned());
        }
        if self.posargs.is_some() && self.notify.is_none() {
            return Err("`posargs` only applies to `notify` steps".to_owned());
        }

        let step = if let Some(argv) = self.install.clone() {
            Step::Install(details(argv))
        } else if let Some(argv) = self.conda_install.clone() {
            Step::CondaInstall {
                details: details(argv),
                channels: self.channels.clone().unwrap_or_default(),
            }
        } else if let Some(argv) = self.run.clone() {
            ensure_nonempty(&argv)?;
            Step::Run(details(argv))
        } else if let Some(argv) = self.run_install.clone() {
            ensure_nonempty(&argv)?;
            Step::RunInstall(details(argv))
        } else if let Some(path) = self.run_script.clone() {
            Step::RunScript {
                path,
                details: details(Vec::new()),
            }
        } else if let Some(path) = self.chdir.clone() {
            Step::Chdir(path)
        } else if let Some(target) = self.notify.clone() {
            Step::Notify {
                target,
                posargs: self.posargs.clone(),
            }
        } else if let Some(message) = self.log.clone() {
            Step::Log {
                level: LogLevel::Info,
                message,
            }
        } else if let Some(message) = self.warn.clone() {
            Step::Log {
                level: LogLevel::Warn,
                message,
            }
        } else if let Some(message) = self.debug.clone() {
            Step::Log {
                level: LogLevel::Debug,
                message,
            }
        } else if let Some(message) = self.error.clone() {
            Step::Error { message }
        } else if let Some(message) = self.skip.clone() {
            Step::Skip { message }
        } else {
            unreachable!("exactly one action was checked above")
        };
        Ok(step)
    }
}

fn ensure_nonempty(argv: &[String]) -> Result<(), String> {
    if argv.is_empty() {
        Err("command must not be empty".to_owned())
    } else {
        Ok(())
    }
}
