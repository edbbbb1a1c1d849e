// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The runner loop: drive the manifest, one session at a time.
//!
//! Sessions run strictly sequentially. For each entry the loop resolves a
//! backend, resolves the interpreter (honoring the missing-interpreter
//! policy), creates or reuses the environment, runs the body through the
//! session handle, records a result, and drains notifications into the
//! manifest. Interrupts and `--stop-on-first-error` mark the remainder
//! aborted without executing it.

use crate::{
    backends::{BackendKind, CreateContext, provision, sanitize_location_name, select_backend},
    command::Executor,
    envbuild::EnvBuilder,
    expand::{ParamValue, SessionInstance},
    interpreter::InterpreterSpec,
    manifest::Manifest,
    options::{DownloadPython, InvocationOptions},
    reporter::Reporter,
    session::{BodyOutcome, Notification, SessionHandle, stdin_interactive},
    stopwatch::stopwatch,
};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use senv_metadata::SessionStatusSummary;
use std::{io::Write, time::Duration};
use tracing::{debug, warn};

/// The final status of one manifest entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionStatus {
    Success,
    Failed,
    Skipped,
    Aborted,
}

impl SessionStatus {
    /// The serializable form.
    pub fn summary(self) -> SessionStatusSummary {
        match self {
            Self::Success => SessionStatusSummary::Success,
            Self::Failed => SessionStatusSummary::Failed,
            Self::Skipped => SessionStatusSummary::Skipped,
            Self::Aborted => SessionStatusSummary::Aborted,
        }
    }
}

/// The outcome of one session instance.
#[derive(Clone, Debug)]
pub struct SessionResult {
    /// The canonical instance name.
    pub name: String,
    /// The final status.
    pub status: SessionStatus,
    /// A short reason for non-success statuses, when one is known.
    pub reason: Option<String>,
    /// Wall-clock duration of the session. Zero for aborted entries.
    pub duration: Duration,
    /// The instance's call spec.
    pub args: IndexMap<String, ParamValue>,
}

impl SessionResult {
    /// True for statuses that make the whole run non-zero.
    pub fn is_fatal(&self) -> bool {
        matches!(self.status, SessionStatus::Failed | SessionStatus::Aborted)
    }
}

/// Drives every entry of a manifest to a result.
pub struct SessionRunner<'a> {
    options: &'a InvocationOptions,
    /// The full expansion, for resolving notify targets.
    all_instances: &'a [SessionInstance],
    exec: &'a Executor,
}

impl<'a> SessionRunner<'a> {
    pub fn new(
        options: &'a InvocationOptions,
        all_instances: &'a [SessionInstance],
        exec: &'a Executor,
    ) -> Self {
        Self {
            options,
            all_instances,
            exec,
        }
    }

    /// Runs the manifest to completion (or interruption), reporting each
    /// result as it lands.
    pub fn run(
        &self,
        mut manifest: Manifest,
        reporter: &mut Reporter<impl Write>,
    ) -> Vec<SessionResult> {
        let interactive = stdin_interactive(self.options);
        let mut results = Vec::with_capacity(manifest.len());

        while let Some(instance) = manifest.next() {
            reporter.announce(&instance.name);
            let watch = stopwatch();
            debug!(
                "session {} started at {}",
                instance.name,
                watch.start_time().format("%H:%M:%S"),
            );
            let (outcome, notifications) = self.run_one(&instance, interactive);
            let mut result = into_result(&instance, outcome, watch.elapsed());

            for notification in notifications {
                match manifest.notify(
                    &notification.target,
                    notification.posargs.as_deref(),
                    self.all_instances,
                ) {
                    Ok(_) => {}
                    Err(err) => {
                        // A notify against an unknown target fails the
                        // notifier, even though its commands succeeded.
                        warn!("session `{}`: {err}", instance.name);
                        if result.status == SessionStatus::Success {
                            result.status = SessionStatus::Failed;
                            result.reason = Some(format!("invalid-session: {err}"));
                        }
                    }
                }
            }

            reporter.result(&result);
            let fatal = result.status == SessionStatus::Failed;
            results.push(result);

            if self.exec.interrupted() {
                abort_remaining(&mut manifest, Some("interrupted"), &mut results, reporter);
                break;
            }
            if fatal && self.options.stop_on_first_error {
                abort_remaining(&mut manifest, None, &mut results, reporter);
                break;
            }
        }

        results
    }

    /// Runs one instance: backend, interpreter, environment, body.
    fn run_one(
        &self,
        instance: &SessionInstance,
        interactive: bool,
    ) -> (BodyOutcome, Vec<Notification>) {
        let chain: Vec<BackendKind> = if instance.host_only {
            vec![BackendKind::None]
        } else if instance.decl.backend.is_empty() {
            vec![self.options.default_backend]
        } else {
            instance.decl.backend.clone()
        };
        let forced = if instance.host_only {
            // `python = false` beats even --force-venv-backend; there is
            // nothing to build an environment for.
            Some(BackendKind::None)
        } else {
            self.options.force_backend
        };
        let backend = match select_backend(&chain, forced) {
            Ok(backend) => backend,
            Err(err) => {
                return (
                    BodyOutcome::Failed {
                        reason: format!("backend-unavailable: {err}"),
                        excerpt: None,
                    },
                    Vec::new(),
                );
            }
        };

        // Resolve the interpreter. uv may download a missing one itself,
        // policy permitting; everyone else goes through the
        // missing-interpreter policy.
        let mut resolved: Option<Utf8PathBuf> = None;
        if let Some(spec) = instance.python.as_deref()
            && backend.kind() != BackendKind::None
        {
            match InterpreterSpec::new(spec).resolve(None) {
                Ok(path) => resolved = Some(path),
                Err(err) => {
                    // Only uv can download a managed interpreter; demanding
                    // one from any other backend cannot be satisfied, which
                    // is a backend problem rather than a skippable miss.
                    if backend.kind() != BackendKind::Uv
                        && self.options.download_python == DownloadPython::Always
                    {
                        return (
                            BodyOutcome::Failed {
                                reason: format!(
                                    "backend-unavailable: the {} backend cannot download \
                                     an interpreter ({err})",
                                    backend.kind()
                                ),
                                excerpt: None,
                            },
                            Vec::new(),
                        );
                    }
                    let uv_can_download = backend.kind() == BackendKind::Uv
                        && self.options.download_python != DownloadPython::Never;
                    if uv_can_download {
                        debug!("{err}; deferring to uv's managed interpreters");
                    } else if self.options.error_on_missing_interpreters {
                        return (
                            BodyOutcome::Failed {
                                reason: "interpreter-missing".to_owned(),
                                excerpt: None,
                            },
                            Vec::new(),
                        );
                    } else {
                        return (
                            BodyOutcome::Skipped {
                                reason: Some("interpreter-missing".to_owned()),
                            },
                            Vec::new(),
                        );
                    }
                }
            }
        }

        let envdir = if self.options.envdir.is_absolute() {
            self.options.envdir.clone()
        } else {
            self.options.invoked_from.join(&self.options.envdir)
        };
        let location = envdir.join(sanitize_location_name(&instance.name));
        let host_env = EnvBuilder::from_host().finish();
        let cx = CreateContext {
            exec: self.exec,
            location: &location,
            interpreter_spec: instance.python.as_deref(),
            interpreter: resolved.as_deref(),
            params: &instance.decl.venv_params,
            download: self.options.download_python,
            env: &host_env,
        };
        let reuse = self.options.reuse_for(instance.decl.reuse);
        let env = match provision(backend, &cx, reuse) {
            Ok(env) => env,
            Err(err) => {
                if self.exec.interrupted() {
                    return (BodyOutcome::Interrupted, Vec::new());
                }
                return (
                    BodyOutcome::Failed {
                        reason: format!("command-failed: {err}"),
                        excerpt: None,
                    },
                    Vec::new(),
                );
            }
        };

        let mut handle = SessionHandle::new(
            instance,
            &env,
            backend,
            self.exec,
            self.options,
            interactive,
        );
        let outcome = handle.run_body();
        (outcome, handle.into_notifications())
    }
}

fn into_result(
    instance: &SessionInstance,
    outcome: BodyOutcome,
    duration: Duration,
) -> SessionResult {
    let (status, reason) = match outcome {
        BodyOutcome::Success => (SessionStatus::Success, None),
        BodyOutcome::Skipped { reason } => (SessionStatus::Skipped, reason),
        BodyOutcome::Failed { reason, .. } => (SessionStatus::Failed, Some(reason)),
        BodyOutcome::Interrupted => (SessionStatus::Failed, Some("interrupted".to_owned())),
    };
    SessionResult {
        name: instance.name.clone(),
        status,
        reason,
        duration,
        args: instance.call_args.clone(),
    }
}

fn abort_remaining(
    manifest: &mut Manifest,
    reason: Option<&str>,
    results: &mut Vec<SessionResult>,
    reporter: &mut Reporter<impl Write>,
) {
    let remaining: Vec<SessionInstance> = manifest.remaining().to_vec();
    for instance in remaining {
        let result = SessionResult {
            name: instance.name.clone(),
            status: SessionStatus::Aborted,
            reason: reason.map(str::to_owned),
            duration: Duration::ZERO,
            args: instance.call_args.clone(),
        };
        reporter.result(&result);
        results.push(result);
    }
}

/// One invocation's exit decision: zero iff nothing failed or aborted.
pub fn run_succeeded(results: &[SessionResult]) -> bool {
    results.iter().all(|result| !result.is_fatal())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SenvConfig,
        manifest::Manifest,
        options::{CliOverrides, ScriptOptions},
        reporter::Reporter,
        selector::select,
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct Run {
        results: Vec<SessionResult>,
    }

    fn run(config: &str, cli: CliOverrides) -> Run {
        let dir = camino_tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("senv.toml");
        fs_err::write(&path, config).expect("write config");
        let config = SenvConfig::from_file(&path).expect("config loads");
        let mut options = InvocationOptions::merge(cli, &config.options, dir.path().to_owned())
            .expect("options merge");
        options.envdir = dir.path().join(".senv");
        // Keep the CI heuristic out of these tests.
        options.error_on_missing_interpreters = false;
        options.non_interactive = true;
        let decls: Vec<_> = config.sessions.into_iter().map(Arc::new).collect();
        let all = crate::expand::expand(&decls, &options);
        let selected = select(&all, &options).expect("selection succeeds");
        let manifest = Manifest::build(selected, &all).expect("manifest builds");

        let exec = Executor::new_detached(Duration::from_millis(100)).expect("executor");
        let runner = SessionRunner::new(&options, &all, &exec);
        let mut sink = Vec::new();
        let mut reporter = Reporter::new(&mut sink, false);
        let results = runner.run(manifest, &mut reporter);
        Run { results }
    }

    fn statuses(run: &Run) -> Vec<(&str, SessionStatus)> {
        run.results
            .iter()
            .map(|r| (r.name.as_str(), r.status))
            .collect()
    }

    #[cfg(unix)]
    #[test]
    fn single_session_success() {
        let run = run(
            indoc! {r#"
                [[session]]
                name = "t"
                python = false
                [[session.steps]]
                run = ["echo", "ok"]
                silent = true
            "#},
            CliOverrides::default(),
        );
        assert_eq!(statuses(&run), [("t", SessionStatus::Success)]);
        assert!(run_succeeded(&run.results));
    }

    #[test]
    fn missing_interpreter_skips_by_default_policy() {
        let run = run(
            indoc! {r#"
                [[session]]
                name = "t"
                python = "4.0"
            "#},
            CliOverrides::default(),
        );
        assert_eq!(statuses(&run), [("t", SessionStatus::Skipped)]);
        assert_eq!(run.results[0].reason.as_deref(), Some("interpreter-missing"));
        assert!(run_succeeded(&run.results));
    }

    #[test]
    fn missing_interpreter_fails_under_error_policy() {
        let run = run(
            indoc! {r#"
                [[session]]
                name = "t"
                python = "4.0"
            "#},
            CliOverrides {
                error_on_missing_interpreters: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(statuses(&run), [("t", SessionStatus::Failed)]);
        assert_eq!(run.results[0].reason.as_deref(), Some("interpreter-missing"));
        assert!(!run_succeeded(&run.results));
    }

    #[test]
    fn download_always_on_non_uv_backend_is_backend_unavailable() {
        // The default (virtualenv) backend cannot download interpreters, so
        // demanding one turns a missing interpreter into a backend failure
        // instead of a policy-driven skip.
        let run = run(
            indoc! {r#"
                [[session]]
                name = "t"
                python = "4.0"
            "#},
            CliOverrides {
                download_python: Some("always".to_owned()),
                ..Default::default()
            },
        );
        assert_eq!(statuses(&run), [("t", SessionStatus::Failed)]);
        assert!(
            run.results[0]
                .reason
                .as_deref()
                .is_some_and(|r| r.starts_with("backend-unavailable")),
            "unexpected reason: {:?}",
            run.results[0].reason
        );
        assert!(!run_succeeded(&run.results));
    }

    #[cfg(unix)]
    #[test]
    fn notify_chain_runs_after_notifier() {
        let run = run(
            indoc! {r#"
                [[session]]
                name = "a"
                python = false
                [[session.steps]]
                notify = "b"

                [[session]]
                name = "b"
                python = false
                [[session.steps]]
                run = ["echo", "b"]
                silent = true
            "#},
            CliOverrides {
                sessions: Some(vec!["a".to_owned()]),
                ..Default::default()
            },
        );
        assert_eq!(
            statuses(&run),
            [("a", SessionStatus::Success), ("b", SessionStatus::Success)]
        );
    }

    #[test]
    fn notify_unknown_target_fails_the_notifier() {
        let run = run(
            indoc! {r#"
                [[session]]
                name = "a"
                python = false
                [[session.steps]]
                notify = "missing"
            "#},
            CliOverrides::default(),
        );
        assert_eq!(statuses(&run), [("a", SessionStatus::Failed)]);
        assert!(
            run.results[0]
                .reason
                .as_deref()
                .is_some_and(|r| r.starts_with("invalid-session")),
        );
    }

    #[cfg(unix)]
    #[test]
    fn stop_on_first_error_aborts_the_rest() {
        let run = run(
            indoc! {r#"
                [[session]]
                name = "bad"
                python = false
                [[session.steps]]
                run = ["sh", "-c", "exit 1"]
                silent = true

                [[session]]
                name = "never"
                python = false
                [[session.steps]]
                run = ["echo", "unreachable"]
                silent = true
            "#},
            CliOverrides {
                stop_on_first_error: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(
            statuses(&run),
            [
                ("bad", SessionStatus::Failed),
                ("never", SessionStatus::Aborted)
            ]
        );
        assert!(!run_succeeded(&run.results));
    }

    #[cfg(unix)]
    #[test]
    fn failure_without_stop_continues() {
        let run = run(
            indoc! {r#"
                [[session]]
                name = "bad"
                python = false
                [[session.steps]]
                run = ["sh", "-c", "exit 1"]
                silent = true

                [[session]]
                name = "good"
                python = false
                [[session.steps]]
                run = ["echo", "fine"]
                silent = true
            "#},
            CliOverrides::default(),
        );
        assert_eq!(
            statuses(&run),
            [
                ("bad", SessionStatus::Failed),
                ("good", SessionStatus::Success)
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn posargs_are_isolated_per_instance() {
        // The first session mutating its argv (via forwarding) must not
        // leak into the second's copy.
        let run = run(
            indoc! {r#"
                [[session]]
                name = "a"
                python = false
                [[session.steps]]
                notify = "b"
                posargs = ["forwarded"]

                [[session]]
                name = "b"
                python = false
                [[session.steps]]
                run = ["sh", "-c", "test \"$1\" = forwarded", "argv0", "{posargs}"]
                silent = true

                [[session]]
                name = "c"
                python = false
                [[session.steps]]
                run = ["sh", "-c", "test $# -eq 0", "argv0", "{posargs}"]
                silent = true
            "#},
            CliOverrides {
                sessions: Some(vec!["a".to_owned(), "c".to_owned()]),
                ..Default::default()
            },
        );
        assert_eq!(
            statuses(&run),
            [
                ("a", SessionStatus::Success),
                ("c", SessionStatus::Success),
                ("b", SessionStatus::Success),
            ]
        );
    }
}
