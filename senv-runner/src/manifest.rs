// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The manifest: the ordered, mutable queue of instances one invocation
//! will run.
//!
//! Building the manifest resolves `requires` edges: every required instance
//! is queued ahead of its dependents, in a stable topological order that
//! preserves the user's requested order wherever the graph allows. Cycles
//! and unmatched requirements fail here, before anything runs. During the
//! run, `notify` steps append fresh entries to the tail.

use crate::{
    errors::{InvalidSessionError, ScheduleError},
    expand::{SessionInstance, names_equal},
};
use petgraph::{graph::DiGraph, algo::toposort};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// See the module docs.
#[derive(Debug)]
pub struct Manifest {
    entries: Vec<SessionInstance>,
    /// Canonical names ever queued, for O(1) membership.
    queued: HashSet<String>,
    cursor: usize,
}

impl Manifest {
    /// Builds the run queue from the selected instances, pulling in
    /// `requires` targets from the full expansion.
    pub fn build(
        selected: Vec<SessionInstance>,
        all: &[SessionInstance],
    ) -> Result<Self, ScheduleError> {
        check_for_cycles(all)?;

        let mut entries: Vec<SessionInstance> = Vec::with_capacity(selected.len());
        let mut done: HashSet<String> = HashSet::new();
        let mut explicit: HashSet<String> = HashSet::new();

        for instance in selected {
            let name = instance.name.clone();
            if done.contains(&name) {
                // Queued already. If the user explicitly repeated the name,
                // it runs again (requirements are already ahead of the first
                // copy); if it was only pulled in as a requirement, this is
                // its one explicit mention and it stays queued once.
                if explicit.contains(&name) {
                    entries.push(instance);
                }
                explicit.insert(name);
                continue;
            }
            explicit.insert(name);
            emit(instance, all, &mut done, &mut entries)?;
        }

        let queued = entries.iter().map(|e| e.name.clone()).collect();
        Ok(Self {
            entries,
            queued,
            cursor: 0,
        })
    }

    /// The number of queued entries, including already-run ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Takes the next instance to run.
    pub fn next(&mut self) -> Option<SessionInstance> {
        let entry = self.entries.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(entry)
    }

    /// The instances that have not started yet.
    pub fn remaining(&self) -> &[SessionInstance] {
        &self.entries[self.cursor..]
    }

    /// Queued entry names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Handles a `notify` from a running session: appends every instance
    /// matching `target` that is not already queued or completed. Forwarded
    /// posargs replace the instance's own copy.
    ///
    /// Returns the number of entries appended; zero is the documented no-op
    /// for already-queued targets.
    pub fn notify(
        &mut self,
        target: &str,
        posargs: Option<&[String]>,
        all: &[SessionInstance],
    ) -> Result<usize, InvalidSessionError> {
        let matched: Vec<&SessionInstance> = all
            .iter()
            .filter(|instance| instance.matches_pattern(target))
            .collect();
        if matched.is_empty() {
            return Err(InvalidSessionError::UnknownSession {
                name: target.to_owned(),
                known: all.iter().map(|i| i.name.clone()).collect(),
            });
        }

        let mut appended = 0;
        for instance in matched {
            if self.queued.contains(&instance.name) {
                debug!("notify target `{}` is already queued", instance.name);
                continue;
            }
            let mut copy = instance.clone();
            if let Some(posargs) = posargs {
                copy.posargs = posargs.to_vec();
            }
            self.queued.insert(copy.name.clone());
            self.entries.push(copy);
            appended += 1;
        }
        Ok(appended)
    }
}

/// Emits `instance` after its (transitive) requirements, depth-first.
fn emit(
    instance: SessionInstance,
    all: &[SessionInstance],
    done: &mut HashSet<String>,
    entries: &mut Vec<SessionInstance>,
) -> Result<(), ScheduleError> {
    if done.contains(&instance.name) {
        return Ok(());
    }
    done.insert(instance.name.clone());

    let requires = instance.decl.requires.clone();
    for template in &requires {
        let target = substitute_python(template, instance.python.as_deref());
        let required = resolve_requirement(&target, all).ok_or_else(|| {
            ScheduleError::RequiresMissing {
                session: instance.name.clone(),
                target: target.clone(),
            }
        })?;
        emit(required.clone(), all, done, entries)?;
    }

    entries.push(instance);
    Ok(())
}

/// Substitutes the `{python}` placeholder in a requires template.
fn substitute_python(template: &str, python: Option<&str>) -> String {
    template.replace("{python}", python.unwrap_or_default())
}

/// Finds the instance a requires target names. With several candidates
/// (e.g. a bare declaration name), the lexicographically first canonical
/// name wins.
fn resolve_requirement<'a>(
    target: &str,
    all: &'a [SessionInstance],
) -> Option<&'a SessionInstance> {
    all.iter()
        .filter(|instance| {
            names_equal(target, &instance.name)
                || target == instance.base
                || target == instance.decl.name
        })
        .min_by(|a, b| a.name.cmp(&b.name))
}

/// Rejects requires graphs with cycles before anything runs. The check
/// covers the whole expansion: a cycle is a configuration bug even when
/// today's selection does not touch it.
fn check_for_cycles(all: &[SessionInstance]) -> Result<(), ScheduleError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes = HashMap::new();
    for instance in all {
        let node = graph.add_node(instance.name.as_str());
        nodes.insert(instance.name.as_str(), node);
    }
    for instance in all {
        for template in &instance.decl.requires {
            let target = substitute_python(template, instance.python.as_deref());
            if let Some(required) = resolve_requirement(&target, all) {
                graph.add_edge(nodes[required.name.as_str()], nodes[instance.name.as_str()], ());
            }
            // Unresolvable targets are reported lazily, and only for
            // instances that are actually about to be queued.
        }
    }

    if let Err(cycle) = toposort(&graph, None) {
        // Walk one cycle back out of the graph for the error message.
        let start = cycle.node_id();
        let mut names = vec![graph[start].to_string()];
        let mut current = start;
        for _ in 0..graph.node_count() {
            let next = graph
                .neighbors(current)
                .find(|&n| petgraph::algo::has_path_connecting(&graph, n, start, None));
            match next {
                Some(next) if next == start => break,
                Some(next) => {
                    names.push(graph[next].to_string());
                    current = next;
                }
                None => break,
            }
        }
        names.push(graph[start].to_string());
        return Err(ScheduleError::RequiresCycle { cycle: names });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SenvConfig,
        options::{CliOverrides, InvocationOptions, ScriptOptions},
        selector::select,
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn expand_config(contents: &str, cli: CliOverrides) -> (Vec<SessionInstance>, InvocationOptions) {
        let dir = camino_tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("senv.toml");
        fs_err::write(&path, contents).expect("write config");
        let config = SenvConfig::from_file(&path).expect("config loads");
        let options = InvocationOptions::merge(cli, &config.options, "/work".into())
            .expect("options merge");
        let decls: Vec<_> = config.sessions.into_iter().map(Arc::new).collect();
        (crate::expand::expand(&decls, &options), options)
    }

    fn manifest_names(contents: &str, cli: CliOverrides) -> Vec<String> {
        let (all, options) = expand_config(contents, cli);
        let selected = select(&all, &options).expect("selection succeeds");
        let manifest = Manifest::build(selected, &all).expect("manifest builds");
        manifest.names().map(str::to_owned).collect()
    }

    #[test]
    fn requires_with_python_placeholder_interleaves() {
        let config = indoc! {r#"
            [[session]]
            name = "tests"
            python = ["3.11", "3.12"]

            [[session]]
            name = "cov"
            python = ["3.11", "3.12"]
            requires = ["tests-{python}"]
        "#};
        let names = manifest_names(
            config,
            CliOverrides {
                sessions: Some(vec!["cov".to_owned()]),
                ..Default::default()
            },
        );
        assert_eq!(names, ["tests-3.11", "cov-3.11", "tests-3.12", "cov-3.12"]);
    }

    #[test]
    fn requires_never_runs_after_dependent() {
        let config = indoc! {r#"
            [[session]]
            name = "cov"
            requires = ["tests"]

            [[session]]
            name = "tests"
        "#};
        let names = manifest_names(
            config,
            CliOverrides {
                sessions: Some(vec!["cov".to_owned(), "tests".to_owned()]),
                ..Default::default()
            },
        );
        // `tests` is pulled ahead of `cov` and not queued twice.
        assert_eq!(names, ["tests", "cov"]);
    }

    #[test]
    fn requires_cycle_fails_before_running() {
        let config = indoc! {r#"
            [[session]]
            name = "a"
            requires = ["b"]

            [[session]]
            name = "b"
            requires = ["a"]
        "#};
        let (all, options) = expand_config(config, CliOverrides::default());
        let selected = select(&all, &options).expect("selection succeeds");
        let err = Manifest::build(selected, &all).unwrap_err();
        assert!(matches!(err, ScheduleError::RequiresCycle { .. }));
    }

    #[test]
    fn requires_missing_names_the_target() {
        let config = indoc! {r#"
            [[session]]
            name = "cov"
            python = ["3.12"]
            requires = ["tests-{python}"]
        "#};
        let (all, options) = expand_config(config, CliOverrides::default());
        let selected = select(&all, &options).expect("selection succeeds");
        let err = Manifest::build(selected, &all).unwrap_err();
        match err {
            ScheduleError::RequiresMissing { session, target } => {
                assert_eq!(session, "cov-3.12");
                assert_eq!(target, "tests-3.12");
            }
            other => panic!("expected RequiresMissing, got {other:?}"),
        }
    }

    #[test]
    fn ambiguous_requirement_picks_lexicographically_first() {
        let config = indoc! {r#"
            [[session]]
            name = "tests"
            python = ["3.11", "3.12"]

            [[session]]
            name = "cov"
            requires = ["tests"]
        "#};
        let names = manifest_names(
            config,
            CliOverrides {
                sessions: Some(vec!["cov".to_owned()]),
                ..Default::default()
            },
        );
        assert_eq!(names, ["tests-3.11", "cov"]);
    }

    #[test]
    fn duplicate_selection_queues_twice() {
        let config = indoc! {r#"
            [[session]]
            name = "lint"
        "#};
        let names = manifest_names(
            config,
            CliOverrides {
                sessions: Some(vec!["lint".to_owned(), "lint".to_owned()]),
                ..Default::default()
            },
        );
        assert_eq!(names, ["lint", "lint"]);
    }

    #[test]
    fn notify_appends_once_and_forwards_posargs() {
        let config = indoc! {r#"
            [[session]]
            name = "a"

            [[session]]
            name = "b"
        "#};
        let (all, options) = expand_config(
            config,
            CliOverrides {
                sessions: Some(vec!["a".to_owned()]),
                ..Default::default()
            },
        );
        let selected = select(&all, &options).expect("selection succeeds");
        let mut manifest = Manifest::build(selected, &all).expect("manifest builds");

        let forwarded = vec!["--cov".to_owned()];
        let appended = manifest
            .notify("b", Some(&forwarded), &all)
            .expect("notify succeeds");
        assert_eq!(appended, 1);
        assert_eq!(manifest.names().collect::<Vec<_>>(), ["a", "b"]);

        // Re-notifying an already queued target is a no-op.
        let appended = manifest.notify("b", None, &all).expect("notify succeeds");
        assert_eq!(appended, 0);

        // The forwarded posargs landed on the queued copy.
        let mut drained = Vec::new();
        while let Some(entry) = manifest.next() {
            drained.push(entry);
        }
        assert_eq!(drained[1].posargs, forwarded);

        let err = manifest.notify("nope", None, &all).unwrap_err();
        assert!(matches!(err, InvalidSessionError::UnknownSession { .. }));
    }
}
