// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selecting which instances to run.
//!
//! Filters apply in order: name patterns, interpreter filters, the keyword
//! expression, tag filters. With no filters at all, the default-selected
//! declarations run. Explicitly duplicated name patterns queue the instance
//! once per mention, in the given order.

use crate::{errors::InvalidSessionError, expand::SessionInstance, options::InvocationOptions};
use senv_filtering::{KeywordExpr, KeywordQuery};
use std::collections::BTreeSet;

/// Applies the invocation's filters to the expanded instance list.
///
/// Returns the instances to run, in order. An empty return is only possible
/// for an explicitly empty selection (`sessions = []` with no CLI override)
/// or a filterless invocation where nothing is default-selected; filters
/// that match nothing are an error.
pub fn select(
    instances: &[SessionInstance],
    options: &InvocationOptions,
) -> Result<Vec<SessionInstance>, InvalidSessionError> {
    let keyword = options
        .keywords
        .as_deref()
        .map(KeywordExpr::parse)
        .transpose()?;

    let mut selected: Vec<SessionInstance> = match &options.sessions {
        Some(patterns) => {
            let mut picked = Vec::new();
            for pattern in patterns {
                let matched: Vec<_> = instances
                    .iter()
                    .filter(|instance| instance.matches_pattern(pattern))
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    return Err(InvalidSessionError::UnknownSession {
                        name: pattern.clone(),
                        known: known_names(instances),
                    });
                }
                // A pattern the user repeated runs once per mention.
                picked.extend(matched);
            }
            picked
        }
        None => instances
            .iter()
            .filter(|instance| instance.decl.default_selected)
            .cloned()
            .collect(),
    };

    let had_explicit_filters = options.sessions.is_some()
        || !options.pythons.is_empty()
        || keyword.is_some()
        || !options.tags.is_empty();

    if !options.pythons.is_empty() {
        selected.retain(|instance| {
            instance
                .python
                .as_deref()
                .is_some_and(|python| options.pythons.iter().any(|p| p == python))
        });
    }

    if let Some(expr) = &keyword {
        selected.retain(|instance| {
            expr.matches(KeywordQuery {
                name: &instance.name,
                tags: &instance.tags,
            })
        });
    }

    if !options.tags.is_empty() {
        selected.retain(|instance| options.tags.iter().any(|tag| instance.tags.contains(tag)));
    }

    let explicitly_empty = options
        .sessions
        .as_deref()
        .is_some_and(|patterns| patterns.is_empty());
    if selected.is_empty() && had_explicit_filters && !explicitly_empty {
        return Err(InvalidSessionError::NoMatch);
    }
    Ok(selected)
}

fn known_names(instances: &[SessionInstance]) -> Vec<String> {
    let mut names = BTreeSet::new();
    for instance in instances {
        names.insert(instance.decl.name.clone());
        if instance.base != instance.decl.name {
            names.insert(instance.base.clone());
        }
    }
    names.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SenvConfig,
        options::{CliOverrides, InvocationOptions, ScriptOptions},
    };
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const CONFIG: &str = indoc! {r#"
        [[session]]
        name = "tests"
        python = ["3.11", "3.12"]
        tags = ["ci"]

        [[session.parametrize]]
        arg = "d"
        values = ["1", "2"]

        [[session]]
        name = "lint"
        tags = ["style", "ci"]

        [[session]]
        name = "docs"
        default = false
    "#};

    fn instances() -> Vec<SessionInstance> {
        let dir = camino_tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("senv.toml");
        fs_err::write(&path, CONFIG).expect("write config");
        let config = SenvConfig::from_file(&path).expect("config loads");
        let decls: Vec<_> = config.sessions.into_iter().map(Arc::new).collect();
        crate::expand::expand(&decls, &options(CliOverrides::default()))
    }

    fn options(cli: CliOverrides) -> InvocationOptions {
        InvocationOptions::merge(cli, &ScriptOptions::default(), "/work".into())
            .expect("options merge")
    }

    fn select_names(cli: CliOverrides) -> Vec<String> {
        select(&instances(), &options(cli))
            .expect("selection succeeds")
            .into_iter()
            .map(|i| i.name)
            .collect()
    }

    #[test]
    fn no_filters_selects_defaults() {
        let names = select_names(CliOverrides::default());
        // `docs` has default = false.
        assert_eq!(
            names,
            [
                "tests-3.11(d='1')",
                "tests-3.11(d='2')",
                "tests-3.12(d='1')",
                "tests-3.12(d='2')",
                "lint",
            ]
        );
    }

    #[test]
    fn base_pattern_pulls_in_expansions() {
        let names = select_names(CliOverrides {
            sessions: Some(vec!["tests-3.11".to_owned()]),
            ..Default::default()
        });
        assert_eq!(names, ["tests-3.11(d='1')", "tests-3.11(d='2')"]);
    }

    #[test]
    fn duplicate_patterns_run_twice_in_order() {
        let names = select_names(CliOverrides {
            sessions: Some(vec!["lint".to_owned(), "lint".to_owned()]),
            ..Default::default()
        });
        assert_eq!(names, ["lint", "lint"]);
    }

    #[test]
    fn non_default_sessions_are_addressable() {
        let names = select_names(CliOverrides {
            sessions: Some(vec!["docs".to_owned()]),
            ..Default::default()
        });
        assert_eq!(names, ["docs"]);
    }

    #[test]
    fn python_filter_applies() {
        let names = select_names(CliOverrides {
            pythons: Some(vec!["3.12".to_owned()]),
            ..Default::default()
        });
        assert_eq!(names, ["tests-3.12(d='1')", "tests-3.12(d='2')"]);
    }

    #[test]
    fn keyword_expression_applies() {
        let names = select_names(CliOverrides {
            keywords: Some("style or 3.11".to_owned()),
            ..Default::default()
        });
        assert_eq!(names, ["tests-3.11(d='1')", "tests-3.11(d='2')", "lint"]);
    }

    #[test]
    fn tag_filter_applies() {
        let names = select_names(CliOverrides {
            tags: Some(vec!["style".to_owned()]),
            ..Default::default()
        });
        assert_eq!(names, ["lint"]);
    }

    #[test]
    fn unknown_session_lists_known_names() {
        let err = select(
            &instances(),
            &options(CliOverrides {
                sessions: Some(vec!["nope".to_owned()]),
                ..Default::default()
            }),
        )
        .unwrap_err();
        match err {
            InvalidSessionError::UnknownSession { name, known } => {
                assert_eq!(name, "nope");
                assert!(known.contains(&"docs".to_owned()));
                assert!(known.contains(&"tests-3.12".to_owned()));
            }
            other => panic!("expected UnknownSession, got {other:?}"),
        }
    }

    #[test]
    fn filters_matching_nothing_error() {
        let err = select(
            &instances(),
            &options(CliOverrides {
                tags: Some(vec!["nonexistent".to_owned()]),
                ..Default::default()
            }),
        )
        .unwrap_err();
        assert!(matches!(err, InvalidSessionError::NoMatch));
    }

    #[test]
    fn explicitly_empty_selection_is_empty_not_an_error() {
        let script = ScriptOptions {
            sessions: Some(vec![]),
            ..Default::default()
        };
        let options =
            InvocationOptions::merge(CliOverrides::default(), &script, "/work".into())
                .expect("options merge");
        let selected = select(&instances(), &options).expect("empty selection is fine");
        assert!(selected.is_empty());
    }
}
