// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::KeywordParseError, parsing, parsing::Expr};
use std::{collections::BTreeSet, fmt};

/// A parsed keyword expression.
///
/// Used to filter session instances to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeywordExpr {
    /// The raw expression passed in.
    input: String,

    /// The parsed expression.
    parsed: Expr,
}

/// A query for a session instance, passed into [`KeywordExpr::matches`].
#[derive(Copy, Clone, Debug)]
pub struct KeywordQuery<'a> {
    /// The canonical instance name.
    pub name: &'a str,

    /// The instance's tags.
    pub tags: &'a BTreeSet<String>,
}

impl KeywordExpr {
    /// Parses a keyword expression.
    pub fn parse(input: &str) -> Result<Self, KeywordParseError> {
        match parsing::parse(input) {
            Ok(parsed) => Ok(Self {
                input: input.to_owned(),
                parsed,
            }),
            Err(offset) => {
                let message = if offset >= input.trim_end().len() {
                    "expected an expression here"
                } else {
                    "could not parse the rest of the expression"
                };
                Err(KeywordParseError::new(input, offset, message))
            }
        }
    }

    /// Returns the raw input the expression was parsed from.
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Evaluates the expression against one session instance.
    pub fn matches(&self, query: KeywordQuery<'_>) -> bool {
        eval(&self.parsed, query)
    }
}

fn eval(expr: &Expr, query: KeywordQuery<'_>) -> bool {
    match expr {
        Expr::Not(inner) => !eval(inner, query),
        Expr::Or(lhs, rhs) => eval(lhs, query) || eval(rhs, query),
        Expr::And(lhs, rhs) => eval(lhs, query) && eval(rhs, query),
        Expr::Token(token) => query.name.contains(token) || query.tags.contains(token),
    }
}

impl fmt::Display for KeywordExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_matches(expr: &str, name: &str, tags: &[&str]) -> bool {
        let tags: BTreeSet<String> = tags.iter().map(|t| t.to_string()).collect();
        let expr = KeywordExpr::parse(expr).expect("expression parses");
        expr.matches(KeywordQuery { name, tags: &tags })
    }

    #[test]
    fn token_matches_name_substring() {
        assert!(query_matches("test", "tests-3.12", &[]));
        assert!(query_matches("3.12", "tests-3.12", &[]));
        assert!(!query_matches("lint", "tests-3.12", &[]));
    }

    #[test]
    fn token_matches_tag_exactly() {
        assert!(query_matches("ci", "docs", &["ci"]));
        // Tags do not match on substrings.
        assert!(!query_matches("c", "docs", &["ci"]));
    }

    #[test]
    fn boolean_combinations() {
        assert!(query_matches("tests and not slow", "tests-3.12", &[]));
        assert!(!query_matches("tests and not slow", "tests-slow", &[]));
        assert!(query_matches("lint or tests", "tests", &[]));
        assert!(query_matches("not (lint or docs)", "tests", &[]));
    }

    #[test]
    fn parse_error_is_spanned() {
        let err = KeywordExpr::parse("tests and").unwrap_err();
        assert_eq!(err.input, "tests and");
        assert!(!err.message.is_empty());
    }
}
