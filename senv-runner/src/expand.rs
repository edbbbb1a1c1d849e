// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Expansion: turning session declarations into runnable instances.
//!
//! Expansion applies the interpreter axis first (one instance per declared
//! interpreter, suffixing the name), then the parameter axis (the Cartesian
//! product of the stacked parametrize layers, order preserved), then the
//! special `python` parameter (its values become the interpreter axis).
//!
//! Canonical names are stable and are the selector keys:
//! `tests-3.12(django='4.2', flag=true)`. Two names are equal when their
//! parsed argument bundles are equal, regardless of quoting.

use crate::{
    config::{ParamSet, PythonAxis, SessionDecl},
    options::InvocationOptions,
};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};
use tracing::warn;

/// A parameter value from a parametrize layer.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float. Compared by bit pattern.
    Float(f64),
    /// A string.
    Str(String),
}

impl ParamValue {
    /// Renders the value without string quoting, for use as an interpreter
    /// spec or an id fragment.
    pub fn bare(&self) -> String {
        match self {
            Self::Bool(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Str(v) => v.clone(),
        }
    }

    /// The JSON form used in reports and list output.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(v) => serde_json::Value::from(*v),
            Self::Int(v) => serde_json::Value::from(*v),
            Self::Float(v) => serde_json::Value::from(*v),
            Self::Str(v) => serde_json::Value::from(v.clone()),
        }
    }
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ParamValue {}

impl Hash for ParamValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Str(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ParamValue {
    /// The canonical rendering inside a session name: strings are
    /// single-quoted with `\` and `'` escaped, everything else is bare.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(v) => {
                f.write_str("'")?;
                for c in v.chars() {
                    if matches!(c, '\'' | '\\') {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("'")
            }
            other => f.write_str(&other.bare()),
        }
    }
}

/// One expanded, runnable unit.
#[derive(Clone, Debug)]
pub struct SessionInstance {
    /// The declaration this instance came from.
    pub decl: Arc<SessionDecl>,
    /// The canonical name, e.g. `tests-3.12(django='4.2')`.
    pub name: String,
    /// The name without the call spec: declaration name plus any
    /// interpreter suffix.
    pub base: String,
    /// The interpreter spec, when the instance builds an environment for a
    /// concrete interpreter.
    pub python: Option<String>,
    /// True for `python = false` declarations: no environment at all.
    pub host_only: bool,
    /// Parameter name to value, in declaration order.
    pub call_args: IndexMap<String, ParamValue>,
    /// Declaration tags plus parameter-bundle tags.
    pub tags: BTreeSet<String>,
    /// This instance's positional arguments. A per-instance copy, so one
    /// session can never corrupt another's.
    pub posargs: Vec<String>,
}

impl SessionInstance {
    /// True if a selector pattern addresses this instance. A pattern
    /// matches the full canonical name (quoting-insensitively), the base
    /// name, or the bare declaration name; base and declaration matches
    /// include all parametric expansions.
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        names_equal(pattern, &self.name)
            || pattern == self.base
            || pattern == self.decl.name
    }

    /// The call spec in JSON form.
    pub fn call_args_json(&self) -> IndexMap<String, serde_json::Value> {
        self.call_args
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect()
    }
}

/// Expands declarations into instances, preserving declaration order.
/// Instances whose canonical name collides with an earlier one are dropped
/// with a warning.
pub fn expand(
    decls: &[Arc<SessionDecl>],
    options: &InvocationOptions,
) -> Vec<SessionInstance> {
    let mut instances = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for decl in decls {
        for instance in expand_decl(decl, options) {
            if seen.insert(instance.name.clone()) {
                instances.push(instance);
            } else {
                warn!(
                    "session `{}` expands to the duplicate name `{}`; keeping the first",
                    decl.name, instance.name
                );
            }
        }
    }
    instances
}

fn expand_decl(decl: &Arc<SessionDecl>, options: &InvocationOptions) -> Vec<SessionInstance> {
    // Partition out a `python` parametrize layer; its values are an
    // interpreter axis, not call args.
    let (python_layers, value_layers): (Vec<&ParamSet>, Vec<&ParamSet>) = decl
        .parametrize
        .iter()
        .partition(|set| set.args.iter().any(|arg| arg == "python"));

    let axis: Vec<(Option<String>, bool)> = if let Some(layer) = python_layers.first() {
        layer
            .bundles
            .iter()
            .map(|bundle| (Some(bundle.values[0].bare()), true))
            .collect()
    } else {
        python_axis(&decl.python, options)
    };

    let mut out = Vec::new();
    for (python, suffixed) in axis {
        let base = match (&python, suffixed) {
            (Some(python), true) => format!("{}-{python}", decl.name),
            _ => decl.name.clone(),
        };

        let combos: Vec<Vec<&crate::config::ParamBundle>> = if value_layers.is_empty() {
            vec![Vec::new()]
        } else {
            value_layers
                .iter()
                .map(|set| set.bundles.iter().collect::<Vec<_>>())
                .multi_cartesian_product()
                .collect()
        };

        for combo in combos {
            let mut call_args = IndexMap::new();
            let mut tags = decl.tags.clone();
            let mut fragments = Vec::new();

            for (set, bundle) in value_layers.iter().zip(&combo) {
                match &bundle.id {
                    Some(id) => fragments.push(id.clone()),
                    None => {
                        let rendered = set
                            .args
                            .iter()
                            .zip(&bundle.values)
                            .map(|(arg, value)| format!("{arg}={value}"))
                            .join(", ");
                        fragments.push(rendered);
                    }
                }
                for (arg, value) in set.args.iter().zip(&bundle.values) {
                    call_args.insert(arg.clone(), value.clone());
                }
                tags.extend(bundle.tags.iter().cloned());
            }

            let name = if fragments.is_empty() {
                base.clone()
            } else {
                format!("{base}({})", fragments.join(", "))
            };

            out.push(SessionInstance {
                decl: Arc::clone(decl),
                name,
                base: base.clone(),
                python: python.clone(),
                host_only: matches!(decl.python, PythonAxis::Disabled),
                call_args,
                tags,
                posargs: options.posargs.clone(),
            });
        }
    }
    out
}

fn python_axis(axis: &PythonAxis, options: &InvocationOptions) -> Vec<(Option<String>, bool)> {
    if let Some(forced) = &options.force_python
        && !matches!(axis, PythonAxis::Disabled)
    {
        let suffixed = matches!(axis, PythonAxis::List(_));
        return vec![(Some(forced.clone()), suffixed)];
    }
    match axis {
        PythonAxis::Current | PythonAxis::Disabled => vec![(None, false)],
        PythonAxis::Single(spec) => vec![(Some(spec.clone()), false)],
        PythonAxis::List(specs) => {
            let mut specs = specs.clone();
            for extra in &options.extra_pythons {
                if !specs.contains(extra) {
                    specs.push(extra.clone());
                }
            }
            specs.into_iter().map(|spec| (Some(spec), true)).collect()
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical-name parsing
// ---------------------------------------------------------------------------

/// The call part of a parsed canonical name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedCall {
    /// A custom id: `tests(old)`.
    Id(String),
    /// Key-value args: `tests(x='1', n=2)`.
    Args(Vec<(String, ParamValue)>),
}

/// A canonical name split into base and call part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedName<'a> {
    /// Everything before the call spec.
    pub base: &'a str,
    /// The parsed call spec, if the name has one.
    pub call: Option<ParsedCall>,
}

/// Parses a canonical name. Never fails: an unparsable call spec is treated
/// as an id.
pub fn parse_name(name: &str) -> ParsedName<'_> {
    let Some(open) = name.find('(') else {
        return ParsedName { base: name, call: None };
    };
    let Some(inner) = name[open..].strip_prefix('(').and_then(|s| s.strip_suffix(')')) else {
        return ParsedName { base: name, call: None };
    };
    let base = &name[..open];

    let call = match parse_args(inner) {
        Some(args) => ParsedCall::Args(args),
        None => ParsedCall::Id(inner.to_owned()),
    };
    ParsedName {
        base,
        call: Some(call),
    }
}

/// Canonical-name equality under the argument-bundle rule: bases must match
/// exactly, argument bundles compare as unordered maps, and string quoting
/// is normalized by parsing (`tests(x='1')` equals `tests(x="1")`).
pub fn names_equal(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let a = parse_name(a);
    let b = parse_name(b);
    if a.base != b.base {
        return false;
    }
    match (a.call, b.call) {
        (None, None) => true,
        (Some(ParsedCall::Id(a)), Some(ParsedCall::Id(b))) => a == b,
        (Some(ParsedCall::Args(a)), Some(ParsedCall::Args(b))) => {
            let a: BTreeMap<&String, &ParamValue> = a.iter().map(|(k, v)| (k, v)).collect();
            let b: BTreeMap<&String, &ParamValue> = b.iter().map(|(k, v)| (k, v)).collect();
            a == b
        }
        _ => false,
    }
}

fn parse_args(input: &str) -> Option<Vec<(String, ParamValue)>> {
    let mut args = Vec::new();
    let mut rest = input.trim_start();
    loop {
        let eq = rest.find('=')?;
        let key = rest[..eq].trim();
        if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return None;
        }
        rest = rest[eq + 1..].trim_start();
        let (value, remainder) = parse_value(rest)?;
        args.push((key.to_owned(), value));

        rest = remainder.trim_start();
        if rest.is_empty() {
            return Some(args);
        }
        rest = rest.strip_prefix(',')?.trim_start();
    }
}

fn parse_value(input: &str) -> Option<(ParamValue, &str)> {
    let mut chars = input.chars();
    match chars.next()? {
        quote @ ('\'' | '"') => {
            let mut value = String::new();
            let mut escaped = false;
            for (index, c) in input.char_indices().skip(1) {
                if escaped {
                    value.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    return Some((ParamValue::Str(value), &input[index + 1..]));
                } else {
                    value.push(c);
                }
            }
            None
        }
        _ => {
            let end = input.find(',').unwrap_or(input.len());
            let token = input[..end].trim();
            let value = match token {
                "true" => ParamValue::Bool(true),
                "false" => ParamValue::Bool(false),
                _ => {
                    if let Ok(int) = token.parse::<i64>() {
                        ParamValue::Int(int)
                    } else if let Ok(float) = token.parse::<f64>() {
                        ParamValue::Float(float)
                    } else {
                        return None;
                    }
                }
            };
            Some((value, &input[end..]))
        }
    }
}
