// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `--list` output, human and JSON.
//!
//! The human listing shows every expanded instance and stars the ones the
//! current filters select, so `senv -l -k foo` doubles as a dry run of the
//! selection. The JSON listing contains exactly the selected instances, in
//! run order; re-parsing it yields the set a run with the same filters
//! would execute.

use crate::expand::SessionInstance;
use owo_colors::{OwoColorize, Style};
use senv_metadata::ListEntrySummary;
use std::{collections::HashSet, io, io::Write};

/// Writes the human-readable listing.
pub fn write_human_list(
    writer: &mut impl Write,
    all: &[SessionInstance],
    selected: &[SessionInstance],
    colorize: bool,
) -> io::Result<()> {
    let mut selected_style = Style::new();
    let mut dim_style = Style::new();
    if colorize {
        selected_style = Style::new().cyan();
        dim_style = Style::new().dimmed();
    }
    let selected_names: HashSet<&str> = selected.iter().map(|i| i.name.as_str()).collect();

    writeln!(writer, "Sessions defined in senv.toml:")?;
    writeln!(writer)?;
    for instance in all {
        let is_selected = selected_names.contains(instance.name.as_str());
        let marker = if is_selected { '*' } else { '-' };
        let style = if is_selected { selected_style } else { dim_style };
        match instance.decl.short_description() {
            Some(description) => writeln!(
                writer,
                "{} {} -> {}",
                marker,
                instance.name.style(style),
                description,
            )?,
            None => writeln!(writer, "{} {}", marker, instance.name.style(style))?,
        }
    }
    writeln!(writer)?;
    writeln!(
        writer,
        "sessions marked with * are selected, sessions marked with - are skipped.",
    )?;
    Ok(())
}

/// Builds the `--list --json` entries for the selected instances.
pub fn list_entries(selected: &[SessionInstance]) -> Vec<ListEntrySummary> {
    selected
        .iter()
        .map(|instance| ListEntrySummary {
            session: instance.decl.name.clone(),
            name: instance.name.clone(),
            description: instance.decl.short_description().map(str::to_owned),
            python: instance.python.clone(),
            tags: instance.tags.iter().cloned().collect(),
            call_spec: instance.call_args_json(),
        })
        .collect()
}

/// Writes the JSON listing.
pub fn write_json_list(
    writer: &mut impl Write,
    selected: &[SessionInstance],
) -> io::Result<()> {
    let entries = list_entries(selected);
    let json = serde_json::to_string_pretty(&entries).expect("list entries serialize");
    writeln!(writer, "{json}")
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

    const CONFIG: &str = indoc! {r#"
        [[session]]
        name = "tests"
        description = """
        Run the test suite.

        Pass posargs through to pytest."""
        python = "3.12"

        [[session.parametrize]]
        arg = "d"
        values = ["1", "2"]
        ids = ["old", "new"]

        [[session]]
        name = "docs"
        default = false
    "#};

    fn fixture(cli: CliOverrides) -> (Vec<SessionInstance>, Vec<SessionInstance>) {
        let dir = camino_tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("senv.toml");
        fs_err::write(&path, CONFIG).expect("write config");
        let config = SenvConfig::from_file(&path).expect("config loads");
        let options = InvocationOptions::merge(cli, &config.options, "/work".into())
            .expect("options merge");
        let decls: Vec<_> = config.sessions.into_iter().map(Arc::new).collect();
        let all = crate::expand::expand(&decls, &options);
        let selected = select(&all, &options).expect("selection succeeds");
        (all, selected)
    }

    #[test]
    fn json_entries_carry_call_specs() {
        let (_, selected) = fixture(CliOverrides::default());
        let entries = list_entries(&selected);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].session, "tests");
        assert_eq!(entries[0].name, "tests(old)");
        assert_eq!(
            entries[0].description.as_deref(),
            Some("Run the test suite.")
        );
        assert_eq!(entries[0].python.as_deref(), Some("3.12"));
        assert_eq!(entries[0].call_spec["d"], serde_json::json!("1"));
        assert_eq!(entries[1].call_spec["d"], serde_json::json!("2"));
    }

    #[test]
    fn json_round_trips_through_metadata() {
        let (_, selected) = fixture(CliOverrides::default());
        let mut sink = Vec::new();
        write_json_list(&mut sink, &selected).expect("writes");
        let parsed =
            ListEntrySummary::parse_json_list(String::from_utf8(sink).expect("utf-8"))
                .expect("parses");
        let names: Vec<_> = parsed.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["tests(old)", "tests(new)"]);
    }

    #[test]
    fn human_list_stars_selection() {
        let (all, selected) = fixture(CliOverrides::default());
        let mut sink = Vec::new();
        write_human_list(&mut sink, &all, &selected, false).expect("writes");
        let output = String::from_utf8(sink).expect("utf-8");
        assert!(output.contains("* tests(old) -> Run the test suite."), "{output}");
        // `docs` is default = false and therefore unselected.
        assert!(output.contains("- docs"), "{output}");
    }
}
