// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reporting: per-session status lines, the final summary, and the
//! machine-readable JSON report.

use crate::{
    errors::ReportWriteError,
    runner::{SessionResult, SessionStatus},
};
use camino::Utf8Path;
use owo_colors::{OwoColorize, Style};
use senv_metadata::{ReportSummary, RunResultSummary, SessionReportSummary};
use std::io::Write;

#[derive(Clone, Debug, Default)]
struct Styles {
    ok: Style,
    failed: Style,
    skipped: Style,
    aborted: Style,
    session: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.ok = Style::new().green().bold();
        self.failed = Style::new().red().bold();
        self.skipped = Style::new().yellow().bold();
        self.aborted = Style::new().red();
        self.session = Style::new().bold();
    }
}

/// Streams human-readable status lines to a writer (stderr, in the CLI).
pub struct Reporter<W> {
    writer: W,
    styles: Styles,
}

impl<W: Write> Reporter<W> {
    pub fn new(writer: W, colorize: bool) -> Self {
        let mut styles = Styles::default();
        if colorize {
            styles.colorize();
        }
        Self { writer, styles }
    }

    /// Announces a session that is about to run.
    pub fn announce(&mut self, name: &str) {
        let _ = writeln!(
            self.writer,
            "{:>12}  {}",
            "START",
            name.style(self.styles.session),
        );
    }

    /// Reports one finished (or aborted) session.
    pub fn result(&mut self, result: &SessionResult) {
        let (label, style) = match result.status {
            SessionStatus::Success => ("OK", self.styles.ok),
            SessionStatus::Failed => ("FAIL", self.styles.failed),
            SessionStatus::Skipped => ("SKIP", self.styles.skipped),
            SessionStatus::Aborted => ("ABORT", self.styles.aborted),
        };
        let mut line = format!(
            "{:>12} [{:>9.3}s] {}",
            label.style(style),
            result.duration.as_secs_f64(),
            result.name.style(self.styles.session),
        );
        if let Some(reason) = &result.reason {
            line.push_str(": ");
            line.push_str(reason);
        }
        let _ = writeln!(self.writer, "{line}");
    }

    /// Prints the concluding per-status counts.
    pub fn summary(&mut self, results: &[SessionResult]) {
        let count = |status: SessionStatus| {
            results
                .iter()
                .filter(|result| result.status == status)
                .count()
        };
        let ok = count(SessionStatus::Success);
        let failed = count(SessionStatus::Failed);
        let skipped = count(SessionStatus::Skipped);
        let aborted = count(SessionStatus::Aborted);

        let mut parts = vec![format!("{} ok", ok.style(self.styles.ok))];
        if failed > 0 {
            parts.push(format!("{} failed", failed.style(self.styles.failed)));
        }
        if skipped > 0 {
            parts.push(format!("{} skipped", skipped.style(self.styles.skipped)));
        }
        if aborted > 0 {
            parts.push(format!("{} aborted", aborted.style(self.styles.aborted)));
        }
        let _ = writeln!(
            self.writer,
            "{:>12}  {} sessions run: {}",
            "SUMMARY",
            results.len(),
            parts.join(", "),
        );
    }
}

/// Builds the serializable report for a finished run.
pub fn build_report(results: &[SessionResult]) -> ReportSummary {
    let sessions = results
        .iter()
        .map(|result| SessionReportSummary {
            name: result.name.clone(),
            status: result.status.summary(),
            reason: result.reason.clone(),
            duration_s: result.duration.as_secs_f64(),
            args: result
                .args
                .iter()
                .map(|(key, value)| (key.clone(), value.to_json()))
                .collect(),
        })
        .collect();
    let result = if results.iter().any(SessionResult::is_fatal) {
        RunResultSummary::Failed
    } else {
        RunResultSummary::Success
    };
    ReportSummary { sessions, result }
}

/// Writes the JSON report to the `--report` path.
pub fn write_report(path: &Utf8Path, results: &[SessionResult]) -> Result<(), ReportWriteError> {
    let report = build_report(results);
    let json = serde_json::to_string_pretty(&report).expect("report serializes");
    fs_err::write(path, json).map_err(|err| ReportWriteError {
        path: path.to_owned(),
        err: err.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use senv_metadata::SessionStatusSummary;
    use std::time::Duration;

    fn result(name: &str, status: SessionStatus, reason: Option<&str>) -> SessionResult {
        SessionResult {
            name: name.to_owned(),
            status,
            reason: reason.map(str::to_owned),
            duration: Duration::from_millis(1500),
            args: IndexMap::new(),
        }
    }

    #[test]
    fn report_shape_matches_contract() {
        let results = vec![
            result("t", SessionStatus::Success, None),
            result("u", SessionStatus::Skipped, Some("interpreter-missing")),
        ];
        let report = build_report(&results);
        assert_eq!(report.result, RunResultSummary::Success);
        assert_eq!(report.sessions[0].status, SessionStatusSummary::Success);
        assert_eq!(report.sessions[0].duration_s, 1.5);
        assert_eq!(
            report.sessions[1].reason.as_deref(),
            Some("interpreter-missing")
        );

        let failed = build_report(&[result("t", SessionStatus::Aborted, None)]);
        assert_eq!(failed.result, RunResultSummary::Failed);
    }

    #[test]
    fn report_round_trips_through_metadata() {
        let results = vec![result("t", SessionStatus::Failed, Some("command-failed"))];
        let report = build_report(&results);
        let json = serde_json::to_string(&report).expect("serializes");
        let parsed = ReportSummary::parse_json(&json).expect("parses");
        assert_eq!(report, parsed);
    }

    #[test]
    fn status_lines_include_reasons() {
        let mut sink = Vec::new();
        let mut reporter = Reporter::new(&mut sink, false);
        reporter.announce("t");
        reporter.result(&result("t", SessionStatus::Skipped, Some("interpreter-missing")));
        reporter.summary(&[result("t", SessionStatus::Skipped, None)]);
        let output = String::from_utf8(sink).expect("utf-8");
        assert!(output.contains("START"), "{output}");
        assert!(output.contains("SKIP"), "{output}");
        assert!(output.contains("interpreter-missing"), "{output}");
        assert!(output.contains("1 sessions run"), "{output}");
    }
}
