// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root element of the JSON report written by `senv --report PATH`.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct ReportSummary {
    /// One entry per executed (or aborted) session instance, in run order.
    pub sessions: Vec<SessionReportSummary>,

    /// The overall result of the run.
    pub result: RunResultSummary,
}

impl ReportSummary {
    /// Parses JSON report output back into a summary.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }
}

/// The outcome of one session instance within a [`ReportSummary`].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SessionReportSummary {
    /// The canonical instance name, e.g. `tests-3.12(django='4.2')`.
    pub name: String,

    /// The final status of the instance.
    pub status: SessionStatusSummary,

    /// A human-readable reason, present for skipped/failed/aborted instances
    /// when one was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Wall-clock duration of the session body in seconds. Zero for instances
    /// that never ran.
    pub duration_s: f64,

    /// The instance's call spec: parameter name to value, in declaration
    /// order.
    #[serde(default)]
    pub args: IndexMap<String, serde_json::Value>,
}

// Eq is fine here: duration_s is never NaN (it comes from a Duration).
impl Eq for SessionReportSummary {}

/// Per-session status in a report.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatusSummary {
    /// The session body ran to completion.
    Success,
    /// The session failed: a command failed, an `error` step fired, or setup
    /// for this instance failed.
    Failed,
    /// The session was skipped (explicit `skip` step or missing interpreter
    /// under the skip policy).
    Skipped,
    /// The session never ran because the run was cut short.
    Aborted,
}

impl fmt::Display for SessionStatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Overall run result in a report.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunResultSummary {
    /// No session failed or was aborted.
    Success,
    /// At least one session failed or was aborted.
    Failed,
}

/// One element of the array printed by `senv --list --json`.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct ListEntrySummary {
    /// The base declaration name this instance was expanded from.
    pub session: String,

    /// The canonical instance name.
    pub name: String,

    /// The first line of the declaration's description, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// The interpreter spec for this instance, or `null` for host-only
    /// sessions.
    #[serde(default)]
    pub python: Option<String>,

    /// The union of declaration tags and parameter-bundle tags.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Parameter name to value, in declaration order. Empty for
    /// unparametrized sessions.
    #[serde(default)]
    pub call_spec: IndexMap<String, serde_json::Value>,
}

impl ListEntrySummary {
    /// Parses `senv --list --json` output.
    pub fn parse_json_list(json: impl AsRef<str>) -> Result<Vec<Self>, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn report_round_trip() {
        let json = indoc! {r#"
            {
              "sessions": [
                {
                  "name": "tests-3.12(django='4.2')",
                  "status": "success",
                  "duration_s": 12.5,
                  "args": { "django": "4.2" }
                },
                {
                  "name": "lint",
                  "status": "skipped",
                  "reason": "interpreter-missing",
                  "duration_s": 0.0,
                  "args": {}
                }
              ],
              "result": "success"
            }
        "#};
        let report = ReportSummary::parse_json(json).expect("valid report");
        assert_eq!(report.result, RunResultSummary::Success);
        assert_eq!(report.sessions.len(), 2);
        assert_eq!(
            report.sessions[0].status,
            SessionStatusSummary::Success,
        );
        assert_eq!(
            report.sessions[1].reason.as_deref(),
            Some("interpreter-missing")
        );

        let rendered = serde_json::to_string(&report).expect("serializable");
        let reparsed = ReportSummary::parse_json(rendered).expect("round-trips");
        assert_eq!(report, reparsed);
    }

    #[test]
    fn list_entries_parse() {
        let json = indoc! {r#"
            [
              {
                "session": "tests",
                "name": "tests(old)",
                "description": "Run the test suite",
                "python": "3.12",
                "tags": ["ci"],
                "call_spec": { "d": "1" }
              }
            ]
        "#};
        let entries = ListEntrySummary::parse_json_list(json).expect("valid list");
        assert_eq!(entries[0].session, "tests");
        assert_eq!(entries[0].call_spec["d"], serde_json::json!("1"));
    }
}
