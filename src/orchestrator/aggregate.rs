//! The combined artifacts of one orchestration: `fullreport.json` and `globalreport.html`.

use crate::report::ProcedureReport;
use crate::report::html::{AggregateRow, aggregate_table};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const FULL_REPORT_JSON: &str = "fullreport.json";
pub const GLOBAL_REPORT_HTML: &str = "globalreport.html";

/// Metadata keys attached to every aggregated report.
pub const SETUP_KEY: &str = "setup";
pub const CONTEXT_KEY: &str = "context";
pub const ERROR_KEY: &str = "error";
pub const ORCHESTRATION_ID_KEY: &str = "orchestration-id";

/// One report of the aggregate with its grouping keys.
#[derive(Debug, Clone)]
pub struct AggregateEntry {
    pub category: String,
    pub build: String,
    pub context: String,
    pub report: ProcedureReport,
}

impl AggregateEntry {
    /// True for placeholders of contexts that produced no readable report.
    pub fn is_error(&self) -> bool {
        self.report.metadata.tag_str(ERROR_KEY).is_some()
    }
}

/// Reports of every run and context, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct AggregateReport {
    pub entries: Vec<AggregateEntry>,
}

impl AggregateReport {
    pub fn push(&mut self, entry: AggregateEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_error()).count()
    }

    /// JSON list of every report, four-space indented.
    pub fn to_json(&self) -> Result<String> {
        let reports: Vec<&ProcedureReport> = self.entries.iter().map(|e| &e.report).collect();
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        reports
            .serialize(&mut serializer)
            .context("Failed to serialize aggregate report")?;
        String::from_utf8(buf).context("Aggregate report is not UTF-8")
    }

    pub fn to_html(&self, general_log: Option<&Path>) -> String {
        let rows: Vec<AggregateRow<'_>> = self
            .entries
            .iter()
            .map(|e| AggregateRow {
                category: e.category.clone(),
                build: e.build.clone(),
                context: e.context.clone(),
                report: &e.report,
            })
            .collect();
        let log = general_log.map(|p| p.display().to_string());
        aggregate_table(&rows, log.as_deref())
    }

    /// Write both artifacts into `out_dir`. Returns (json, html) paths.
    pub fn write(&self, out_dir: &Path, general_log: Option<&Path>) -> Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;

        let json_path = out_dir.join(FULL_REPORT_JSON);
        fs::write(&json_path, self.to_json()?)
            .with_context(|| format!("Failed to write {}", json_path.display()))?;

        let html_path = out_dir.join(GLOBAL_REPORT_HTML);
        fs::write(&html_path, self.to_html(general_log))
            .with_context(|| format!("Failed to write {}", html_path.display()))?;

        info!(
            entries = self.len(),
            errors = self.error_count(),
            path = %json_path.display(),
            "aggregate report written"
        );
        Ok((json_path, html_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{LOG_PATH_KEY, ReportMetadata, SCHEMA_VERSION, StepEntry};

    fn populated() -> ProcedureReport {
        let mut metadata = ReportMetadata::with_timestamps("b", "e");
        metadata.set_tag(LOG_PATH_KEY, "/tmp/run/_log");
        metadata.set_tag(CONTEXT_KEY, "local");
        ProcedureReport {
            schema_version: Some(SCHEMA_VERSION),
            metadata,
            steps: vec![
                StepEntry {
                    number: "1".into(),
                    name: "Fetch".into(),
                    success: true,
                    duration: 1.0,
                    failure: None,
                },
                StepEntry {
                    number: "2".into(),
                    name: "Configure".into(),
                    success: false,
                    duration: 2.0,
                    failure: Some("exit_code".into()),
                },
            ],
        }
    }

    fn missing() -> ProcedureReport {
        let mut report = ProcedureReport::empty();
        report.metadata.set_tag(CONTEXT_KEY, "sandbox:ofbuild/debian-11");
        report.metadata.set_tag(ERROR_KEY, "report.json not found");
        report
    }

    fn aggregate() -> AggregateReport {
        let mut aggregate = AggregateReport::default();
        aggregate.push(AggregateEntry {
            category: "nightly".into(),
            build: "test".into(),
            context: "local".into(),
            report: populated(),
        });
        aggregate.push(AggregateEntry {
            category: "nightly".into(),
            build: "test".into(),
            context: "sandbox:ofbuild/debian-11".into(),
            report: missing(),
        });
        aggregate
    }

    #[test]
    fn test_missing_artifact_keeps_both_entries() {
        let aggregate = aggregate();
        assert_eq!(aggregate.len(), 2);
        assert_eq!(aggregate.error_count(), 1);

        let html = aggregate.to_html(None);
        assert!(html.contains("<th>1 - Fetch</th><th>2 - Configure</th>"));
        // One empty cell per step column on the missing entry's row.
        assert_eq!(html.matches("<td class=\"\"></td>").count(), 2);
    }

    #[test]
    fn test_json_is_list_with_context_metadata() {
        let json = aggregate().to_json().unwrap();
        assert!(json.contains("\n    {"));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let list = value.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["metadata"]["context"], "local");
        assert_eq!(list[1]["metadata"]["log-path"], "");
        assert_eq!(list[1]["steps"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_write_creates_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let (json, html) = aggregate()
            .write(&out, Some(&out.join("MBM_logs_x.txt")))
            .unwrap();
        assert!(json.ends_with(FULL_REPORT_JSON));
        let html = fs::read_to_string(html).unwrap();
        assert!(html.contains("General logs"));
        assert!(html.contains("Steps report"));
    }
}
