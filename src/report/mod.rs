//! Procedure reports: the structured artifact exchanged with the orchestrator
//! and its human-readable renderings.

pub mod html;

use crate::errors::OrchestrationError;
use crate::ledger::StepLedger;
use crate::step::StepId;
use anyhow::{Context, Result};
use console::style;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const REPORT_JSON: &str = "report.json";
pub const REPORT_HTML: &str = "report.html";

/// Version written into every report. Reports without a version are read as legacy.
pub const SCHEMA_VERSION: u32 = 1;

/// Metadata key holding the log directory of a report, set by the orchestrator.
pub const LOG_PATH_KEY: &str = "log-path";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTimestamps {
    pub begin: String,
    pub end: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_timestamps: Option<ExecutionTimestamps>,
    /// Caller tags (`setup`, `context`, `log-path`, `error`, ...).
    #[serde(flatten)]
    pub tags: Map<String, Value>,
}

impl ReportMetadata {
    pub fn with_timestamps(begin: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            execution_timestamps: Some(ExecutionTimestamps {
                begin: begin.into(),
                end: end.into(),
            }),
            tags: Map::new(),
        }
    }

    pub fn set_tag(&mut self, key: &str, value: impl Into<Value>) {
        self.tags.insert(key.to_string(), value.into());
    }

    pub fn tag_str(&self, key: &str) -> Option<&str> {
        self.tags.get(key).and_then(Value::as_str)
    }

    /// Log directory of the run, when known and non-empty.
    pub fn log_path(&self) -> Option<&str> {
        self.tag_str(LOG_PATH_KEY).filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEntry {
    /// Step tag, e.g. `3` or `R2`.
    pub number: String,
    pub name: String,
    pub success: bool,
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl StepEntry {
    pub fn id(&self) -> StepId {
        StepId::new(&self.number, &self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcedureReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub metadata: ReportMetadata,
    #[serde(default)]
    pub steps: Vec<StepEntry>,
}

impl ProcedureReport {
    /// Placeholder for a context that left no readable report behind.
    pub fn empty() -> Self {
        let mut metadata = ReportMetadata::default();
        metadata.set_tag(LOG_PATH_KEY, "");
        Self {
            schema_version: Some(SCHEMA_VERSION),
            metadata,
            steps: Vec::new(),
        }
    }

    pub fn find(&self, id: &StepId) -> Option<&StepEntry> {
        self.steps
            .iter()
            .find(|s| s.number == id.tag && s.name == id.name)
    }

    pub fn all_succeeded(&self) -> bool {
        self.steps.iter().all(|s| s.success)
    }

    /// Read and validate a report written by a procedure run.
    pub fn load(path: &Path) -> Result<Self, OrchestrationError> {
        if !path.is_file() {
            return Err(OrchestrationError::ReportMissing {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path).map_err(|e| OrchestrationError::ReportUnreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let report: Self =
            serde_json::from_str(&content).map_err(|e| OrchestrationError::ReportUnreadable {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        match report.schema_version {
            None | Some(SCHEMA_VERSION) => Ok(report),
            Some(version) => Err(OrchestrationError::UnsupportedSchema {
                path: path.to_path_buf(),
                version,
            }),
        }
    }
}

/// Turns a ledger into reports and writes them.
pub struct ReportGenerator;

impl ReportGenerator {
    /// Build the structured report, steps sorted by (tag, name).
    pub fn to_structured(ledger: &StepLedger, metadata: ReportMetadata) -> ProcedureReport {
        let steps = ledger
            .to_ordered_list()
            .into_iter()
            .map(|(id, result)| StepEntry {
                number: id.tag,
                name: id.name,
                success: result.success,
                duration: result.duration,
                failure: result.failure.map(|f| f.as_str().to_string()),
            })
            .collect();
        ProcedureReport {
            schema_version: Some(SCHEMA_VERSION),
            metadata,
            steps,
        }
    }

    /// Write `report.json` and `report.html` into `output_dir`, or print a
    /// shell summary when no output directory is given.
    ///
    /// Returns the JSON path when files were written.
    pub fn write_artifacts(
        report: &ProcedureReport,
        output_dir: Option<&Path>,
        log_dir: &Path,
    ) -> Result<Option<PathBuf>> {
        let Some(output_dir) = output_dir.filter(|d| !d.as_os_str().is_empty()) else {
            println!("{}", render_shell_summary(report));
            return Ok(None);
        };

        fs::create_dir_all(output_dir).with_context(|| {
            format!("Failed to create report directory: {}", output_dir.display())
        })?;

        let json_path = output_dir.join(REPORT_JSON);
        let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        fs::write(&json_path, json)
            .with_context(|| format!("Failed to write report: {}", json_path.display()))?;
        info!(path = %json_path.display(), steps = report.steps.len(), "report written");

        let html_path = output_dir.join(REPORT_HTML);
        fs::write(&html_path, html::procedure_table(report, log_dir))
            .with_context(|| format!("Failed to write report: {}", html_path.display()))?;
        info!(path = %html_path.display(), "html report written");

        Ok(Some(json_path))
    }
}

/// Render a report as terminal lines, one per step.
pub fn render_shell_summary(report: &ProcedureReport) -> String {
    let mut lines = vec![format!("\n{}", style("** Build-machine summary **").bold())];
    for step in &report.steps {
        let status = if step.success {
            style("OK").green().bold()
        } else {
            style("KO").red().bold()
        };
        let mut line = format!(
            "{}\t{}\t{}",
            step.id().display_label(),
            status,
            style(format!("{:.3}s", step.duration)).dim()
        );
        if let Some(failure) = &step.failure {
            line.push_str(&format!("\t{}", style(failure).dim()));
        }
        lines.push(line);
    }
    lines.push("-".repeat(10));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{FailureKind, Step, SuccessPolicy};
    use tempfile::tempdir;

    fn sample_ledger(dir: &Path) -> StepLedger {
        let mut ledger = StepLedger::new(dir);
        let fetch = Step::new(StepId::new("1", "Fetch"), "Fetch", vec![], dir);
        let check = Step::new(StepId::new("R2", "Check"), "Check", vec![], dir)
            .with_policy(SuccessPolicy::ExitCodeZero);
        let build = Step::new(StepId::new("3", "Build"), "Build", vec![], dir);
        ledger.record(&check, 1, 0.5);
        ledger.record(&fetch, 0, 2.0);
        ledger.record(&build, 0, 10.25);
        ledger
    }

    #[test]
    fn test_to_structured_sorts_steps() {
        let dir = tempdir().unwrap();
        let report = ReportGenerator::to_structured(
            &sample_ledger(dir.path()),
            ReportMetadata::with_timestamps("2026-01-01 10:00:00", "2026-01-01 10:05:00"),
        );
        let keys: Vec<String> = report.steps.iter().map(|s| s.id().to_string()).collect();
        assert_eq!(keys, vec!["1_Fetch", "3_Build", "R2_Check"]);
        assert_eq!(report.schema_version, Some(SCHEMA_VERSION));
        assert_eq!(report.steps[2].failure.as_deref(), Some(FailureKind::ExitCode(1).as_str()));
        assert!(!report.all_succeeded());
    }

    #[test]
    fn test_write_then_load_keeps_steps_and_metadata() {
        let dir = tempdir().unwrap();
        let mut metadata = ReportMetadata::with_timestamps("b", "e");
        metadata.set_tag("context", "local");
        let report = ReportGenerator::to_structured(&sample_ledger(dir.path()), metadata);

        let out = dir.path().join("out");
        let json = ReportGenerator::write_artifacts(&report, Some(&out), dir.path())
            .unwrap()
            .unwrap();
        assert!(out.join(REPORT_HTML).exists());

        let loaded = ProcedureReport::load(&json).unwrap();
        assert_eq!(loaded, report);
        assert_eq!(loaded.metadata.tag_str("context"), Some("local"));
    }

    #[test]
    fn test_measured_durations_survive_reload_exactly() {
        let dir = tempdir().unwrap();
        let mut ledger = StepLedger::new(dir.path());
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for n in 0..2000 {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let micros = (seed >> 11) % 3_600_000_000;
            let step = Step::new(StepId::new(format!("{}", n + 1), "Build"), "Build", vec![], dir.path());
            ledger.record(&step, 0, micros as f64 / 1_000_000.0 + 1.0 / 3.0);
        }
        let report = ReportGenerator::to_structured(&ledger, ReportMetadata::with_timestamps("b", "e"));

        let out = dir.path().join("out");
        let json = ReportGenerator::write_artifacts(&report, Some(&out), dir.path())
            .unwrap()
            .unwrap();
        let loaded = ProcedureReport::load(&json).unwrap();

        assert_eq!(loaded.steps.len(), 2000);
        for (read, written) in loaded.steps.iter().zip(&report.steps) {
            assert_eq!(read.duration.to_bits(), written.duration.to_bits(), "step {}", written.number);
        }
    }

    #[test]
    fn test_serialized_shape() {
        let dir = tempdir().unwrap();
        let report = ReportGenerator::to_structured(
            &sample_ledger(dir.path()),
            ReportMetadata::with_timestamps("b", "e"),
        );
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["metadata"]["execution_timestamps"]["begin"], "b");
        assert_eq!(value["steps"][0]["number"], "1");
        assert_eq!(value["steps"][0]["name"], "Fetch");
        assert_eq!(value["steps"][0]["success"], true);
        assert!(value["steps"][0].get("failure").is_none());
    }

    #[test]
    fn test_load_legacy_report_without_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(REPORT_JSON);
        fs::write(
            &path,
            r#"{"metadata":{"execution_timestamps":{"begin":"a","end":"b"}},
                "steps":[{"number":"1","name":"Fetch","success":true,"duration":1.0}]}"#,
        )
        .unwrap();
        let report = ProcedureReport::load(&path).unwrap();
        assert_eq!(report.schema_version, None);
        assert_eq!(report.steps.len(), 1);
    }

    #[test]
    fn test_load_rejects_unknown_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(REPORT_JSON);
        fs::write(&path, r#"{"schema_version":7,"metadata":{},"steps":[]}"#).unwrap();
        let err = ProcedureReport::load(&path).unwrap_err();
        assert!(matches!(err, OrchestrationError::UnsupportedSchema { version: 7, .. }));
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let dir = tempdir().unwrap();
        let missing = ProcedureReport::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(missing, OrchestrationError::ReportMissing { .. }));

        let path = dir.path().join(REPORT_JSON);
        fs::write(&path, "{ not json").unwrap();
        let bad = ProcedureReport::load(&path).unwrap_err();
        assert!(matches!(bad, OrchestrationError::ReportUnreadable { .. }));
    }

    #[test]
    fn test_shell_summary_without_output_dir() {
        let dir = tempdir().unwrap();
        let report =
            ReportGenerator::to_structured(&sample_ledger(dir.path()), ReportMetadata::default());
        let text = render_shell_summary(&report);
        assert!(text.contains("OF-Fetch"));
        assert!(text.contains("R-Check"));

        let written = ReportGenerator::write_artifacts(&report, None, dir.path()).unwrap();
        assert!(written.is_none());
        assert!(!dir.path().join(REPORT_JSON).exists());
    }

    #[test]
    fn test_empty_report_has_blank_log_path() {
        let report = ProcedureReport::empty();
        assert!(report.steps.is_empty());
        assert_eq!(report.metadata.tag_str(LOG_PATH_KEY), Some(""));
        assert!(report.metadata.log_path().is_none());
    }
}
