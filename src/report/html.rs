//! Static HTML tables for procedure and aggregate reports.

use super::{ProcedureReport, REPORT_HTML};
use crate::step::StepId;
use std::fmt::Write;
use std::path::Path;

const TABLE_CSS: &str = r#"table {
  font-family: "Trebuchet MS", Arial, Helvetica, sans-serif;
  border-collapse: collapse;
  width: 100%;
}

td, th {
  border: 1px solid #ddd;
  padding: 8px;
}

tr:nth-child(even){background-color: #f2f2f2;}

tr:hover {background-color: #ddd;}

th {
  padding-top: 12px;
  padding-bottom: 12px;
  text-align: left;
  background-color: #47617b;
  color: white;
}

.subheader {
  background-color: #917c6f;
  text-align: center;
}

.ok {
  background-color: #86ae39;
  text-align: center;
}

.ok a {
  color: green;
}

.ko {
  background-color: #AA3344;
  border-width: 2px;
  border-color: red;
}
"#;

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// One row per step: label, duration, OK/KO and a link to the step log.
pub fn procedure_table(report: &ProcedureReport, log_dir: &Path) -> String {
    let mut html = String::from("<table>\n");
    html.push_str(
        "  <tr><td>Step</td><td>Duration (s)</td><td>Success</td><td>Log file</td></tr>\n",
    );
    for step in &report.steps {
        let id = step.id();
        let (color, text) = if step.success {
            ("blue", "OK")
        } else {
            ("red", "KO")
        };
        let log = log_dir.join(id.log_file_name());
        let _ = write!(
            html,
            "  <tr>\n\t<td>{}</td>\n\t<td>{:.3}</td>\n\t<td style='color:{};'>{}</td>\n\t<td><a href='{}'>log</a></td>\n  </tr>\n",
            escape(&id.display_label()),
            step.duration,
            color,
            text,
            escape(&log.display().to_string())
        );
    }
    html.push_str("</table>\n");
    html
}

/// A report row of the aggregate table.
pub struct AggregateRow<'a> {
    pub category: String,
    pub build: String,
    pub context: String,
    pub report: &'a ProcedureReport,
}

/// Union of step identifiers across reports, in first-seen order.
pub fn step_columns<'a>(reports: impl IntoIterator<Item = &'a ProcedureReport>) -> Vec<StepId> {
    let mut columns: Vec<StepId> = Vec::new();
    for report in reports {
        for step in &report.steps {
            let id = step.id();
            if !columns.contains(&id) {
                columns.push(id);
            }
        }
    }
    columns
}

/// Cross table: one row per report grouped by category, one column per step.
///
/// Missing cells stay empty. Cells link to step logs when the row's log path is known.
pub fn aggregate_table(rows: &[AggregateRow<'_>], general_log: Option<&str>) -> String {
    let columns = step_columns(rows.iter().map(|r| r.report));

    let mut html = format!("<style>{}</style>", TABLE_CSS);
    if let Some(log) = general_log.filter(|l| !l.is_empty()) {
        let _ = writeln!(html, "<p><a href=\"{}\">General logs</a></p>", escape(log));
    }
    html.push_str("<div style=\"overflow-x:auto;\">\n<table>\n  <tr>\n<th>Build</th><th>Context</th>");
    for id in &columns {
        let _ = write!(html, "<th>{} - {}</th>", escape(&id.tag), escape(&id.name));
    }
    html.push_str("<th></th></tr>\n");

    let mut category: Option<&str> = None;
    for row in rows {
        if category != Some(row.category.as_str()) {
            category = Some(row.category.as_str());
            let _ = writeln!(
                html,
                "  <tr><td colspan=\"2\" class=\"subheader\">{}</td></tr>",
                escape(&row.category)
            );
        }
        let _ = write!(
            html,
            "  <tr>\n    <td>{}</td><td>{}</td>",
            escape(&row.build),
            escape(&row.context)
        );

        let log_path = row.report.metadata.log_path();
        for id in &columns {
            let (class, cell) = match row.report.find(id) {
                Some(step) => {
                    let (class, text) = if step.success { ("ok", "OK") } else { ("ko", "KO") };
                    let cell = match log_path {
                        Some(dir) => format!(
                            "<a href='{}'>{}</a>",
                            escape(&format!("{}/{}", dir, id.log_file_name())),
                            text
                        ),
                        None => text.to_string(),
                    };
                    (class, cell)
                }
                None => ("", String::new()),
            };
            let _ = write!(html, "<td class=\"{}\">{}</td>", class, cell);
        }

        let steps_report = log_path
            .map(|dir| format!("<a href='{}'>Steps report</a>", escape(&format!("{}/{}", dir, REPORT_HTML))))
            .unwrap_or_default();
        let _ = writeln!(html, "  <td>{}</td></tr>", steps_report);
    }
    html.push_str("</table>\n</div>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{LOG_PATH_KEY, ReportMetadata, StepEntry};

    fn entry(number: &str, name: &str, success: bool) -> StepEntry {
        StepEntry {
            number: number.into(),
            name: name.into(),
            success,
            duration: 1.5,
            failure: None,
        }
    }

    fn report(log_path: &str, steps: Vec<StepEntry>) -> ProcedureReport {
        let mut metadata = ReportMetadata::default();
        metadata.set_tag(LOG_PATH_KEY, log_path);
        ProcedureReport {
            schema_version: Some(1),
            metadata,
            steps,
        }
    }

    #[test]
    fn test_procedure_table_links_logs() {
        let r = report("", vec![entry("1", "Fetch", true), entry("R2", "Check", false)]);
        let html = procedure_table(&r, Path::new("/tmp/logs"));
        assert!(html.contains("<td>OF-Fetch</td>"));
        assert!(html.contains("<td>R-Check</td>"));
        assert!(html.contains("<td>1.500</td>"));
        assert!(html.contains("color:red;'>KO"));
        assert!(html.contains("href='/tmp/logs/R2_Check.txt'"));
    }

    #[test]
    fn test_columns_are_first_seen_union() {
        let a = report("", vec![entry("1", "Fetch", true), entry("4", "Test", true)]);
        let b = report("", vec![entry("1", "Fetch", true), entry("4", "Package", true)]);
        let columns: Vec<String> = step_columns([&a, &b]).iter().map(|c| c.to_string()).collect();
        assert_eq!(columns, vec!["1_Fetch", "4_Test", "4_Package"]);
    }

    #[test]
    fn test_aggregate_table_empty_row_renders_blank_cells() {
        let full = report("/shared/run/logs", vec![entry("1", "Fetch", true), entry("3", "Build", false)]);
        let empty = ProcedureReport::empty();
        let rows = vec![
            AggregateRow {
                category: "nightly".into(),
                build: "test".into(),
                context: "local".into(),
                report: &full,
            },
            AggregateRow {
                category: "nightly".into(),
                build: "test".into(),
                context: "sandbox:ofbuild/debian-9".into(),
                report: &empty,
            },
        ];
        let html = aggregate_table(&rows, Some("MBM_logs.txt"));

        assert!(html.contains("<th>1 - Fetch</th><th>3 - Build</th>"));
        assert_eq!(html.matches("class=\"subheader\"").count(), 1);
        assert!(html.contains("<a href='/shared/run/logs/3_Build.txt'>KO</a>"));
        assert!(html.contains("Steps report"));
        assert_eq!(html.matches("<td class=\"\"></td>").count(), 2);
        assert!(html.contains("General logs"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("<a & 'b'>"), "&lt;a &amp; &#39;b&#39;&gt;");
    }
}
