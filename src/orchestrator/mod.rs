//! Multi-context orchestration.
//!
//! A run configuration lists setups, each launched into one or more execution
//! contexts. Every launch is a `procedure` run whose report is read back from
//! its working directory and added to the aggregate. A context that leaves no
//! readable report becomes an empty entry carrying the error; the remaining
//! contexts still run.

pub mod aggregate;
pub mod config;
pub mod context;
pub mod launch;
pub mod sandbox;
pub mod settings;

pub use aggregate::{AggregateEntry, AggregateReport};
pub use config::{ParamValue, RunConfig};
pub use context::{ExecutionContext, WorkingDir, resolve_working_dir};
pub use launch::{ContextLauncher, LaunchRequest, LocalLauncher, SandboxLauncher};
pub use sandbox::DockerSandbox;
pub use settings::OrchestratorSettings;

use crate::errors::OrchestrationError;
use crate::procedure::LOGS_SUBDIR;
use crate::report::{LOG_PATH_KEY, ProcedureReport, REPORT_JSON};
use crate::ui::BuildUI;
use aggregate::{CONTEXT_KEY, ERROR_KEY, ORCHESTRATION_ID_KEY, SETUP_KEY};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Default base directory of runs that declare no temp dir.
pub fn default_base_dir() -> PathBuf {
    std::env::temp_dir().join("openfluid-build-machine")
}

pub struct RunOrchestrator {
    settings: OrchestratorSettings,
    out_dir: PathBuf,
    base_dir: PathBuf,
    /// Subordinate output goes to the terminal instead of per-launch files.
    shell: bool,
    local: Box<dyn ContextLauncher>,
    sandbox: Box<dyn ContextLauncher>,
    ui: BuildUI,
    id: Uuid,
}

impl RunOrchestrator {
    /// Orchestrator re-invoking the current executable for local contexts.
    pub fn new(
        settings: OrchestratorSettings,
        out_dir: impl Into<PathBuf>,
        try_image_build: bool,
        shell: bool,
    ) -> anyhow::Result<Self> {
        let local = LocalLauncher::current_exe()?.with_timeout(settings.launch_timeout);
        let sandbox = SandboxLauncher::new(DockerSandbox::new(settings.clone()), try_image_build);
        Ok(Self {
            settings,
            out_dir: out_dir.into(),
            base_dir: default_base_dir(),
            shell,
            local: Box::new(local),
            sandbox: Box::new(sandbox),
            ui: BuildUI::new(!shell),
            id: Uuid::new_v4(),
        })
    }

    pub fn with_launchers(
        mut self,
        local: Box<dyn ContextLauncher>,
        sandbox: Box<dyn ContextLauncher>,
    ) -> Self {
        self.local = local;
        self.sandbox = sandbox;
        self
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_ui(mut self, ui: BuildUI) -> Self {
        self.ui = ui;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Launch every context of every run, one at a time, in declaration order.
    pub async fn trigger_builds(&self, runs: &[RunConfig]) -> AggregateReport {
        let mut aggregate = AggregateReport::default();
        for run in runs {
            let several = run.contexts.len() > 1;
            let mut local_slots = 0;
            for (position, spec) in run.contexts.iter().enumerate() {
                self.ui.banner(&format!(
                    "Setup #{} ({}) in context {}",
                    run.index,
                    run.build_type.as_str(),
                    spec
                ));

                let mut slot = None;
                if several && spec.trim().starts_with("local") {
                    local_slots += 1;
                    slot = Some(local_slots);
                }

                let report = match self.launch(run, position, spec, slot).await {
                    Ok(report) => report,
                    Err(e) => {
                        error!(setup = run.index, context = %spec, error = %e, "context produced no report");
                        self.ui.warn(&format!("{}: {}", spec, e));
                        let mut report = ProcedureReport::empty();
                        report.metadata.set_tag(ERROR_KEY, e.to_string());
                        report
                    }
                };
                aggregate.push(self.entry(run, spec, report));
            }
        }
        aggregate
    }

    fn entry(&self, run: &RunConfig, spec: &str, mut report: ProcedureReport) -> AggregateEntry {
        report.metadata.set_tag(SETUP_KEY, run.setup.clone());
        report.metadata.set_tag(CONTEXT_KEY, spec);
        report.metadata.set_tag(ORCHESTRATION_ID_KEY, self.id.to_string());
        AggregateEntry {
            category: run.category(),
            build: run.build_type.as_str().to_string(),
            context: spec.to_string(),
            report,
        }
    }

    /// Launch one context and read its report back.
    async fn launch(
        &self,
        run: &RunConfig,
        position: usize,
        spec: &str,
        slot: Option<usize>,
    ) -> Result<ProcedureReport, OrchestrationError> {
        let context = ExecutionContext::parse(spec)?;
        let base = run
            .temp_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.base_dir.clone());
        let work = resolve_working_dir(&base, &context, slot, &self.settings)?;

        let default_repos = match &context {
            ExecutionContext::Local { source } => source.as_deref(),
            ExecutionContext::Sandbox { .. } => None,
        };
        let request = LaunchRequest {
            context: &context,
            work: &work,
            args: run.procedure_args(&work.procedure_dir, default_repos),
            output_log: (!self.shell).then(|| {
                self.out_dir
                    .join(format!("launch_{}_{}.txt", run.index, position))
            }),
        };

        info!(setup = run.index, context = %context, args = ?request.args, "launching context");
        let launcher = if context.is_local() {
            &self.local
        } else {
            &self.sandbox
        };
        let log_dir = work.host_dir.join(LOGS_SUBDIR);
        let report_path = log_dir.join(REPORT_JSON);
        clear_previous_report(&report_path)?;
        launcher.launch(&request).await?;

        let mut report = ProcedureReport::load(&report_path)?;
        report
            .metadata
            .set_tag(LOG_PATH_KEY, log_dir.display().to_string());
        Ok(report)
    }
}

/// Remove a report left by an earlier run in the same working directory.
fn clear_previous_report(path: &Path) -> Result<(), OrchestrationError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            warn!(path = %path.display(), "removed report of a previous run");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(OrchestrationError::ReportUnreadable {
            path: path.to_path_buf(),
            message: format!("stale report could not be removed: {}", e),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ReportMetadata, SCHEMA_VERSION, StepEntry};
    use async_trait::async_trait;
    use std::fs;

    /// Writes a fixed report into the working directory instead of building.
    struct FakeLauncher {
        write_report: bool,
    }

    #[async_trait]
    impl ContextLauncher for FakeLauncher {
        async fn launch(&self, request: &LaunchRequest<'_>) -> Result<(), OrchestrationError> {
            if !self.write_report {
                return Ok(());
            }
            let log_dir = request.work.host_dir.join(LOGS_SUBDIR);
            fs::create_dir_all(&log_dir).unwrap();
            let report = ProcedureReport {
                schema_version: Some(SCHEMA_VERSION),
                metadata: ReportMetadata::with_timestamps("b", "e"),
                steps: vec![StepEntry {
                    number: "1".into(),
                    name: "Fetch".into(),
                    success: true,
                    duration: 0.5,
                    failure: None,
                }],
            };
            fs::write(
                log_dir.join(REPORT_JSON),
                serde_json::to_string(&report).unwrap(),
            )
            .unwrap();
            Ok(())
        }
    }

    fn orchestrator(out: &Path, local_writes: bool, sandbox_writes: bool) -> RunOrchestrator {
        RunOrchestrator::new(OrchestratorSettings::default(), out, false, false)
            .unwrap()
            .with_ui(BuildUI::hidden())
            .with_launchers(
                Box::new(FakeLauncher {
                    write_report: local_writes,
                }),
                Box::new(FakeLauncher {
                    write_report: sandbox_writes,
                }),
            )
    }

    fn runs(yaml: &str) -> Vec<RunConfig> {
        RunConfig::from_yaml(&serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_local_contexts_get_their_own_slots() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("nightly");
        let yaml = format!(
            "active-setups:\n  - build-type: test\n    contexts: [local, local]\n    temp-dir: {}\n",
            base.display()
        );
        let orch = orchestrator(&dir.path().join("out"), true, true);
        let aggregate = orch.trigger_builds(&runs(&yaml)).await;

        assert_eq!(aggregate.len(), 2);
        assert_eq!(aggregate.error_count(), 0);
        assert!(base.join("Local-1").join(LOGS_SUBDIR).join(REPORT_JSON).exists());
        assert!(base.join("Local-2").join(LOGS_SUBDIR).join(REPORT_JSON).exists());

        let first = &aggregate.entries[0];
        assert_eq!(first.category, "nightly");
        assert_eq!(first.build, "test");
        assert_eq!(first.report.steps.len(), 1);
        assert_eq!(first.report.metadata.tag_str(CONTEXT_KEY), Some("local"));
        assert_eq!(
            first.report.metadata.log_path(),
            Some(base.join("Local-1").join(LOGS_SUBDIR).display().to_string().as_str())
        );
        assert_eq!(first.report.metadata.tags[SETUP_KEY]["build-type"], "test");
        assert_eq!(
            first.report.metadata.tag_str(ORCHESTRATION_ID_KEY),
            Some(orch.id().to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_missing_report_becomes_empty_entry() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "active-setups:\n  - build-type: test\n    contexts: [local]\n    temp-dir: {}\n",
            dir.path().join("run").display()
        );
        let aggregate = orchestrator(&dir.path().join("out"), false, false)
            .trigger_builds(&runs(&yaml))
            .await;

        assert_eq!(aggregate.len(), 1);
        let entry = &aggregate.entries[0];
        assert!(entry.is_error());
        assert!(entry.report.steps.is_empty());
        assert_eq!(entry.report.metadata.tag_str(LOG_PATH_KEY), Some(""));
        assert!(entry.report.metadata.tag_str(ERROR_KEY).unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_rerun_does_not_reuse_previous_report() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("run");
        let yaml = format!(
            "active-setups:\n  - build-type: test\n    contexts: [local]\n    temp-dir: {}\n",
            run_dir.display()
        );
        let configs = runs(&yaml);

        let first = orchestrator(&dir.path().join("out1"), true, true)
            .trigger_builds(&configs)
            .await;
        assert_eq!(first.error_count(), 0);
        assert_eq!(first.entries[0].report.steps.len(), 1);
        assert!(run_dir.join(LOGS_SUBDIR).join(REPORT_JSON).exists());

        let second = orchestrator(&dir.path().join("out2"), false, false)
            .trigger_builds(&configs)
            .await;
        assert_eq!(second.error_count(), 1);
        assert!(second.entries[0].report.steps.is_empty());
        assert!(!run_dir.join(LOGS_SUBDIR).join(REPORT_JSON).exists());
    }

    #[tokio::test]
    async fn test_bad_contexts_do_not_stop_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "active-setups:\n  - build-type: package\n    contexts: [\"vm:x\", \"sandbox:ofbuild/debian-11\", local]\n    temp-dir: {}\n",
            dir.path().join("run").display()
        );
        let aggregate = orchestrator(&dir.path().join("out"), true, true)
            .trigger_builds(&runs(&yaml))
            .await;

        assert_eq!(aggregate.len(), 3);
        let errors: Vec<&str> = aggregate
            .entries
            .iter()
            .filter_map(|e| e.report.metadata.tag_str(ERROR_KEY))
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("vm:x"));
        // temp dir outside the shared root
        assert!(errors[1].contains("must be located under"));
        assert_eq!(aggregate.entries[2].report.steps.len(), 1);
        assert_eq!(aggregate.entries[2].context, "local");
    }

    #[tokio::test]
    async fn test_unsupported_schema_is_recorded() {
        struct FutureReport;

        #[async_trait]
        impl ContextLauncher for FutureReport {
            async fn launch(&self, request: &LaunchRequest<'_>) -> Result<(), OrchestrationError> {
                let log_dir = request.work.host_dir.join(LOGS_SUBDIR);
                fs::create_dir_all(&log_dir).unwrap();
                fs::write(
                    log_dir.join(REPORT_JSON),
                    r#"{"schema_version":2,"metadata":{},"steps":[]}"#,
                )
                .unwrap();
                Ok(())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let yaml = format!(
            "active-setups:\n  - build-type: test\n    contexts: [local]\n    temp-dir: {}\n",
            dir.path().join("run").display()
        );
        let orch = orchestrator(&dir.path().join("out"), true, true)
            .with_launchers(Box::new(FutureReport), Box::new(FutureReport));
        let aggregate = orch.trigger_builds(&runs(&yaml)).await;
        assert_eq!(aggregate.error_count(), 1);
        assert!(aggregate.entries[0]
            .report
            .metadata
            .tag_str(ERROR_KEY)
            .unwrap()
            .contains("schema version 2"));
    }
}
