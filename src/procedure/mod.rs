//! Procedure controller: runs the fixed step sequence of one build.
//!
//! Test builds: Fetch, Configure, Build, Test, then the summary.
//! Package builds: Fetch, Configure, Build, Package, Install, Example, then
//! each declared dependent module (fetch and its own steps), then the summary.
//!
//! Step failures are recorded and never stop the sequence. Only a fetch that
//! reports success while leaving no sources behind aborts: the whole procedure
//! for the primary module, the module's own steps for a dependent.

pub mod config;

pub use config::{
    BuildType, CommandSet, ExampleSelection, LOGS_SUBDIR, ProcedureConfig, ProcedureOptions,
};

use crate::errors::{ConfigError, IntegrityError};
use crate::ledger::StepLedger;
use crate::module::{DependentKind, ModuleKind, ModuleSpec, Origin};
use crate::report::{ProcedureReport, ReportGenerator, ReportMetadata, render_shell_summary};
use crate::runner::{LocalInstallEnv, StepRunner, timestamp};
use crate::step::{FailureKind, Step, StepId, SuccessPolicy};
use crate::ui::BuildUI;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

const TEST_SUMMARY_FALLBACK: &str = "100% tests passed";
const SIMULATION_COMPLETED: &str = "**** Simulation completed ****";

/// Result of looking for built packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSearch {
    Found(Vec<PathBuf>),
    NotFound,
    Error(String),
}

impl PackageSearch {
    /// Files in `dir` ending with `.<extension>`, sorted.
    pub fn find(dir: &Path, extension: &str) -> Self {
        let pattern = dir.join(format!("*.{}", extension));
        let paths = match glob::glob(&pattern.to_string_lossy()) {
            Ok(paths) => paths,
            Err(e) => return Self::Error(format!("invalid package pattern: {}", e)),
        };

        let mut found = Vec::new();
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => found.push(path),
                Ok(_) => {}
                Err(e) => return Self::Error(e.to_string()),
            }
        }
        found.sort();

        if found.is_empty() {
            Self::NotFound
        } else {
            Self::Found(found)
        }
    }
}

/// Names of the subdirectories of `dir`, sorted. Empty when `dir` is missing.
pub fn find_subdirs(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub struct ProcedureController {
    config: ProcedureConfig,
    runner: StepRunner,
    ledger: StepLedger,
    begin: String,
}

impl ProcedureController {
    pub fn new(config: ProcedureConfig, ui: BuildUI) -> Self {
        let runner = StepRunner::new(&config.log_dir, config.output_mode)
            .with_local_install(LocalInstallEnv::new(&config.local_install))
            .with_timeout(config.step_timeout)
            .with_ui(ui);
        let ledger = StepLedger::new(&config.log_dir);
        Self {
            config,
            runner,
            ledger,
            begin: timestamp(),
        }
    }

    pub fn config(&self) -> &ProcedureConfig {
        &self.config
    }

    pub fn ledger(&self) -> &StepLedger {
        &self.ledger
    }

    /// Run the whole sequence and write the report into the log directory.
    ///
    /// The report is written even when the primary fetch fails its integrity
    /// check; the integrity error is returned afterwards.
    pub async fn trigger_procedure(&mut self) -> Result<ProcedureReport> {
        info!(
            build_type = self.config.build_type.as_str(),
            distrib = %self.config.host.distrib,
            temp_dir = %self.config.temp_dir.display(),
            "beginning of build procedure"
        );
        self.prepare_directories()?;

        let outcome = self.run_sequence().await;
        let report = self.summarize()?;
        outcome?;

        info!(steps = report.steps.len(), "end of build procedure");
        Ok(report)
    }

    fn prepare_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.config.temp_dir)
            .map_err(|_| ConfigError::MissingTempDir(self.config.temp_dir.clone()))?;

        // Step logs are appended to, so a previous run's logs must go.
        let log_dir = &self.config.log_dir;
        if log_dir.exists() {
            info!(dir = %log_dir.display(), "purging logs of a previous run");
            fs::remove_dir_all(log_dir)
                .with_context(|| format!("Failed to purge log directory: {}", log_dir.display()))?;
        }
        for dir in [&self.config.src_dir, &self.config.log_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    async fn run_sequence(&mut self) -> Result<()> {
        let primary = self.config.primary.clone();

        if !self.config.subrepos_only {
            self.fetch(&primary).await?;
            self.configure().await?;
            self.run_primary_step(3, "Build", "Building OpenFLUID", self.config.commands.build.clone(), SuccessPolicy::ExitCodeZero)
                .await?;
        }

        match self.config.build_type {
            BuildType::Test => {
                self.run_primary_step(
                    4,
                    "Test",
                    "Running OpenFLUID tests",
                    self.config.commands.test.clone(),
                    SuccessPolicy::TestSummary {
                        fallback: TEST_SUMMARY_FALLBACK.to_string(),
                    },
                )
                .await?;
            }
            BuildType::Package => {
                if !self.config.subrepos_only {
                    self.package().await?;
                    self.install().await?;
                    self.check_examples().await?;
                }
                for kind in DependentKind::PRIORITY {
                    let declared = self
                        .config
                        .dependents
                        .iter()
                        .find(|m| m.kind == ModuleKind::Dependent(kind))
                        .cloned();
                    match declared {
                        Some(module) => self.run_dependent(&module).await?,
                        None => {
                            info!(module = kind.name(), "module not requested, skipped");
                            self.runner.ui().module_skipped(kind.name());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn run_step(&mut self, step: Step) -> Result<bool> {
        let outcome = self.runner.run(&step).await?;
        let success = self.ledger.record_outcome(&step, &outcome);
        self.runner
            .ui()
            .finish_step(&step.id.display_label(), success, outcome.elapsed_secs);
        Ok(success)
    }

    /// Record a step that runs no command, with a note in its log.
    fn record_without_command(&mut self, id: &StepId, title: &str, message: &str, failure: Option<FailureKind>) -> Result<bool> {
        self.runner.log_manual(id, title, message)?;
        let success = match failure {
            Some(kind) => self.ledger.record_failure(id, kind, 0.0),
            None => self.ledger.record_success(id, 0.0),
        };
        self.runner.ui().finish_step(&id.display_label(), success, 0.0);
        Ok(success)
    }

    async fn run_primary_step(
        &mut self,
        n: u8,
        name: &str,
        title: &str,
        command: Vec<String>,
        policy: SuccessPolicy,
    ) -> Result<bool> {
        let step = Step::new(
            StepId::new(ModuleKind::Primary.tag(n), name),
            title,
            command,
            &self.config.build_dir,
        )
        .with_policy(policy);
        self.run_step(step).await
    }

    /// Fetch a module's sources. Errors with `IntegrityError` when a clone
    /// succeeds without creating the source directory.
    async fn fetch(&mut self, module: &ModuleSpec) -> Result<()> {
        let id = StepId::new(module.kind.tag(1), "Fetch");

        match &module.origin {
            Origin::Local(path) => {
                let title = format!("Using local sources of {} at {}", module.name(), path.display());
                if path.is_dir() {
                    self.record_without_command(&id, &title, "[BuildMachine] Local sources found.", None)?;
                } else {
                    let message = format!("[BuildMachine] Local path {} does not exist.", path.display());
                    self.record_without_command(&id, &title, &message, Some(FailureKind::Manual))?;
                }
            }
            Origin::Remote { url, reference } => {
                let title = format!("Cloning from {}", url);
                if module.src_dir.is_dir() {
                    let message = format!(
                        "[BuildMachine] Directory {} already exists, clone skipped.",
                        module.src_dir.display()
                    );
                    self.record_without_command(&id, &title, &message, None)?;
                } else {
                    let parent = module
                        .src_dir
                        .parent()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.config.src_dir.clone());
                    let target = module
                        .src_dir
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| module.name().to_string());
                    let mut command = self.config.commands.git.clone();
                    command.extend([
                        "clone".to_string(),
                        url.clone(),
                        "--progress".to_string(),
                        target,
                    ]);
                    let cloned = self.run_step(Step::new(id.clone(), title, command, parent)).await?;
                    if cloned && !module.src_dir.exists() {
                        return Err(IntegrityError::PathMissingAfterFetch {
                            module: module.name().to_string(),
                            path: module.src_dir.clone(),
                        }
                        .into());
                    }
                }

                if let Some(reference) = reference {
                    let mut command = self.config.commands.git.clone();
                    command.extend([
                        "checkout".to_string(),
                        reference.clone(),
                        "--progress".to_string(),
                    ]);
                    let title = format!("Checking out '{}'", reference);
                    self.run_step(Step::new(id, title, command, &module.src_dir)).await?;
                }
            }
        }
        Ok(())
    }

    async fn configure(&mut self) -> Result<bool> {
        let build_dir = &self.config.build_dir;
        if build_dir.exists() {
            fs::remove_dir_all(build_dir)
                .with_context(|| format!("Failed to purge build directory: {}", build_dir.display()))?;
        }
        fs::create_dir_all(build_dir)
            .with_context(|| format!("Failed to create build directory: {}", build_dir.display()))?;

        let title = format!(
            "Configuring OpenFLUID for {} build from {}",
            self.config.build_type.as_str(),
            self.config.temp_dir.display()
        );
        self.run_primary_step(2, "Configure", &title, self.config.commands.configure.clone(), SuccessPolicy::ExitCodeZero)
            .await
    }

    async fn package(&mut self) -> Result<bool> {
        let success = self
            .run_primary_step(4, "Package", "Packaging OpenFLUID", self.config.commands.package.clone(), SuccessPolicy::ExitCodeZero)
            .await?;

        let extension = self.config.host.package_format.extension();
        if let PackageSearch::Found(packages) = PackageSearch::find(&self.config.build_dir, extension) {
            let release = &self.config.release_dir;
            fs::create_dir_all(release)
                .with_context(|| format!("Failed to create release directory: {}", release.display()))?;
            for package in packages {
                if let Some(name) = package.file_name() {
                    fs::copy(&package, release.join(name)).with_context(|| {
                        format!("Failed to copy package {} to {}", package.display(), release.display())
                    })?;
                    info!(package = %package.display(), "package released");
                }
            }
        }
        Ok(success)
    }

    async fn install(&mut self) -> Result<bool> {
        let id = StepId::new(ModuleKind::Primary.tag(5), "Install");
        let title = "Installing OpenFLUID";
        let extension = self.config.host.package_format.extension();

        match PackageSearch::find(&self.config.build_dir, extension) {
            PackageSearch::Found(packages) => {
                info!(count = packages.len(), "packages found for installation");
                let step = Step::new(id, title, self.config.commands.install.clone(), &self.config.build_dir);
                self.run_step(step).await
            }
            PackageSearch::NotFound => self.record_without_command(
                &id,
                title,
                "[BuildMachine] No package found for installation",
                Some(FailureKind::Manual),
            ),
            PackageSearch::Error(detail) => {
                warn!(error = %detail, "package search failed");
                let message = format!("[BuildMachine] Package search failed: {}", detail);
                self.record_without_command(&id, title, &message, Some(FailureKind::Manual))
            }
        }
    }

    async fn check_examples(&mut self) -> Result<()> {
        let id = StepId::new(ModuleKind::Primary.tag(6), "Example");
        let examples_dir = self.config.examples_dir.clone();
        info!(dir = %examples_dir.display(), "checking examples");

        let wanted = match &self.config.examples {
            ExampleSelection::All => find_subdirs(&examples_dir),
            ExampleSelection::Named(names) => names.clone(),
        };
        if wanted.is_empty() {
            self.record_without_command(
                &id,
                "Launching OpenFLUID examples",
                "[BuildMachine] No example found.",
                Some(FailureKind::Manual),
            )?;
            return Ok(());
        }

        let out_dir = self.config.examples_out_dir.clone();
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("Failed to create examples output directory: {}", out_dir.display()))?;

        for name in wanted {
            let title = format!("Launching OpenFLUID example *{}*", name);
            let example = examples_dir.join(&name);
            if !example.is_dir() {
                let message = format!("[BuildMachine] Example {} not found in {}", name, examples_dir.display());
                self.record_without_command(&id, &title, &message, Some(FailureKind::Manual))?;
                continue;
            }

            let mut command = self.config.commands.run_example.clone();
            command.push(example.join("IN").display().to_string());
            command.push(out_dir.join(format!("{}.OUT", name)).display().to_string());
            let step = Step::new(id.clone(), title, command, &self.config.build_dir)
                .with_policy(SuccessPolicy::contains(SIMULATION_COMPLETED))
                .with_local_env(true);
            self.run_step(step).await?;
        }
        Ok(())
    }

    async fn run_dependent(&mut self, module: &ModuleSpec) -> Result<()> {
        let ModuleKind::Dependent(kind) = module.kind else {
            return Ok(());
        };

        match self.fetch(module).await {
            Ok(()) => {}
            Err(err) if err.is::<IntegrityError>() => {
                error!(module = module.name(), error = %err, "fetch integrity failure, module skipped");
                self.runner.ui().warn(&err.to_string());
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        for step in self.dependent_steps(kind, module) {
            self.run_step(step).await?;
        }
        Ok(())
    }

    /// Steps following the fetch of a dependent module.
    fn dependent_steps(&self, kind: DependentKind, module: &ModuleSpec) -> Vec<Step> {
        let commands = &self.config.commands;
        let module_kind = ModuleKind::Dependent(kind);
        let step = |n: u8, name: &str, title: &str, command: &Vec<String>| {
            Step::new(
                StepId::new(module_kind.tag(n), name),
                title,
                command.clone(),
                &module.src_dir,
            )
            .with_local_env(true)
        };

        match kind {
            DependentKind::ROpenfluid => vec![
                step(2, "Check", "Checking ROpenFLUID", &commands.r_check)
                    .with_policy(SuccessPolicy::contains_not_containing("DONE", "ERROR")),
                step(3, "Build", "Building ROpenFLUID", &commands.r_build).with_policy(
                    SuccessPolicy::contains_not_containing(
                        "building \u{2018}ROpenFLUID",
                        "No such file or directory",
                    ),
                ),
            ],
            DependentKind::PyOpenfluid => vec![
                step(2, "Check", "Checking PyOpenFLUID", &commands.py_check),
                step(3, "Build", "Building PyOpenFLUID", &commands.py_build),
                step(4, "Test", "Testing PyOpenFLUID", &commands.py_test),
                step(5, "Package", "Packaging PyOpenFLUID", &commands.py_package),
            ],
            DependentKind::OpenfluidJs => vec![
                step(3, "Build", "Building OpenFLUIDJS", &commands.js_build),
                step(4, "Test", "Testing OpenFLUIDJS", &commands.js_test),
                step(5, "Package", "Packaging OpenFLUIDJS", &commands.js_package),
            ],
        }
    }

    /// Write the report into the log directory and print the shell summary.
    fn summarize(&self) -> Result<ProcedureReport> {
        let metadata = ReportMetadata::with_timestamps(self.begin.clone(), timestamp());
        let report = ReportGenerator::to_structured(&self.ledger, metadata);
        ReportGenerator::write_artifacts(&report, Some(&self.config.log_dir), &self.config.log_dir)?;
        self.runner.ui().print_line(render_shell_summary(&report));
        Ok(report)
    }
}
