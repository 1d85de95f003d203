//! Multi-context orchestration: `buildmachine multi`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::super::Cli;

/// Switches shared by `multi` and `env run`.
#[derive(Debug, Clone, Default)]
pub struct MultiOptions {
    pub try_image_build: bool,
    pub shell: bool,
    pub settings: Option<PathBuf>,
}

pub async fn cmd_multi(cli: &Cli, conf_file: &Path, out_dir: &Path, options: &MultiOptions) -> Result<()> {
    use buildmachine::logging::{self, orchestrator_log_name};

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;
    let log_path = out_dir.join(orchestrator_log_name(chrono::Local::now()));
    let log = logging::init(cli.verbose, Some(&log_path))?;

    run_orchestration(conf_file, out_dir, options, log.file_path()).await
}

/// Load the runs, launch every context and write the aggregate artifacts.
pub async fn run_orchestration(
    conf_file: &Path,
    out_dir: &Path,
    options: &MultiOptions,
    general_log: Option<&Path>,
) -> Result<()> {
    use buildmachine::orchestrator::{OrchestratorSettings, RunConfig, RunOrchestrator};
    use buildmachine::ui::icons::REPORT;
    use console::style;

    let runs = RunConfig::load(conf_file)?;
    let settings = OrchestratorSettings::load(options.settings.as_deref())?;
    let orchestrator = RunOrchestrator::new(settings, out_dir, options.try_image_build, options.shell)?;
    tracing::info!(
        id = %orchestrator.id(),
        runs = runs.len(),
        conf = %conf_file.display(),
        "orchestration started"
    );

    let aggregate = orchestrator.trigger_builds(&runs).await;
    let (json, html) = aggregate.write(out_dir, general_log)?;

    println!();
    println!(
        "{} {} report(s), {} without results",
        REPORT,
        style(aggregate.len()).bold(),
        if aggregate.error_count() > 0 {
            style(aggregate.error_count()).red().bold()
        } else {
            style(aggregate.error_count()).green()
        }
    );
    println!("  {}", json.display());
    println!("  {}", html.display());
    Ok(())
}
