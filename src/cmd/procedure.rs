//! One build procedure on this host: `buildmachine procedure`.

use anyhow::Result;

use super::super::{BuildCommands, Cli, ProcedureArgs};

fn procedure_options(
    global: &ProcedureArgs,
    build: &BuildCommands,
) -> buildmachine::procedure::ProcedureOptions {
    use buildmachine::procedure::{BuildType, ProcedureOptions};
    use buildmachine::runner::timestamp_compact;

    let build_type = match build {
        BuildCommands::Test => BuildType::Test,
        BuildCommands::Package(_) => BuildType::Package,
    };
    let temp_dir = global.temp_dir.clone().unwrap_or_else(|| {
        buildmachine::orchestrator::default_base_dir().join(timestamp_compact())
    });

    let mut options = ProcedureOptions::new(build_type, temp_dir);
    options.src_dir = global.src_dir.clone();
    options.build_jobs = global.build_jobs;
    options.shell = global.shell;
    options.openfluid_repos = global.openfluid_repos.clone();
    options.host_distrib = global.host_distrib.clone();
    options.step_timeout_secs = global.step_timeout;

    if let BuildCommands::Package(package) = build {
        options.run_examples = package.run_examples.clone();
        options.ropenfluid_repos = package.ropenfluid_repos.clone();
        options.pyopenfluid_repos = package.pyopenfluid_repos.clone();
        options.openfluidjs_repos = package.openfluidjs_repos.clone();
        options.subrepos_only = package.subrepos_only;
        options.examples_dir = package.examples_dir.clone();
    }
    options
}

pub async fn cmd_procedure(cli: &Cli, global: &ProcedureArgs, build: &BuildCommands) -> Result<()> {
    use buildmachine::logging;
    use buildmachine::procedure::{ProcedureConfig, ProcedureController};
    use buildmachine::runner::OutputMode;
    use buildmachine::ui::BuildUI;

    let _log = logging::init(cli.verbose, None)?;

    let options = procedure_options(global, build);
    let config = ProcedureConfig::resolve(&options)?;
    let ui = BuildUI::new(config.output_mode == OutputMode::Captured);
    let log_dir = config.log_dir.clone();

    let mut controller = ProcedureController::new(config, ui);
    let report = controller.trigger_procedure().await?;

    let failed = report.steps.iter().filter(|s| !s.success).count();
    tracing::info!(
        steps = report.steps.len(),
        failed,
        log_dir = %log_dir.display(),
        "procedure finished"
    );
    Ok(())
}
