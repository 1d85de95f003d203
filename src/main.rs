use anyhow::Result;
use buildmachine::module::PRIMARY_DEFAULT_LOCATOR;
use buildmachine::procedure::config::DEFAULT_EXAMPLES_DIR;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "buildmachine")]
#[command(version, about = "Build, test and package OpenFLUID on this host or in sandboxes")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one build procedure on this host
    Procedure {
        #[command(flatten)]
        global: ProcedureArgs,
        #[command(subcommand)]
        build: BuildCommands,
    },
    /// Launch every setup of a run configuration in each of its contexts
    Multi {
        /// YAML run configuration (`active-setups`)
        #[arg(short = 'c', long)]
        conf_file: PathBuf,
        /// Directory receiving the aggregate reports and logs
        #[arg(short, long)]
        out_dir: PathBuf,
        /// Build missing sandbox images before launching
        #[arg(short = 'b', long)]
        try_image_build: bool,
        /// Show subordinate output in the terminal instead of launch logs
        #[arg(short, long)]
        shell: bool,
        /// TOML orchestration settings
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Create or run an orchestration environment
    Env {
        #[command(subcommand)]
        command: EnvCommands,
    },
    /// Print the summary of a stored procedure report
    Summary {
        #[arg(long)]
        report: PathBuf,
    },
}

/// Options shared by every build type. Must precede the build type.
#[derive(Args, Debug, Clone)]
pub struct ProcedureArgs {
    /// Working directory [default: <tmp>/openfluid-build-machine/<timestamp>]
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Sources directory [default: <temp-dir>/src]
    #[arg(long)]
    pub src_dir: Option<PathBuf>,

    #[arg(short = 'j', long, default_value_t = 1)]
    pub build_jobs: u32,

    /// Command output in the terminal instead of step logs
    #[arg(short, long)]
    pub shell: bool,

    /// Absolute path, `default`, or `<repository>[#<ref>]`
    #[arg(long, default_value = PRIMARY_DEFAULT_LOCATOR)]
    pub openfluid_repos: String,

    /// Skip host detection and use this distribution id
    #[arg(long)]
    pub host_distrib: Option<String>,

    /// Per-step timeout in seconds, 0 for none
    #[arg(long, default_value_t = 0)]
    pub step_timeout: u64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum BuildCommands {
    /// Configure, build and run the test suite
    Test,
    /// Build packages, install them locally and run examples
    Package(PackageArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PackageArgs {
    /// `*` for every example, or a comma separated list
    #[arg(long, default_value = "*")]
    pub run_examples: String,

    #[arg(long, num_args = 0..=1, default_missing_value = "default")]
    pub ropenfluid_repos: Option<String>,

    #[arg(long, num_args = 0..=1, default_missing_value = "default")]
    pub pyopenfluid_repos: Option<String>,

    #[arg(long, num_args = 0..=1, default_missing_value = "default")]
    pub openfluidjs_repos: Option<String>,

    /// Only build the dependent modules
    #[arg(short = 'o', long)]
    pub subrepos_only: bool,

    #[arg(long, default_value = DEFAULT_EXAMPLES_DIR)]
    pub examples_dir: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
pub enum EnvCommands {
    /// Create a new environment with a template configuration
    Create {
        #[arg(long)]
        env_path: PathBuf,
    },
    /// Run the environment's configuration in a new exec directory
    Run {
        #[arg(long)]
        env_path: PathBuf,
        #[arg(short = 'b', long)]
        try_image_build: bool,
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Procedure { global, build } => {
            cmd::cmd_procedure(&cli, global, build).await?;
        }
        Commands::Multi {
            conf_file,
            out_dir,
            try_image_build,
            shell,
            settings,
        } => {
            let options = cmd::MultiOptions {
                try_image_build: *try_image_build,
                shell: *shell,
                settings: settings.clone(),
            };
            cmd::cmd_multi(&cli, conf_file, out_dir, &options).await?;
        }
        Commands::Env { command } => cmd::cmd_env(&cli, command).await?,
        Commands::Summary { report } => {
            cmd::cmd_summary(report)?;
        }
    }

    Ok(())
}
