//! Launching one procedure run inside an execution context.
//!
//! The subordinate process's exit status is informational. The orchestrator
//! judges a context by the report it leaves behind.

use super::context::{ExecutionContext, WorkingDir};
use super::sandbox::DockerSandbox;
use crate::errors::{ConfigError, OrchestrationError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

/// Subcommand run by every launched build machine.
pub const PROCEDURE_SUBCOMMAND: &str = "procedure";

/// One launch: a context, its working directory and the flattened procedure arguments.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    pub context: &'a ExecutionContext,
    pub work: &'a WorkingDir,
    pub args: Vec<String>,
    /// Launcher output goes here; inherited from the terminal when unset.
    pub output_log: Option<PathBuf>,
}

#[async_trait]
pub trait ContextLauncher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest<'_>) -> Result<(), OrchestrationError>;
}

fn launch_failed(context: &ExecutionContext, message: impl ToString) -> OrchestrationError {
    OrchestrationError::LaunchFailed {
        context: context.to_string(),
        message: message.to_string(),
    }
}

/// Spawn `command` and wait for it, sending output to `output_log` when given.
async fn run_subordinate(
    mut command: Command,
    context: &ExecutionContext,
    output_log: Option<&Path>,
    limit: Option<Duration>,
) -> Result<(), OrchestrationError> {
    if let Some(path) = output_log {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| launch_failed(context, e))?;
        }
        let out = std::fs::File::create(path).map_err(|e| launch_failed(context, e))?;
        let err = out.try_clone().map_err(|e| launch_failed(context, e))?;
        command.stdout(Stdio::from(out)).stderr(Stdio::from(err));
    }
    command.stdin(Stdio::null()).kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| launch_failed(context, e))?;
    let status = match limit {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(context = %context, secs = limit.as_secs(), "launch timed out, killing");
                if let Err(e) = child.kill().await {
                    warn!(context = %context, error = %e, "failed to kill timed-out launch");
                }
                return Err(launch_failed(
                    context,
                    format!("timed out after {}s", limit.as_secs()),
                ));
            }
        },
        None => child.wait().await,
    }
    .map_err(|e| launch_failed(context, e))?;

    if status.success() {
        info!(context = %context, "subordinate run finished");
    } else {
        info!(context = %context, status = %status, "subordinate run exited with failure");
    }
    Ok(())
}

/// Runs the build machine itself on the host.
#[derive(Debug, Clone)]
pub struct LocalLauncher {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl LocalLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Launcher re-invoking the running executable.
    pub fn current_exe() -> anyhow::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }
}

#[async_trait]
impl ContextLauncher for LocalLauncher {
    async fn launch(&self, request: &LaunchRequest<'_>) -> Result<(), OrchestrationError> {
        if !request.context.is_local() {
            return Err(ConfigError::InvalidContext(request.context.to_string()).into());
        }
        info!(context = %request.context, dir = %request.work.host_dir.display(), "launching local build");

        let mut command = Command::new(&self.program);
        command.arg(PROCEDURE_SUBCOMMAND).args(&request.args);
        run_subordinate(command, request.context, request.output_log.as_deref(), self.timeout).await
    }
}

/// Runs the build machine inside a Docker image through `run-docker-image.sh`.
#[derive(Debug, Clone)]
pub struct SandboxLauncher {
    sandbox: DockerSandbox,
    try_image_build: bool,
}

impl SandboxLauncher {
    pub fn new(sandbox: DockerSandbox, try_image_build: bool) -> Self {
        Self {
            sandbox,
            try_image_build,
        }
    }

    /// Command line executed inside the sandbox.
    pub fn sandbox_command(&self, args: &[String]) -> String {
        let entry = [self.sandbox.settings().sandbox_entry.as_str(), PROCEDURE_SUBCOMMAND];
        shell_words::join(entry.into_iter().chain(args.iter().map(String::as_str)))
    }
}

#[async_trait]
impl ContextLauncher for SandboxLauncher {
    async fn launch(&self, request: &LaunchRequest<'_>) -> Result<(), OrchestrationError> {
        let ExecutionContext::Sandbox { image } = request.context else {
            return Err(ConfigError::InvalidContext(request.context.to_string()).into());
        };
        self.sandbox.ensure_image(image, self.try_image_build).await?;

        let settings = self.sandbox.settings();
        std::fs::create_dir_all(&request.work.host_dir)
            .map_err(|e| launch_failed(request.context, e))?;

        let scripts = &settings.scripts_dir;
        info!(image = %image, dir = %request.work.procedure_dir.display(), "running sandbox image");
        let mut command = Command::new("sh");
        command
            .arg(scripts.join("run-docker-image.sh"))
            .arg(scripts)
            .arg(&settings.host_shared_dir)
            .arg(settings.host_shared_dir.join("src"))
            .arg(image)
            .arg(self.sandbox_command(&request.args));
        run_subordinate(
            command,
            request.context,
            request.output_log.as_deref(),
            settings.launch_timeout,
        )
        .await
    }
}
