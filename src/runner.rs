//! Step execution engine.
//!
//! Runs one step's command in its working directory and writes the step log:
//! - a `# <title>` header and the command line
//! - in captured mode, every stdout/stderr line with a timestamp prefix
//! - a fatal marker when the child was killed by a signal
//! - a closing `End of command.` line

use crate::step::{Step, StepId};
use crate::ui::BuildUI;
use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Exit code reported when a step was not run.
pub const CANCELLED_EXIT_CODE: i32 = -1;

const SIGSEGV: i32 = 11;

/// Timestamp format used in step logs and reports.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Timestamp usable in file and directory names.
pub fn timestamp_compact() -> String {
    Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// Whether the child's output goes to the terminal or to the step log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Child inherits the terminal; nothing is captured.
    Interactive,
    /// stdout/stderr appended to the step log.
    Captured,
}

/// How a step's command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    Signaled(i32),
    TimedOut,
    /// Working directory absent, nothing spawned.
    Cancelled,
    SpawnFailed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub exit: ExitKind,
    pub elapsed_secs: f64,
    /// Output was written to the step log.
    pub captured: bool,
    /// Size of the step log before this attempt; the attempt's output starts here.
    pub log_offset: u64,
}

impl CommandOutcome {
    /// Raw exit code, negative signal number for signaled children, -1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match &self.exit {
            ExitKind::Exited(code) => *code,
            ExitKind::Signaled(sig) => -sig,
            ExitKind::TimedOut | ExitKind::Cancelled | ExitKind::SpawnFailed(_) => {
                CANCELLED_EXIT_CODE
            }
        }
    }
}

/// Environment prefixing library and executable search paths with a local install root.
#[derive(Debug, Clone)]
pub struct LocalInstallEnv {
    root: PathBuf,
}

impl LocalInstallEnv {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Variables to set on the child, derived from the current environment.
    pub fn vars(&self) -> Vec<(String, String)> {
        let prefixed = |name: &str, sub: &str| {
            let head = self.root.join(sub).display().to_string();
            match std::env::var(name) {
                Ok(existing) if !existing.is_empty() => format!("{}:{}", head, existing),
                _ => head,
            }
        };
        vec![
            ("LD_LIBRARY_PATH".to_string(), prefixed("LD_LIBRARY_PATH", "lib")),
            ("PATH".to_string(), prefixed("PATH", "bin")),
            (
                "OPENFLUID_INSTALL_PREFIX".to_string(),
                self.root.display().to_string(),
            ),
        ]
    }
}

/// Append-only step log with a timestamp prefix on every line.
struct StepLog {
    file: File,
}

impl StepLog {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open step log: {}", path.display()))?;
        Ok(Self { file })
    }

    fn raw(&mut self, content: &str) -> std::io::Result<()> {
        writeln!(self.file, "{}", content)
    }

    fn line(&mut self, content: &str) -> std::io::Result<()> {
        writeln!(self.file, "{}\t{}", timestamp(), content)
    }
}

/// Runs steps and writes their logs into one log directory.
pub struct StepRunner {
    log_dir: PathBuf,
    mode: OutputMode,
    local_env: Option<LocalInstallEnv>,
    step_timeout: Option<Duration>,
    ui: BuildUI,
}

impl StepRunner {
    pub fn new(log_dir: impl Into<PathBuf>, mode: OutputMode) -> Self {
        Self {
            log_dir: log_dir.into(),
            mode,
            local_env: None,
            step_timeout: None,
            ui: BuildUI::hidden(),
        }
    }

    pub fn with_local_install(mut self, env: LocalInstallEnv) -> Self {
        self.local_env = Some(env);
        self
    }

    /// Kill steps running longer than `limit`. `None` waits forever.
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.step_timeout = limit;
        self
    }

    pub fn with_ui(mut self, ui: BuildUI) -> Self {
        self.ui = ui;
        self
    }

    pub fn ui(&self) -> &BuildUI {
        &self.ui
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    pub fn log_path(&self, id: &StepId) -> PathBuf {
        self.log_dir.join(id.log_file_name())
    }

    fn open_log(&self, id: &StepId) -> Result<StepLog> {
        std::fs::create_dir_all(&self.log_dir).with_context(|| {
            format!("Failed to create log directory: {}", self.log_dir.display())
        })?;
        StepLog::open(&self.log_path(id))
    }

    /// Run a step's command and return how it ended.
    ///
    /// A missing working directory is a cancelled outcome, not an error.
    /// Errors are limited to the step log itself being unwritable.
    pub async fn run(&self, step: &Step) -> Result<CommandOutcome> {
        self.ui.banner(&step.title);
        let log_offset = std::fs::metadata(self.log_path(&step.id))
            .map(|m| m.len())
            .unwrap_or(0);
        let mut log = self.open_log(&step.id)?;
        let captured = self.mode == OutputMode::Captured;
        log.raw(&format!("# {}", step.title))?;

        if !step.working_dir.is_dir() {
            let note = format!(
                "Directory '{}' does not exist. Command canceled.",
                step.working_dir.display()
            );
            warn!(step = %step.id, dir = %step.working_dir.display(), "working directory missing, step cancelled");
            self.ui.warn(&note);
            log.line(&note)?;
            return Ok(CommandOutcome {
                exit: ExitKind::Cancelled,
                elapsed_secs: 0.0,
                captured,
                log_offset,
            });
        }

        log.line(&format!("$ {}", step.command_line()))?;
        info!(step = %step.id, cwd = %step.working_dir.display(), command = %step.command_line(), "running step");

        let start = Instant::now();
        self.ui.start_step(&step.id.display_label(), &step.command_line());
        let exit = self.spawn_and_wait(step, &mut log).await?;
        let elapsed_secs = start.elapsed().as_secs_f64();

        match &exit {
            ExitKind::Signaled(SIGSEGV) => {
                log.line(&format!("FATAL: -{}. Probably segmentation fault.", SIGSEGV))?
            }
            ExitKind::Signaled(sig) => log.line(&format!("FATAL: -{}. Killed by signal.", sig))?,
            ExitKind::TimedOut => log.line(&format!(
                "FATAL: command timed out after {}s and was killed.",
                self.step_timeout.map(|d| d.as_secs()).unwrap_or_default()
            ))?,
            ExitKind::SpawnFailed(reason) => {
                log.line(&format!("FATAL: command could not be started: {}", reason))?
            }
            ExitKind::Exited(_) | ExitKind::Cancelled => {}
        }
        log.line("End of command.")?;

        debug!(step = %step.id, ?exit, elapsed_secs, "step finished");
        Ok(CommandOutcome {
            exit,
            elapsed_secs,
            captured,
            log_offset,
        })
    }

    async fn spawn_and_wait(&self, step: &Step, log: &mut StepLog) -> Result<ExitKind> {
        let Some((program, args)) = step.command.split_first() else {
            return Ok(ExitKind::SpawnFailed("empty command".to_string()));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&step.working_dir)
            .kill_on_drop(true);
        if step.needs_local_env {
            if let Some(env) = &self.local_env {
                command.envs(env.vars());
            }
        }
        match self.mode {
            OutputMode::Interactive => {
                command
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
            OutputMode::Captured => {
                command
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(step = %step.id, program = %program, error = %err, "failed to spawn step command");
                return Ok(ExitKind::SpawnFailed(err.to_string()));
            }
        };

        let waited = match self.step_timeout {
            Some(limit) => timeout(limit, drain_and_wait(&mut child, log)).await.ok(),
            None => Some(drain_and_wait(&mut child, log).await),
        };

        match waited {
            Some(status) => {
                let status = status
                    .with_context(|| format!("Failed to wait for step command: {}", program))?;
                Ok(exit_kind(status))
            }
            None => {
                warn!(step = %step.id, "step timed out; killing");
                if let Err(err) = child.kill().await {
                    warn!(step = %step.id, error = %err, "failed to kill timed-out step");
                }
                Ok(ExitKind::TimedOut)
            }
        }
    }

    /// Write a failure note for a step that runs no command.
    pub fn log_manual(&self, id: &StepId, title: &str, message: &str) -> Result<()> {
        self.ui.banner(title);
        self.ui.warn(message);
        let mut log = self.open_log(id)?;
        log.raw(&format!("# {}", title))?;
        log.line(message)?;
        log.line("End of command.")?;
        Ok(())
    }
}

/// Append captured stdout/stderr lines to the log in arrival order, then reap the child.
async fn drain_and_wait(child: &mut Child, log: &mut StepLog) -> std::io::Result<ExitStatus> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    if let (Some(stdout), Some(stderr)) = (stdout, stderr) {
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();
        let mut out_open = true;
        let mut err_open = true;

        while out_open || err_open {
            tokio::select! {
                line = out_lines.next_line(), if out_open => match line {
                    Ok(Some(line)) => log.line(&line)?,
                    _ => out_open = false,
                },
                line = err_lines.next_line(), if err_open => match line {
                    Ok(Some(line)) => log.line(&format!("ERR: {}", line))?,
                    _ => err_open = false,
                },
            }
        }
    }

    child.wait().await
}

fn exit_kind(status: ExitStatus) -> ExitKind {
    if let Some(code) = status.code() {
        return ExitKind::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return ExitKind::Signaled(sig);
        }
    }
    ExitKind::Exited(CANCELLED_EXIT_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(tag: &str, name: &str, script: &str, cwd: &Path) -> Step {
        Step::new(
            StepId::new(tag, name),
            format!("Running {}", name),
            vec!["sh".into(), "-c".into(), script.into()],
            cwd,
        )
    }

    #[tokio::test]
    async fn test_captured_output_is_logged_with_timestamps() {
        let dir = tempdir().unwrap();
        let runner = StepRunner::new(dir.path().join("logs"), OutputMode::Captured);
        let step = sh("3", "Build", "echo hello; echo oops >&2", dir.path());

        let outcome = runner.run(&step).await.unwrap();
        assert_eq!(outcome.exit, ExitKind::Exited(0));
        assert!(outcome.captured);

        let log = std::fs::read_to_string(runner.log_path(&step.id)).unwrap();
        assert!(log.starts_with("# Running Build\n"));
        assert!(log.contains("\thello\n"));
        assert!(log.contains("\tERR: oops\n"));
        assert!(log.trim_end().ends_with("End of command."));
    }

    #[tokio::test]
    async fn test_missing_working_dir_cancels_without_spawning() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let runner = StepRunner::new(dir.path().join("logs"), OutputMode::Captured);
        let step = sh(
            "R2",
            "Check",
            &format!("touch {}", marker.display()),
            &dir.path().join("never-cloned"),
        );

        let outcome = runner.run(&step).await.unwrap();
        assert_eq!(outcome.exit, ExitKind::Cancelled);
        assert_eq!(outcome.exit_code(), -1);
        assert!(!marker.exists());

        let log = std::fs::read_to_string(runner.log_path(&step.id)).unwrap();
        assert!(log.contains("does not exist. Command canceled."));
    }

    #[tokio::test]
    async fn test_nonzero_exit_code_reported() {
        let dir = tempdir().unwrap();
        let runner = StepRunner::new(dir.path(), OutputMode::Captured);
        let outcome = runner.run(&sh("2", "Configure", "exit 3", dir.path())).await.unwrap();
        assert_eq!(outcome.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_segfault_marker_written() {
        let dir = tempdir().unwrap();
        let runner = StepRunner::new(dir.path(), OutputMode::Captured);
        let step = sh("6", "Example", "kill -SEGV $$", dir.path());

        let outcome = runner.run(&step).await.unwrap();
        assert_eq!(outcome.exit, ExitKind::Signaled(11));
        assert_eq!(outcome.exit_code(), -11);
        let log = std::fs::read_to_string(runner.log_path(&step.id)).unwrap();
        assert!(log.contains("FATAL: -11. Probably segmentation fault."));
    }

    #[tokio::test]
    async fn test_timeout_kills_step() {
        let dir = tempdir().unwrap();
        let runner = StepRunner::new(dir.path(), OutputMode::Captured)
            .with_timeout(Some(Duration::from_millis(200)));
        let step = sh("4", "Test", "sleep 5", dir.path());

        let outcome = runner.run(&step).await.unwrap();
        assert_eq!(outcome.exit, ExitKind::TimedOut);
        assert!(outcome.elapsed_secs < 5.0);
    }

    #[tokio::test]
    async fn test_local_install_env_injected() {
        let dir = tempdir().unwrap();
        let install = dir.path().join("LocalInstall");
        let runner = StepRunner::new(dir.path(), OutputMode::Captured)
            .with_local_install(LocalInstallEnv::new(&install));
        let step = sh("P2", "Check", "echo prefix=$OPENFLUID_INSTALL_PREFIX; echo path=$PATH", dir.path())
            .with_local_env(true);

        runner.run(&step).await.unwrap();
        let log = std::fs::read_to_string(runner.log_path(&step.id)).unwrap();
        assert!(log.contains(&format!("prefix={}", install.display())));
        assert!(log.contains(&format!("path={}/bin", install.display())));
    }

    #[tokio::test]
    async fn test_unknown_program_is_spawn_failure() {
        let dir = tempdir().unwrap();
        let runner = StepRunner::new(dir.path(), OutputMode::Captured);
        let step = Step::new(
            StepId::new("3", "Build"),
            "Build",
            vec!["definitely-not-a-real-program-xyz".into()],
            dir.path(),
        );
        let outcome = runner.run(&step).await.unwrap();
        assert!(matches!(outcome.exit, ExitKind::SpawnFailed(_)));
    }

    #[test]
    fn test_log_manual_writes_message() {
        let dir = tempdir().unwrap();
        let runner = StepRunner::new(dir.path(), OutputMode::Captured);
        let id = StepId::new("6", "Example");
        runner
            .log_manual(&id, "Running examples", "[BuildMachine] No example found.")
            .unwrap();
        let log = std::fs::read_to_string(runner.log_path(&id)).unwrap();
        assert!(log.contains("No example found."));
    }
}
