//! Orchestration environments.
//!
//! An environment is a directory holding a `config.yml` and a `scripts/`
//! directory. Each run gets its own `exec_<timestamp>/` directory with a copy
//! of the configuration it ran with, and serves as the orchestrator's output
//! directory.

use crate::runner::timestamp_compact;
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CONFIG_FILE: &str = "config.yml";
pub const SCRIPTS_DIR: &str = "scripts";
pub const EXEC_PREFIX: &str = "exec_";

const CONFIG_TEMPLATE: &str = include_str!("../templates/config.yml");

/// Create a new environment. Refuses to overwrite an existing configuration.
pub fn create(env_dir: &Path) -> Result<PathBuf> {
    let config = env_dir.join(CONFIG_FILE);
    if config.exists() {
        bail!("Environment already exists: {}", config.display());
    }

    fs::create_dir_all(env_dir.join(SCRIPTS_DIR))
        .with_context(|| format!("Failed to create environment: {}", env_dir.display()))?;
    fs::write(&config, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", config.display()))?;

    info!(path = %env_dir.display(), "environment created");
    Ok(config)
}

/// A prepared run of an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvRun {
    pub exec_dir: PathBuf,
    pub config: PathBuf,
}

/// Create a fresh execution directory holding a copy of the configuration.
pub fn prepare_run(env_dir: &Path) -> Result<EnvRun> {
    prepare_run_named(env_dir, &timestamp_compact())
}

fn prepare_run_named(env_dir: &Path, stamp: &str) -> Result<EnvRun> {
    let source = env_dir.join(CONFIG_FILE);
    if !source.is_file() {
        bail!(
            "No {} in {}. Create the environment first with `buildmachine env create`.",
            CONFIG_FILE,
            env_dir.display()
        );
    }

    let exec_dir = env_dir.join(format!("{}{}", EXEC_PREFIX, stamp));
    if exec_dir.exists() {
        fs::remove_dir_all(&exec_dir)
            .with_context(|| format!("Failed to purge {}", exec_dir.display()))?;
    }
    fs::create_dir_all(&exec_dir)
        .with_context(|| format!("Failed to create {}", exec_dir.display()))?;

    let config = exec_dir.join(CONFIG_FILE);
    fs::copy(&source, &config)
        .with_context(|| format!("Failed to copy {} to {}", source.display(), config.display()))?;

    Ok(EnvRun { exec_dir, config })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::RunConfig;

    #[test]
    fn test_create_environment() {
        let dir = tempfile::tempdir().unwrap();
        let env = dir.path().join("nightly");
        let config = create(&env).unwrap();
        assert_eq!(config, env.join(CONFIG_FILE));
        assert!(env.join(SCRIPTS_DIR).is_dir());

        let err = create(&env).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_template_is_a_valid_run_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let config = create(dir.path()).unwrap();
        let runs = RunConfig::load(&config).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].contexts.len(), 2);
    }

    #[test]
    fn test_prepare_run_copies_config() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path()).unwrap();

        let run = prepare_run_named(dir.path(), "2026-03-14_09-05-07").unwrap();
        assert_eq!(run.exec_dir, dir.path().join("exec_2026-03-14_09-05-07"));
        assert_eq!(
            fs::read_to_string(&run.config).unwrap(),
            fs::read_to_string(dir.path().join(CONFIG_FILE)).unwrap()
        );
    }

    #[test]
    fn test_prepare_run_purges_previous_exec_dir() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path()).unwrap();
        let first = prepare_run_named(dir.path(), "same").unwrap();
        fs::write(first.exec_dir.join("stale.txt"), "x").unwrap();

        let second = prepare_run_named(dir.path(), "same").unwrap();
        assert!(!second.exec_dir.join("stale.txt").exists());
    }

    #[test]
    fn test_prepare_run_without_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(prepare_run(dir.path()).is_err());
    }
}
