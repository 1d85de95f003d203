//! Execution contexts and their working directories.

use super::settings::OrchestratorSettings;
use crate::errors::ConfigError;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where one run is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Host process. `source` is an optional local primary checkout (`local:/path`).
    Local { source: Option<String> },
    /// Container started from `image`.
    Sandbox { image: String },
}

impl ExecutionContext {
    /// Parse `local`, `local:<path>`, `sandbox:<image>` or `docker:<image>`.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let spec = spec.trim();
        let (kind, rest) = match spec.split_once(':') {
            Some((kind, rest)) => (kind, Some(rest.trim())),
            None => (spec, None),
        };
        match (kind, rest) {
            ("local", None) => Ok(Self::Local { source: None }),
            ("local", Some(path)) if !path.is_empty() => Ok(Self::Local {
                source: Some(path.to_string()),
            }),
            ("sandbox" | "docker", Some(image)) if !image.is_empty() => Ok(Self::Sandbox {
                image: image.to_string(),
            }),
            _ => Err(ConfigError::InvalidContext(spec.to_string())),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { source: None } => write!(f, "local"),
            Self::Local { source: Some(path) } => write!(f, "local:{}", path),
            Self::Sandbox { image } => write!(f, "sandbox:{}", image),
        }
    }
}

/// Working directory of one context, seen from the procedure and from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDir {
    /// Passed to the procedure as `--temp-dir`.
    pub procedure_dir: PathBuf,
    /// Same directory on the host, where the report is read back.
    pub host_dir: PathBuf,
}

/// Resolve the working directory of a context under the run's base directory.
///
/// `local_slot` is set when several contexts share the run: each local
/// context then gets its own `Local-<n>` subdirectory.
pub fn resolve_working_dir(
    base: &Path,
    context: &ExecutionContext,
    local_slot: Option<usize>,
    settings: &OrchestratorSettings,
) -> Result<WorkingDir, ConfigError> {
    match context {
        ExecutionContext::Local { .. } => {
            let dir = match local_slot {
                Some(n) => base.join(format!("Local-{}", n)),
                None => base.to_path_buf(),
            };
            Ok(WorkingDir {
                procedure_dir: dir.clone(),
                host_dir: dir,
            })
        }
        ExecutionContext::Sandbox { image } => {
            let under_root = base
                .strip_prefix(&settings.sandbox_shared_root)
                .map(|rest| !rest.as_os_str().is_empty())
                .unwrap_or(false);
            if !under_root {
                return Err(ConfigError::SharedMountViolation {
                    path: base.to_path_buf(),
                    root: settings.sandbox_shared_root.clone(),
                });
            }
            let dir = base.join(image);
            Ok(WorkingDir {
                host_dir: settings.to_host_path(&dir),
                procedure_dir: dir,
            })
        }
    }
}
