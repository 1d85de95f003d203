//! Run configurations: the `active-setups` list of a multi-context YAML file.
//!
//! ```yaml
//! active-setups:
//!   - build-type: package
//!     contexts: [local, "sandbox:ofbuild/debian-11-qt5"]
//!     temp-dir: /shared/nightly
//!     build-jobs: 4
//!     openfluid-repos: OpenFLUID/openfluid#develop
//!     run-examples: "*"
//! ```
//!
//! `contexts`, `build-type` and `temp-dir` drive the orchestration. Every other
//! key is forwarded to the procedure as a `--key value` option, global keys
//! before the build type and the rest after it.

use crate::errors::ConfigError;
use crate::procedure::BuildType;
use anyhow::{Context, Result};
use serde_yaml::Value as YamlValue;
use std::path::Path;

pub const SETUPS_KEY: &str = "active-setups";
pub const CONTEXTS_KEY: &str = "contexts";
pub const BUILD_TYPE_KEY: &str = "build-type";
pub const TEMP_DIR_KEY: &str = "temp-dir";

/// Keys forwarded as global procedure options.
pub const GLOBAL_PARAMS: &[&str] = &[
    "shell",
    "src-dir",
    "build-jobs",
    "openfluid-repos",
    "host-distrib",
    "step-timeout",
];

/// Category used when a setup declares no temp dir.
pub const DEFAULT_CATEGORY: &str = "default";

/// Value of a forwarded parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// Bare `--key` flag.
    Flag,
    Text(String),
}

/// One entry of `active-setups`.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Position in the configuration file.
    pub index: usize,
    pub build_type: BuildType,
    pub contexts: Vec<String>,
    pub temp_dir: Option<String>,
    /// Forwarded parameters, in declaration order.
    pub params: Vec<(String, ParamValue)>,
    /// The setup as declared, attached to every report of this run.
    pub setup: serde_json::Value,
}

impl RunConfig {
    /// Read every run of a YAML configuration file.
    pub fn load(path: &Path) -> Result<Vec<RunConfig>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run configuration {}", path.display()))?;
        let doc: YamlValue = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse run configuration {}", path.display()))?;
        Ok(Self::from_yaml(&doc)?)
    }

    /// Validate and convert a parsed document. Every problem is reported at once.
    pub fn from_yaml(doc: &YamlValue) -> Result<Vec<RunConfig>, ConfigError> {
        let Some(setups) = doc.get(SETUPS_KEY).and_then(YamlValue::as_sequence) else {
            return Err(ConfigError::MissingRunKeys {
                problems: vec![format!("'{}' list missing", SETUPS_KEY)],
            });
        };

        let mut problems = Vec::new();
        let mut runs = Vec::new();
        for (index, setup) in setups.iter().enumerate() {
            match Self::from_setup(index, setup) {
                Ok(run) => runs.push(run),
                Err(mut found) => problems.append(&mut found),
            }
        }

        if problems.is_empty() {
            Ok(runs)
        } else {
            Err(ConfigError::MissingRunKeys { problems })
        }
    }

    fn from_setup(index: usize, setup: &YamlValue) -> Result<RunConfig, Vec<String>> {
        let Some(mapping) = setup.as_mapping() else {
            return Err(vec![format!("setup #{}: not a mapping", index)]);
        };
        let mut problems = Vec::new();

        let contexts: Vec<String> = match mapping.get(CONTEXTS_KEY) {
            None | Some(YamlValue::Null) => {
                problems.push(format!("setup #{}: '{}' missing", index, CONTEXTS_KEY));
                Vec::new()
            }
            Some(YamlValue::String(single)) => vec![single.clone()],
            Some(YamlValue::Sequence(items)) => {
                let contexts: Vec<String> = items
                    .iter()
                    .filter_map(|c| c.as_str().map(str::to_string))
                    .collect();
                if contexts.len() != items.len() {
                    problems.push(format!("setup #{}: '{}' must be strings", index, CONTEXTS_KEY));
                } else if contexts.is_empty() {
                    problems.push(format!("setup #{}: '{}' is empty", index, CONTEXTS_KEY));
                }
                contexts
            }
            Some(_) => {
                problems.push(format!("setup #{}: '{}' must be a list", index, CONTEXTS_KEY));
                Vec::new()
            }
        };

        let build_type = match mapping.get(BUILD_TYPE_KEY).and_then(YamlValue::as_str) {
            Some(value) => match value.parse::<BuildType>() {
                Ok(build_type) => Some(build_type),
                Err(e) => {
                    problems.push(format!("setup #{}: {}", index, e));
                    None
                }
            },
            None => {
                problems.push(format!("setup #{}: '{}' missing", index, BUILD_TYPE_KEY));
                None
            }
        };

        let temp_dir = match mapping.get(TEMP_DIR_KEY) {
            None | Some(YamlValue::Null) => None,
            Some(value) => match scalar_text(value) {
                Some(text) if !text.is_empty() => Some(text),
                _ => {
                    problems.push(format!("setup #{}: '{}' must be a path", index, TEMP_DIR_KEY));
                    None
                }
            },
        };

        let mut params = Vec::new();
        for (key, value) in mapping {
            let Some(key) = key.as_str() else {
                problems.push(format!("setup #{}: non-string key", index));
                continue;
            };
            if matches!(key, CONTEXTS_KEY | BUILD_TYPE_KEY | TEMP_DIR_KEY) {
                continue;
            }
            match param_value(value) {
                Ok(Some(value)) => params.push((key.to_string(), value)),
                Ok(None) => {}
                Err(()) => problems.push(format!("setup #{}: value of '{}' must be a scalar", index, key)),
            }
        }

        let setup_json = serde_json::to_value(setup)
            .map_err(|e| vec![format!("setup #{}: {}", index, e)])?;

        match build_type {
            Some(build_type) if problems.is_empty() => Ok(RunConfig {
                index,
                build_type,
                contexts,
                temp_dir,
                params,
                setup: setup_json,
            }),
            _ => Err(problems),
        }
    }

    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Report grouping key: last component of the declared temp dir.
    pub fn category(&self) -> String {
        self.temp_dir
            .as_deref()
            .and_then(|dir| Path::new(dir).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
    }

    /// Flattened `procedure` arguments for one context.
    ///
    /// `default_repos` is used as `--openfluid-repos` when the setup declares none.
    pub fn procedure_args(&self, temp_dir: &Path, default_repos: Option<&str>) -> Vec<String> {
        let mut args = vec!["--temp-dir".to_string(), temp_dir.display().to_string()];

        let (globals, locals): (Vec<_>, Vec<_>) = self
            .params
            .iter()
            .partition(|(key, _)| GLOBAL_PARAMS.contains(&key.as_str()));

        for (key, value) in &globals {
            push_param(&mut args, key, value);
        }
        if self.param("openfluid-repos").is_none()
            && let Some(repos) = default_repos
        {
            push_param(&mut args, "openfluid-repos", &ParamValue::Text(repos.to_string()));
        }

        args.push(self.build_type.as_str().to_string());
        for (key, value) in &locals {
            push_param(&mut args, key, value);
        }
        args
    }
}

fn push_param(args: &mut Vec<String>, key: &str, value: &ParamValue) {
    args.push(format!("--{}", key));
    if let ParamValue::Text(text) = value {
        args.push(text.clone());
    }
}

fn scalar_text(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(s) => Some(s.clone()),
        YamlValue::Number(n) => Some(n.to_string()),
        YamlValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `true`, null and empty strings become bare flags; `false` drops the key.
fn param_value(value: &YamlValue) -> Result<Option<ParamValue>, ()> {
    match value {
        YamlValue::Null => Ok(Some(ParamValue::Flag)),
        YamlValue::Bool(true) => Ok(Some(ParamValue::Flag)),
        YamlValue::Bool(false) => Ok(None),
        YamlValue::String(s) if s.is_empty() => Ok(Some(ParamValue::Flag)),
        YamlValue::Sequence(items) => {
            let parts: Option<Vec<String>> = items.iter().map(scalar_text).collect();
            parts.map(|p| Some(ParamValue::Text(p.join(",")))).ok_or(())
        }
        other => scalar_text(other).map(|t| Some(ParamValue::Text(t))).ok_or(()),
    }
}
