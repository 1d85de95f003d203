//! Typed error hierarchy for the build machine.
//!
//! Four top-level enums cover the failure classes:
//! - `ConfigError`: fatal, raised before any step runs
//! - `IntegrityError`: fatal for the module whose fetch left no sources behind
//! - `OrchestrationError`: recorded per context, never aborts the aggregate
//! - `ResourceError`: host resources too small for a sandbox image build
//!
//! Step failures are not errors: they are recorded in the ledger.

use std::path::PathBuf;
use thiserror::Error;

/// Errors detected while building a procedure or orchestration configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Need a value for {module} origin")]
    MissingOrigin { module: String },

    #[error("Can't parse {module} origin '{value}': several '#' symbols")]
    MalformedOrigin { module: String, value: String },

    #[error("Host platform '{distrib}' not recognized")]
    UnrecognizedHost { distrib: String },

    #[error("Failed to read host information from {path}: {source}")]
    HostInfoUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Temporary directory {0} cannot be created")]
    MissingTempDir(PathBuf),

    #[error("Unknown build type '{0}'. Valid values: test, package")]
    InvalidBuildType(String),

    #[error("Invalid run configuration:\n{}", .problems.join("\n"))]
    MissingRunKeys { problems: Vec<String> },

    #[error("Launch for context '{0}' not implemented")]
    InvalidContext(String),

    #[error("Working directory {path} must be located under {root} for sandbox/host exchange")]
    SharedMountViolation { path: PathBuf, root: PathBuf },
}

/// A fetch reported success but the expected sources are not on disk.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("Local path {path} non-existent after fetch of {module}. Abort.")]
    PathMissingAfterFetch { module: String, path: PathBuf },
}

/// Errors raised while launching a context or reading back its report.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("{path} not found. Build may have failed.")]
    ReportMissing { path: PathBuf },

    #[error("Failed to parse report {path}: {message}")]
    ReportUnreadable { path: PathBuf, message: String },

    #[error("Report {path} uses unsupported schema version {version}")]
    UnsupportedSchema { path: PathBuf, version: u32 },

    #[error("Image {image} is not created. Please generate this image before performing any operation.")]
    ImageUnavailable { image: String },

    #[error("Image {image} could not be built: {message}")]
    ImageBuildFailed { image: String, message: String },

    #[error("Failed to launch build for context '{context}': {message}")]
    LaunchFailed { context: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Host resources checked before an expensive sandbox operation.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Not enough space on {volume} for image creation: {available_kib} KiB free, {required_kib} KiB estimated")]
    InsufficientSpace {
        volume: PathBuf,
        available_kib: u64,
        required_kib: u64,
    },

    #[error("Failed to measure free space on {volume}: {source}")]
    Unmeasurable {
        volume: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_run_keys_lists_every_problem() {
        let err = ConfigError::MissingRunKeys {
            problems: vec![
                "setup #0: 'contexts' missing".to_string(),
                "setup #2: 'build-type' missing".to_string(),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("setup #0"));
        assert!(text.contains("setup #2"));
    }

    #[test]
    fn test_malformed_origin_carries_value() {
        let err = ConfigError::MalformedOrigin {
            module: "openfluid".into(),
            value: "a#b#c".into(),
        };
        match &err {
            ConfigError::MalformedOrigin { value, .. } => assert_eq!(value, "a#b#c"),
            _ => panic!("Expected MalformedOrigin"),
        }
        assert!(err.to_string().contains("several '#'"));
    }

    #[test]
    fn test_orchestration_error_converts_from_resource_error() {
        let inner = ResourceError::InsufficientSpace {
            volume: PathBuf::from("/"),
            available_kib: 10,
            required_kib: 5_000_000,
        };
        let err: OrchestrationError = inner.into();
        assert!(matches!(
            err,
            OrchestrationError::Resource(ResourceError::InsufficientSpace { .. })
        ));
    }

    #[test]
    fn test_all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ConfigError::InvalidBuildType("x".into()));
        assert_std_error(&IntegrityError::PathMissingAfterFetch {
            module: "openfluid".into(),
            path: PathBuf::from("/nope"),
        });
        assert_std_error(&OrchestrationError::ImageUnavailable {
            image: "ofbuild/debian-9-qt5".into(),
        });
    }
}
