//! Immutable procedure configuration, resolved once from command-line options.

use crate::errors::ConfigError;
use crate::host::{HostInfo, PackageFormat};
use crate::module::{DependentKind, ModuleKind, ModuleSpec, PRIMARY_DEFAULT_LOCATOR};
use crate::runner::OutputMode;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Directory inside the temp dir holding step logs and the run report.
pub const LOGS_SUBDIR: &str = "_log";
pub const DEFAULT_EXAMPLES_DIR: &str = "/usr/share/doc/openfluid/examples/projects";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildType {
    Test,
    Package,
}

impl BuildType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Package => "package",
        }
    }
}

impl FromStr for BuildType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "test" => Ok(Self::Test),
            "package" => Ok(Self::Package),
            other => Err(ConfigError::InvalidBuildType(other.to_string())),
        }
    }
}

/// Which examples the example step runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExampleSelection {
    /// Every subdirectory of the examples directory.
    All,
    Named(Vec<String>),
}

impl ExampleSelection {
    /// `*` or `all` select every example; otherwise a comma separated list.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value == "*" || value.eq_ignore_ascii_case("all") {
            return Self::All;
        }
        Self::Named(
            value
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

/// Raw procedure options, as given on the command line.
#[derive(Debug, Clone)]
pub struct ProcedureOptions {
    pub build_type: BuildType,
    pub temp_dir: PathBuf,
    pub src_dir: Option<PathBuf>,
    pub build_jobs: u32,
    pub shell: bool,
    pub openfluid_repos: String,
    pub host_distrib: Option<String>,
    /// Seconds, 0 disables the timeout.
    pub step_timeout_secs: u64,
    pub run_examples: String,
    pub ropenfluid_repos: Option<String>,
    pub pyopenfluid_repos: Option<String>,
    pub openfluidjs_repos: Option<String>,
    pub subrepos_only: bool,
    pub examples_dir: PathBuf,
}

impl ProcedureOptions {
    pub fn new(build_type: BuildType, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_type,
            temp_dir: temp_dir.into(),
            src_dir: None,
            build_jobs: 1,
            shell: false,
            openfluid_repos: PRIMARY_DEFAULT_LOCATOR.to_string(),
            host_distrib: None,
            step_timeout_secs: 0,
            run_examples: "*".to_string(),
            ropenfluid_repos: None,
            pyopenfluid_repos: None,
            openfluidjs_repos: None,
            subrepos_only: false,
            examples_dir: PathBuf::from(DEFAULT_EXAMPLES_DIR),
        }
    }

    fn dependent_origin(&self, kind: DependentKind) -> Option<&str> {
        match kind {
            DependentKind::ROpenfluid => self.ropenfluid_repos.as_deref(),
            DependentKind::PyOpenfluid => self.pyopenfluid_repos.as_deref(),
            DependentKind::OpenfluidJs => self.openfluidjs_repos.as_deref(),
        }
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Command vectors for every step. Replaceable as a whole for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSet {
    /// Program (and leading args) used for clone and checkout.
    pub git: Vec<String>,
    pub configure: Vec<String>,
    pub build: Vec<String>,
    pub test: Vec<String>,
    pub package: Vec<String>,
    pub install: Vec<String>,
    /// Prefix of the example run; input and output dirs are appended.
    pub run_example: Vec<String>,
    pub r_check: Vec<String>,
    pub r_build: Vec<String>,
    pub py_check: Vec<String>,
    pub py_build: Vec<String>,
    pub py_test: Vec<String>,
    pub py_package: Vec<String>,
    pub js_build: Vec<String>,
    pub js_test: Vec<String>,
    pub js_package: Vec<String>,
}

impl CommandSet {
    pub fn defaults(
        build_type: BuildType,
        primary_src: &Path,
        build_dir: &Path,
        local_install: &Path,
        build_jobs: u32,
        format: PackageFormat,
    ) -> Self {
        let mut configure = vec!["cmake".to_string(), primary_src.display().to_string()];
        if build_type == BuildType::Package {
            configure.push("-DCMAKE_BUILD_TYPE=Release".to_string());
            configure.push(format!("-DCMAKE_INSTALL_PREFIX={}", local_install.display()));
        }

        Self {
            git: argv(&["git"]),
            configure,
            build: vec![
                "cmake".to_string(),
                "--build".to_string(),
                build_dir.display().to_string(),
                "--".to_string(),
                "-j".to_string(),
                build_jobs.to_string(),
            ],
            test: argv(&["ctest"]),
            package: argv(&["cpack", "-G", format.generator()]),
            install: argv(&["make", "install"]),
            run_example: argv(&["openfluid", "run"]),
            r_check: argv(&["cmake", "-P", "check.cmake"]),
            r_build: argv(&["cmake", "-P", "build.cmake"]),
            py_check: argv(&["python3", "setup.py", "check"]),
            py_build: argv(&["python3", "setup.py", "build"]),
            py_test: argv(&["python3", "setup.py", "build", "test"]),
            py_package: argv(&["python3", "setup.py", "sdist", "bdist"]),
            js_build: argv(&["npm", "install"]),
            js_test: argv(&["npm", "test"]),
            js_package: argv(&["npm", "pack"]),
        }
    }
}

/// Everything one procedure run needs. Built once, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ProcedureConfig {
    pub build_type: BuildType,
    pub temp_dir: PathBuf,
    pub src_dir: PathBuf,
    pub build_dir: PathBuf,
    pub log_dir: PathBuf,
    pub local_install: PathBuf,
    pub release_dir: PathBuf,
    pub examples_dir: PathBuf,
    pub examples_out_dir: PathBuf,
    pub output_mode: OutputMode,
    pub step_timeout: Option<Duration>,
    pub primary: ModuleSpec,
    /// Declared dependent modules, in priority order.
    pub dependents: Vec<ModuleSpec>,
    pub examples: ExampleSelection,
    pub subrepos_only: bool,
    pub host: HostInfo,
    pub commands: CommandSet,
}

impl ProcedureConfig {
    /// Resolve options against the detected host.
    pub fn resolve(options: &ProcedureOptions) -> Result<Self, ConfigError> {
        let host = HostInfo::detect(options.host_distrib.as_deref())?;
        Self::with_host(options, host)
    }

    pub fn with_host(options: &ProcedureOptions, host: HostInfo) -> Result<Self, ConfigError> {
        let temp_dir = options.temp_dir.clone();
        let src_dir = options
            .src_dir
            .clone()
            .unwrap_or_else(|| temp_dir.join("src"));
        let build_dir = temp_dir.join("build").join("openfluid");
        let local_install = temp_dir.join("LocalInstall");

        let primary = ModuleSpec::resolve(ModuleKind::Primary, &options.openfluid_repos, &src_dir)?;

        // Dependent modules only take part in package builds.
        let mut dependents = Vec::new();
        if options.build_type == BuildType::Package {
            for kind in DependentKind::PRIORITY {
                if let Some(origin) = options.dependent_origin(kind) {
                    dependents.push(ModuleSpec::resolve(
                        ModuleKind::Dependent(kind),
                        origin,
                        &src_dir,
                    )?);
                }
            }
        }

        let commands = CommandSet::defaults(
            options.build_type,
            &primary.src_dir,
            &build_dir,
            &local_install,
            options.build_jobs.max(1),
            host.package_format,
        );

        Ok(Self {
            build_type: options.build_type,
            log_dir: temp_dir.join(LOGS_SUBDIR),
            release_dir: temp_dir.join("release"),
            examples_out_dir: temp_dir.join("Examples"),
            examples_dir: options.examples_dir.clone(),
            output_mode: if options.shell {
                OutputMode::Interactive
            } else {
                OutputMode::Captured
            },
            step_timeout: (options.step_timeout_secs > 0)
                .then(|| Duration::from_secs(options.step_timeout_secs)),
            primary,
            dependents,
            examples: ExampleSelection::parse(&options.run_examples),
            subrepos_only: options.build_type == BuildType::Package && options.subrepos_only,
            host,
            commands,
            temp_dir,
            src_dir,
            build_dir,
            local_install,
        })
    }

    pub fn with_commands(mut self, commands: CommandSet) -> Self {
        self.commands = commands;
        self
    }
}
