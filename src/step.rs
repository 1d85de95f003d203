//! Step identifiers, definitions and success policies.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Display prefix used for steps owned by the primary module.
pub const PRIMARY_LABEL_PREFIX: &str = "OF-";

/// Composite identifier of a step: a sequence tag plus a name.
///
/// The tag's first character names the owning module when the tag is longer
/// than one character (`R3` belongs to the module with prefix `R`); single
/// character tags (`2`) belong to the primary module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId {
    pub tag: String,
    pub name: String,
}

impl StepId {
    pub fn new(tag: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            name: name.into(),
        }
    }

    /// Parse the `<tag>_<name>` form used for log file names.
    pub fn parse(key: &str) -> Option<Self> {
        let (tag, name) = key.split_once('_')?;
        if name.is_empty() {
            return None;
        }
        Some(Self::new(tag, name))
    }

    /// Module prefix letter, or `None` for the primary module.
    pub fn module_prefix(&self) -> Option<char> {
        if self.tag.chars().count() > 1 {
            self.tag.chars().next()
        } else {
            None
        }
    }

    /// Label shown in summaries, e.g. `OF-Configure` or `R-Build`.
    pub fn display_label(&self) -> String {
        match self.module_prefix() {
            Some(prefix) => format!("{}-{}", prefix, self.name),
            None => format!("{}{}", PRIMARY_LABEL_PREFIX, self.name),
        }
    }

    /// File name of the step log inside the log directory.
    pub fn log_file_name(&self) -> String {
        format!("{}.txt", self)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.tag, self.name)
    }
}

impl Ord for StepId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tag
            .cmp(&other.tag)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for StepId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// How a step decides whether it succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SuccessPolicy {
    /// The command exited with status 0.
    #[default]
    ExitCodeZero,
    /// The captured log contains `required`.
    Contains { required: String },
    /// The captured log contains `required` and does not contain `forbidden`.
    ContainsNotContaining { required: String, forbidden: String },
    /// A ctest summary line reports zero failures out of at least one test.
    /// When no summary line is present, falls back to the `fallback` substring.
    TestSummary { fallback: String },
}

impl SuccessPolicy {
    pub fn contains(required: impl Into<String>) -> Self {
        Self::Contains {
            required: required.into(),
        }
    }

    pub fn contains_not_containing(
        required: impl Into<String>,
        forbidden: impl Into<String>,
    ) -> Self {
        Self::ContainsNotContaining {
            required: required.into(),
            forbidden: forbidden.into(),
        }
    }

    /// Whether this policy needs the captured log to classify a step.
    pub fn reads_log(&self) -> bool {
        !matches!(self, Self::ExitCodeZero)
    }

    /// Classify log content. Returns the failure reason when the content fails the policy.
    pub fn check_log(&self, content: &str, exit_code: i32) -> Result<(), FailureKind> {
        match self {
            Self::ExitCodeZero => exit_code_check(exit_code),
            Self::Contains { required } => {
                if content.contains(required.as_str()) {
                    Ok(())
                } else {
                    Err(FailureKind::MissingSuccessMarker)
                }
            }
            Self::ContainsNotContaining {
                required,
                forbidden,
            } => {
                if !content.contains(required.as_str()) {
                    Err(FailureKind::MissingSuccessMarker)
                } else if content.contains(forbidden.as_str()) {
                    Err(FailureKind::ForbiddenMarker)
                } else {
                    Ok(())
                }
            }
            Self::TestSummary { fallback } => match parse_test_summary(content) {
                Some(summary) if summary.total > 0 && summary.failed == 0 => Ok(()),
                Some(_) => Err(FailureKind::TestsFailed),
                None if content.contains(fallback.as_str()) => Ok(()),
                None => Err(FailureKind::MissingSuccessMarker),
            },
        }
    }
}

pub(crate) fn exit_code_check(exit_code: i32) -> Result<(), FailureKind> {
    if exit_code == 0 {
        Ok(())
    } else {
        Err(FailureKind::ExitCode(exit_code))
    }
}

/// Counts parsed from a ctest summary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestSummary {
    pub passed_percent: u32,
    pub failed: u32,
    pub total: u32,
}

/// Parse the last `N% tests passed, M tests failed out of T` line of a log.
pub fn parse_test_summary(content: &str) -> Option<TestSummary> {
    static SUMMARY: OnceLock<Option<Regex>> = OnceLock::new();
    let re = SUMMARY
        .get_or_init(|| {
            Regex::new(r"(\d+)% tests passed, (\d+) tests? failed out of (\d+)").ok()
        })
        .as_ref()?;

    let caps = re.captures_iter(content).last()?;
    Some(TestSummary {
        passed_percent: caps[1].parse().ok()?,
        failed: caps[2].parse().ok()?,
        total: caps[3].parse().ok()?,
    })
}

/// Why a recorded step is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Non-zero exit status.
    ExitCode(i32),
    /// Killed by a signal (e.g. 11 for a segmentation fault).
    Signaled(i32),
    /// Exceeded the configured step timeout.
    TimedOut,
    /// Working directory absent, command never started.
    Cancelled,
    /// The program could not be started.
    SpawnFailed,
    /// Required substring absent from the log.
    MissingSuccessMarker,
    /// Forbidden substring present in the log.
    ForbiddenMarker,
    /// Structured test summary reports failures.
    TestsFailed,
    /// The log could not be read back for classification.
    LogUnreadable,
    /// Recorded manually (no command run), e.g. nothing to install.
    Manual,
    /// An earlier attempt of the same step already failed.
    EarlierAttempt,
}

impl FailureKind {
    /// Stable machine-readable name, stored in the `failure` field of report steps.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExitCode(_) => "exit_code",
            Self::Signaled(_) => "signaled",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::SpawnFailed => "spawn_failed",
            Self::MissingSuccessMarker => "missing_success_marker",
            Self::ForbiddenMarker => "forbidden_marker",
            Self::TestsFailed => "tests_failed",
            Self::LogUnreadable => "log_unreadable",
            Self::Manual => "manual",
            Self::EarlierAttempt => "earlier_attempt",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitCode(code) => write!(f, "exit code {}", code),
            Self::Signaled(sig) => write!(f, "killed by signal {}", sig),
            Self::TimedOut => write!(f, "timed out"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::SpawnFailed => write!(f, "spawn failed"),
            Self::MissingSuccessMarker => write!(f, "success marker missing"),
            Self::ForbiddenMarker => write!(f, "failure marker found"),
            Self::TestsFailed => write!(f, "tests failed"),
            Self::LogUnreadable => write!(f, "log unreadable"),
            Self::Manual => write!(f, "manual failure"),
            Self::EarlierAttempt => write!(f, "earlier attempt failed"),
        }
    }
}

/// One executable unit of a procedure.
#[derive(Debug, Clone)]
pub struct Step {
    pub id: StepId,
    /// Stage banner written to the terminal and at the top of the log.
    pub title: String,
    pub command: Vec<String>,
    pub working_dir: PathBuf,
    pub policy: SuccessPolicy,
    /// Run with the local-install environment (library/executable search paths).
    pub needs_local_env: bool,
}

impl Step {
    pub fn new(
        id: StepId,
        title: impl Into<String>,
        command: Vec<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            command,
            working_dir: working_dir.into(),
            policy: SuccessPolicy::ExitCodeZero,
            needs_local_env: false,
        }
    }

    pub fn with_policy(mut self, policy: SuccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_local_env(mut self, needs_local_env: bool) -> Self {
        self.needs_local_env = needs_local_env;
        self
    }

    /// Command line rendered for logs.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}
