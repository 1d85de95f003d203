//! Step ledger: ordered record of step outcomes for one procedure run.

use crate::runner::{CommandOutcome, ExitKind};
use crate::step::{FailureKind, Step, StepId, exit_code_check};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Outcome of one step, possibly merged over several attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub success: bool,
    /// Wall time in seconds, summed over attempts.
    pub duration: f64,
    /// First failure reason seen for this step.
    pub failure: Option<FailureKind>,
}

impl StepResult {
    fn from_classification(classified: Result<(), FailureKind>, duration: f64) -> Self {
        Self {
            success: classified.is_ok(),
            duration,
            failure: classified.err(),
        }
    }
}

/// Records step results in execution order and classifies success.
///
/// The ledger never fails: an unreadable step log becomes a recorded failure.
#[derive(Debug)]
pub struct StepLedger {
    log_dir: PathBuf,
    entries: Vec<(StepId, StepResult)>,
}

impl StepLedger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            entries: Vec::new(),
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Path of the captured log for a step.
    pub fn log_path(&self, id: &StepId) -> PathBuf {
        self.log_dir.join(id.log_file_name())
    }

    /// Classify a finished command from its raw exit code and record it.
    ///
    /// Log-based policies read the step log; exit-code policies ignore it.
    pub fn record(&mut self, step: &Step, exit_code: i32, elapsed: f64) -> bool {
        let classified = self.classify_from_log(step, exit_code, 0);
        self.merge(&step.id, StepResult::from_classification(classified, elapsed))
    }

    /// Record a command outcome produced by the runner.
    ///
    /// Outcomes that never produced a normal exit (cancelled, timed out,
    /// unspawnable) fail regardless of policy. Uncaptured output can only
    /// be judged on its exit code. Log policies only see the output of this
    /// attempt, not earlier attempts appended to the same log.
    pub fn record_outcome(&mut self, step: &Step, outcome: &CommandOutcome) -> bool {
        let elapsed = outcome.elapsed_secs;
        let classified = match &outcome.exit {
            ExitKind::Cancelled => Err(FailureKind::Cancelled),
            ExitKind::TimedOut => Err(FailureKind::TimedOut),
            ExitKind::SpawnFailed(_) => Err(FailureKind::SpawnFailed),
            ExitKind::Signaled(sig) if !outcome.captured || !step.policy.reads_log() => {
                Err(FailureKind::Signaled(*sig))
            }
            ExitKind::Exited(code) if !outcome.captured => exit_code_check(*code),
            _ => self.classify_from_log(step, outcome.exit_code(), outcome.log_offset),
        };
        self.merge(&step.id, StepResult::from_classification(classified, elapsed))
    }

    /// Record a failure that did not come from a command (nothing to install, no example).
    pub fn record_failure(&mut self, id: &StepId, kind: FailureKind, elapsed: f64) -> bool {
        self.merge(id, StepResult::from_classification(Err(kind), elapsed))
    }

    /// Record a success that did not come from a command (local origin present).
    pub fn record_success(&mut self, id: &StepId, elapsed: f64) -> bool {
        self.merge(id, StepResult::from_classification(Ok(()), elapsed))
    }

    fn classify_from_log(&self, step: &Step, exit_code: i32, offset: u64) -> Result<(), FailureKind> {
        if !step.policy.reads_log() {
            return exit_code_check(exit_code);
        }

        let path = self.log_path(&step.id);
        match std::fs::read(&path) {
            Ok(bytes) => {
                let attempt = usize::try_from(offset)
                    .ok()
                    .and_then(|start| bytes.get(start..))
                    .unwrap_or_default();
                step.policy
                    .check_log(&String::from_utf8_lossy(attempt), exit_code)
            }
            Err(err) => {
                warn!(
                    step = %step.id,
                    path = %path.display(),
                    error = %err,
                    "step log unreadable, recording failure"
                );
                Err(FailureKind::LogUnreadable)
            }
        }
    }

    fn merge(&mut self, id: &StepId, current: StepResult) -> bool {
        if let Some((_, previous)) = self.entries.iter_mut().find(|(known, _)| known == id) {
            previous.duration += current.duration;
            if previous.success && !current.success {
                previous.failure = current.failure;
            }
            previous.success = previous.success && current.success;
            debug!(step = %id, success = previous.success, "merged step attempt");
            return previous.success;
        }

        let success = current.success;
        debug!(step = %id, success, duration = current.duration, "recorded step");
        self.entries.push((id.clone(), current));
        success
    }

    pub fn get(&self, id: &StepId) -> Option<&StepResult> {
        self.entries
            .iter()
            .find(|(known, _)| known == id)
            .map(|(_, result)| result)
    }

    /// Entries in execution order.
    pub fn entries(&self) -> &[(StepId, StepResult)] {
        &self.entries
    }

    /// Entries sorted by (tag, name) for display.
    pub fn to_ordered_list(&self) -> Vec<(StepId, StepResult)> {
        let mut list = self.entries.clone();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of recorded steps whose tag belongs to the module with `prefix`.
    pub fn count_for_module(&self, prefix: Option<char>) -> usize {
        self.entries
            .iter()
            .filter(|(id, _)| id.module_prefix() == prefix)
            .count()
    }
}
