// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent provisioning sequence.
//!
//! Provisioning is an ordered walk over __steps__. A step pairs a predicate
//! ("is this already done?") with a remedial action ("do it"). The
//! [`Provisioner`] evaluates each predicate, remediates only what is not yet
//! satisfied, and always re-checks the predicate afterwards. A step is never
//! assumed fixed merely because its remediation ran.
//!
//! # Idempotence
//!
//! Every predicate inspects the machine itself: the filesystem, tool output,
//! repository state. Nothing is remembered between runs. Running the sequence
//! twice without any change in between never remediates anything on the second
//! run, so provisioning can always be restarted from scratch after a partial
//! failure.
//!
//! # Policies
//!
//! What happens to a step that stays unsatisfied after remediation depends on
//! its [`Policy`]:
//!
//! - [`Policy::Fatal`] halts the sequence. The external condition must be
//!   fixed before rerunning.
//! - [`Policy::Resume`] halts the sequence too, but signals that nothing is
//!   broken. The user has to complete a manual action (restart a terminal,
//!   finish an interactive login) and rerun.
//! - [`Policy::Advisory`] prints guidance and the sequence moves on.
//!
//! Side effects of earlier steps are left in place on a halt. Provisioning is
//! monotonic, not transactional.
//!
//! # Follow-up Steps
//!
//! Some steps can only be planned once earlier steps are done, e.g., the
//! package steps need a package manifest that only exists once the installer
//! repository is cloned. A satisfied step may therefore contribute follow-up
//! steps, which run immediately after it in the order given.

pub mod context;
pub mod credential;
pub mod launcher;
pub mod packages;
pub mod plan;
pub mod toolchain;

pub use context::{Environment, WorkingContext};

use crate::{
    exec::{Cmd, CommandRunner, RunResult},
    manifest::ManifestLoader,
    repo::RepoSync,
};

use std::{collections::VecDeque, path::PathBuf};
use tracing::{debug, info, instrument, warn};

/// Exit status of a successful run.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit status of an unrecoverable error or unremediated fatal step.
pub const EXIT_FAILURE: i32 = 1;

/// Exit status asking the user to complete a manual action and rerun.
///
/// Borrowed from `EX_TEMPFAIL` of `sysexits.h`.
pub const EXIT_RESUME: i32 = 75;

/// What to do when a step stays unsatisfied after remediation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    /// Halt the sequence.
    Fatal,

    /// Halt the sequence and ask the user to perform an action, then rerun.
    Resume(String),

    /// Print guidance and continue.
    Advisory(String),
}

impl Policy {
    /// Check if an unsatisfied step halts the sequence.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Advisory(_))
    }
}

/// Named idempotent check-and-remediate unit.
pub trait Step {
    /// Name shown in logs and reports.
    fn name(&self) -> String;

    /// Policy applied when remediation does not satisfy the step.
    ///
    /// Queried after the step was evaluated.
    fn policy(&self) -> Policy;

    /// Check if the step is already satisfied.
    ///
    /// Predicates may record what they discover in the working context, e.g.,
    /// the location of a tool or environment.
    fn is_satisfied(&self, session: &mut Session<'_>) -> Result<bool>;

    /// Attempt to satisfy the step.
    ///
    /// Returning `Ok` does not mean success. The predicate decides that.
    fn remediate(&self, session: &mut Session<'_>) -> Result<()>;

    /// Steps to run right after this one, once it is satisfied.
    fn followups(&self, _session: &mut Session<'_>) -> Result<Vec<Box<dyn Step>>> {
        Ok(Vec::new())
    }
}

/// Collaborators and working context shared by all steps of a run.
pub struct Session<'a> {
    pub context: WorkingContext,
    pub runner: &'a mut dyn CommandRunner,
    pub repos: &'a mut dyn RepoSync,
    pub manifests: &'a dyn ManifestLoader,
}

impl<'a> Session<'a> {
    /// Construct new session.
    pub fn new(
        context: WorkingContext,
        runner: &'a mut dyn CommandRunner,
        repos: &'a mut dyn RepoSync,
        manifests: &'a dyn ManifestLoader,
    ) -> Self {
        Self {
            context,
            runner,
            repos,
            manifests,
        }
    }

    /// Run streamed command and report whether it exited successfully.
    ///
    /// # Errors
    ///
    /// - Return [`StepError::Exec`] if the command cannot be started.
    pub fn run(&mut self, cmd: Cmd) -> Result<bool> {
        info!("> {cmd}");
        let result = self.runner.execute(&cmd)?;
        if !result.success() {
            warn!("{cmd} exited with {}", result.exit_code);
        }

        Ok(result.success())
    }

    /// Run listing of streamed commands, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// - Return [`StepError::Exec`] if a command cannot be started.
    pub fn run_all(&mut self, cmds: impl IntoIterator<Item = Cmd>) -> Result<bool> {
        for cmd in cmds {
            if !self.run(cmd)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Run command with captured output.
    ///
    /// # Errors
    ///
    /// - Return [`StepError::Exec`] if the command cannot be started.
    pub fn capture(&mut self, cmd: Cmd) -> Result<RunResult> {
        let cmd = cmd.capture();
        debug!("> {cmd}");
        Ok(self.runner.execute(&cmd)?)
    }

    /// Locate binary, remembering its directory for later steps.
    ///
    /// Searches the directories discovered so far, then `extra`, then `PATH`.
    pub fn locate(&mut self, binary: &str, extra: &[PathBuf]) -> Option<PathBuf> {
        let mut search = self.context.search_path().to_vec();
        search.extend(extra.iter().cloned());

        let found = self.runner.locate(binary, &search)?;
        debug!("located {binary} at {:?}", found.display());
        if let Some(dir) = found.parent() {
            self.context.add_search_dir(dir);
        }

        Some(found)
    }
}

/// Whether steps get remediated.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Remediate unsatisfied steps.
    #[default]
    Apply,

    /// Only evaluate predicates.
    Check,
}

/// Final status of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// Predicate held on first evaluation.
    AlreadySatisfied,

    /// Predicate held after remediation.
    Remediated,

    /// Predicate did not hold.
    Unsatisfied,

    /// Predicate or remediation failed with an error.
    Errored(String),
}

impl StepStatus {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::AlreadySatisfied | Self::Remediated)
    }
}

/// Status record of an evaluated step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
}

/// Ordered record of every step evaluated during a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    records: Vec<StepRecord>,
}

impl Report {
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Number of steps that needed remediation.
    pub fn remediated(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.status == StepStatus::Remediated)
            .count()
    }

    /// Names of steps left unsatisfied or errored.
    pub fn unsatisfied(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|record| !record.status.is_satisfied())
            .map(|record| record.name.as_str())
            .collect()
    }

    /// Status of a step by name.
    pub fn status(&self, name: impl AsRef<str>) -> Option<&StepStatus> {
        self.records
            .iter()
            .find(|record| record.name == name.as_ref())
            .map(|record| &record.status)
    }

    fn push(&mut self, name: impl Into<String>, status: StepStatus) {
        self.records.push(StepRecord {
            name: name.into(),
            status,
        });
    }
}

/// Why a run stopped before the last step.
#[derive(Debug, thiserror::Error)]
pub enum Halt {
    /// Fatal step still unsatisfied after remediation.
    #[error("step {step:?} is still unsatisfied after remediation")]
    Unremediated { step: String },

    /// Manual action required before rerunning.
    #[error("step {step:?} needs manual action: {action}")]
    Resume { step: String, action: String },

    /// Fatal step failed with an error.
    #[error("step {step:?} failed")]
    Error {
        step: String,
        #[source]
        source: StepError,
    },
}

impl Halt {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Resume { .. } => EXIT_RESUME,
            Self::Unremediated { .. } | Self::Error { .. } => EXIT_FAILURE,
        }
    }
}

/// Result of a provisioning run.
#[derive(Debug)]
pub struct Outcome {
    pub mode: Mode,
    pub report: Report,
    pub halt: Option<Halt>,
}

impl Outcome {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match (&self.halt, self.mode) {
            (Some(halt), _) => halt.exit_code(),
            (None, Mode::Check) if !self.report.unsatisfied().is_empty() => EXIT_FAILURE,
            (None, _) => EXIT_SUCCESS,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == EXIT_SUCCESS
    }
}

/// Step sequencer.
#[derive(Debug, Default, Clone)]
pub struct Provisioner {
    mode: Mode,
}

impl Provisioner {
    /// Construct new provisioner that remediates.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct new provisioner with explicit mode.
    pub fn with_mode(mode: Mode) -> Self {
        Self { mode }
    }

    /// Walk steps in order.
    ///
    /// Stops at the first fatal step that cannot be satisfied. Advisory steps
    /// never stop the walk. In [`Mode::Check`] nothing is remediated and
    /// nothing halts, every reachable step is simply reported.
    #[instrument(skip(self, session, steps), level = "debug")]
    pub fn run(&self, session: &mut Session<'_>, steps: Vec<Box<dyn Step>>) -> Outcome {
        let mut queue = VecDeque::from(steps);
        let mut report = Report::default();

        while let Some(step) = queue.pop_front() {
            let name = step.name();
            let evaluated = self.evaluate(step.as_ref(), session);

            // INVARIANT: Policy is read after evaluation, so it can describe what went wrong.
            let policy = step.policy();
            let failure = match evaluated {
                Ok(status) if status.is_satisfied() => {
                    report.push(&name, status);
                    match step.followups(session) {
                        Ok(next) => {
                            // INVARIANT: Follow-ups run right after their parent, in order.
                            for followup in next.into_iter().rev() {
                                queue.push_front(followup);
                            }
                            continue;
                        }
                        Err(error) => error,
                    }
                }
                Ok(status) => {
                    report.push(&name, status);
                    if self.mode == Mode::Check {
                        continue;
                    }

                    match policy {
                        Policy::Advisory(guidance) => {
                            warn!("{name}: {guidance}");
                            continue;
                        }
                        Policy::Fatal => {
                            return self.halt(report, Halt::Unremediated { step: name });
                        }
                        Policy::Resume(action) => {
                            return self.halt(report, Halt::Resume { step: name, action });
                        }
                    }
                }
                Err(error) => {
                    report.push(&name, StepStatus::Errored(error.to_string()));
                    error
                }
            };

            if self.mode == Mode::Check || !policy.is_fatal() {
                warn!("{name}: {failure}");
                continue;
            }

            return self.halt(
                report,
                Halt::Error {
                    step: name,
                    source: failure,
                },
            );
        }

        Outcome {
            mode: self.mode,
            report,
            halt: None,
        }
    }

    fn evaluate(&self, step: &dyn Step, session: &mut Session<'_>) -> Result<StepStatus> {
        let name = step.name();
        info!("check {name}");
        if step.is_satisfied(session)? {
            info!("{name}: already satisfied");
            return Ok(StepStatus::AlreadySatisfied);
        }

        if self.mode == Mode::Check {
            info!("{name}: unsatisfied");
            return Ok(StepStatus::Unsatisfied);
        }

        info!("{name}: remediate");
        step.remediate(session)?;

        // INVARIANT: Never trust remediation, always re-check the predicate.
        if step.is_satisfied(session)? {
            info!("{name}: remediated");
            Ok(StepStatus::Remediated)
        } else {
            Ok(StepStatus::Unsatisfied)
        }
    }

    fn halt(&self, report: Report, halt: Halt) -> Outcome {
        Outcome {
            mode: self.mode,
            report,
            halt: Some(halt),
        }
    }
}

/// Step error types.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// External command cannot be run.
    #[error(transparent)]
    Exec(#[from] crate::exec::ExecError),

    /// Repository synchronization fails.
    #[error(transparent)]
    Repo(#[from] crate::repo::RepoError),

    /// Manifest cannot be loaded.
    #[error(transparent)]
    Manifest(#[from] crate::manifest::ManifestError),

    /// Filesystem operation fails.
    #[error("filesystem operation failed on {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Conda environment location is needed but was never resolved.
    #[error("location of conda environment {name:?} is unknown")]
    EnvironmentUnresolved { name: String },
}

/// Friendly result alias :3
pub type Result<T, E = StepError> = std::result::Result<T, E>;
