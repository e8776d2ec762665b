pub mod remote_compose;

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::cmd::CommandRunner;
use crate::error::{DeployError, DeployResult};
use crate::service::Service;
use crate::ssh::SshSession;

/// A deployer rebuilds and restarts a service on a remote host.
pub trait Deployer {
    /// Run the full deploy sequence against `ssh`'s host.
    fn deploy(
        &self,
        runner: &dyn CommandRunner,
        ssh: &SshSession,
        service: &Service,
        policy: FailurePolicy,
    ) -> DeployResult<DeployReport>;

    /// Show the service's container state on the remote host.
    fn status(
        &self,
        runner: &dyn CommandRunner,
        ssh: &SshSession,
        service: &Service,
    ) -> DeployResult<()>;

    /// Describe, without running anything, what `deploy` would do.
    fn dry_run(&self, ssh: &SshSession, service: &Service) -> Vec<String>;
}

/// The sequence points of a deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Preflight,
    TrustHost,
    Probe,
    Redirect,
    Build,
    Up,
    Wait,
    Status,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preflight => "preflight",
            Self::TrustHost => "trust host",
            Self::Probe => "probe",
            Self::Redirect => "redirect",
            Self::Build => "build",
            Self::Up => "up",
            Self::Wait => "wait",
            Self::Status => "status",
        };
        f.write_str(name)
    }
}

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop at the first failing step and return its error.
    #[default]
    Halt,
    /// Keep going; the deploy fails only if the last step fails.
    Continue,
}

impl FromStr for FailurePolicy {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "halt" => Ok(Self::Halt),
            "continue" => Ok(Self::Continue),
            other => Err(DeployError::InvalidConfig(format!(
                "unknown failure policy '{other}' (expected 'halt' or 'continue')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: Step,
    pub error: Option<String>,
    /// Failures of tolerated steps never affect the deploy result.
    pub tolerated: bool,
}

/// Per-step record of one deploy run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    pub steps: Vec<StepOutcome>,
}

impl DeployReport {
    #[must_use]
    pub fn steps_run(&self) -> Vec<Step> {
        self.steps.iter().map(|s| s.step).collect()
    }

    /// Steps that failed and were not tolerated.
    #[must_use]
    pub fn failures(&self) -> Vec<&StepOutcome> {
        self.steps
            .iter()
            .filter(|s| s.error.is_some() && !s.tolerated)
            .collect()
    }

    #[must_use]
    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == step)
    }
}

/// Drives steps under a [`FailurePolicy`], recording outcomes.
struct Steps {
    policy: FailurePolicy,
    report: DeployReport,
    last_error: Option<DeployError>,
}

impl Steps {
    const fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            report: DeployReport { steps: Vec::new() },
            last_error: None,
        }
    }

    fn run(&mut self, step: Step, f: impl FnOnce() -> DeployResult<()>) -> DeployResult<()> {
        eprintln!("==> {step}");
        match f() {
            Ok(()) => {
                self.record(step, None, false);
                self.last_error = None;
                Ok(())
            }
            Err(e) => match self.policy {
                FailurePolicy::Halt => Err(e),
                FailurePolicy::Continue => {
                    tracing::warn!(step = %step, error = %e, "step failed, continuing");
                    self.record(step, Some(e.to_string()), false);
                    self.last_error = Some(e);
                    Ok(())
                }
            },
        }
    }

    /// Run a step whose failure aborts the deploy under any policy.
    fn require(&mut self, step: Step, f: impl FnOnce() -> DeployResult<()>) -> DeployResult<()> {
        eprintln!("==> {step}");
        f()?;
        self.record(step, None, false);
        Ok(())
    }

    /// Run a step whose failure is logged and otherwise ignored.
    fn tolerate(&mut self, step: Step, f: impl FnOnce() -> DeployResult<()>) {
        eprintln!("==> {step}");
        let error = f().err().map(|e| e.to_string());
        self.record(step, error, true);
    }

    fn record(&mut self, step: Step, error: Option<String>, tolerated: bool) {
        self.report.steps.push(StepOutcome {
            step,
            error,
            tolerated,
        });
    }

    fn finish(self) -> DeployResult<DeployReport> {
        match self.last_error {
            Some(e) => Err(e),
            None => Ok(self.report),
        }
    }
}
