pub mod gcp;
pub mod plan;

use crate::cmd::CommandRunner;
use crate::error::DeployResult;
use crate::infra::Infrastructure;

pub use plan::{Action, ActionType, Plan, PlanSummary, ResourceKind};

/// Information about a provisioned server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub ip: String,
    pub zone: String,
}

/// A provisioner reconciles declared infrastructure against a cloud
/// control plane.
pub trait Provisioner {
    /// Check that tooling is installed and authenticated and that
    /// every local input and pre-existing resource is present.
    fn check_prerequisites(&self, runner: &dyn CommandRunner, infra: &Infrastructure)
    -> DeployResult<()>;

    /// Compare declared and observed state.
    fn plan(&self, runner: &dyn CommandRunner, infra: &Infrastructure) -> DeployResult<Plan>;

    /// Execute a plan in order and return the resulting server.
    fn apply(
        &self,
        runner: &dyn CommandRunner,
        infra: &Infrastructure,
        plan: &Plan,
    ) -> DeployResult<ServerInfo>;

    /// Allocated IP of the static address, if it exists.
    fn address(&self, runner: &dyn CommandRunner, infra: &Infrastructure)
    -> DeployResult<Option<String>>;

    /// Delete the instance and firewall rules. The static address is
    /// kept unless `release_address` is set.
    fn destroy(
        &self,
        runner: &dyn CommandRunner,
        infra: &Infrastructure,
        release_address: bool,
    ) -> DeployResult<()>;

    /// Offline rendering of the declaration, for dry runs.
    fn render(&self, infra: &Infrastructure) -> String;
}
