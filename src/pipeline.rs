use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::cmd::{self, CommandRunner, SystemRunner};
use crate::compose;
use crate::config::DEFAULT_CONFIG;
use crate::deploy::{Deployer, FailurePolicy};
use crate::error::{DeployError, DeployResult};
use crate::infra::Infrastructure;
use crate::known_hosts;
use crate::logging;
use crate::provision::{Plan, Provisioner};
use crate::service::Service;
use crate::ssh::SshSession;

/// Deployment pipeline wiring a provisioner and a deployer to one
/// service and a command runner.
pub struct Pipeline {
    service: Service,
    infra: Option<Infrastructure>,
    provisioner: Option<Box<dyn Provisioner>>,
    deployer: Option<Box<dyn Deployer>>,
    runner: Box<dyn CommandRunner>,
    policy: FailurePolicy,
    host: Option<String>,
    ssh_user: String,
    ssh_key: Option<PathBuf>,
    known_hosts: Option<PathBuf>,
}

impl Pipeline {
    #[must_use]
    pub fn new(service: Service) -> Self {
        Self {
            service,
            infra: None,
            provisioner: None,
            deployer: None,
            runner: Box::new(SystemRunner::new()),
            policy: FailurePolicy::Halt,
            host: None,
            ssh_user: "root".to_string(),
            ssh_key: None,
            known_hosts: None,
        }
    }

    #[must_use]
    pub fn infrastructure(mut self, infra: Infrastructure) -> Self {
        self.infra = Some(infra);
        self
    }

    #[must_use]
    pub fn provision(mut self, provisioner: impl Provisioner + 'static) -> Self {
        self.provisioner = Some(Box::new(provisioner));
        self
    }

    #[must_use]
    pub fn deploy(mut self, deployer: impl Deployer + 'static) -> Self {
        self.deployer = Some(Box::new(deployer));
        self
    }

    /// Replace the command runner, e.g. with a recording fake.
    #[must_use]
    pub fn runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    #[must_use]
    pub const fn on_error(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Default deploy target when none is given on the command line.
    #[must_use]
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    #[must_use]
    pub fn ssh_user(mut self, user: &str) -> Self {
        self.ssh_user = user.to_string();
        self
    }

    #[must_use]
    pub fn ssh_key(mut self, path: &Path) -> Self {
        self.ssh_key = Some(path.to_path_buf());
        self
    }

    /// Trust store used by deploy, status and destroy, in place of
    /// `~/.ssh/known_hosts`.
    #[must_use]
    pub fn known_hosts(mut self, path: &Path) -> Self {
        self.known_hosts = Some(path.to_path_buf());
        self
    }

    /// Parse CLI arguments and dispatch the appropriate
    /// command. The pipeline is already configured in code, so
    /// `--config` is rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatched command fails.
    pub fn run(&self) -> DeployResult<()> {
        let cli = PipelineCli::parse();
        logging::init();
        self.execute(&cli.command)
    }

    /// Like [`Pipeline::run`], with explicit arguments (the first is
    /// the program name).
    pub fn run_from<I, T>(&self, args: I) -> DeployResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli =
            PipelineCli::try_parse_from(args).map_err(|e| DeployError::Other(e.to_string()))?;
        self.execute(&cli.command)
    }

    pub fn execute(&self, command: &Command) -> DeployResult<()> {
        match command {
            Command::Validate => self.cmd_validate(),
            Command::Plan => self.cmd_plan(),
            Command::Provision { dry_run } => self.cmd_provision(*dry_run),
            Command::Address => self.cmd_address(),
            Command::Deploy {
                host,
                dry_run,
                keep_going,
            } => self.cmd_deploy(host.as_deref(), *dry_run, *keep_going),
            Command::Status { host } => self.cmd_status(host.as_deref()),
            Command::Destroy {
                release_address,
                yes,
            } => self.cmd_destroy(*release_address, *yes),
        }
    }

    fn provisioner(&self) -> DeployResult<(&dyn Provisioner, &Infrastructure)> {
        let provisioner = self
            .provisioner
            .as_deref()
            .ok_or_else(|| DeployError::Other("no provisioner configured".into()))?;
        let infra = self
            .infra
            .as_ref()
            .ok_or_else(|| DeployError::InvalidConfig("no infrastructure declared".into()))?;
        Ok((provisioner, infra))
    }

    fn deployer(&self) -> DeployResult<&dyn Deployer> {
        self.deployer
            .as_deref()
            .ok_or_else(|| DeployError::Other("no deployer configured".into()))
    }

    fn known_hosts_path(&self) -> DeployResult<PathBuf> {
        match &self.known_hosts {
            Some(path) => Ok(path.clone()),
            None => known_hosts::default_path(),
        }
    }

    /// Deploy target: the argument, then the configured host, then
    /// the provisioned static address.
    fn resolve_host(&self, host: Option<&str>) -> DeployResult<String> {
        if let Some(host) = host.or(self.host.as_deref()) {
            return Ok(host.to_string());
        }

        let (provisioner, infra) = self.provisioner().map_err(|_| {
            DeployError::InvalidConfig(
                "no host given and no provisioner configured to look one up".into(),
            )
        })?;
        let ip = provisioner
            .address(self.runner.as_ref(), infra)?
            .ok_or_else(|| {
                DeployError::ServerNotFound(format!(
                    "static address '{}' is not allocated; run provision first",
                    infra.address.name
                ))
            })?;
        eprintln!("Using static address '{}' ({ip})", infra.address.name);
        Ok(ip)
    }

    fn session(&self, host: Option<&str>) -> DeployResult<SshSession> {
        let host = self.resolve_host(host)?;
        let mut ssh = SshSession::new(&host, &self.ssh_user);
        if let Some(key) = &self.ssh_key {
            ssh = ssh.with_key(&key.to_string_lossy());
        }
        if let Some(path) = &self.known_hosts {
            ssh = ssh.known_hosts(path);
        }
        Ok(ssh)
    }

    fn cmd_validate(&self) -> DeployResult<()> {
        if let Some(infra) = &self.infra {
            infra.validate()?;
            for tag in infra.untargeted_tags() {
                tracing::warn!(tag = %tag, "instance tag is not targeted by any firewall rule");
            }
            eprintln!(
                "Instance '{}' tagged [{}], {} firewall rule(s)",
                infra.instance.name,
                infra.instance.tags_spec(),
                infra.firewall.len()
            );
        }

        let file = compose::load(&self.service.compose_file)?;
        let context = compose::build_context(&file, &self.service.name)?;
        eprintln!("Service '{}' builds from {context}", self.service.name);

        for tool in ["docker", "ssh", "ssh-keyscan"] {
            if !cmd::command_exists(tool) {
                tracing::warn!(tool, "not found on PATH");
            }
        }

        eprintln!("Configuration OK");
        Ok(())
    }

    fn cmd_plan(&self) -> DeployResult<()> {
        let (provisioner, infra) = self.provisioner()?;
        let runner = self.runner.as_ref();

        provisioner.check_prerequisites(runner, infra)?;
        let plan = provisioner.plan(runner, infra)?;
        print_plan(&plan);
        Ok(())
    }

    fn cmd_provision(&self, dry_run: bool) -> DeployResult<()> {
        let (provisioner, infra) = self.provisioner()?;
        let runner = self.runner.as_ref();

        if dry_run {
            infra.validate()?;
            eprintln!("=== Dry run: no changes will be made ===");
            eprintln!();
            eprintln!("--- main.tf.json ---");
            println!("{}", provisioner.render(infra));
            return Ok(());
        }

        provisioner.check_prerequisites(runner, infra)?;
        let plan = provisioner.plan(runner, infra)?;
        print_plan(&plan);
        if !plan.has_changes() {
            eprintln!("Infrastructure is up to date");
        }

        let server = provisioner.apply(runner, infra, &plan)?;

        eprintln!();
        eprintln!("=== Server ready ===");
        eprintln!("  Instance: {} ({})", server.name, server.zone);
        eprintln!("  IP:       {}", server.ip);
        eprintln!();
        eprintln!("Deploy with:");
        eprintln!("  ballista deploy {}", server.ip);
        println!("{}", server.ip);

        Ok(())
    }

    fn cmd_address(&self) -> DeployResult<()> {
        let (provisioner, infra) = self.provisioner()?;
        let ip = provisioner
            .address(self.runner.as_ref(), infra)?
            .ok_or_else(|| {
                DeployError::ServerNotFound(format!(
                    "static address '{}' is not allocated",
                    infra.address.name
                ))
            })?;
        println!("{ip}");
        Ok(())
    }

    fn cmd_deploy(&self, host: Option<&str>, dry_run: bool, keep_going: bool) -> DeployResult<()> {
        let deployer = self.deployer()?;
        let ssh = self.session(host)?;

        if dry_run {
            return self.cmd_deploy_dry_run(deployer, &ssh);
        }

        let policy = if keep_going {
            FailurePolicy::Continue
        } else {
            self.policy
        };
        let report = deployer.deploy(self.runner.as_ref(), &ssh, &self.service, policy)?;
        for failure in report.failures() {
            eprintln!(
                "  step '{}' failed: {}",
                failure.step,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }

        Ok(())
    }

    fn cmd_deploy_dry_run(&self, deployer: &dyn Deployer, ssh: &SshSession) -> DeployResult<()> {
        let file = compose::load(&self.service.compose_file)?;
        let rendered = compose::render_service(&file, &self.service.name)?;

        eprintln!("=== Dry run: no changes will be made ===");
        eprintln!();

        eprintln!("--- service '{}' ---", self.service.name);
        println!("{rendered}");

        eprintln!("--- Actions that would be performed ---");
        for (i, action) in deployer.dry_run(ssh, &self.service).iter().enumerate() {
            eprintln!("{}. {action}", i + 1);
        }

        Ok(())
    }

    fn cmd_status(&self, host: Option<&str>) -> DeployResult<()> {
        let ssh = self.session(host)?;
        self.deployer()?
            .status(self.runner.as_ref(), &ssh, &self.service)
    }

    fn cmd_destroy(&self, release_address: bool, yes: bool) -> DeployResult<()> {
        let (provisioner, infra) = self.provisioner()?;
        let runner = self.runner.as_ref();

        // Looked up first: the address may be released below.
        let ip = provisioner.address(runner, infra)?;

        eprintln!(
            "WARNING: This will permanently delete instance '{}'",
            infra.instance.name
        );
        let rules: Vec<&str> = infra.firewall.iter().map(|r| r.name.as_str()).collect();
        eprintln!("and firewall rules: {}", rules.join(", "));
        if release_address {
            eprintln!("and release static address '{}'", infra.address.name);
        }
        eprintln!();

        if !yes && !confirm()? {
            eprintln!("Aborted.");
            return Ok(());
        }

        provisioner.destroy(runner, infra, release_address)?;

        if let Some(ip) = ip {
            known_hosts::forget(runner, &ip, &self.known_hosts_path()?)?;
        }

        eprintln!();
        eprintln!("Cleanup complete!");

        Ok(())
    }
}

fn print_plan(plan: &Plan) {
    for action in &plan.actions {
        println!("{action}");
    }
    println!();
    println!("Plan: {}", plan.summary());
}

fn confirm() -> DeployResult<bool> {
    eprint!("Are you sure? Type 'yes' to confirm: ");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim() == "yes")
}

#[derive(Debug, Parser)]
#[command(name = "ballista", version)]
#[command(about = "Provision a GCE VM and deploy a compose service to it")]
pub struct Cli {
    /// Project file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

/// Command line of a pipeline built in code.
#[derive(Debug, Parser)]
#[command(name = "ballista", version)]
#[command(about = "Provision a GCE VM and deploy a compose service to it")]
struct PipelineCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check the configuration and the local compose file
    Validate,

    /// Compare declared and actual infrastructure
    Plan,

    /// Create or update the VM, its address and firewall rules
    Provision {
        /// Print the Terraform JSON rendering instead of applying
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the static IP of the provisioned server
    Address,

    /// Rebuild and restart the service on a host
    Deploy {
        /// Hostname or IP address; defaults to the configured host,
        /// then the static address
        host: Option<String>,

        /// List the commands without executing them
        #[arg(long)]
        dry_run: bool,

        /// Run every step even if one fails
        #[arg(long)]
        keep_going: bool,
    },

    /// Show container status on the host
    Status {
        /// Hostname or IP address
        host: Option<String>,
    },

    /// Delete the VM and its firewall rules
    Destroy {
        /// Also release the static address
        #[arg(long)]
        release_address: bool,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::try_parse_from(["ballista", "deploy"]).unwrap();

        assert_eq!(cli.config, PathBuf::from("ballista.yaml"));
        assert!(matches!(
            cli.command,
            Command::Deploy {
                host: None,
                dry_run: false,
                keep_going: false
            }
        ));
    }

    #[test]
    fn config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["ballista", "status", "1.2.3.4", "--config", "prod.yaml"])
            .unwrap();

        assert_eq!(cli.config, PathBuf::from("prod.yaml"));
        assert!(matches!(cli.command, Command::Status { host: Some(ref h) } if h == "1.2.3.4"));
    }

    #[test]
    fn missing_provisioner_is_reported() {
        let pipeline = Pipeline::new(Service::default());

        let err = pipeline.run_from(["ballista", "address"]).unwrap_err();

        assert!(err.to_string().contains("no provisioner configured"));
    }

    #[test]
    fn deploy_without_any_host_source_fails() {
        let pipeline = Pipeline::new(Service::default())
            .deploy(crate::deploy::remote_compose::RemoteCompose::new());

        let err = pipeline.run_from(["ballista", "deploy"]).unwrap_err();

        assert!(matches!(err, DeployError::InvalidConfig(_)));
    }
}
