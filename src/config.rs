//! `ballista.yaml`: the project file read by the `ballista` binary.
//!
//! ```yaml
//! provision:
//!   project: my-project
//!   credentials: ~/.config/gcloud/ballista.json
//!   region: europe-west1
//!   zone: europe-west1-b
//!   network: default
//!   address: backend-ip
//!   instance:
//!     name: my-vm
//!     ssh_user: deploy
//!     ssh_public_key: ~/.ssh/id_ed25519.pub
//!     startup_script: scripts/startup.sh
//!
//! deploy:
//!   service: backend
//!   compose_file: docker-compose.yml
//!   ssh_key: ~/.ssh/id_ed25519
//!   on_error: halt
//! ```
//!
//! Without a `firewall` section the instance gets the standard web
//! server rules (SSH, HTTP, HTTPS). An explicit `firewall` section
//! replaces them, and the instance must then list every tag the
//! rules target under `instance.tags`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::deploy::FailurePolicy;
use crate::deploy::remote_compose::RemoteCompose;
use crate::error::{DeployError, DeployResult};
use crate::infra::{
    BootImage, Cidr, FirewallRule, Infrastructure, Instance, Protocol, StaticAddress, Tag,
};
use crate::pipeline::Pipeline;
use crate::provision::gcp::Gcp;
use crate::service::Service;

pub const DEFAULT_CONFIG: &str = "ballista.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub provision: Option<ProvisionConfig>,
    #[serde(default)]
    pub deploy: DeployConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisionConfig {
    pub project: String,
    pub credentials: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Defaults to `<region>-b`.
    pub zone: Option<String>,
    #[serde(default = "default_network")]
    pub network: String,
    pub address: String,
    pub instance: InstanceConfig,
    /// Rules keyed by name, created in file order.
    pub firewall: Option<IndexMap<String, FirewallConfig>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    pub name: String,
    #[serde(default = "default_machine_type")]
    pub machine_type: String,
    /// `project/family`.
    pub image: Option<String>,
    pub ssh_user: String,
    pub ssh_public_key: String,
    pub startup_script: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirewallConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub ports: Vec<u16>,
    /// Empty means `0.0.0.0/0`.
    #[serde(default)]
    pub source_ranges: Vec<String>,
    #[serde(default)]
    pub target_tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    pub host: Option<String>,
    /// Defaults to the instance's SSH user, then `root`.
    pub user: Option<String>,
    /// Passed to `ssh -i`. The Docker tunnel needs a matching
    /// `IdentityFile` in `~/.ssh/config`.
    pub ssh_key: Option<String>,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_compose_file")]
    pub compose_file: String,
    pub project_name: Option<String>,
    /// Trust store for deploy and destroy, in place of
    /// `~/.ssh/known_hosts`. The Docker tunnel needs a matching
    /// `UserKnownHostsFile` in `~/.ssh/config`.
    pub known_hosts: Option<String>,
    /// `null` disables the probe.
    #[serde(default = "default_probe")]
    pub probe: Option<String>,
    #[serde(default)]
    pub on_error: FailurePolicy,
    pub wait: Option<WaitConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitConfig {
    #[serde(default = "default_wait_attempts")]
    pub attempts: u32,
    #[serde(default = "default_wait_interval")]
    pub interval_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            ssh_key: None,
            service: default_service(),
            compose_file: default_compose_file(),
            project_name: None,
            known_hosts: None,
            probe: default_probe(),
            on_error: FailurePolicy::Halt,
            wait: None,
        }
    }
}

fn default_region() -> String {
    "europe-west1".to_string()
}

fn default_network() -> String {
    "default".to_string()
}

fn default_machine_type() -> String {
    "e2-small".to_string()
}

fn default_protocol() -> String {
    "tcp".to_string()
}

fn default_service() -> String {
    "backend".to_string()
}

fn default_compose_file() -> String {
    "docker-compose.yml".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_probe() -> Option<String> {
    Some("sudo -n true".to_string())
}

const fn default_wait_attempts() -> u32 {
    30
}

const fn default_wait_interval() -> u64 {
    2
}

impl ProjectConfig {
    /// Read and parse a project file.
    pub fn load(path: &Path) -> DeployResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|_| {
            DeployError::FileNotFound(format!("config file not found: {}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> DeployResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Provider and declared resources, when a `provision` section
    /// is present.
    pub fn infrastructure(&self) -> DeployResult<Option<(Gcp, Infrastructure)>> {
        let Some(provision) = &self.provision else {
            return Ok(None);
        };

        let zone = provision
            .zone
            .clone()
            .unwrap_or_else(|| format!("{}-b", provision.region));
        let mut gcp = Gcp::new(&provision.project)
            .region(&provision.region)
            .zone(&zone);
        if let Some(credentials) = &provision.credentials {
            gcp = gcp.credentials(&expand_home(credentials)?);
        }

        let spec = &provision.instance;
        let mut instance = Instance::new(
            &spec.name,
            &spec.ssh_user,
            &expand_home(&spec.ssh_public_key)?,
            &expand_home(&spec.startup_script)?,
        )
        .machine_type(&spec.machine_type);
        if let Some(image) = &spec.image {
            instance = instance.image(image.parse::<BootImage>()?);
        }
        for tag in &spec.tags {
            instance = instance.tag(Tag::new(tag)?);
        }

        let address = StaticAddress::new(&provision.address, &provision.region);
        let infra = match &provision.firewall {
            None => Infrastructure::web_server(&provision.network, address, instance),
            Some(rules) => {
                let mut infra = Infrastructure::new(&provision.network, address, instance);
                for (name, rule) in rules {
                    infra.firewall.push(rule.to_rule(name)?);
                }
                infra
            }
        };
        infra.validate()?;

        Ok(Some((gcp, infra)))
    }

    #[must_use]
    pub fn service(&self) -> Service {
        let deploy = &self.deploy;
        let service = Service::new(&deploy.service).compose_file(&deploy.compose_file);
        match &deploy.project_name {
            Some(name) => service.project_name(name),
            None => service,
        }
    }

    #[must_use]
    pub fn deployer(&self) -> RemoteCompose {
        let deploy = &self.deploy;
        let mut deployer = match &deploy.probe {
            Some(probe) => RemoteCompose::new().probe(probe),
            None => RemoteCompose::new().no_probe(),
        };
        if let Some(wait) = deploy.wait {
            deployer =
                deployer.wait_running(wait.attempts, Duration::from_secs(wait.interval_secs));
        }
        deployer
    }

    /// User for SSH and the Docker tunnel.
    #[must_use]
    pub fn ssh_user(&self) -> &str {
        self.deploy
            .user
            .as_deref()
            .or_else(|| self.provision.as_ref().map(|p| p.instance.ssh_user.as_str()))
            .unwrap_or("root")
    }

    /// Wire everything into a [`Pipeline`].
    pub fn pipeline(&self) -> DeployResult<Pipeline> {
        let mut pipeline = Pipeline::new(self.service())
            .deploy(self.deployer())
            .ssh_user(self.ssh_user())
            .on_error(self.deploy.on_error);

        if let Some((gcp, infra)) = self.infrastructure()? {
            pipeline = pipeline.infrastructure(infra).provision(gcp);
        }
        if let Some(host) = &self.deploy.host {
            pipeline = pipeline.host(host);
        }
        if let Some(key) = &self.deploy.ssh_key {
            pipeline = pipeline.ssh_key(&expand_home(key)?);
        }
        if let Some(path) = &self.deploy.known_hosts {
            pipeline = pipeline.known_hosts(&expand_home(path)?);
        }
        Ok(pipeline)
    }
}

impl FirewallConfig {
    fn to_rule(&self, name: &str) -> DeployResult<FirewallRule> {
        let mut rule = FirewallRule::new(name).protocol(self.protocol.parse::<Protocol>()?);
        for port in &self.ports {
            rule = rule.port(*port);
        }
        for range in &self.source_ranges {
            rule = rule.source_range(range.parse::<Cidr>()?);
        }
        for tag in &self.target_tags {
            rule = rule.target(Tag::new(tag)?);
        }
        Ok(rule)
    }
}

/// Expand a leading `~/` to `$HOME`.
pub fn expand_home(path: &str) -> DeployResult<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home =
                std::env::var("HOME").map_err(|_| DeployError::EnvMissing("HOME".into()))?;
            Ok(PathBuf::from(home).join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
