use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::cmd::{CommandRunner, Invocation};
use crate::error::{DeployError, DeployResult};
use crate::infra::{Cidr, FirewallRule, Infrastructure, Instance};
use crate::provision::{Action, ActionType, Plan, Provisioner, ResourceKind, ServerInfo};
use crate::terraform;

/// Google Compute Engine provisioner using the `gcloud` CLI.
///
/// Every `gcloud` call is pinned to the configured project and, when
/// a credentials file is set, authenticates with it through
/// `CLOUDSDK_AUTH_CREDENTIAL_FILE_OVERRIDE` instead of the ambient
/// login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gcp {
    pub project: String,
    pub region: String,
    pub zone: String,
    pub credentials_file: Option<PathBuf>,
}

impl Gcp {
    #[must_use]
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            region: "europe-west1".to_string(),
            zone: "europe-west1-b".to_string(),
            credentials_file: None,
        }
    }

    #[must_use]
    pub fn region(mut self, region: &str) -> Self {
        self.region = region.to_string();
        self
    }

    #[must_use]
    pub fn zone(mut self, zone: &str) -> Self {
        self.zone = zone.to_string();
        self
    }

    #[must_use]
    pub fn credentials(mut self, path: &Path) -> Self {
        self.credentials_file = Some(path.to_path_buf());
        self
    }

    /// A `gcloud` invocation bound to this project.
    #[must_use]
    pub fn gcloud<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inv = Invocation::new("gcloud")
            .args(args)
            .arg(format!("--project={}", self.project))
            .arg("--quiet");
        if let Some(credentials) = &self.credentials_file {
            inv = inv.env(
                "CLOUDSDK_AUTH_CREDENTIAL_FILE_OVERRIDE",
                &credentials.to_string_lossy(),
            );
        }
        inv
    }

    /// List resources of one `compute` group filtered by name and
    /// return the exact match, if any.
    fn lookup<T: DeserializeOwned + Named>(
        &self,
        runner: &dyn CommandRunner,
        group: &str,
        name: &str,
        scope: Option<String>,
    ) -> DeployResult<Option<T>> {
        let mut args = vec![
            "compute".to_string(),
            group.to_string(),
            "list".to_string(),
            format!("--filter=name={name}"),
            "--format=json".to_string(),
        ];
        args.extend(scope);
        let output = runner.capture(&self.gcloud(args))?;
        find_named(&output, name)
    }

    fn observed_address(
        &self,
        runner: &dyn CommandRunner,
        infra: &Infrastructure,
    ) -> DeployResult<Option<ObservedAddress>> {
        self.lookup(
            runner,
            "addresses",
            &infra.address.name,
            Some(format!("--regions={}", infra.address.region)),
        )
    }

    fn observed_firewall(
        &self,
        runner: &dyn CommandRunner,
        name: &str,
    ) -> DeployResult<Option<ObservedFirewall>> {
        self.lookup(runner, "firewall-rules", name, None)
    }

    fn observed_instance(
        &self,
        runner: &dyn CommandRunner,
        name: &str,
    ) -> DeployResult<Option<ObservedInstance>> {
        self.lookup(
            runner,
            "instances",
            name,
            Some(format!("--zones={}", self.zone)),
        )
    }

    fn create_address(
        &self,
        runner: &dyn CommandRunner,
        infra: &Infrastructure,
    ) -> DeployResult<()> {
        eprintln!("Reserving static address '{}'...", infra.address.name);
        runner.interactive(&self.gcloud([
            "compute".to_string(),
            "addresses".to_string(),
            "create".to_string(),
            infra.address.name.clone(),
            format!("--region={}", infra.address.region),
        ]))
    }

    fn write_firewall(
        &self,
        runner: &dyn CommandRunner,
        infra: &Infrastructure,
        rule: &FirewallRule,
        verb: &str,
    ) -> DeployResult<()> {
        eprintln!("Firewall rule '{}': {verb}...", rule.name);
        let sources: Vec<String> = rule
            .effective_sources()
            .iter()
            .map(ToString::to_string)
            .collect();
        let mut args = vec![
            "compute".to_string(),
            "firewall-rules".to_string(),
            verb.to_string(),
            rule.name.clone(),
        ];
        if verb == "create" {
            args.push(format!("--network={}", infra.network));
            args.push("--direction=INGRESS".to_string());
        }
        args.push(format!("--allow={}", rule.allow_spec()));
        args.push(format!("--source-ranges={}", sources.join(",")));
        let tags: Vec<&str> = rule.target_tags.iter().map(|t| t.as_str()).collect();
        // An empty list on update clears tags left over from a previous declaration.
        if !tags.is_empty() || verb == "update" {
            args.push(format!("--target-tags={}", tags.join(",")));
        }
        runner.interactive(&self.gcloud(args))
    }

    fn create_instance(
        &self,
        runner: &dyn CommandRunner,
        infra: &Infrastructure,
    ) -> DeployResult<()> {
        let instance = &infra.instance;
        let ip = self
            .address(runner, infra)?
            .ok_or_else(|| DeployError::ServerNotFound(format!("address {}", infra.address.name)))?;
        let ssh_keys = instance.ssh_keys_metadata()?;

        eprintln!(
            "Creating instance '{}' in {} ({})...",
            instance.name, self.zone, instance.machine_type
        );

        let mut args = vec![
            "compute".to_string(),
            "instances".to_string(),
            "create".to_string(),
            instance.name.clone(),
            format!("--zone={}", self.zone),
            format!("--machine-type={}", instance.machine_type),
            format!("--image-project={}", instance.image.project),
            format!("--image-family={}", instance.image.family),
            format!("--network={}", infra.network),
            format!("--address={ip}"),
        ];
        if !instance.tags.is_empty() {
            args.push(format!("--tags={}", instance.tags_spec()));
        }
        args.push(format!("--metadata={}", dict_arg("ssh-keys", &ssh_keys)));
        args.push(format!(
            "--metadata-from-file=startup-script={}",
            instance.startup_script.display()
        ));
        runner.interactive(&self.gcloud(args))
    }

    fn retag_instance(
        &self,
        runner: &dyn CommandRunner,
        instance: &Instance,
    ) -> DeployResult<()> {
        let observed = self
            .observed_instance(runner, &instance.name)?
            .ok_or_else(|| DeployError::ServerNotFound(instance.name.clone()))?;
        let current = observed.tag_set();
        let declared: BTreeSet<String> = instance.tags.iter().map(ToString::to_string).collect();

        let add: Vec<&str> = declared.difference(&current).map(String::as_str).collect();
        let remove: Vec<&str> = current.difference(&declared).map(String::as_str).collect();

        for (verb, tags) in [("add-tags", add), ("remove-tags", remove)] {
            if tags.is_empty() {
                continue;
            }
            eprintln!("Instance '{}': {verb} {}", instance.name, tags.join(","));
            runner.interactive(&self.gcloud([
                "compute".to_string(),
                "instances".to_string(),
                verb.to_string(),
                instance.name.clone(),
                format!("--zone={}", self.zone),
                format!("--tags={}", tags.join(",")),
            ]))?;
        }
        Ok(())
    }

    fn delete(
        &self,
        runner: &dyn CommandRunner,
        group: &str,
        name: &str,
        scope: Option<String>,
    ) -> DeployResult<()> {
        let mut args = vec![
            "compute".to_string(),
            group.to_string(),
            "delete".to_string(),
            name.to_string(),
        ];
        args.extend(scope);
        runner.interactive(&self.gcloud(args))
    }
}

impl Provisioner for Gcp {
    fn check_prerequisites(
        &self,
        runner: &dyn CommandRunner,
        infra: &Infrastructure,
    ) -> DeployResult<()> {
        eprintln!("Checking prerequisites...");

        runner
            .capture(&Invocation::new("gcloud").args(["version", "--format=json"]))
            .map_err(|e| match e {
                DeployError::CommandNotFound(_) => DeployError::PrerequisiteMissing(
                    "gcloud is not installed. \
                     Install the Google Cloud CLI"
                        .into(),
                ),
                other => other,
            })?;

        if let Some(credentials) = &self.credentials_file {
            if !credentials.exists() {
                return Err(DeployError::FileNotFound(format!(
                    "credentials file not found: {}",
                    credentials.display()
                )));
            }
        }

        // With a key file override, gcloud authenticates from the file.
        if self.credentials_file.is_none() {
            let account = runner.capture(&Invocation::new("gcloud").args([
                "auth",
                "list",
                "--filter=status:ACTIVE",
                "--format=value(account)",
            ]))?;
            if account.is_empty() {
                return Err(DeployError::PrerequisiteMissing(
                    "no active gcloud account. Run `gcloud auth login` \
                     or configure a credentials file"
                        .into(),
                ));
            }
        }

        infra.validate()?;
        infra.instance.ssh_keys_metadata()?;
        infra.instance.check_startup_script()?;

        let network: Option<ObservedNetwork> =
            self.lookup(runner, "networks", &infra.network, None)?;
        if network.is_none() {
            return Err(DeployError::PrerequisiteMissing(format!(
                "network '{}' does not exist in project {}",
                infra.network, self.project
            )));
        }

        eprintln!("Prerequisites OK");
        Ok(())
    }

    fn plan(&self, runner: &dyn CommandRunner, infra: &Infrastructure) -> DeployResult<Plan> {
        let mut actions = Vec::new();

        let address = match self.observed_address(runner, infra)? {
            Some(_) => ActionType::NoOp,
            None => ActionType::Create,
        };
        actions.push(Action::new(ResourceKind::Address, &infra.address.name, address));

        for rule in &infra.firewall {
            let action = match self.observed_firewall(runner, &rule.name)? {
                None => Action::new(ResourceKind::Firewall, &rule.name, ActionType::Create),
                Some(observed) => {
                    let drift = firewall_drift(rule, &observed);
                    let action_type = if drift.is_empty() {
                        ActionType::NoOp
                    } else {
                        ActionType::Update
                    };
                    Action::new(ResourceKind::Firewall, &rule.name, action_type).with_drift(drift)
                }
            };
            actions.push(action);
        }

        let instance = &infra.instance;
        let action = match self.observed_instance(runner, &instance.name)? {
            None => Action::new(ResourceKind::Instance, &instance.name, ActionType::Create),
            Some(observed) => {
                if !observed.machine_type.ends_with(&format!("/{}", instance.machine_type)) {
                    tracing::warn!(
                        instance = %instance.name,
                        observed = %observed.machine_type,
                        declared = %instance.machine_type,
                        "machine type differs; recreate the instance to change it"
                    );
                }
                let drift = tag_drift(instance, &observed);
                let action_type = if drift.is_empty() {
                    ActionType::NoOp
                } else {
                    ActionType::Update
                };
                Action::new(ResourceKind::Instance, &instance.name, action_type).with_drift(drift)
            }
        };
        actions.push(action);

        Ok(Plan::new(actions))
    }

    fn apply(
        &self,
        runner: &dyn CommandRunner,
        infra: &Infrastructure,
        plan: &Plan,
    ) -> DeployResult<ServerInfo> {
        for action in &plan.actions {
            match (action.kind, action.action_type) {
                (_, ActionType::NoOp) => {}
                (ResourceKind::Address, _) => self.create_address(runner, infra)?,
                (ResourceKind::Firewall, action_type) => {
                    let rule = infra.rule(&action.name).ok_or_else(|| {
                        DeployError::InvalidConfig(format!(
                            "plan references unknown firewall rule '{}'",
                            action.name
                        ))
                    })?;
                    let verb = if action_type == ActionType::Create {
                        "create"
                    } else {
                        "update"
                    };
                    self.write_firewall(runner, infra, rule, verb)?;
                }
                (ResourceKind::Instance, ActionType::Create) => {
                    self.create_instance(runner, infra)?;
                }
                (ResourceKind::Instance, ActionType::Update) => {
                    self.retag_instance(runner, &infra.instance)?;
                }
            }
        }

        let ip = self
            .address(runner, infra)?
            .ok_or_else(|| DeployError::ServerNotFound(format!("address {}", infra.address.name)))?;

        Ok(ServerInfo {
            name: infra.instance.name.clone(),
            ip,
            zone: self.zone.clone(),
        })
    }

    fn address(
        &self,
        runner: &dyn CommandRunner,
        infra: &Infrastructure,
    ) -> DeployResult<Option<String>> {
        Ok(self.observed_address(runner, infra)?.map(|a| a.address))
    }

    fn destroy(
        &self,
        runner: &dyn CommandRunner,
        infra: &Infrastructure,
        release_address: bool,
    ) -> DeployResult<()> {
        let instance = &infra.instance.name;
        if self.observed_instance(runner, instance)?.is_some() {
            eprintln!("Deleting instance '{instance}'...");
            self.delete(runner, "instances", instance, Some(format!("--zone={}", self.zone)))?;
        } else {
            eprintln!("Instance '{instance}' not found, skipping");
        }

        for rule in &infra.firewall {
            if self.observed_firewall(runner, &rule.name)?.is_some() {
                eprintln!("Deleting firewall rule '{}'...", rule.name);
                self.delete(runner, "firewall-rules", &rule.name, None)?;
            }
        }

        if release_address {
            if self.observed_address(runner, infra)?.is_some() {
                eprintln!("Releasing static address '{}'...", infra.address.name);
                self.delete(
                    runner,
                    "addresses",
                    &infra.address.name,
                    Some(format!("--region={}", infra.address.region)),
                )?;
            }
        } else {
            eprintln!(
                "Keeping static address '{}' (use --release-address to delete it)",
                infra.address.name
            );
        }

        Ok(())
    }

    fn render(&self, infra: &Infrastructure) -> String {
        terraform::render(self, infra)
    }
}

/// Resource listings are matched on `name`.
trait Named {
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Deserialize)]
struct ObservedNetwork {
    name: String,
}

/// An address as reported by `gcloud compute addresses list`.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservedAddress {
    pub name: String,
    pub address: String,
}

/// A firewall rule as reported by `gcloud compute firewall-rules list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedFirewall {
    pub name: String,
    #[serde(default)]
    pub allowed: Vec<ObservedAllowed>,
    #[serde(default)]
    pub source_ranges: Vec<String>,
    #[serde(default)]
    pub target_tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservedAllowed {
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    #[serde(default)]
    pub ports: Vec<String>,
}

/// An instance as reported by `gcloud compute instances list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedInstance {
    pub name: String,
    #[serde(default)]
    pub machine_type: String,
    #[serde(default)]
    pub tags: ObservedTags,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservedTags {
    #[serde(default)]
    pub items: Vec<String>,
}

impl ObservedInstance {
    fn tag_set(&self) -> BTreeSet<String> {
        self.tags.items.iter().cloned().collect()
    }
}

impl Named for ObservedNetwork {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for ObservedAddress {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for ObservedFirewall {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for ObservedInstance {
    fn name(&self) -> &str {
        &self.name
    }
}

fn find_named<T: DeserializeOwned + Named>(output: &str, name: &str) -> DeployResult<Option<T>> {
    let output = output.trim();
    if output.is_empty() {
        return Ok(None);
    }
    let items: Vec<T> = serde_json::from_str(output)?;
    Ok(items.into_iter().find(|item| item.name() == name))
}

/// Differences between a declared rule and the observed one.
#[must_use]
pub fn firewall_drift(rule: &FirewallRule, observed: &ObservedFirewall) -> Vec<String> {
    let mut drift = Vec::new();

    let declared_allow: BTreeSet<String> = rule
        .ports
        .iter()
        .map(|p| format!("{}:{p}", rule.protocol))
        .collect();
    let observed_allow: BTreeSet<String> = observed
        .allowed
        .iter()
        .flat_map(|a| {
            let proto = a.ip_protocol.to_ascii_lowercase();
            if a.ports.is_empty() {
                vec![proto]
            } else {
                a.ports.iter().map(|p| format!("{proto}:{p}")).collect()
            }
        })
        .collect();
    if declared_allow != observed_allow {
        drift.push(format!(
            "allow: {} -> {}",
            join(&observed_allow),
            join(&declared_allow)
        ));
    }

    let declared_sources: BTreeSet<String> = rule
        .effective_sources()
        .iter()
        .map(ToString::to_string)
        .collect();
    let observed_sources: BTreeSet<String> = observed
        .source_ranges
        .iter()
        .map(|s| s.parse::<Cidr>().map_or_else(|_| s.clone(), |c| c.to_string()))
        .collect();
    if declared_sources != observed_sources {
        drift.push(format!(
            "source ranges: {} -> {}",
            join(&observed_sources),
            join(&declared_sources)
        ));
    }

    let declared_tags: BTreeSet<String> =
        rule.target_tags.iter().map(ToString::to_string).collect();
    let observed_tags: BTreeSet<String> = observed.target_tags.iter().cloned().collect();
    if declared_tags != observed_tags {
        drift.push(format!(
            "target tags: {} -> {}",
            join(&observed_tags),
            join(&declared_tags)
        ));
    }

    drift
}

fn tag_drift(instance: &Instance, observed: &ObservedInstance) -> Vec<String> {
    let declared: BTreeSet<String> = instance.tags.iter().map(ToString::to_string).collect();
    let current = observed.tag_set();
    if declared == current {
        Vec::new()
    } else {
        vec![format!("tags: {} -> {}", join(&current), join(&declared))]
    }
}

fn join(set: &BTreeSet<String>) -> String {
    if set.is_empty() {
        "(none)".to_string()
    } else {
        set.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

/// A `key=value` entry for a gcloud dictionary flag. Values that
/// contain commas switch the delimiter with gcloud's `^DELIM^` escape.
#[must_use]
pub fn dict_arg(key: &str, value: &str) -> String {
    if !value.contains(',') {
        return format!("{key}={value}");
    }
    let delim = ['|', '~', '#', ';']
        .into_iter()
        .find(|d| !value.contains(*d) && !key.contains(*d))
        .unwrap_or('|');
    format!("^{delim}^{key}={value}")
}
