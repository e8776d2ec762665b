//! Declared infrastructure: one network reference, one static
//! address, a set of firewall rules and one compute instance.
//!
//! Firewall rules reach the instance through network tags. Adding a
//! rule with [`Infrastructure::firewall`] puts its target tags on the
//! instance, so the coupling cannot drift when both are declared in
//! code. Configurations assembled by hand (for example from a YAML
//! file) are checked by [`Infrastructure::validate`].

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{DeployError, DeployResult};

/// Largest startup script accepted as a single metadata value.
pub const MAX_STARTUP_SCRIPT_BYTES: u64 = 256 * 1024;

/// A network tag. Lowercase letters, digits and hyphens, 1-63
/// characters, starting with a letter and not ending with a hyphen.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(String);

impl Tag {
    pub fn new(tag: &str) -> DeployResult<Self> {
        tag.parse()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn preset(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl FromStr for Tag {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid_chars = s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        let starts_ok = s.chars().next().is_some_and(|c| c.is_ascii_lowercase());
        if !(1..=63).contains(&s.len()) || !valid_chars || !starts_ok || s.ends_with('-') {
            return Err(DeployError::InvalidConfig(format!(
                "invalid network tag '{s}'"
            )));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An IP range in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cidr {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl Cidr {
    /// `0.0.0.0/0`.
    #[must_use]
    pub const fn any_v4() -> Self {
        Self {
            addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            prefix: 0,
        }
    }
}

impl FromStr for Cidr {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DeployError::InvalidConfig(format!("invalid CIDR range '{s}'"));
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl FromStr for Protocol {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(DeployError::InvalidConfig(format!(
                "unsupported protocol '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ingress allow rule matching instances by network tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub name: String,
    pub protocol: Protocol,
    pub ports: BTreeSet<u16>,
    pub source_ranges: BTreeSet<Cidr>,
    pub target_tags: BTreeSet<Tag>,
}

impl FirewallRule {
    /// An empty TCP rule. Add ports, sources and targets with the
    /// builder methods.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            protocol: Protocol::Tcp,
            ports: BTreeSet::new(),
            source_ranges: BTreeSet::new(),
            target_tags: BTreeSet::new(),
        }
    }

    /// Allow one TCP port from anywhere to instances tagged `target`.
    #[must_use]
    pub fn allow_tcp(name: &str, port: u16, target: Tag) -> Self {
        Self::new(name)
            .port(port)
            .source_range(Cidr::any_v4())
            .target(target)
    }

    #[must_use]
    pub fn ssh() -> Self {
        Self::allow_tcp("allow-ssh", 22, Tag::preset("ssh-allowed"))
    }

    #[must_use]
    pub fn http() -> Self {
        Self::allow_tcp("allow-http", 80, Tag::preset("http-server"))
    }

    #[must_use]
    pub fn https() -> Self {
        Self::allow_tcp("allow-https", 443, Tag::preset("https-server"))
    }

    #[must_use]
    pub const fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.ports.insert(port);
        self
    }

    #[must_use]
    pub fn source_range(mut self, range: Cidr) -> Self {
        self.source_ranges.insert(range);
        self
    }

    #[must_use]
    pub fn target(mut self, tag: Tag) -> Self {
        self.target_tags.insert(tag);
        self
    }

    /// `--allow` value, e.g. `tcp:22,tcp:8080`.
    #[must_use]
    pub fn allow_spec(&self) -> String {
        self.ports
            .iter()
            .map(|p| format!("{}:{p}", self.protocol))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Source ranges, defaulting to `0.0.0.0/0` when none were set.
    #[must_use]
    pub fn effective_sources(&self) -> BTreeSet<Cidr> {
        if self.source_ranges.is_empty() {
            BTreeSet::from([Cidr::any_v4()])
        } else {
            self.source_ranges.clone()
        }
    }

    /// Whether this rule applies to `instance`. A rule without
    /// target tags applies to every instance on the network.
    #[must_use]
    pub fn applies_to(&self, instance: &Instance) -> bool {
        self.target_tags.is_empty() || !self.target_tags.is_disjoint(&instance.tags)
    }
}

/// A public boot image family, written `project/family`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImage {
    pub project: String,
    pub family: String,
}

impl FromStr for BootImage {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((project, family)) if !project.is_empty() && !family.is_empty() => Ok(Self {
                project: project.to_string(),
                family: family.to_string(),
            }),
            _ => Err(DeployError::InvalidConfig(format!(
                "boot image must be 'project/family', got '{s}'"
            ))),
        }
    }
}

impl fmt::Display for BootImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.family)
    }
}

/// The compute instance the service is deployed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub machine_type: String,
    pub image: BootImage,
    pub tags: BTreeSet<Tag>,
    pub ssh_user: String,
    pub ssh_public_key: PathBuf,
    pub startup_script: PathBuf,
}

impl Instance {
    #[must_use]
    pub fn new(name: &str, ssh_user: &str, ssh_public_key: &Path, startup_script: &Path) -> Self {
        Self {
            name: name.to_string(),
            machine_type: "e2-small".to_string(),
            image: BootImage {
                project: "debian-cloud".to_string(),
                family: "debian-12".to_string(),
            },
            tags: BTreeSet::new(),
            ssh_user: ssh_user.to_string(),
            ssh_public_key: ssh_public_key.to_path_buf(),
            startup_script: startup_script.to_path_buf(),
        }
    }

    #[must_use]
    pub fn machine_type(mut self, machine_type: &str) -> Self {
        self.machine_type = machine_type.to_string();
        self
    }

    #[must_use]
    pub fn image(mut self, image: BootImage) -> Self {
        self.image = image;
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: Tag) -> Self {
        self.tags.insert(tag);
        self
    }

    /// Comma-separated tag list for `--tags`.
    #[must_use]
    pub fn tags_spec(&self) -> String {
        self.tags
            .iter()
            .map(Tag::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The `ssh-keys` metadata value: `user:<public key>`.
    pub fn ssh_keys_metadata(&self) -> DeployResult<String> {
        let key = std::fs::read_to_string(&self.ssh_public_key).map_err(|_| {
            DeployError::FileNotFound(format!(
                "SSH public key not found: {}",
                self.ssh_public_key.display()
            ))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(DeployError::InvalidConfig(format!(
                "SSH public key is empty: {}",
                self.ssh_public_key.display()
            )));
        }
        Ok(format!("{}:{key}", self.ssh_user))
    }

    /// Check that the startup script exists and fits in metadata.
    pub fn check_startup_script(&self) -> DeployResult<u64> {
        let meta = std::fs::metadata(&self.startup_script).map_err(|_| {
            DeployError::FileNotFound(format!(
                "startup script not found: {}",
                self.startup_script.display()
            ))
        })?;
        if meta.len() > MAX_STARTUP_SCRIPT_BYTES {
            return Err(DeployError::InvalidConfig(format!(
                "startup script {} is {} bytes, limit is {MAX_STARTUP_SCRIPT_BYTES}",
                self.startup_script.display(),
                meta.len()
            )));
        }
        Ok(meta.len())
    }
}

/// A reserved external address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAddress {
    pub name: String,
    pub region: String,
}

impl StaticAddress {
    #[must_use]
    pub fn new(name: &str, region: &str) -> Self {
        Self {
            name: name.to_string(),
            region: region.to_string(),
        }
    }
}

/// The full declared resource set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Infrastructure {
    /// Name of a network that must already exist.
    pub network: String,
    pub address: StaticAddress,
    pub firewall: Vec<FirewallRule>,
    pub instance: Instance,
}

impl Infrastructure {
    #[must_use]
    pub fn new(network: &str, address: StaticAddress, instance: Instance) -> Self {
        Self {
            network: network.to_string(),
            address,
            firewall: Vec::new(),
            instance,
        }
    }

    /// SSH, HTTP and HTTPS open to the world.
    #[must_use]
    pub fn web_server(network: &str, address: StaticAddress, instance: Instance) -> Self {
        Self::new(network, address, instance)
            .firewall(FirewallRule::ssh())
            .firewall(FirewallRule::http())
            .firewall(FirewallRule::https())
    }

    /// Add a firewall rule and tag the instance with its targets.
    #[must_use]
    pub fn firewall(mut self, rule: FirewallRule) -> Self {
        self.instance
            .tags
            .extend(rule.target_tags.iter().cloned());
        self.firewall.push(rule);
        self
    }

    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&FirewallRule> {
        self.firewall.iter().find(|r| r.name == name)
    }

    /// Union of every rule's target tags.
    #[must_use]
    pub fn targeted_tags(&self) -> BTreeSet<Tag> {
        self.firewall
            .iter()
            .flat_map(|r| r.target_tags.iter().cloned())
            .collect()
    }

    /// Instance tags no firewall rule targets.
    #[must_use]
    pub fn untargeted_tags(&self) -> Vec<&Tag> {
        let targeted = self.targeted_tags();
        self.instance
            .tags
            .iter()
            .filter(|t| !targeted.contains(*t))
            .collect()
    }

    /// Check the declared resources for internal consistency.
    pub fn validate(&self) -> DeployResult<()> {
        let mut seen = BTreeSet::new();
        for rule in &self.firewall {
            if !seen.insert(rule.name.as_str()) {
                return Err(DeployError::InvalidConfig(format!(
                    "duplicate firewall rule '{}'",
                    rule.name
                )));
            }
            if rule.ports.is_empty() {
                return Err(DeployError::InvalidConfig(format!(
                    "firewall rule '{}' opens no ports",
                    rule.name
                )));
            }
            if let Some(missing) = rule
                .target_tags
                .iter()
                .find(|t| !self.instance.tags.contains(*t))
            {
                return Err(DeployError::InvalidConfig(format!(
                    "firewall rule '{}' targets tag '{missing}' \
                     which instance '{}' does not carry",
                    rule.name, self.instance.name
                )));
            }
        }
        Ok(())
    }
}
