//! `docker compose` pointed at a remote daemon.
//!
//! Every invocation built here carries `DOCKER_HOST=ssh://user@host`,
//! so the local compose client drives the remote daemon through an
//! SSH tunnel. There is no way to obtain an orchestration command
//! without the redirect.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cmd::Invocation;
use crate::error::DeployResult;
use crate::ssh::SshSession;

pub const DOCKER_HOST: &str = "DOCKER_HOST";

/// A compose project on a remote Docker daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocker {
    docker_host: String,
    compose_file: PathBuf,
    project_name: Option<String>,
}

impl RemoteDocker {
    #[must_use]
    pub fn new(ssh: &SshSession, compose_file: &Path) -> Self {
        Self {
            docker_host: ssh.docker_host(),
            compose_file: compose_file.to_path_buf(),
            project_name: None,
        }
    }

    #[must_use]
    pub fn project_name(mut self, name: Option<&str>) -> Self {
        self.project_name = name.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn docker_host(&self) -> &str {
        &self.docker_host
    }

    /// `docker compose -f <file> [-p <project>] <args...>` with the
    /// remote redirect applied.
    #[must_use]
    pub fn compose<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inv = Invocation::new("docker")
            .env(DOCKER_HOST, &self.docker_host)
            .arg("compose")
            .arg("-f")
            .arg(self.compose_file.to_string_lossy().to_string());
        if let Some(project) = &self.project_name {
            inv = inv.arg("-p").arg(project.clone());
        }
        inv.args(args)
    }

    #[must_use]
    pub fn build(&self, service: &str) -> Invocation {
        self.compose(["build", service])
    }

    /// Start `service` detached, replacing any running container.
    #[must_use]
    pub fn up(&self, service: &str) -> Invocation {
        self.compose(["up", "-d", "--force-recreate", service])
    }

    #[must_use]
    pub fn ps(&self) -> Invocation {
        self.compose(["ps"])
    }

    #[must_use]
    pub fn ps_json(&self, service: &str) -> Invocation {
        self.compose(["ps", "--all", "--format", "json", service])
    }
}

/// One row of `docker compose ps --format json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Service", default)]
    pub service: String,
    #[serde(rename = "State", default)]
    pub state: String,
    #[serde(rename = "Health", default)]
    pub health: String,
}

impl ContainerState {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == "running" && self.health != "unhealthy"
    }
}

/// Parse `docker compose ps --format json` output. Older Compose
/// releases print one JSON array, newer ones one object per line.
pub fn parse_ps(output: &str) -> DeployResult<Vec<ContainerState>> {
    let output = output.trim();
    if output.is_empty() {
        return Ok(Vec::new());
    }
    if output.starts_with('[') {
        return Ok(serde_json::from_str(output)?);
    }
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).map_err(Into::into))
        .collect()
}
