use std::path::{Path, PathBuf};

use crate::cmd::{CommandRunner, Invocation};
use crate::error::DeployResult;

/// SSH session parameters for executing commands on a remote host.
///
/// The key and known-hosts file apply to every `ssh` invocation built
/// here. The Docker client behind `DOCKER_HOST=ssh://` spawns its own
/// `ssh` and only sees `~/.ssh/config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSession {
    host: String,
    user: String,
    key: Option<String>,
    known_hosts: Option<PathBuf>,
}

impl SshSession {
    #[must_use]
    pub fn new(host: &str, user: &str) -> Self {
        Self {
            host: host.to_string(),
            user: user.to_string(),
            key: None,
            known_hosts: None,
        }
    }

    #[must_use]
    pub fn with_key(mut self, key_path: &str) -> Self {
        self.key = Some(key_path.to_string());
        self
    }

    /// Trust store to verify the host against, instead of
    /// `~/.ssh/known_hosts`.
    #[must_use]
    pub fn known_hosts(mut self, path: &Path) -> Self {
        self.known_hosts = Some(path.to_path_buf());
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    #[must_use]
    pub fn known_hosts_file(&self) -> Option<&Path> {
        self.known_hosts.as_deref()
    }

    /// `user@host`.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Endpoint for a Docker client talking to the remote daemon
    /// through an SSH tunnel.
    #[must_use]
    pub fn docker_host(&self) -> String {
        format!("ssh://{}", self.destination())
    }

    /// The `ssh` invocation that runs `command` on the remote host.
    #[must_use]
    pub fn invocation(&self, command: &str) -> Invocation {
        Invocation::new("ssh")
            .args(self.ssh_base_args())
            .arg(self.destination())
            .arg(command)
    }

    /// Execute a command on the remote host and capture output.
    pub fn exec(&self, runner: &dyn CommandRunner, command: &str) -> DeployResult<String> {
        runner.capture(&self.invocation(command))
    }

    fn ssh_base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "ConnectTimeout=10".to_string(),
        ];
        if let Some(path) = &self.known_hosts {
            args.push("-o".to_string());
            args.push(format!("UserKnownHostsFile={}", path.display()));
        }
        if let Some(key) = &self.key {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args
    }
}
