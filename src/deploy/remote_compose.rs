use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::cmd::CommandRunner;
use crate::compose;
use crate::deploy::{DeployReport, Deployer, FailurePolicy, Step, Steps};
use crate::docker::{self, RemoteDocker};
use crate::error::{DeployError, DeployResult};
use crate::known_hosts;
use crate::service::Service;
use crate::ssh::SshSession;

/// Deploy by rebuilding a compose service on the remote daemon.
///
/// The local compose client is pointed at the host's Docker daemon
/// through `DOCKER_HOST=ssh://user@host`; the build context is
/// streamed to the remote daemon and the image never leaves the
/// host. After checking that the compose file declares a build for
/// the service:
///
/// 1. append the host's keys to the session's known-hosts store
/// 2. probe the host over SSH (logged, never fatal)
/// 3. redirect the compose client to the remote daemon
/// 4. `build` then `up -d --force-recreate` the service
/// 5. optionally wait for it to be running, then show `ps`
///
/// The Docker client opens the tunnel with its own `ssh`, which reads
/// `~/.ssh/config` only. A session key or known-hosts file other than
/// the defaults must be mirrored there (`IdentityFile`,
/// `UserKnownHostsFile`); the redirect step warns when they are set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCompose {
    pub probe: Option<String>,
    pub wait: Option<WaitRunning>,
}

/// Polling bounds for the wait-for-running step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitRunning {
    pub attempts: u32,
    pub interval: Duration,
}

impl RemoteCompose {
    #[must_use]
    pub fn new() -> Self {
        Self {
            probe: Some("sudo -n true".to_string()),
            wait: None,
        }
    }

    #[must_use]
    pub fn probe(mut self, command: &str) -> Self {
        self.probe = Some(command.to_string());
        self
    }

    #[must_use]
    pub fn no_probe(mut self) -> Self {
        self.probe = None;
        self
    }

    #[must_use]
    pub const fn wait_running(mut self, attempts: u32, interval: Duration) -> Self {
        self.wait = Some(WaitRunning { attempts, interval });
        self
    }

    fn docker(ssh: &SshSession, service: &Service) -> RemoteDocker {
        RemoteDocker::new(ssh, &service.compose_file)
            .project_name(service.project_name.as_deref())
    }

    fn preflight(service: &Service) -> DeployResult<()> {
        let file = compose::load(&service.compose_file)?;
        let context = compose::build_context(&file, &service.name)?;
        eprintln!("Service '{}' builds from {context}", service.name);
        Ok(())
    }
}

impl Default for RemoteCompose {
    fn default() -> Self {
        Self::new()
    }
}

impl Deployer for RemoteCompose {
    fn deploy(
        &self,
        runner: &dyn CommandRunner,
        ssh: &SshSession,
        service: &Service,
        policy: FailurePolicy,
    ) -> DeployResult<DeployReport> {
        eprintln!("Deploying '{}' to {}...", service.name, ssh.destination());

        let mut steps = Steps::new(policy);

        steps.require(Step::Preflight, || Self::preflight(service))?;

        steps.run(Step::TrustHost, || {
            let path = trust_store(ssh)?;
            known_hosts::trust(runner, ssh.host(), &path).map(|_| ())
        })?;

        if let Some(probe) = &self.probe {
            steps.tolerate(Step::Probe, || {
                match ssh.exec(runner, probe) {
                    Ok(_) => {
                        tracing::info!(host = %ssh.host(), probe = %probe, "probe succeeded");
                    }
                    Err(e) => {
                        tracing::warn!(
                            host = %ssh.host(),
                            probe = %probe,
                            error = %e,
                            "probe failed, continuing"
                        );
                        return Err(e);
                    }
                }
                Ok(())
            });
        }

        let docker = Self::docker(ssh, service);
        steps.run(Step::Redirect, || {
            eprintln!("Using {}={}", docker::DOCKER_HOST, docker.docker_host());
            for setting in tunnel_overrides(ssh) {
                tracing::warn!(
                    setting = %setting,
                    "the Docker SSH tunnel reads ~/.ssh/config only; configure it there too"
                );
            }
            Ok(())
        })?;

        steps.run(Step::Build, || runner.interactive(&docker.build(&service.name)))?;
        steps.run(Step::Up, || runner.interactive(&docker.up(&service.name)))?;

        if let Some(wait) = self.wait {
            steps.run(Step::Wait, || wait_running(runner, &docker, &service.name, wait))?;
        }

        steps.run(Step::Status, || runner.interactive(&docker.ps()))?;

        let report = steps.finish()?;
        eprintln!();
        eprintln!("Deployment complete!");
        Ok(report)
    }

    fn status(
        &self,
        runner: &dyn CommandRunner,
        ssh: &SshSession,
        service: &Service,
    ) -> DeployResult<()> {
        runner.interactive(&Self::docker(ssh, service).ps())
    }

    fn dry_run(&self, ssh: &SshSession, service: &Service) -> Vec<String> {
        let docker = Self::docker(ssh, service);
        let known_hosts = trust_store(ssh).map_or_else(
            |_| "~/.ssh/known_hosts".to_string(),
            |p| p.display().to_string(),
        );

        let mut actions = vec![
            format!(
                "Check {} declares a build for '{}'",
                service.compose_file.display(),
                service.name
            ),
            format!(
                "{} >> {known_hosts}",
                known_hosts::scan_invocation(ssh.host())
            ),
        ];
        if let Some(probe) = &self.probe {
            actions.push(format!("{} (result ignored)", ssh.invocation(probe)));
        }
        actions.push(format!("export {}={}", docker::DOCKER_HOST, docker.docker_host()));
        actions.push(docker.build(&service.name).to_string());
        actions.push(docker.up(&service.name).to_string());
        if let Some(wait) = self.wait {
            actions.push(format!(
                "Poll `{}` until running ({} attempts, {}s apart)",
                docker.ps_json(&service.name),
                wait.attempts,
                wait.interval.as_secs()
            ));
        }
        actions.push(docker.ps().to_string());
        actions
    }
}

/// Known-hosts file the session verifies against.
fn trust_store(ssh: &SshSession) -> DeployResult<PathBuf> {
    ssh.known_hosts_file()
        .map_or_else(known_hosts::default_path, |path| Ok(path.to_path_buf()))
}

/// Session settings the Docker tunnel's `ssh` does not pick up.
fn tunnel_overrides(ssh: &SshSession) -> Vec<String> {
    let mut overrides = Vec::new();
    if let Some(key) = ssh.key() {
        overrides.push(format!("IdentityFile {key}"));
    }
    if let Some(path) = ssh.known_hosts_file() {
        let default = known_hosts::default_path().ok();
        if default.as_deref() != Some(path) {
            overrides.push(format!("UserKnownHostsFile {}", path.display()));
        }
    }
    overrides
}

/// Poll container state until the service reports `running`.
fn wait_running(
    runner: &dyn CommandRunner,
    docker: &RemoteDocker,
    service: &str,
    wait: WaitRunning,
) -> DeployResult<()> {
    for attempt in 1..=wait.attempts {
        match runner
            .capture(&docker.ps_json(service))
            .and_then(|out| docker::parse_ps(&out))
        {
            Ok(states) if states.iter().any(|s| s.service == service && s.is_running()) => {
                eprintln!("  State ({attempt}/{}): running", wait.attempts);
                return Ok(());
            }
            Ok(states) => {
                let state = states
                    .iter()
                    .find(|s| s.service == service)
                    .map_or("not created", |s| s.state.as_str());
                eprintln!("  State ({attempt}/{}): {state} - retrying...", wait.attempts);
            }
            Err(_) => {
                eprintln!(
                    "  State ({attempt}/{}): waiting for container...",
                    wait.attempts
                );
            }
        }
        thread::sleep(wait.interval);
    }

    Err(DeployError::NotRunning(service.to_string(), wait.attempts))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn defaults() {
        let deployer = RemoteCompose::new();

        assert_eq!(deployer.probe.as_deref(), Some("sudo -n true"));
        assert!(deployer.wait.is_none());
    }

    #[test]
    fn builder_chain() {
        let deployer = RemoteCompose::new()
            .no_probe()
            .wait_running(10, Duration::from_secs(3));

        assert!(deployer.probe.is_none());
        assert_eq!(
            deployer.wait,
            Some(WaitRunning {
                attempts: 10,
                interval: Duration::from_secs(3)
            })
        );
    }

    #[test]
    fn dry_run_orders_redirect_before_compose() {
        let deployer = RemoteCompose::new();
        let ssh = SshSession::new("34.1.2.3", "deploy").known_hosts(Path::new("/tmp/kh"));

        let actions = deployer.dry_run(&ssh, &Service::default());

        assert_eq!(actions[1], "ssh-keyscan -H 34.1.2.3 >> /tmp/kh");
        assert!(actions[2].ends_with("(result ignored)"));
        assert_eq!(actions[3], "export DOCKER_HOST=ssh://deploy@34.1.2.3");
        assert!(actions[4].contains("compose -f docker-compose.yml build backend"));
        assert!(actions[5].contains("up -d --force-recreate backend"));
        assert!(actions[6].ends_with("compose -f docker-compose.yml ps"));
    }

    #[test]
    fn tunnel_overrides_name_custom_settings() {
        let plain = SshSession::new("h", "u");
        let custom = SshSession::new("h", "u")
            .with_key("/keys/id_custom")
            .known_hosts(Path::new("/work/known_hosts"));

        assert!(tunnel_overrides(&plain).is_empty());
        assert_eq!(
            tunnel_overrides(&custom),
            vec![
                "IdentityFile /keys/id_custom",
                "UserKnownHostsFile /work/known_hosts"
            ]
        );
    }
}
