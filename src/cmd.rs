use std::fmt;
use std::process::{Command, Output, Stdio};

use crate::error::{DeployError, DeployResult};

/// A command line to execute: program, arguments, and extra
/// environment variables layered over the current environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    #[must_use]
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Value of an environment variable set on this invocation.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{key}={} ", quote(value))?;
        }
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

/// Executes [`Invocation`]s. Everything that talks to `gcloud`,
/// `ssh` or `docker` goes through a runner.
pub trait CommandRunner {
    /// Run a command and capture its trimmed stdout. Fails if the
    /// command returns a non-zero exit code.
    fn capture(&self, invocation: &Invocation) -> DeployResult<String>;

    /// Run a command with stdin/stdout/stderr inherited.
    fn interactive(&self, invocation: &Invocation) -> DeployResult<()>;
}

/// Runs commands as local child processes, echoing each command
/// line through `tracing` before it starts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn capture(&self, invocation: &Invocation) -> DeployResult<String> {
        tracing::info!(target: "ballista::cmd", "+ {invocation}");
        let output = spawn(invocation)?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            eprintln!("stderr: {stderr}");
            Err(DeployError::CommandFailed {
                command: invocation.to_string(),
                code: output.status.code(),
            })
        }
    }

    fn interactive(&self, invocation: &Invocation) -> DeployResult<()> {
        tracing::info!(target: "ballista::cmd", "+ {invocation}");
        let status = invocation
            .command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| not_found_or_io(&invocation.program, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(DeployError::CommandFailed {
                command: invocation.to_string(),
                code: status.code(),
            })
        }
    }
}

/// Check if a command exists on PATH.
#[must_use]
pub fn command_exists(program: &str) -> bool {
    Command::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Quote a word for display the way a POSIX shell would need it.
#[must_use]
pub fn quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | ',' | '+' | '%')
        });
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

fn spawn(invocation: &Invocation) -> DeployResult<Output> {
    invocation
        .command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| not_found_or_io(&invocation.program, e))
}

fn not_found_or_io(program: &str, e: std::io::Error) -> DeployError {
    if e.kind() == std::io::ErrorKind::NotFound {
        DeployError::CommandNotFound(program.to_string())
    } else {
        DeployError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_plain_words() {
        let inv = Invocation::new("docker")
            .args(["compose", "build", "backend"])
            .env("DOCKER_HOST", "ssh://deploy@10.0.0.5");

        assert_eq!(
            inv.to_string(),
            "DOCKER_HOST=ssh://deploy@10.0.0.5 docker compose build backend"
        );
    }

    #[test]
    fn display_quotes_spaces_and_quotes() {
        let inv = Invocation::new("ssh").arg("sudo -n true").arg("it's");

        assert_eq!(inv.to_string(), "ssh 'sudo -n true' 'it'\\''s'");
    }

    #[test]
    fn quote_empty_word() {
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn env_value_prefers_last() {
        let inv = Invocation::new("x").env("A", "1").env("A", "2");

        assert_eq!(inv.env_value("A"), Some("2"));
        assert_eq!(inv.env_value("B"), None);
    }

    #[test]
    fn missing_program_is_command_not_found() {
        let inv = Invocation::new("ballista-definitely-not-a-real-binary");

        let err = SystemRunner::new().capture(&inv).unwrap_err();

        assert!(matches!(
            err,
            DeployError::CommandNotFound(ref p) if p == "ballista-definitely-not-a-real-binary"
        ));
    }
}
