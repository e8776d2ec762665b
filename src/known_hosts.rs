//! Local SSH trust store (`~/.ssh/known_hosts`) maintenance.
//!
//! Entries are only ever appended. Scanning the same host twice
//! leaves two copies of its keys in the file; `ssh` accepts that.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::cmd::{CommandRunner, Invocation};
use crate::error::{DeployError, DeployResult};

/// Default trust store: `$HOME/.ssh/known_hosts`.
pub fn default_path() -> DeployResult<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| DeployError::EnvMissing("HOME".into()))?;
    Ok(PathBuf::from(home).join(".ssh").join("known_hosts"))
}

/// `ssh-keyscan` invocation for a host, hashing host names.
#[must_use]
pub fn scan_invocation(host: &str) -> Invocation {
    Invocation::new("ssh-keyscan").args(["-H", host])
}

/// Fetch the host's public keys and append them to the trust store
/// at `path`. Returns the number of key lines appended.
pub fn trust(runner: &dyn CommandRunner, host: &str, path: &Path) -> DeployResult<usize> {
    let scanned = runner.capture(&scan_invocation(host))?;
    let count = append(path, &scanned)?;
    if count == 0 {
        return Err(DeployError::SshFailed(format!(
            "ssh-keyscan returned no keys for {host}"
        )));
    }
    eprintln!("Trusted {count} host key(s) for {host}");
    Ok(count)
}

/// Append the key lines in `scanned` to the file at `path`,
/// creating the file and its parent directory if needed. Comment
/// and blank lines are skipped.
pub fn append(path: &Path, scanned: &str) -> DeployResult<usize> {
    let lines: Vec<&str> = key_lines(scanned).collect();
    if lines.is_empty() {
        return Ok(0);
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for line in &lines {
        writeln!(file, "{line}")?;
    }
    Ok(lines.len())
}

/// Remove every entry for `host` from the trust store at `path`.
pub fn forget(runner: &dyn CommandRunner, host: &str, path: &Path) -> DeployResult<()> {
    if !path.exists() {
        return Ok(());
    }
    let inv = Invocation::new("ssh-keygen")
        .args(["-R", host, "-f"])
        .arg(path.to_string_lossy().to_string());
    runner.capture(&inv)?;
    eprintln!("Known-hosts entries removed: {host}");
    Ok(())
}

fn key_lines(scanned: &str) -> impl Iterator<Item = &str> {
    scanned
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}
