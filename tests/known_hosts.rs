mod common;

use ballista::error::DeployError;
use ballista::known_hosts;
use common::{RecordingRunner, SCANNED_KEYS};
use tempfile::TempDir;

#[test]
fn trust_appends_scanned_keys() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(".ssh").join("known_hosts");
    let runner = RecordingRunner::new();
    runner.respond("ssh-keyscan", SCANNED_KEYS);

    let count = known_hosts::trust(&runner, "34.1.2.3", &path).unwrap();

    assert_eq!(count, 1);
    assert_eq!(runner.lines(), vec!["ssh-keyscan -H 34.1.2.3"]);
    let stored = std::fs::read_to_string(&path).unwrap();
    assert_eq!(stored, "|1|aGFzaA==|c2FsdA== ssh-ed25519 AAAAC3Nz\n");
}

#[test]
fn appending_twice_duplicates_entries() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("known_hosts");
    std::fs::write(&path, "existing-host ssh-rsa AAAAB3\n").unwrap();

    known_hosts::append(&path, SCANNED_KEYS).unwrap();
    known_hosts::append(&path, SCANNED_KEYS).unwrap();

    let stored = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = stored.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "existing-host ssh-rsa AAAAB3");
    assert_eq!(lines[1], lines[2]);
}

#[test]
fn no_keys_is_an_ssh_failure() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("known_hosts");
    let runner = RecordingRunner::new();
    runner.respond("ssh-keyscan", "# 34.1.2.3:22 SSH-2.0-OpenSSH_9.2\n");

    let err = known_hosts::trust(&runner, "34.1.2.3", &path).unwrap_err();

    assert!(matches!(err, DeployError::SshFailed(_)));
    assert!(!path.exists());
}

#[test]
fn forget_runs_ssh_keygen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("known_hosts");
    std::fs::write(&path, SCANNED_KEYS).unwrap();
    let runner = RecordingRunner::new();

    known_hosts::forget(&runner, "34.1.2.3", &path).unwrap();

    assert_eq!(
        runner.lines(),
        vec![format!("ssh-keygen -R 34.1.2.3 -f {}", path.display())]
    );
}

#[test]
fn forget_without_store_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let runner = RecordingRunner::new();

    known_hosts::forget(&runner, "34.1.2.3", &dir.path().join("missing")).unwrap();

    assert!(runner.calls().is_empty());
}
