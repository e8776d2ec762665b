use ballista::error::DeployError;

#[test]
fn display_command_failed() {
    let err = DeployError::CommandFailed {
        command: "gcloud compute addresses create ip".into(),
        code: Some(1),
    };
    assert_eq!(err.to_string(), "command failed: gcloud compute addresses create ip");
    assert_eq!(err.exit_code(), Some(1));
}

#[test]
fn display_command_not_found() {
    let err = DeployError::CommandNotFound("docker".into());
    assert_eq!(err.to_string(), "command not found: docker");
}

#[test]
fn display_ssh_failed() {
    let err = DeployError::SshFailed("timeout".into());
    assert_eq!(err.to_string(), "SSH connection failed: timeout");
}

#[test]
fn display_prerequisite_missing() {
    let err = DeployError::PrerequisiteMissing("gcloud".into());
    assert_eq!(err.to_string(), "prerequisite missing: gcloud");
}

#[test]
fn display_server_not_found() {
    let err = DeployError::ServerNotFound("my-vm".into());
    assert_eq!(err.to_string(), "server not found: my-vm");
}

#[test]
fn display_env_missing() {
    let err = DeployError::EnvMissing("HOME".into());
    assert_eq!(err.to_string(), "environment variable missing: HOME");
}

#[test]
fn display_file_not_found() {
    let err = DeployError::FileNotFound("ballista.yaml".into());
    assert_eq!(err.to_string(), "file not found: ballista.yaml");
}

#[test]
fn display_invalid_config() {
    let err = DeployError::InvalidConfig("duplicate firewall rule 'allow-ssh'".into());
    assert_eq!(
        err.to_string(),
        "invalid configuration: duplicate firewall rule 'allow-ssh'"
    );
}

#[test]
fn display_not_running() {
    let err = DeployError::NotRunning("backend".into(), 30);
    assert_eq!(
        err.to_string(),
        "service 'backend' did not reach the running state after 30 attempts"
    );
    assert_eq!(err.exit_code(), None);
}

#[test]
fn display_other() {
    let err = DeployError::Other("custom error".into());
    assert_eq!(err.to_string(), "custom error");
}

#[test]
fn from_io_error() {
    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
    let err: DeployError = io_err.into();
    assert!(matches!(err, DeployError::Io(_)));
}

#[test]
fn from_json_error() {
    let json_err = serde_json::from_str::<Vec<u64>>("invalid").unwrap_err();
    let err: DeployError = json_err.into();
    assert!(matches!(err, DeployError::Json(_)));
}

#[test]
fn from_yaml_error() {
    let yaml_err = serde_yaml::from_str::<Vec<u64>>("{").unwrap_err();
    let err: DeployError = yaml_err.into();
    assert!(matches!(err, DeployError::Yaml(_)));
}
