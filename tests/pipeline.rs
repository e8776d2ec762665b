mod common;

use std::path::Path;

use ballista::error::DeployError;
use ballista::{Gcp, Pipeline, RemoteCompose, Service};
use common::{COMPOSE, RecordingRunner, SCANNED_KEYS, address_listing, web_server, write};
use tempfile::TempDir;

fn pipeline(dir: &Path, runner: &RecordingRunner) -> Pipeline {
    let compose = write(dir, "docker-compose.yml", COMPOSE);
    let known_hosts = dir.join("known_hosts");
    Pipeline::new(Service::new("backend").compose_file(&compose))
        .infrastructure(web_server(dir))
        .provision(Gcp::new("p"))
        .deploy(RemoteCompose::new())
        .known_hosts(&known_hosts)
        .ssh_user("deploy")
        .runner(runner.clone())
}

fn runner() -> RecordingRunner {
    let runner = RecordingRunner::new();
    runner.respond("ssh-keyscan", SCANNED_KEYS);
    runner
}

#[test]
fn deploy_argument_wins_over_static_address() {
    let dir = TempDir::new().unwrap();
    let runner = runner();

    pipeline(dir.path(), &runner)
        .run_from(["ballista", "deploy", "203.0.113.10"])
        .unwrap();

    assert!(runner.lines_containing("gcloud").is_empty());
    assert_eq!(runner.lines()[0], "ssh-keyscan -H 203.0.113.10");
}

#[test]
fn configured_host_wins_over_static_address() {
    let dir = TempDir::new().unwrap();
    let runner = runner();

    pipeline(dir.path(), &runner)
        .host("app.example.com")
        .run_from(["ballista", "deploy"])
        .unwrap();

    assert!(runner.lines_containing("gcloud").is_empty());
    assert_eq!(
        runner.lines_containing("DOCKER_HOST=ssh://deploy@app.example.com").len(),
        3
    );
}

#[test]
fn deploy_falls_back_to_static_address() {
    let dir = TempDir::new().unwrap();
    let runner = runner();
    runner.respond("addresses list", &address_listing("34.1.2.3"));

    pipeline(dir.path(), &runner)
        .run_from(["ballista", "deploy"])
        .unwrap();

    assert_eq!(runner.lines()[1], "ssh-keyscan -H 34.1.2.3");
}

#[test]
fn deploy_without_allocated_address_fails() {
    let dir = TempDir::new().unwrap();
    let runner = runner();

    let err = pipeline(dir.path(), &runner)
        .run_from(["ballista", "deploy"])
        .unwrap_err();

    assert!(matches!(err, DeployError::ServerNotFound(_)));
}

#[test]
fn keep_going_overrides_halt() {
    let dir = TempDir::new().unwrap();
    let runner = runner();
    runner.fail("build backend");
    let pipeline = pipeline(dir.path(), &runner);

    assert!(pipeline.run_from(["ballista", "deploy", "34.1.2.3"]).is_err());
    assert!(runner.lines_containing("--force-recreate").is_empty());

    pipeline
        .run_from(["ballista", "deploy", "34.1.2.3", "--keep-going"])
        .unwrap();
    assert_eq!(runner.lines_containing("--force-recreate").len(), 1);
}

#[test]
fn dry_runs_execute_nothing() {
    let dir = TempDir::new().unwrap();
    let runner = runner();
    let pipeline = pipeline(dir.path(), &runner);

    pipeline
        .run_from(["ballista", "deploy", "34.1.2.3", "--dry-run"])
        .unwrap();
    pipeline
        .run_from(["ballista", "provision", "--dry-run"])
        .unwrap();

    assert!(runner.calls().is_empty());
    assert!(!dir.path().join("known_hosts").exists());
}

#[test]
fn status_shows_remote_ps() {
    let dir = TempDir::new().unwrap();
    let runner = runner();

    pipeline(dir.path(), &runner)
        .run_from(["ballista", "status", "34.1.2.3"])
        .unwrap();

    let lines = runner.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("DOCKER_HOST=ssh://deploy@34.1.2.3 docker compose"));
    assert!(lines[0].ends_with(" ps"));
}

#[test]
fn destroy_forgets_host_key() {
    let dir = TempDir::new().unwrap();
    let runner = runner();
    runner
        .respond("addresses list", &address_listing("34.1.2.3"))
        .respond("instances list", r#"[{"name": "my-vm"}]"#);
    let known_hosts = write(dir.path(), "known_hosts", SCANNED_KEYS);

    pipeline(dir.path(), &runner)
        .run_from(["ballista", "destroy", "--yes"])
        .unwrap();

    assert_eq!(runner.lines_containing("instances delete my-vm").len(), 1);
    assert!(runner.lines_containing("addresses delete").is_empty());
    assert_eq!(
        runner.lines().last().unwrap(),
        &format!("ssh-keygen -R 34.1.2.3 -f {}", known_hosts.display())
    );
}

#[test]
fn address_requires_allocation() {
    let dir = TempDir::new().unwrap();
    let runner = runner();

    let err = pipeline(dir.path(), &runner)
        .run_from(["ballista", "address"])
        .unwrap_err();

    assert!(err.to_string().contains("backend-ip"));
}

#[test]
fn validate_rejects_service_without_build() {
    let dir = TempDir::new().unwrap();
    let compose = write(dir.path(), "docker-compose.yml", COMPOSE);

    let err = Pipeline::new(Service::new("db").compose_file(&compose))
        .run_from(["ballista", "validate"])
        .unwrap_err();

    assert!(matches!(err, DeployError::InvalidConfig(_)));
}

#[test]
fn deploy_and_destroy_share_one_store() {
    let dir = TempDir::new().unwrap();
    let runner = runner();
    runner
        .respond("addresses list", &address_listing("34.1.2.3"))
        .respond("instances list", r#"[{"name": "my-vm"}]"#);
    let pipeline = pipeline(dir.path(), &runner).ssh_key(Path::new("/keys/id_custom"));
    let store = dir.path().join("known_hosts");

    pipeline.run_from(["ballista", "deploy"]).unwrap();
    pipeline.run_from(["ballista", "destroy", "--yes"]).unwrap();

    let remote = runner.lines_containing("'sudo -n true'");
    assert!(remote[0].contains(&format!("UserKnownHostsFile={}", store.display())));
    assert!(remote[0].contains("-i /keys/id_custom"));
    assert_eq!(
        runner.lines().last().unwrap(),
        &format!("ssh-keygen -R 34.1.2.3 -f {}", store.display())
    );
}

#[test]
fn config_flag_is_rejected_without_project_file() {
    let dir = TempDir::new().unwrap();
    let runner = runner();

    let err = pipeline(dir.path(), &runner)
        .run_from(["ballista", "--config", "prod.yaml", "deploy", "34.1.2.3"])
        .unwrap_err();

    assert!(matches!(err, DeployError::Other(_)));
    assert!(runner.calls().is_empty());
}
