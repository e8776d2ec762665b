//! Provision a GCE web server and deploy the `backend` compose
//! service to it.
//!
//! ```sh
//! # Preview the resources as Terraform JSON
//! cargo run --example gcp_backend -- provision --dry-run
//!
//! # Create the address, firewall rules and VM
//! cargo run --example gcp_backend -- provision
//!
//! # Rebuild and restart backend on the static address
//! cargo run --example gcp_backend -- deploy
//!
//! # Tear down the VM, keeping the address
//! cargo run --example gcp_backend -- destroy
//! ```

use std::path::Path;
use std::time::Duration;

use ballista::{
    FirewallRule, Gcp, Infrastructure, Instance, Pipeline, RemoteCompose, Service, StaticAddress,
    Tag,
};

fn main() -> anyhow::Result<()> {
    let instance = Instance::new(
        "my-vm",
        "deploy",
        Path::new("/home/deploy/.ssh/id_ed25519.pub"),
        Path::new("scripts/startup.sh"),
    )
    .machine_type("e2-medium");

    let infra = Infrastructure::web_server(
        "default",
        StaticAddress::new("backend-ip", "europe-west1"),
        instance,
    )
    .firewall(
        FirewallRule::new("allow-metrics")
            .port(9100)
            .source_range("10.0.0.0/8".parse()?)
            .target(Tag::new("metrics")?),
    );

    let gcp = Gcp::new("my-project")
        .region("europe-west1")
        .zone("europe-west1-b")
        .credentials(Path::new("/home/deploy/.config/gcloud/ballista-sa.json"));

    let pipeline = Pipeline::new(Service::new("backend").compose_file("docker-compose.yml"))
        .infrastructure(infra)
        .provision(gcp)
        .deploy(RemoteCompose::new().wait_running(30, Duration::from_secs(2)))
        .ssh_user("deploy");

    pipeline.run()?;
    Ok(())
}
