//! Provision one Google Compute Engine VM and deploy a Docker
//! Compose service to it over SSH.
//!
//! Ballista covers the two halves of a single-host backend
//! deployment:
//!
//! 1. **Provision** - reconcile a static external address, a set of
//!    tag-targeted firewall rules and one compute instance (with an
//!    SSH key and a startup script in its metadata) against the
//!    cloud, through the `gcloud` CLI
//! 2. **Deploy** - trust the host's SSH keys, point the local
//!    `docker compose` client at the host's daemon with
//!    `DOCKER_HOST=ssh://user@host`, then rebuild and force-recreate
//!    one service and show its state
//!
//! Each half is pluggable via traits ([`Provisioner`], [`Deployer`])
//! and every external command goes through a [`CommandRunner`], so
//! the whole flow can be driven against a recording fake.
//!
//! # Examples
//!
//! ## Web server on GCE
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use ballista::{
//!     Gcp, Infrastructure, Instance, Pipeline, RemoteCompose, Service,
//!     StaticAddress,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let instance = Instance::new(
//!         "my-vm",
//!         "deploy",
//!         Path::new("/home/me/.ssh/id_ed25519.pub"),
//!         Path::new("scripts/startup.sh"),
//!     );
//!
//!     // allow-ssh, allow-http and allow-https, with the instance
//!     // tagged to receive them.
//!     let infra = Infrastructure::web_server(
//!         "default",
//!         StaticAddress::new("backend-ip", "europe-west1"),
//!         instance,
//!     );
//!
//!     let pipeline = Pipeline::new(Service::new("backend"))
//!         .infrastructure(infra)
//!         .provision(Gcp::new("my-project"))
//!         .deploy(RemoteCompose::new())
//!         .ssh_user("deploy");
//!
//!     pipeline.run()?;
//!     Ok(())
//! }
//! ```
//!
//! Then:
//!
//! ```sh
//! # Create the address, firewall rules and VM
//! cargo run -- provision
//!
//! # Rebuild and restart `backend` on the static address
//! cargo run -- deploy
//!
//! # List the commands a deploy would run
//! cargo run -- deploy --dry-run
//! ```
//!
//! The `ballista` binary does the same from a `ballista.yaml`
//! project file, see [`config`].
//!
//! [`Provisioner`]: provision::Provisioner
//! [`Deployer`]: deploy::Deployer
//! [`CommandRunner`]: cmd::CommandRunner

// Allow noisy pedantic lints that don't add value for a
// deployment tool crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod cmd;
pub mod compose;
pub mod config;
pub mod deploy;
pub mod docker;
pub mod error;
pub mod infra;
pub mod known_hosts;
pub mod logging;
pub mod pipeline;
pub mod provision;
pub mod service;
pub mod ssh;
pub mod terraform;

pub use config::ProjectConfig;
pub use deploy::FailurePolicy;
pub use deploy::remote_compose::RemoteCompose;
pub use infra::{Cidr, FirewallRule, Infrastructure, Instance, Protocol, StaticAddress, Tag};
pub use pipeline::Pipeline;
pub use provision::gcp::Gcp;
pub use service::Service;
