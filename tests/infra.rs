mod common;

use std::collections::BTreeSet;
use std::path::Path;

use ballista::infra::Protocol;
use ballista::{Cidr, FirewallRule, Infrastructure, Instance, StaticAddress, Tag};

fn my_vm() -> Instance {
    Instance::new(
        "my-vm",
        "deploy",
        Path::new("/keys/id_ed25519.pub"),
        Path::new("scripts/startup.sh"),
    )
}

fn web_server() -> Infrastructure {
    Infrastructure::web_server(
        "default",
        StaticAddress::new("backend-ip", "europe-west1"),
        my_vm(),
    )
}

fn tags(names: &[&str]) -> BTreeSet<Tag> {
    names.iter().map(|n| Tag::new(n).unwrap()).collect()
}

#[test]
fn firewall_targets_equal_instance_tags() {
    let infra = web_server();

    assert_eq!(infra.targeted_tags(), infra.instance.tags);
    assert!(infra.untargeted_tags().is_empty());
    assert!(infra.validate().is_ok());
}

#[test]
fn standard_rules_open_one_tcp_port_to_anywhere() {
    let infra = web_server();

    for (name, port) in [("allow-ssh", 22), ("allow-http", 80), ("allow-https", 443)] {
        let rule = infra.rule(name).unwrap();
        assert_eq!(rule.protocol, Protocol::Tcp);
        assert_eq!(rule.ports, BTreeSet::from([port]));
        assert_eq!(rule.effective_sources(), BTreeSet::from([Cidr::any_v4()]));
    }
}

#[test]
fn my_vm_is_matched_by_exactly_three_rules() {
    let infra = web_server();

    assert_eq!(
        infra.instance.tags,
        tags(&["ssh-allowed", "http-server", "https-server"])
    );

    let matching: Vec<(&str, BTreeSet<Tag>, BTreeSet<u16>)> = infra
        .firewall
        .iter()
        .filter(|r| r.applies_to(&infra.instance))
        .map(|r| (r.name.as_str(), r.target_tags.clone(), r.ports.clone()))
        .collect();
    assert_eq!(
        matching,
        vec![
            ("allow-ssh", tags(&["ssh-allowed"]), BTreeSet::from([22])),
            ("allow-http", tags(&["http-server"]), BTreeSet::from([80])),
            ("allow-https", tags(&["https-server"]), BTreeSet::from([443])),
        ]
    );
}

#[test]
fn extra_rule_extends_instance_tags() {
    let infra = web_server().firewall(
        FirewallRule::new("allow-metrics")
            .port(9100)
            .source_range("10.0.0.0/8".parse().unwrap())
            .target(Tag::new("metrics").unwrap()),
    );

    assert!(infra.instance.tags.contains(&Tag::new("metrics").unwrap()));
    assert_eq!(
        infra.rule("allow-metrics").unwrap().effective_sources(),
        BTreeSet::from(["10.0.0.0/8".parse::<Cidr>().unwrap()])
    );
    assert!(infra.validate().is_ok());
}

#[test]
fn hand_assembled_mismatch_is_rejected() {
    let mut infra = Infrastructure::new(
        "default",
        StaticAddress::new("backend-ip", "europe-west1"),
        my_vm().tag(Tag::new("ssh-allowed").unwrap()),
    );
    infra.firewall.push(FirewallRule::ssh());
    infra.firewall.push(FirewallRule::https());

    let err = infra.validate().unwrap_err();

    assert!(err.to_string().contains("https-server"));
    assert!(err.to_string().contains("my-vm"));
}

#[test]
fn untargeted_tag_is_reported() {
    let infra = Infrastructure::web_server(
        "default",
        StaticAddress::new("backend-ip", "europe-west1"),
        my_vm().tag(Tag::new("legacy").unwrap()),
    );

    assert_eq!(infra.untargeted_tags(), vec![&Tag::new("legacy").unwrap()]);
    assert!(infra.validate().is_ok());
}

#[test]
fn rule_without_ports_is_rejected() {
    let infra = web_server().firewall(FirewallRule::new("empty"));

    assert!(infra.validate().is_err());
}

#[test]
fn ssh_keys_metadata_reads_key() {
    let dir = tempfile::TempDir::new().unwrap();
    let key = common::write(dir.path(), "id.pub", common::PUBLIC_KEY);
    let instance = Instance::new("my-vm", "deploy", &key, Path::new("startup.sh"));

    assert_eq!(
        instance.ssh_keys_metadata().unwrap(),
        "deploy:ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHb me@laptop"
    );
}

#[test]
fn empty_key_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let key = common::write(dir.path(), "id.pub", "\n");
    let instance = Instance::new("my-vm", "deploy", &key, Path::new("startup.sh"));

    assert!(instance.ssh_keys_metadata().is_err());
}

#[test]
fn startup_script_size_is_reported() {
    let dir = tempfile::TempDir::new().unwrap();
    let script = common::write(dir.path(), "startup.sh", "#!/bin/sh\n");
    let instance = Instance::new("my-vm", "deploy", Path::new("id.pub"), &script);

    assert_eq!(instance.check_startup_script().unwrap(), 10);
}
