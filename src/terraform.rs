use serde_json::{Map, Value, json};

use crate::infra::{FirewallRule, Infrastructure};
use crate::provision::gcp::Gcp;

/// Render the declared infrastructure as a Terraform JSON
/// configuration (`main.tf.json`) for the `google` provider.
#[must_use]
pub fn render(gcp: &Gcp, infra: &Infrastructure) -> String {
    let network = ident(&infra.network);
    let address = ident(&infra.address.name);
    let network_ref = format!("${{data.google_compute_network.{network}.name}}");

    let mut provider = Map::new();
    if let Some(credentials) = &gcp.credentials_file {
        provider.insert(
            "credentials".to_string(),
            Value::String(file_expr(&credentials.to_string_lossy())),
        );
    }
    provider.insert("project".to_string(), json!(gcp.project));
    provider.insert("region".to_string(), json!(gcp.region));
    provider.insert("zone".to_string(), json!(gcp.zone));

    let firewalls: Map<String, Value> = infra
        .firewall
        .iter()
        .map(|rule| (ident(&rule.name), firewall(rule, &network_ref)))
        .collect();

    let instance = &infra.instance;
    let mut resources = Map::new();
    resources.insert(
        "google_compute_address".to_string(),
        json!({
            address.clone(): {
                "name": infra.address.name,
                "region": infra.address.region,
            }
        }),
    );
    if !firewalls.is_empty() {
        resources.insert("google_compute_firewall".to_string(), Value::Object(firewalls));
    }
    resources.insert(
        "google_compute_instance".to_string(),
        json!({
            ident(&instance.name): {
                "name": instance.name,
                "machine_type": instance.machine_type,
                "tags": instance.tags.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "boot_disk": [{
                    "initialize_params": [{ "image": instance.image.to_string() }]
                }],
                "network_interface": [{
                    "network": network_ref,
                    "access_config": [{
                        "nat_ip": format!("${{google_compute_address.{address}.address}}")
                    }]
                }],
                "metadata": {
                    "ssh-keys": format!(
                        "{}:{}",
                        instance.ssh_user,
                        file_expr(&instance.ssh_public_key.to_string_lossy())
                    )
                },
                "metadata_startup_script": file_expr(&instance.startup_script.to_string_lossy()),
            }
        }),
    );

    let doc = json!({
        "provider": { "google": provider },
        "data": {
            "google_compute_network": {
                network: { "name": infra.network }
            }
        },
        "resource": resources,
        "output": {
            "static_ip": {
                "value": format!("${{google_compute_address.{address}.address}}")
            }
        }
    });

    // A tree of maps and strings always serializes.
    serde_json::to_string_pretty(&doc).unwrap_or_default()
}

fn firewall(rule: &FirewallRule, network_ref: &str) -> Value {
    json!({
        "name": rule.name,
        "network": network_ref,
        "allow": [{
            "protocol": rule.protocol.as_str(),
            "ports": rule.ports.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }],
        "source_ranges": rule
            .effective_sources()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        "target_tags": rule.target_tags.iter().map(ToString::to_string).collect::<Vec<_>>(),
    })
}

fn file_expr(path: &str) -> String {
    format!("${{file(\"{}\")}}", path.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Terraform resource label for a cloud resource name.
#[must_use]
pub fn ident(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if out.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ident_replaces_dashes() {
        assert_eq!(ident("my-vm"), "my_vm");
        assert_eq!(ident("allow-https"), "allow_https");
        assert_eq!(ident("1st"), "_1st");
    }

    #[test]
    fn file_expr_escapes_quotes() {
        assert_eq!(file_expr("a\"b"), "${file(\"a\\\"b\")}");
    }
}
