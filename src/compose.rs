use std::path::Path;

use docker_compose_types::{BuildStep, Compose, Service};

use crate::error::{DeployError, DeployResult};

/// Parse a local `docker-compose.yml`.
pub fn load(path: &Path) -> DeployResult<Compose> {
    let content = std::fs::read_to_string(path).map_err(|_| {
        DeployError::FileNotFound(format!("compose file not found: {}", path.display()))
    })?;
    parse(&content)
}

/// Parse compose YAML from a string.
pub fn parse(content: &str) -> DeployResult<Compose> {
    Ok(serde_yaml::from_str(content)?)
}

/// Look up a declared service by name.
pub fn service<'a>(compose: &'a Compose, name: &str) -> DeployResult<&'a Service> {
    match compose.services.0.get(name) {
        Some(Some(service)) => Ok(service),
        Some(None) => Err(DeployError::InvalidConfig(format!(
            "service '{name}' is declared without a body"
        ))),
        None => {
            let known: Vec<&str> = compose.services.0.keys().map(String::as_str).collect();
            Err(DeployError::InvalidConfig(format!(
                "service '{name}' is not declared (known: {})",
                known.join(", ")
            )))
        }
    }
}

/// Build context of a service. Services deployed by rebuilding must
/// declare one.
pub fn build_context(compose: &Compose, name: &str) -> DeployResult<String> {
    let service = service(compose, name)?;
    match &service.build_ {
        Some(BuildStep::Simple(context)) => Ok(context.clone()),
        Some(BuildStep::Advanced(advanced)) => Ok(advanced.context.clone()),
        None => Err(DeployError::InvalidConfig(format!(
            "service '{name}' has no build section; nothing to rebuild"
        ))),
    }
}

/// Render one service back to YAML, for dry runs.
pub fn render_service(compose: &Compose, name: &str) -> DeployResult<String> {
    Ok(serde_yaml::to_string(service(compose, name)?)?)
}
