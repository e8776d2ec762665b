use std::path::{Path, PathBuf};

/// The compose service that gets rebuilt and restarted on every
/// deploy.
///
/// # Example
///
/// ```
/// use ballista::Service;
///
/// let service = Service::new("backend")
///     .compose_file("deploy/docker-compose.yml")
///     .project_name("gym");
///
/// assert_eq!(service.name, "backend");
/// assert_eq!(service.project_name.as_deref(), Some("gym"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub name: String,
    pub compose_file: PathBuf,
    pub project_name: Option<String>,
}

impl Service {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            compose_file: PathBuf::from("docker-compose.yml"),
            project_name: None,
        }
    }

    #[must_use]
    pub fn compose_file(mut self, path: impl AsRef<Path>) -> Self {
        self.compose_file = path.as_ref().to_path_buf();
        self
    }

    #[must_use]
    pub fn project_name(mut self, name: &str) -> Self {
        self.project_name = Some(name.to_string());
        self
    }
}

impl Default for Service {
    fn default() -> Self {
        Self::new("backend")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let service = Service::default();

        assert_eq!(service.name, "backend");
        assert_eq!(service.compose_file, PathBuf::from("docker-compose.yml"));
        assert!(service.project_name.is_none());
    }

    #[test]
    fn project_name_overrides() {
        let service = Service::new("x").project_name("a").project_name("b");

        assert_eq!(service.project_name.as_deref(), Some("b"));
    }
}
