use std::path::{Path, PathBuf};

use serde::Deserialize;

/// One addressable deploy target found in the project's config directory.
/// `name` is empty for the single base destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDestination {
    pub name: String,
    pub config_path: PathBuf,
    pub service: String,
}

#[derive(Debug, Deserialize, Default)]
struct DeployFile {
    #[serde(default)]
    service: Option<String>,
}

fn read_service(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let parsed: DeployFile = serde_yaml_ng::from_str(&text).ok()?;
    parsed.service
}

fn base_config(dir: &Path) -> Option<PathBuf> {
    for name in ["deploy.yml", "deploy.yaml"] {
        let path = dir.join(name);
        if path.is_file() {
            return Some(path);
        }
    }
    None
}

/// Scans `<project_dir>/config` for deploy configurations. Overlay files
/// (`deploy.<name>.yml`) shadow the base file when any exist; each overlay
/// inherits the base service name unless it sets its own. Files that fail
/// to read or parse are skipped.
pub fn find_destinations(project_dir: &Path) -> Vec<SessionDestination> {
    let config_dir = project_dir.join("config");
    let base = base_config(&config_dir);
    let base_service = base.as_deref().and_then(read_service).unwrap_or_default();

    let mut overlays: Vec<SessionDestination> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(&config_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(name) = overlay_name(file_name) else {
                continue;
            };
            let service = read_service(&path).unwrap_or_else(|| base_service.clone());
            overlays.push(SessionDestination {
                name: name.to_string(),
                config_path: path,
                service,
            });
        }
    }

    if !overlays.is_empty() {
        overlays.sort_by(|a, b| a.name.cmp(&b.name));
        return overlays;
    }

    match base {
        Some(path) => vec![SessionDestination {
            name: String::new(),
            config_path: path,
            service: base_service,
        }],
        None => Vec::new(),
    }
}

fn overlay_name(file_name: &str) -> Option<&str> {
    let rest = file_name.strip_prefix("deploy.")?;
    rest.strip_suffix(".yml").or_else(|| rest.strip_suffix(".yaml")).filter(|n| !n.is_empty())
}

/// Secrets file path convention: `.kamal/secrets` for the base destination,
/// `.kamal/secrets-<name>` for a named one.
pub fn secrets_path(project_dir: &Path, destination: &str) -> PathBuf {
    if destination.is_empty() {
        project_dir.join(".kamal").join("secrets")
    } else {
        project_dir.join(".kamal").join(format!("secrets-{destination}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    fn project_with_config() -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let config = tmp.path().join("config");
        fs::create_dir(&config).unwrap();
        let root = tmp.path().to_path_buf();
        (tmp, root)
    }

    #[test]
    fn base_only_yields_single_unnamed_destination() {
        let (_tmp, root) = project_with_config();
        write(&root.join("config"), "deploy.yml", "service: web\n");

        let dests = find_destinations(&root);
        assert_eq!(dests.len(), 1);
        assert_eq!(dests[0].name, "");
        assert_eq!(dests[0].service, "web");
    }

    #[test]
    fn overlays_shadow_base_and_inherit_service() {
        let (_tmp, root) = project_with_config();
        let config = root.join("config");
        write(&config, "deploy.yml", "service: web\n");
        write(&config, "deploy.staging.yml", "servers:\n  - 10.0.0.1\n");
        write(&config, "deploy.production.yaml", "service: web-eu\n");

        let dests = find_destinations(&root);
        assert_eq!(dests.len(), 2);
        assert_eq!(dests[0].name, "production");
        assert_eq!(dests[0].service, "web-eu");
        assert_eq!(dests[1].name, "staging");
        assert_eq!(dests[1].service, "web");
    }

    #[test]
    fn unparsable_overlay_falls_back_to_base_service() {
        let (_tmp, root) = project_with_config();
        let config = root.join("config");
        write(&config, "deploy.yml", "service: web\n");
        write(&config, "deploy.broken.yml", ": not : yaml : at all :\n");

        let dests = find_destinations(&root);
        assert_eq!(dests.len(), 1);
        assert_eq!(dests[0].name, "broken");
        assert_eq!(dests[0].service, "web");
    }

    #[test]
    fn missing_config_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(find_destinations(tmp.path()).is_empty());
    }

    #[test]
    fn secrets_path_convention() {
        let root = Path::new("/proj");
        assert_eq!(
            secrets_path(root, ""),
            PathBuf::from("/proj/.kamal/secrets")
        );
        assert_eq!(
            secrets_path(root, "staging"),
            PathBuf::from("/proj/.kamal/secrets-staging")
        );
    }
}
