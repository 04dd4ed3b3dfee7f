use std::collections::HashMap;

use serde::Deserialize;

use crate::commands;
use crate::error::Result;
use crate::remote::{DEFAULT_TIMEOUT, RemoteExec};

/// One remote process instance, an immutable snapshot from one listing pass.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub state: String,
    pub labels: HashMap<String, String>,
    pub created_at: String,
}

impl ProcessRecord {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(|s| s.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// A named auxiliary group (datastore, worker) under one application.
#[derive(Debug, Clone)]
pub struct Accessory {
    pub name: String,
    pub records: Vec<ProcessRecord>,
}

/// One logical deployable unit: primary containers plus accessories for a
/// (service, destination) pair. Rebuilt wholesale on every discovery pass.
#[derive(Debug, Clone)]
pub struct Application {
    pub service: String,
    pub destination: String,
    pub primaries: Vec<ProcessRecord>,
    pub accessories: Vec<Accessory>,
    pub proxy_status: String,
}

impl Application {
    pub fn count_running(&self) -> usize {
        let primaries = self.primaries.iter().filter(|r| r.is_running()).count();
        let accessories = self
            .accessories
            .iter()
            .flat_map(|a| a.records.iter())
            .filter(|r| r.is_running())
            .count();
        primaries + accessories
    }

    /// Image tag of the first primary container, the part after the last
    /// ':'. "unknown" when there are no primaries or no tag.
    pub fn version_tag(&self) -> String {
        let Some(first) = self.primaries.first() else {
            return "unknown".into();
        };
        match first.image.rsplit_once(':') {
            Some((_, tag)) if !tag.is_empty() => tag.to_string(),
            _ => "unknown".into(),
        }
    }

    pub fn container_count(&self) -> usize {
        self.primaries.len()
            + self
                .accessories
                .iter()
                .map(|a| a.records.len())
                .sum::<usize>()
    }
}

/// Shape of one listing line. Labels arrive as a flat `k=v,k2=v2` string.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "Image")]
    image: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Labels", default)]
    labels: String,
    #[serde(rename = "CreatedAt", default)]
    created_at: String,
}

pub fn parse_labels(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in raw.split(',') {
        // Pairs without '=' carry no information, skip them.
        if let Some((k, v)) = pair.split_once('=') {
            let k = k.trim();
            if !k.is_empty() {
                out.insert(k.to_string(), v.trim().to_string());
            }
        }
    }
    out
}

fn parse_record(line: &str) -> Option<ProcessRecord> {
    let raw: RawRecord = serde_json::from_str(line).ok()?;
    Some(ProcessRecord {
        id: raw.id,
        name: raw.names,
        image: raw.image,
        status: raw.status,
        state: raw.state,
        labels: parse_labels(&raw.labels),
        created_at: raw.created_at,
    })
}

/// Derives which base service owns `service`, and the accessory suffix if
/// any. Prefixes over '-' segments are tried longest first, so with
/// `a`, `a-b` and `a-b-c` all present, `a-b-c` lands under `a-b`. A name
/// with no matching prefix is its own top-level service.
pub fn split_service(service: &str, all_services: &[String]) -> (String, Option<String>) {
    let parts: Vec<&str> = service.split('-').collect();
    for i in (1..parts.len()).rev() {
        let prefix = parts[..i].join("-");
        if all_services.iter().any(|s| s == &prefix) {
            let suffix = parts[i..].join("-");
            return (prefix, Some(suffix));
        }
    }
    (service.to_string(), None)
}

/// Runs one listing pass against the remote host and groups the records
/// into applications. Malformed lines and unlabeled containers are
/// dropped, never fatal.
pub fn discover(exec: &dyn RemoteExec) -> Result<Vec<Application>> {
    let out = exec.run(&commands::list_containers(), DEFAULT_TIMEOUT)?;
    tracing::debug!(exit = out.exit_code, "discovery listing returned");

    let records: Vec<ProcessRecord> = out
        .lines()
        .iter()
        .filter_map(|l| parse_record(l))
        .filter(|r| r.label("service").is_some_and(|s| !s.is_empty()))
        .collect();

    let mut apps = group_records(records);

    let proxy = probe_proxy(exec);
    for app in &mut apps {
        app.proxy_status = proxy.clone();
    }
    Ok(apps)
}

pub fn group_records(records: Vec<ProcessRecord>) -> Vec<Application> {
    let mut all_services: Vec<String> = records
        .iter()
        .filter_map(|r| r.label("service"))
        .map(|s| s.to_string())
        .collect();
    all_services.sort();
    all_services.dedup();

    // Keyed by (base service, destination).
    let mut apps: Vec<Application> = Vec::new();
    for record in records {
        let service = record.label("service").unwrap_or_default().to_string();
        let destination = record
            .label("destination")
            .filter(|d| !d.is_empty())
            .unwrap_or("production")
            .to_string();

        let (base, suffix) = split_service(&service, &all_services);
        let role = record
            .label("role")
            .filter(|r| !r.is_empty())
            .map(|r| r.to_string())
            .or(suffix);

        let app = match apps
            .iter_mut()
            .find(|a| a.service == base && a.destination == destination)
        {
            Some(app) => app,
            None => {
                apps.push(Application {
                    service: base.clone(),
                    destination: destination.clone(),
                    primaries: Vec::new(),
                    accessories: Vec::new(),
                    proxy_status: String::new(),
                });
                apps.last_mut().unwrap()
            }
        };

        match role.as_deref() {
            None | Some("") | Some("web") => app.primaries.push(record),
            Some(name) => match app.accessories.iter_mut().find(|a| a.name == name) {
                Some(acc) => acc.records.push(record),
                None => app.accessories.push(Accessory {
                    name: name.to_string(),
                    records: vec![record],
                }),
            },
        }
    }

    apps.sort_by(|a, b| {
        (a.service.as_str(), a.destination.as_str())
            .cmp(&(b.service.as_str(), b.destination.as_str()))
    });
    apps
}

/// Single probe for the shared ingress proxy; one status string stamped on
/// every application.
pub fn probe_proxy(exec: &dyn RemoteExec) -> String {
    match exec.run(&commands::proxy_status_probe(), DEFAULT_TIMEOUT) {
        Ok(out) => {
            let status = out.stdout.lines().next().unwrap_or("").trim();
            if status.is_empty() {
                "not running".into()
            } else if status.contains("Up") {
                "running".into()
            } else {
                status.to_string()
            }
        }
        Err(_) => "unknown".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(service: &str, role: &str, dest: &str, state: &str) -> ProcessRecord {
        let mut labels = HashMap::new();
        labels.insert("service".into(), service.into());
        if !role.is_empty() {
            labels.insert("role".into(), role.into());
        }
        if !dest.is_empty() {
            labels.insert("destination".into(), dest.into());
        }
        ProcessRecord {
            id: "abc123".into(),
            name: format!("{service}-1"),
            image: format!("registry.example.com/{service}:v42"),
            status: "Up 3 hours".into(),
            state: state.into(),
            labels,
            created_at: "2026-08-30 10:00:00 +0000 UTC".into(),
        }
    }

    fn services(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn split_prefers_longest_prefix() {
        let all = services(&["a", "a-b", "a-b-c"]);
        assert_eq!(
            split_service("a-b-c", &all),
            ("a-b".into(), Some("c".into()))
        );
        assert_eq!(split_service("a-b", &all), ("a".into(), Some("b".into())));
        assert_eq!(split_service("a", &all), ("a".into(), None));
    }

    #[test]
    fn split_handles_multi_segment_suffix() {
        let all = services(&["app", "app-postgres", "app-worker-extra"]);
        assert_eq!(
            split_service("app-worker-extra", &all),
            ("app".into(), Some("worker-extra".into()))
        );
        assert_eq!(
            split_service("app-postgres", &all),
            ("app".into(), Some("postgres".into()))
        );
    }

    #[test]
    fn split_standalone_name_is_top_level() {
        let all = services(&["standalone-app", "other"]);
        assert_eq!(
            split_service("standalone-app", &all),
            ("standalone-app".into(), None)
        );
    }

    #[test]
    fn parse_labels_drops_malformed_pairs() {
        let labels = parse_labels("service=web,destination=production,junk,role=");
        assert_eq!(labels.get("service").map(String::as_str), Some("web"));
        assert_eq!(labels.get("role").map(String::as_str), Some(""));
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn malformed_listing_line_is_dropped() {
        assert!(parse_record("not json at all").is_none());
        let line = r#"{"ID":"x","Names":"web-1","Image":"web:1","Labels":"service=web"}"#;
        let rec = parse_record(line).unwrap();
        assert_eq!(rec.label("service"), Some("web"));
    }

    #[test]
    fn grouping_merges_accessories_and_defaults_destination() {
        let apps = group_records(vec![
            record("web", "web", "", "running"),
            record("web", "", "", "exited"),
            record("web-postgres", "", "", "running"),
            record("web-postgres", "", "", "running"),
        ]);
        assert_eq!(apps.len(), 1);
        let app = &apps[0];
        assert_eq!(app.service, "web");
        assert_eq!(app.destination, "production");
        assert_eq!(app.primaries.len(), 2);
        assert_eq!(app.accessories.len(), 1);
        assert_eq!(app.accessories[0].name, "postgres");
        assert_eq!(app.accessories[0].records.len(), 2);
        assert_eq!(app.count_running(), 3);
    }

    #[test]
    fn grouping_invariant_holds_per_destination() {
        let apps = group_records(vec![
            record("api", "web", "production", "running"),
            record("api", "web", "staging", "running"),
        ]);
        assert_eq!(apps.len(), 2);
        for app in &apps {
            for r in &app.primaries {
                assert_eq!(r.label("service"), Some(app.service.as_str()));
                assert_eq!(r.label("destination"), Some(app.destination.as_str()));
            }
        }
    }

    #[test]
    fn apps_sorted_by_service_then_destination() {
        let apps = group_records(vec![
            record("zeta", "web", "production", "running"),
            record("api", "web", "staging", "running"),
            record("api", "web", "production", "running"),
        ]);
        let keys: Vec<(&str, &str)> = apps
            .iter()
            .map(|a| (a.service.as_str(), a.destination.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("api", "production"),
                ("api", "staging"),
                ("zeta", "production")
            ]
        );
    }

    #[test]
    fn version_tag_from_first_primary() {
        let apps = group_records(vec![record("web", "web", "", "running")]);
        assert_eq!(apps[0].version_tag(), "v42");

        let empty = Application {
            service: "x".into(),
            destination: "production".into(),
            primaries: vec![],
            accessories: vec![],
            proxy_status: String::new(),
        };
        assert_eq!(empty.version_tag(), "unknown");
    }
}
