//! Remote command strings for each menu leaf. Formatting only; nothing
//! here runs anything.

use crate::discover::Application;

const LIST_FORMAT: &str = concat!(
    r#"{"ID":"{{.ID}}","Names":"{{.Names}}","Image":"{{.Image}}","#,
    r#""Status":"{{.Status}}","State":"{{.State}}","#,
    r#""Labels":"{{.Labels}}","CreatedAt":"{{.CreatedAt}}"}"#,
);

pub fn list_containers() -> String {
    format!("docker ps -a --format '{LIST_FORMAT}'")
}

pub fn proxy_status_probe() -> String {
    r#"docker ps --filter "name=kamal-proxy" --format "{{.Status}}" | head -1"#.into()
}

pub fn proxy_detail() -> String {
    r#"docker ps --filter "name=kamal-proxy""#.into()
}

pub fn proxy_logs_follow() -> String {
    "docker logs -f --tail 100 kamal-proxy".into()
}

pub fn fetch_logs(app: &Application) -> String {
    format!(
        "docker ps -a --filter 'label=service={}' --filter 'label=destination={}' -q | xargs -r -n1 docker logs --tail 50",
        app.service, app.destination
    )
}

pub fn container_logs_follow(container: &str) -> String {
    format!("docker logs -f --tail 100 {container}")
}

pub fn start_container(container: &str) -> String {
    format!("docker start {container}")
}

pub fn stop_container(container: &str) -> String {
    format!("docker stop {container}")
}

pub fn restart_container(container: &str) -> String {
    format!("docker restart {container}")
}

pub fn inspect_app(app: &Application) -> String {
    format!(
        "docker ps -a --filter 'label=service={}' --filter 'label=destination={}'",
        app.service, app.destination
    )
}

pub fn start_app(app: &Application) -> String {
    format!(
        "docker ps -a --filter 'label=service={}' --filter 'label=destination={}' -q | xargs -r docker start",
        app.service, app.destination
    )
}

pub fn stop_app(app: &Application) -> String {
    format!(
        "docker ps --filter 'label=service={}' --filter 'label=destination={}' -q | xargs -r docker stop",
        app.service, app.destination
    )
}

pub fn restart_app(app: &Application) -> String {
    format!(
        "docker ps -a --filter 'label=service={}' --filter 'label=destination={}' -q | xargs -r docker restart",
        app.service, app.destination
    )
}

pub fn reboot_app(app: &Application) -> String {
    format!("{}; {}", stop_app(app), start_app(app))
}

pub fn exec_probe(app: &Application) -> String {
    format!(
        "docker ps --filter 'label=service={}' --filter 'label=destination={}' --filter 'label=role=web' -q | head -1 | xargs -r -I{{}} docker exec {{}} sh -c 'echo ok'",
        app.service, app.destination
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> Application {
        Application {
            service: "web".into(),
            destination: "staging".into(),
            primaries: vec![],
            accessories: vec![],
            proxy_status: String::new(),
        }
    }

    #[test]
    fn listing_emits_one_json_object_per_line() {
        let cmd = list_containers();
        assert!(cmd.starts_with("docker ps -a --format"));
        assert!(cmd.contains(r#""Labels":"{{.Labels}}""#));
    }

    #[test]
    fn app_commands_filter_by_service_and_destination() {
        let cmd = stop_app(&app());
        assert!(cmd.contains("label=service=web"));
        assert!(cmd.contains("label=destination=staging"));
    }
}
