//! Static action tables for the menu screens. The state machine resolves a
//! selection index to an `ActionId` here and dispatches on that identifier,
//! never on the raw index.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionId {
    Containers,
    FetchLogs,
    Details,
    StartApp,
    StopApp,
    RestartApp,
    RebootApp,
    ExecProbe,
    ProxyMenu,
    ProxyStatus,
    ProxyDetails,
    ProxyLogs,
    Back,
}

pub struct MenuAction {
    pub id: ActionId,
    pub label: &'static str,
    pub destructive: bool,
    pub confirm_message: &'static str,
}

const fn action(id: ActionId, label: &'static str) -> MenuAction {
    MenuAction {
        id,
        label,
        destructive: false,
        confirm_message: "",
    }
}

const fn destructive(id: ActionId, label: &'static str, confirm: &'static str) -> MenuAction {
    MenuAction {
        id,
        label,
        destructive: true,
        confirm_message: confirm,
    }
}

pub static APP_MENU: &[MenuAction] = &[
    action(ActionId::Containers, "Containers..."),
    action(ActionId::FetchLogs, "Fetch logs"),
    action(ActionId::Details, "Details"),
    action(ActionId::StartApp, "Start"),
    destructive(
        ActionId::StopApp,
        "Stop",
        "Stop all containers of this app?",
    ),
    action(ActionId::RestartApp, "Restart"),
    destructive(
        ActionId::RebootApp,
        "Reboot",
        "Stop and start all containers of this app?",
    ),
    action(ActionId::ExecProbe, "Exec probe"),
    action(ActionId::ProxyMenu, "Proxy..."),
    action(ActionId::Back, "Back"),
];

pub static PROXY_MENU: &[MenuAction] = &[
    action(ActionId::ProxyStatus, "Proxy status"),
    action(ActionId::ProxyDetails, "Proxy details"),
    action(ActionId::ProxyLogs, "Proxy logs (follow)"),
    action(ActionId::Back, "Back"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destructive_actions_carry_a_confirm_message() {
        for entry in APP_MENU.iter().chain(PROXY_MENU.iter()) {
            if entry.destructive {
                assert!(
                    !entry.confirm_message.is_empty(),
                    "{} has no confirm message",
                    entry.label
                );
            }
        }
    }

    #[test]
    fn every_menu_ends_with_back() {
        assert_eq!(APP_MENU.last().unwrap().id, ActionId::Back);
        assert_eq!(PROXY_MENU.last().unwrap().id, ActionId::Back);
    }
}
