pub mod menu;

use std::io::{self, Stdout};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use crossterm::cursor::{Hide, Show};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, BorderType, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap,
};

use crate::commands;
use crate::config::SessionDestination;
use crate::discover::{self, Application};
use crate::error::{Error, Result};
use crate::logbuf::LogBuffer;
use crate::remote::{DEFAULT_TIMEOUT, RemoteExec};
use crate::supervisor::{Supervisor, format_duration, spinner_frame};
use menu::{ActionId, MenuAction, APP_MENU, PROXY_MENU};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Apps,
    AppMenu,
    ContainerSelect,
    ProxyMenu,
}

/// One selectable row on the container screen, flattened from the selected
/// application's primaries and accessories. Rebuilt lazily on entry.
#[derive(Debug, Clone)]
struct ContainerEntry {
    name: String,
    role: String,
    status: String,
    running: bool,
}

/// What a confirmed destructive action will do. Stored as data so the
/// overlay needs no captured closures.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    AppAction(ActionId),
    StopContainer(String),
}

enum InputMode {
    Normal,
    Help,
    Confirm {
        message: String,
        accept_selected: bool,
        pending: Pending,
    },
}

pub struct App {
    exec: Arc<dyn RemoteExec>,
    host_label: String,
    project_dir: Option<PathBuf>,

    apps: Vec<Application>,
    destinations: Vec<SessionDestination>,

    screen: Screen,
    app_index: usize,
    menu_index: usize,
    proxy_index: usize,
    container_index: usize,
    containers: Vec<ContainerEntry>,

    input: InputMode,
    log: LogBuffer,
    supervisor: Supervisor,
    /// Set by workers (via the supervisor's throttled notifier) when new
    /// output wants a redraw before the next tick.
    wake: Arc<AtomicBool>,

    discover_rx: Option<mpsc::Receiver<Result<Vec<Application>>>>,
    discovering: bool,
}

impl App {
    pub fn new(
        exec: Arc<dyn RemoteExec>,
        host_label: String,
        project_dir: Option<PathBuf>,
    ) -> Self {
        let destinations = project_dir
            .as_deref()
            .map(crate::config::find_destinations)
            .unwrap_or_default();
        let log = LogBuffer::new();
        let wake = Arc::new(AtomicBool::new(false));
        let supervisor = {
            let wake = Arc::clone(&wake);
            Supervisor::with_notifier(
                log.clone(),
                Arc::new(move || {
                    wake.store(true, Ordering::Relaxed);
                }),
            )
        };
        Self {
            exec,
            host_label,
            project_dir,
            apps: Vec::new(),
            destinations,
            screen: Screen::Apps,
            app_index: 0,
            menu_index: 0,
            proxy_index: 0,
            container_index: 0,
            containers: Vec::new(),
            input: InputMode::Normal,
            log,
            supervisor,
            wake,
            discover_rx: None,
            discovering: false,
        }
    }

    fn selected_app(&self) -> Option<&Application> {
        self.apps.get(self.app_index)
    }

    /// Config file for the selected application's destination, when the
    /// project directory carries one.
    fn matching_destination(&self) -> Option<&SessionDestination> {
        let app = self.selected_app()?;
        self.destinations
            .iter()
            .find(|d| d.service == app.service)
    }

    fn refresh(&mut self) {
        if self.discovering {
            self.log.info("discovery already in progress");
            return;
        }
        self.discovering = true;
        self.log.info(&format!("discovering apps on {}", self.host_label));
        let (tx, rx) = mpsc::channel();
        self.discover_rx = Some(rx);
        let exec = Arc::clone(&self.exec);
        std::thread::spawn(move || {
            let _ = tx.send(discover::discover(exec.as_ref()));
        });
        if let Some(dir) = self.project_dir.as_deref() {
            self.destinations = crate::config::find_destinations(dir);
        }
    }

    /// True when a worker asked for a redraw since the last call.
    fn take_wake(&self) -> bool {
        self.wake.swap(false, Ordering::Relaxed)
    }

    /// Drains the discovery channel; the application list swaps in one step
    /// so the render loop never sees a half-built hierarchy. Returns true
    /// when a pass finished.
    fn drain_discovery(&mut self) -> bool {
        let Some(rx) = self.discover_rx.take() else {
            return false;
        };
        match rx.try_recv() {
            Ok(Ok(apps)) => {
                self.log.success(&format!(
                    "discovered {} app{}",
                    apps.len(),
                    if apps.len() == 1 { "" } else { "s" }
                ));
                self.apps = apps;
                self.app_index = clamp_index(self.app_index, self.apps.len());
                if self.screen == Screen::ContainerSelect {
                    self.rebuild_containers();
                }
                self.discovering = false;
                true
            }
            Ok(Err(e)) => {
                self.log.error(&format!("discovery failed: {e}"));
                self.discovering = false;
                true
            }
            Err(mpsc::TryRecvError::Empty) => {
                // Still in flight, keep waiting.
                self.discover_rx = Some(rx);
                false
            }
            Err(mpsc::TryRecvError::Disconnected) => {
                self.discovering = false;
                true
            }
        }
    }

    fn rebuild_containers(&mut self) {
        self.containers.clear();
        if let Some(app) = self.apps.get(self.app_index) {
            for rec in &app.primaries {
                self.containers.push(ContainerEntry {
                    name: rec.name.clone(),
                    role: "web".into(),
                    status: rec.status.clone(),
                    running: rec.is_running(),
                });
            }
            for acc in &app.accessories {
                for rec in &acc.records {
                    self.containers.push(ContainerEntry {
                        name: rec.name.clone(),
                        role: acc.name.clone(),
                        status: rec.status.clone(),
                        running: rec.is_running(),
                    });
                }
            }
        }
        self.container_index = clamp_index(self.container_index, self.containers.len());
    }

    fn move_selection(&mut self, delta: isize) {
        let (index, len) = match self.screen {
            Screen::Apps => (&mut self.app_index, self.apps.len()),
            Screen::AppMenu => (&mut self.menu_index, APP_MENU.len()),
            Screen::ProxyMenu => (&mut self.proxy_index, PROXY_MENU.len()),
            Screen::ContainerSelect => (&mut self.container_index, self.containers.len()),
        };
        if len == 0 {
            *index = 0;
            return;
        }
        let next = if delta >= 0 {
            index.saturating_add(delta as usize)
        } else {
            index.saturating_sub(delta.unsigned_abs())
        };
        *index = next.min(len - 1);
    }

    fn go_back(&mut self) {
        // A live stream never survives leaving its screen.
        self.supervisor.cancel();
        self.screen = match self.screen {
            Screen::Apps => Screen::Apps,
            Screen::AppMenu => Screen::Apps,
            Screen::ContainerSelect | Screen::ProxyMenu => Screen::AppMenu,
        };
    }

    fn reject_if_busy(&self) -> bool {
        if self.supervisor.is_busy() {
            self.log.info("operation in progress, input ignored");
            true
        } else {
            false
        }
    }

    fn open_confirm(&mut self, action: &MenuAction) {
        self.input = InputMode::Confirm {
            message: action.confirm_message.to_string(),
            accept_selected: false,
            pending: Pending::AppAction(action.id),
        };
    }

    fn resolve_confirm(&mut self, accepted: bool) {
        let prev = std::mem::replace(&mut self.input, InputMode::Normal);
        if !accepted {
            return;
        }
        if let InputMode::Confirm { pending, .. } = prev {
            match pending {
                Pending::AppAction(id) => self.dispatch(id),
                Pending::StopContainer(name) => {
                    let exec = Arc::clone(&self.exec);
                    let cmd = commands::stop_container(&name);
                    self.run_blocking(&format!("stop {name}"), exec, cmd);
                }
            }
        }
    }

    fn run_blocking(&self, label: &str, exec: Arc<dyn RemoteExec>, cmd: String) {
        if !self
            .supervisor
            .run_operation(label, move || exec.run(&cmd, DEFAULT_TIMEOUT))
        {
            self.log.info("operation in progress, input ignored");
        }
    }

    fn run_stream(&self, label: &str, exec: Arc<dyn RemoteExec>, cmd: String) {
        if !self.supervisor.run_streaming(label, move |on_line, cancel| {
            exec.stream(&cmd, on_line, cancel)
        }) {
            self.log.info("operation in progress, input ignored");
        }
    }

    /// Single dispatch point for every menu leaf.
    fn dispatch(&mut self, id: ActionId) {
        match id {
            ActionId::Containers => {
                self.rebuild_containers();
                self.container_index = 0;
                self.screen = Screen::ContainerSelect;
                return;
            }
            ActionId::ProxyMenu => {
                self.proxy_index = 0;
                self.screen = Screen::ProxyMenu;
                return;
            }
            ActionId::Back => {
                self.go_back();
                return;
            }
            _ => {}
        }

        let exec = Arc::clone(&self.exec);
        match id {
            ActionId::ProxyStatus => {
                self.run_blocking("proxy status", exec, commands::proxy_status_probe());
            }
            ActionId::ProxyDetails => {
                self.run_blocking("proxy details", exec, commands::proxy_detail());
            }
            ActionId::ProxyLogs => {
                self.run_stream("proxy logs", exec, commands::proxy_logs_follow());
            }
            _ => {
                let Some(app) = self.selected_app() else {
                    self.log.warn("no application selected");
                    return;
                };
                let service = app.service.clone();
                let (label, cmd) = match id {
                    ActionId::FetchLogs => ("fetch logs", commands::fetch_logs(app)),
                    ActionId::Details => ("details", commands::inspect_app(app)),
                    ActionId::StartApp => ("start", commands::start_app(app)),
                    ActionId::StopApp => ("stop", commands::stop_app(app)),
                    ActionId::RestartApp => ("restart", commands::restart_app(app)),
                    ActionId::RebootApp => ("reboot", commands::reboot_app(app)),
                    ActionId::ExecProbe => ("exec probe", commands::exec_probe(app)),
                    _ => return,
                };
                self.run_blocking(&format!("{label} {service}"), exec, cmd);
            }
        }
    }

    fn enter_menu_action(&mut self, table: &'static [MenuAction], index: usize) {
        let Some(action) = table.get(index) else {
            return;
        };
        let navigation = matches!(
            action.id,
            ActionId::Containers | ActionId::ProxyMenu | ActionId::Back
        );
        if !navigation && self.reject_if_busy() {
            return;
        }
        if action.destructive {
            self.open_confirm(action);
        } else {
            self.dispatch(action.id);
        }
    }

    fn container_op(&mut self, op: ActionId) {
        let Some(entry) = self.containers.get(self.container_index) else {
            return;
        };
        if self.reject_if_busy() {
            return;
        }
        let name = entry.name.clone();
        let exec = Arc::clone(&self.exec);
        match op {
            ActionId::FetchLogs => {
                self.run_stream(
                    &format!("logs {name}"),
                    exec,
                    commands::container_logs_follow(&name),
                );
            }
            ActionId::RestartApp => {
                self.run_blocking(
                    &format!("restart {name}"),
                    exec,
                    commands::restart_container(&name),
                );
            }
            ActionId::StartApp => {
                self.run_blocking(
                    &format!("start {name}"),
                    exec,
                    commands::start_container(&name),
                );
            }
            ActionId::StopApp => {
                self.input = InputMode::Confirm {
                    message: format!("Stop container {name}?"),
                    accept_selected: false,
                    pending: Pending::StopContainer(name),
                };
            }
            _ => {}
        }
    }

    /// Returns Ok(true) to leave the event loop.
    pub fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> Result<bool> {
        if code == KeyCode::Char('c') && modifiers.contains(KeyModifiers::CONTROL) {
            self.supervisor.cancel();
            return Ok(true);
        }

        match self.input {
            InputMode::Help => {
                self.input = InputMode::Normal;
                return Ok(false);
            }
            InputMode::Confirm { .. } => {
                match code {
                    KeyCode::Left | KeyCode::Right | KeyCode::Char('h') | KeyCode::Char('l')
                    | KeyCode::Tab => {
                        if let InputMode::Confirm {
                            accept_selected, ..
                        } = &mut self.input
                        {
                            *accept_selected = !*accept_selected;
                        }
                    }
                    KeyCode::Char('y') => self.resolve_confirm(true),
                    KeyCode::Char('n') | KeyCode::Esc => self.resolve_confirm(false),
                    KeyCode::Enter => {
                        let accepted = matches!(
                            self.input,
                            InputMode::Confirm {
                                accept_selected: true,
                                ..
                            }
                        );
                        self.resolve_confirm(accepted);
                    }
                    _ => {}
                }
                return Ok(false);
            }
            InputMode::Normal => {}
        }

        match code {
            KeyCode::Char('q') => {
                self.supervisor.cancel();
                return Ok(true);
            }
            KeyCode::Char('?') => self.input = InputMode::Help,
            KeyCode::Up => self.move_selection(-1),
            KeyCode::Down => self.move_selection(1),
            KeyCode::Char('j') => self.log.scroll_by(-1),
            KeyCode::Char('k') => self.log.scroll_by(1),
            KeyCode::PageUp => self.log.scroll_by(10),
            KeyCode::PageDown => self.log.scroll_by(-10),
            KeyCode::Char('G') => self.log.set_following(true),
            KeyCode::Char('c') => self.log.clear(),
            KeyCode::Esc | KeyCode::Char('b') => self.go_back(),
            KeyCode::Char('r') => match self.screen {
                Screen::ContainerSelect => self.container_op(ActionId::RestartApp),
                _ => {
                    if !self.reject_if_busy() {
                        self.refresh();
                    }
                }
            },
            KeyCode::Enter => match self.screen {
                Screen::Apps => {
                    if !self.apps.is_empty() {
                        self.menu_index = 0;
                        self.screen = Screen::AppMenu;
                    }
                }
                Screen::AppMenu => self.enter_menu_action(APP_MENU, self.menu_index),
                Screen::ProxyMenu => self.enter_menu_action(PROXY_MENU, self.proxy_index),
                Screen::ContainerSelect => self.container_op(ActionId::FetchLogs),
            },
            KeyCode::Char('l') if self.screen == Screen::ContainerSelect => {
                self.container_op(ActionId::FetchLogs)
            }
            KeyCode::Char('s') if self.screen == Screen::ContainerSelect => {
                self.container_op(ActionId::StopApp)
            }
            KeyCode::Char('S') if self.screen == Screen::ContainerSelect => {
                self.container_op(ActionId::StartApp)
            }
            _ => {}
        }
        Ok(false)
    }

    fn draw(&mut self, f: &mut ratatui::Frame) {
        let size = f.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(size);

        self.draw_header(f, chunks[0]);
        self.draw_main(f, chunks[1]);
        self.draw_footer(f, chunks[2]);
        self.draw_modal(f);
    }

    fn breadcrumb(&self) -> String {
        let service = self
            .selected_app()
            .map(|a| {
                if a.destination == "production" {
                    a.service.clone()
                } else {
                    format!("{} ({})", a.service, a.destination)
                }
            })
            .unwrap_or_else(|| "<none>".into());
        match self.screen {
            Screen::Apps => "apps".into(),
            Screen::AppMenu => format!("apps > {service}"),
            Screen::ContainerSelect => format!("apps > {service} > containers"),
            Screen::ProxyMenu => format!("apps > {service} > proxy"),
        }
    }

    fn draw_header(&self, f: &mut ratatui::Frame, area: Rect) {
        let mut spans = vec![
            Span::styled("Fleetdeck", Style::default().fg(Color::Cyan)),
            Span::raw("  "),
            Span::styled(self.host_label.clone(), Style::default().fg(Color::Gray)),
            Span::raw("  "),
            Span::styled(self.breadcrumb(), Style::default().fg(Color::LightBlue)),
        ];

        let snap = self.supervisor.snapshot();
        if snap.busy() {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                format!(
                    "{} {} {}",
                    spinner_frame(snap.elapsed),
                    snap.label,
                    format_duration(snap.elapsed)
                ),
                Style::default().fg(Color::Yellow),
            ));
        } else if self.discovering {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                "discovering...",
                Style::default().fg(Color::Yellow),
            ));
        }

        let p = Paragraph::new(Text::from(Line::from(spans))).block(
            Block::default()
                .borders(Borders::BOTTOM)
                .border_type(BorderType::Plain),
        );
        f.render_widget(p, area);
    }

    fn draw_footer(&self, f: &mut ratatui::Frame, area: Rect) {
        let hint = match (&self.input, self.screen) {
            (InputMode::Confirm { .. }, _) => "[←/→] Choose  [Enter] Confirm  [Esc/n] Decline",
            (InputMode::Help, _) => "Press any key to close help",
            (_, Screen::Apps) => {
                "[↑/↓] Move  [Enter] Open  [r] Refresh  [j/k] Scroll log  [c] Clear  [?] Help  [q] Quit"
            }
            (_, Screen::AppMenu) => {
                "[↑/↓] Move  [Enter] Select  [Esc/b] Back  [j/k] Scroll log  [?] Help  [q] Quit"
            }
            (_, Screen::ContainerSelect) => {
                "[↑/↓] Move  [Enter/l] Logs  [r] Restart  [s] Stop  [S] Start  [Esc/b] Back  [q] Quit"
            }
            (_, Screen::ProxyMenu) => "[↑/↓] Move  [Enter] Select  [Esc/b] Back  [q] Quit",
        };
        let p = Paragraph::new(hint)
            .style(Style::default().fg(Color::Gray))
            .block(Block::default().borders(Borders::TOP));
        f.render_widget(p, area);
    }

    fn draw_main(&mut self, f: &mut ratatui::Frame, area: Rect) {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
            .split(area);

        match self.screen {
            Screen::Apps => {
                if self.destinations.is_empty() {
                    self.draw_app_list(f, cols[0]);
                } else {
                    let rows = Layout::default()
                        .direction(Direction::Vertical)
                        .constraints([
                            Constraint::Min(0),
                            Constraint::Length(self.destinations.len() as u16 + 2),
                        ])
                        .split(cols[0]);
                    self.draw_app_list(f, rows[0]);
                    self.draw_destinations(f, rows[1]);
                }
            }
            Screen::AppMenu => self.draw_menu(f, cols[0], "Actions", APP_MENU, self.menu_index),
            Screen::ProxyMenu => self.draw_menu(f, cols[0], "Proxy", PROXY_MENU, self.proxy_index),
            Screen::ContainerSelect => self.draw_containers(f, cols[0]),
        }

        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(9), Constraint::Min(0)])
            .split(cols[1]);
        self.draw_status(f, right[0]);
        self.draw_log(f, right[1]);
    }

    fn draw_app_list(&self, f: &mut ratatui::Frame, area: Rect) {
        let items: Vec<ListItem> = if self.apps.is_empty() {
            vec![ListItem::new(Span::styled(
                if self.discovering {
                    "discovering..."
                } else {
                    "no applications found (r to refresh)"
                },
                Style::default().fg(Color::DarkGray),
            ))]
        } else {
            self.apps
                .iter()
                .map(|app| {
                    let running = app.count_running();
                    let total = app.container_count();
                    let dot = if running > 0 { "●" } else { "○" };
                    let dot_color = if running == total && total > 0 {
                        Color::Green
                    } else if running > 0 {
                        Color::Yellow
                    } else {
                        Color::Red
                    };
                    ListItem::new(Line::from(vec![
                        Span::styled(format!("{dot} "), Style::default().fg(dot_color)),
                        Span::raw(format!("{} ", app.service)),
                        Span::styled(
                            format!("[{}] {running}/{total}", app.destination),
                            Style::default().fg(Color::Gray),
                        ),
                    ]))
                })
                .collect()
        };

        let mut state = ListState::default();
        if !self.apps.is_empty() {
            state.select(Some(self.app_index));
        }
        let list = List::new(items)
            .block(
                Block::default()
                    .title("Applications")
                    .borders(Borders::ALL),
            )
            .highlight_style(
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            );
        f.render_stateful_widget(list, area, &mut state);
    }

    fn draw_menu(
        &self,
        f: &mut ratatui::Frame,
        area: Rect,
        title: &str,
        table: &[MenuAction],
        index: usize,
    ) {
        let items: Vec<ListItem> = table
            .iter()
            .map(|a| {
                let style = if a.destructive {
                    Style::default().fg(Color::Red)
                } else {
                    Style::default()
                };
                ListItem::new(Span::styled(a.label, style))
            })
            .collect();
        let mut state = ListState::default();
        state.select(Some(index.min(table.len().saturating_sub(1))));
        let list = List::new(items)
            .block(Block::default().title(title.to_string()).borders(Borders::ALL))
            .highlight_style(
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            );
        f.render_stateful_widget(list, area, &mut state);
    }

    fn draw_containers(&self, f: &mut ratatui::Frame, area: Rect) {
        let items: Vec<ListItem> = if self.containers.is_empty() {
            vec![ListItem::new(Span::styled(
                "no containers",
                Style::default().fg(Color::DarkGray),
            ))]
        } else {
            self.containers
                .iter()
                .map(|c| {
                    let dot_color = if c.running { Color::Green } else { Color::Red };
                    ListItem::new(Line::from(vec![
                        Span::styled("● ", Style::default().fg(dot_color)),
                        Span::raw(format!("{} ", c.name)),
                        Span::styled(
                            format!("[{}] {}", c.role, c.status),
                            Style::default().fg(Color::Gray),
                        ),
                    ]))
                })
                .collect()
        };
        let mut state = ListState::default();
        if !self.containers.is_empty() {
            state.select(Some(self.container_index));
        }
        let list = List::new(items)
            .block(Block::default().title("Containers").borders(Borders::ALL))
            .highlight_style(
                Style::default()
                    .fg(Color::Black)
                    .bg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            );
        f.render_stateful_widget(list, area, &mut state);
    }

    /// One row per loaded deploy destination; the flag marks the one whose
    /// service matches the selected application.
    fn destination_rows(&self) -> Vec<(String, bool)> {
        let selected = self.selected_app().map(|a| a.service.as_str());
        self.destinations
            .iter()
            .map(|d| {
                let name = if d.name.is_empty() { "(base)" } else { &d.name };
                let text = format!("{name}  {}  {}", d.service, d.config_path.display());
                (text, selected == Some(d.service.as_str()))
            })
            .collect()
    }

    fn draw_destinations(&self, f: &mut ratatui::Frame, area: Rect) {
        let items: Vec<ListItem> = self
            .destination_rows()
            .into_iter()
            .map(|(text, matches)| {
                let style = if matches {
                    Style::default().fg(Color::Cyan)
                } else {
                    Style::default().fg(Color::Gray)
                };
                ListItem::new(Span::styled(text, style))
            })
            .collect();
        let list = List::new(items)
            .block(Block::default().title("Destinations").borders(Borders::ALL));
        f.render_widget(list, area);
    }

    fn draw_status(&self, f: &mut ratatui::Frame, area: Rect) {
        let mut lines: Vec<Line> = Vec::new();
        match self.selected_app() {
            Some(app) => {
                lines.push(status_line("service", &app.service));
                lines.push(status_line("destination", &app.destination));
                lines.push(status_line("version", &app.version_tag()));
                lines.push(status_line(
                    "containers",
                    &format!("{} running / {}", app.count_running(), app.container_count()),
                ));
                let accessories = if app.accessories.is_empty() {
                    "none".to_string()
                } else {
                    app.accessories
                        .iter()
                        .map(|a| a.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                lines.push(status_line("accessories", &accessories));
                let proxy_color = match app.proxy_status.as_str() {
                    "running" => Color::Green,
                    "not running" => Color::Red,
                    _ => Color::Yellow,
                };
                lines.push(Line::from(vec![
                    Span::styled("proxy: ", Style::default().fg(Color::Gray)),
                    Span::styled(app.proxy_status.clone(), Style::default().fg(proxy_color)),
                ]));
                if let Some(dest) = self.matching_destination() {
                    lines.push(status_line(
                        "config",
                        &dest.config_path.display().to_string(),
                    ));
                }
            }
            None => lines.push(Line::from(Span::styled(
                "no application selected",
                Style::default().fg(Color::DarkGray),
            ))),
        }
        let p = Paragraph::new(Text::from(lines))
            .block(Block::default().title("Status").borders(Borders::ALL));
        f.render_widget(p, area);
    }

    fn draw_log(&self, f: &mut ratatui::Frame, area: Rect) {
        let snap = self.log.snapshot();
        let height = area.height.saturating_sub(2) as usize;
        let scroll = self.log.scroll();
        let end = snap.len().saturating_sub(scroll);
        let start = end.saturating_sub(height);

        let lines: Vec<Line> = snap[start..end]
            .iter()
            .map(|l| Line::from(Span::styled(l.clone(), log_line_style(l))))
            .collect();

        let title = if scroll > 0 {
            format!("Log (scrolled {scroll}, G to follow)")
        } else {
            "Log".to_string()
        };
        let p = Paragraph::new(Text::from(lines))
            .block(Block::default().title(title).borders(Borders::ALL));
        f.render_widget(p, area);
    }

    fn draw_modal(&self, f: &mut ratatui::Frame) {
        match &self.input {
            InputMode::Normal => {}
            InputMode::Help => {
                let area = centered_rect(60, 60, f.area());
                f.render_widget(Clear, area);
                let text = vec![
                    Line::from("Navigation"),
                    Line::from("  ↑/↓        move selection"),
                    Line::from("  Enter      open / run selected"),
                    Line::from("  Esc, b     back (stops a live stream)"),
                    Line::from("  r          refresh apps (restart container on container screen)"),
                    Line::from(""),
                    Line::from("Containers"),
                    Line::from("  Enter, l   follow logs"),
                    Line::from("  s / S      stop / start"),
                    Line::from(""),
                    Line::from("Log pane"),
                    Line::from("  j/k        scroll, PgUp/PgDn faster"),
                    Line::from("  G          jump to newest"),
                    Line::from("  c          clear"),
                    Line::from(""),
                    Line::from("  q, Ctrl+C  quit"),
                ];
                let p = Paragraph::new(Text::from(text))
                    .wrap(Wrap { trim: false })
                    .block(
                        Block::default()
                            .title("Help")
                            .borders(Borders::ALL)
                            .border_type(BorderType::Double),
                    );
                f.render_widget(p, area);
            }
            InputMode::Confirm {
                message,
                accept_selected,
                ..
            } => {
                let area = centered_rect(50, 20, f.area());
                f.render_widget(Clear, area);
                let yes_style = if *accept_selected {
                    Style::default().fg(Color::Black).bg(Color::Red)
                } else {
                    Style::default().fg(Color::Red)
                };
                let no_style = if *accept_selected {
                    Style::default().fg(Color::Green)
                } else {
                    Style::default().fg(Color::Black).bg(Color::Green)
                };
                let text = vec![
                    Line::from(message.clone()),
                    Line::from(""),
                    Line::from(vec![
                        Span::raw("   "),
                        Span::styled("[ Yes ]", yes_style),
                        Span::raw("   "),
                        Span::styled("[ No ]", no_style),
                    ]),
                ];
                let p = Paragraph::new(Text::from(text))
                    .wrap(Wrap { trim: false })
                    .block(
                        Block::default()
                            .title("Confirm")
                            .borders(Borders::ALL)
                            .border_type(BorderType::Double),
                    );
                f.render_widget(p, area);
            }
        }
    }
}

fn status_line<'a>(key: &str, value: &str) -> Line<'a> {
    Line::from(vec![
        Span::styled(format!("{key}: "), Style::default().fg(Color::Gray)),
        Span::raw(value.to_string()),
    ])
}

fn log_line_style(line: &str) -> Style {
    let body = line.get(9..).unwrap_or(line);
    if body.starts_with('✓') {
        Style::default().fg(Color::Green)
    } else if body.starts_with('✗') {
        Style::default().fg(Color::Red)
    } else if body.starts_with('⚠') {
        Style::default().fg(Color::Yellow)
    } else if body.starts_with('ℹ') {
        Style::default().fg(Color::Cyan)
    } else if body.starts_with('▶') {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    }
}

fn clamp_index(index: usize, len: usize) -> usize {
    if len == 0 { 0 } else { index.min(len - 1) }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}

pub fn run_tui(
    exec: Arc<dyn RemoteExec>,
    host_label: String,
    project_dir: Option<PathBuf>,
) -> Result<()> {
    let mut stdout = io::stdout();
    enable_raw_mode().map_err(|e| Error::msg(e.to_string()))?;
    execute!(stdout, EnterAlternateScreen, Hide).map_err(|e| Error::msg(e.to_string()))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).map_err(|e| Error::msg(e.to_string()))?;
    terminal
        .clear()
        .map_err(|e| Error::msg(format!("tui clear failed: {e}")))?;

    let mut app = App::new(exec, host_label, project_dir);
    app.refresh();
    let result = run_loop(&mut terminal, app);

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen, Show).ok();

    result
}

fn run_loop(terminal: &mut Terminal<CrosstermBackend<Stdout>>, mut app: App) -> Result<()> {
    // Wakeups from stream output (already coalesced by the supervisor's
    // throttle) and key events redraw immediately; the tick keeps the
    // spinner and clock moving otherwise.
    let tick = Duration::from_millis(100);
    let poll_slice = Duration::from_millis(25);
    let mut last_draw: Option<Instant> = None;

    loop {
        let mut needs_draw = app.drain_discovery();
        needs_draw |= app.take_wake();
        needs_draw |= last_draw.is_none_or(|t| t.elapsed() >= tick);

        if needs_draw {
            let mut draw_panicked = false;
            let draw_result = terminal.draw(|f| {
                if catch_unwind(AssertUnwindSafe(|| app.draw(f))).is_err() {
                    draw_panicked = true;
                }
            });
            if draw_panicked {
                app.log.error("draw panic, display repaired");
                let _ = terminal.clear();
                continue;
            }
            if let Err(e) = draw_result {
                app.log.error(&format!("draw error: {e}"));
                let _ = terminal.clear();
                continue;
            }
            last_draw = Some(Instant::now());
        }

        if event::poll(poll_slice).map_err(|e| Error::msg(e.to_string()))? {
            match event::read().map_err(|e| Error::msg(e.to_string()))? {
                Event::Key(k) => {
                    if k.kind != KeyEventKind::Press {
                        continue;
                    }
                    if app.handle_key(k.code, k.modifiers)? {
                        break;
                    }
                    app.wake.store(true, Ordering::Relaxed);
                }
                Event::Resize(_, _) => {
                    app.wake.store(true, Ordering::Relaxed);
                }
                _ => {}
            }
        }
    }
    Ok(())
}
