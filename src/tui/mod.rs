use std::io;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};

use crate::core::{Category, CheckStatus, FixOutcome, FixStatus, HostInfo, Report};
use crate::fix::{CommandExecutor, Fix, FixContext, SudoEscalation};
use crate::logs::{AuditLogEntry, AuditSink};
use crate::orchestrator::{ConfirmPrompt, ConfirmationPolicy, FixRun, PlanOptions};
use crate::registry::Registry;
use crate::scan::{CancelToken, ScanRequest, ScanRunner};
use crate::system::SystemProbe;

/// Everything the menu needs, resolved from config by the CLI.
pub struct MenuOptions {
    pub registry: Arc<Registry>,
    pub system: Arc<dyn SystemProbe>,
    pub host: HostInfo,
    pub categories: Vec<Category>,
    pub exclude: Vec<String>,
    pub concurrency: usize,
    pub per_probe_timeout: Duration,
    pub include_warnings: bool,
    pub command_timeout: Duration,
    pub home_dir: PathBuf,
    pub color: bool,
}

pub fn run(opts: MenuOptions) -> Result<()> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("failed to switch to the alternate screen")?;

    let mut terminal =
        Terminal::new(CrosstermBackend::new(stdout)).context("failed to initialise the terminal")?;
    terminal.clear().ok();

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| run_app(&mut terminal, opts)));

    let _ = terminal.show_cursor();
    let _ = disable_raw_mode();
    let mut stdout = io::stdout();
    let _ = execute!(stdout, LeaveAlternateScreen);

    match res {
        Ok(res) => res,
        Err(_) => Err(anyhow::anyhow!(
            "the menu panicked (the terminal state should have been restored)"
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Home,
    Running,
    Report,
    Plan,
    FixResult,
    Logs,
    Error,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuItem {
    Scan(Category),
    FullScan,
    AutoFix,
    PostInstall,
    AuditLogs,
    Quit,
}

const MENU: [MenuItem; 9] = [
    MenuItem::Scan(Category::Health),
    MenuItem::Scan(Category::Drivers),
    MenuItem::Scan(Category::Security),
    MenuItem::Scan(Category::Desktop),
    MenuItem::FullScan,
    MenuItem::AutoFix,
    MenuItem::PostInstall,
    MenuItem::AuditLogs,
    MenuItem::Quit,
];

impl MenuItem {
    fn title(self) -> &'static str {
        match self {
            MenuItem::Scan(category) => category.title(),
            MenuItem::FullScan => "Full scan",
            MenuItem::AutoFix => "Auto-fix",
            MenuItem::PostInstall => Category::Setup.title(),
            MenuItem::AuditLogs => "Audit logs",
            MenuItem::Quit => "Quit",
        }
    }

    fn description(self) -> &'static str {
        match self {
            MenuItem::Scan(Category::Health) => {
                "Disk space, memory, temperature, swap, failed units, load and the package database."
            }
            MenuItem::Scan(Category::Drivers) => {
                "NVIDIA, Wi-Fi, audio, Bluetooth, firmware updates and video acceleration."
            }
            MenuItem::Scan(Category::Security) => {
                "Firewall, SELinux, SSH, automatic updates, password policy, file permissions and kernel settings."
            }
            MenuItem::Scan(Category::Desktop) => {
                "Desktop session, display server, fonts, Flatpak and desktop portals."
            }
            MenuItem::FullScan => "Run every configured check and show the health score.",
            MenuItem::AutoFix => {
                "Scan, then review and apply fixes for failed checks. Each fix asks for confirmation."
            }
            MenuItem::Scan(Category::Setup) | MenuItem::PostInstall => {
                "DNF download tuning, RPM Fusion, Flathub, OpenH264, multimedia codecs and development tools."
            }
            MenuItem::AuditLogs => "Fix runs recorded under ~/.config/fedchecker/logs/.",
            MenuItem::Quit => "Leave the menu.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Scan,
    PlanScan,
    Fix,
}

struct ConfirmRequest {
    fix_id: String,
    preview: Vec<String>,
    reply: mpsc::Sender<bool>,
}

enum WorkerMsg {
    Scanned(Report),
    Confirm(ConfirmRequest),
    Outcome(FixOutcome),
    Fixed {
        run: FixRun,
        audit_path: Option<PathBuf>,
    },
}

struct Pending {
    job: Job,
    rx: mpsc::Receiver<WorkerMsg>,
    cancel: CancelToken,
    started_at: Instant,
}

/// Forwards confirmations from the fix worker to the UI thread and waits for the answer.
struct ChannelPrompt {
    tx: mpsc::Sender<WorkerMsg>,
}

impl ConfirmPrompt for ChannelPrompt {
    fn confirm(&self, fix_id: &str, preview: &[String]) -> bool {
        let (reply, answer) = mpsc::channel();
        let req = ConfirmRequest {
            fix_id: fix_id.to_string(),
            preview: preview.to_vec(),
            reply,
        };
        if self.tx.send(WorkerMsg::Confirm(req)).is_err() {
            return false;
        }
        answer.recv().unwrap_or(false)
    }
}

struct App {
    opts: MenuOptions,
    screen: Screen,
    help_return_to: Screen,
    menu_state: ListState,

    pending: Option<Pending>,
    confirm: Option<ConfirmRequest>,
    status: Option<String>,

    report: Option<Report>,
    report_state: ListState,
    plan: Vec<String>,
    plan_state: ListState,
    outcomes: Vec<FixOutcome>,
    warnings: Vec<String>,
    audit_path: Option<PathBuf>,
    logs: Vec<AuditLogEntry>,
    logs_state: ListState,
    error: Option<String>,

    tick: u64,
}

impl App {
    fn new(opts: MenuOptions) -> Self {
        let mut menu_state = ListState::default();
        menu_state.select(Some(0));
        Self {
            opts,
            screen: Screen::Home,
            help_return_to: Screen::Home,
            menu_state,
            pending: None,
            confirm: None,
            status: None,
            report: None,
            report_state: ListState::default(),
            plan: Vec::new(),
            plan_state: ListState::default(),
            outcomes: Vec::new(),
            warnings: Vec::new(),
            audit_path: None,
            logs: Vec::new(),
            logs_state: ListState::default(),
            error: None,
            tick: 0,
        }
    }

    fn selected_menu_item(&self) -> MenuItem {
        let idx = self.menu_state.selected().unwrap_or(0).min(MENU.len() - 1);
        MENU[idx]
    }

    fn fix_running(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| p.job == Job::Fix)
    }
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, opts: MenuOptions) -> Result<()> {
    let mut app = App::new(opts);

    let tick_rate = Duration::from_millis(200);
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| draw(f, &mut app)).context("failed to draw the screen")?;

        poll_worker(&mut app);

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout).context("failed to wait for terminal events")? {
            if let Event::Key(key) = event::read().context("failed to read a terminal event")? {
                if key.kind == KeyEventKind::Press && handle_key(&mut app, key) {
                    break;
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick = app.tick.wrapping_add(1);
            last_tick = Instant::now();
        }
    }

    Ok(())
}

fn poll_worker(app: &mut App) {
    let Some(pending) = app.pending.take() else {
        return;
    };
    loop {
        match pending.rx.try_recv() {
            Ok(msg) => {
                if apply_worker_msg(app, pending.job, pending.cancel.is_cancelled(), msg) {
                    return;
                }
            }
            Err(mpsc::TryRecvError::Empty) => break,
            Err(mpsc::TryRecvError::Disconnected) => {
                app.confirm = None;
                open_error(
                    app,
                    format!(
                        "the background task stopped unexpectedly after {}s",
                        pending.started_at.elapsed().as_secs()
                    ),
                );
                return;
            }
        }
    }
    app.pending = Some(pending);
}

/// Returns true once the job has delivered its final message.
fn apply_worker_msg(app: &mut App, job: Job, cancelled: bool, msg: WorkerMsg) -> bool {
    match msg {
        WorkerMsg::Scanned(report) => {
            app.status = None;
            if job == Job::PlanScan && !cancelled {
                app.report = Some(report);
                open_plan(app);
            } else {
                app.report = Some(report);
                app.report_state.select(Some(0));
                app.screen = Screen::Report;
            }
            true
        }
        WorkerMsg::Confirm(req) => {
            app.confirm = Some(req);
            false
        }
        WorkerMsg::Outcome(outcome) => {
            app.outcomes.push(outcome);
            false
        }
        WorkerMsg::Fixed { run, audit_path } => {
            app.status = None;
            app.confirm = None;
            app.outcomes = run.outcomes;
            app.warnings = run.warnings;
            app.audit_path = audit_path;
            app.screen = Screen::FixResult;
            true
        }
    }
}

fn open_error(app: &mut App, msg: impl Into<String>) {
    app.error = Some(msg.into());
    app.screen = Screen::Error;
}

fn open_plan(app: &mut App) {
    let Some(report) = app.report.as_ref() else {
        return;
    };
    let options = PlanOptions {
        include_warnings: app.opts.include_warnings,
        only: Vec::new(),
    };
    app.plan = crate::orchestrator::plan_fixes(&app.opts.registry, report, &options)
        .iter()
        .map(|f| f.id().to_string())
        .collect();
    app.plan_state.select(if app.plan.is_empty() { None } else { Some(0) });
    app.screen = Screen::Plan;
}

fn refresh_logs(app: &mut App) {
    match crate::logs::list_audit_logs(&app.opts.home_dir) {
        Ok(entries) => {
            app.logs = entries;
            app.logs_state.select(if app.logs.is_empty() { None } else { Some(0) });
            app.screen = Screen::Logs;
        }
        Err(err) => open_error(app, format!("{err:#}")),
    }
}

fn answer_confirm(app: &mut App, accepted: bool) {
    if let Some(req) = app.confirm.take() {
        let _ = req.reply.send(accepted);
    }
}

fn handle_key(app: &mut App, key: KeyEvent) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        if app.fix_running() {
            answer_confirm(app, false);
            cancel_pending(app);
            return false;
        }
        return true;
    }

    if app.confirm.is_some() {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => answer_confirm(app, true),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => answer_confirm(app, false),
            _ => {}
        }
        return false;
    }

    match app.screen {
        Screen::Home => match key.code {
            KeyCode::Up | KeyCode::Char('k') => move_selection(&mut app.menu_state, MENU.len(), -1),
            KeyCode::Down | KeyCode::Char('j') => move_selection(&mut app.menu_state, MENU.len(), 1),
            KeyCode::Enter => {
                let item = app.selected_menu_item();
                return activate(app, item);
            }
            KeyCode::Char('?') => open_help(app),
            KeyCode::Char('q') | KeyCode::Esc => return true,
            _ => {}
        },
        Screen::Running => {
            if key.code == KeyCode::Esc {
                cancel_pending(app);
            }
        }
        Screen::Report => {
            let len = app.report.as_ref().map_or(0, |r| r.results().count());
            match key.code {
                KeyCode::Up | KeyCode::Char('k') => move_selection(&mut app.report_state, len, -1),
                KeyCode::Down | KeyCode::Char('j') => move_selection(&mut app.report_state, len, 1),
                KeyCode::Char('f') => open_plan(app),
                KeyCode::Char('?') => open_help(app),
                KeyCode::Char('q') | KeyCode::Esc => app.screen = Screen::Home,
                _ => {}
            }
        }
        Screen::Plan => match key.code {
            KeyCode::Up | KeyCode::Char('k') => move_selection(&mut app.plan_state, app.plan.len(), -1),
            KeyCode::Down | KeyCode::Char('j') => move_selection(&mut app.plan_state, app.plan.len(), 1),
            KeyCode::Enter | KeyCode::Char('a') => {
                if !app.plan.is_empty() {
                    start_fix(app);
                }
            }
            KeyCode::Char('?') => open_help(app),
            KeyCode::Char('q') | KeyCode::Esc => app.screen = Screen::Home,
            _ => {}
        },
        Screen::FixResult => {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char('q')) {
                app.screen = Screen::Home;
            }
        }
        Screen::Logs => match key.code {
            KeyCode::Up | KeyCode::Char('k') => move_selection(&mut app.logs_state, app.logs.len(), -1),
            KeyCode::Down | KeyCode::Char('j') => move_selection(&mut app.logs_state, app.logs.len(), 1),
            KeyCode::Char('r') => refresh_logs(app),
            KeyCode::Char('q') | KeyCode::Esc => app.screen = Screen::Home,
            _ => {}
        },
        Screen::Error => app.screen = Screen::Home,
        Screen::Help => app.screen = app.help_return_to,
    }
    false
}

fn open_help(app: &mut App) {
    app.help_return_to = app.screen;
    app.screen = Screen::Help;
}

fn cancel_pending(app: &mut App) {
    if let Some(pending) = app.pending.as_ref() {
        pending.cancel.cancel();
        app.status = Some(match pending.job {
            Job::Fix => "cancelling: the current fix will finish, the rest are skipped".to_string(),
            Job::Scan | Job::PlanScan => "cancelling...".to_string(),
        });
    }
}

fn move_selection(state: &mut ListState, len: usize, delta: isize) {
    if len == 0 {
        state.select(None);
        return;
    }
    let cur = state.selected().unwrap_or(0) as isize;
    let next = (cur + delta).rem_euclid(len as isize) as usize;
    state.select(Some(next));
}

/// Returns true when the menu should close.
fn activate(app: &mut App, item: MenuItem) -> bool {
    match item {
        MenuItem::Scan(category) => start_scan(app, vec![category], Job::Scan),
        MenuItem::FullScan => {
            let categories = app.opts.categories.clone();
            start_scan(app, categories, Job::Scan);
        }
        MenuItem::AutoFix => {
            let categories = app.opts.categories.clone();
            start_scan(app, categories, Job::PlanScan);
        }
        MenuItem::PostInstall => start_scan(app, vec![Category::Setup], Job::PlanScan),
        MenuItem::AuditLogs => refresh_logs(app),
        MenuItem::Quit => return true,
    }
    false
}

fn start_scan(app: &mut App, categories: Vec<Category>, job: Job) {
    let cancel = CancelToken::new();
    let req = ScanRequest {
        categories,
        concurrency: app.opts.concurrency,
        per_probe_timeout: app.opts.per_probe_timeout,
        exclude: app.opts.exclude.clone(),
        cancel: cancel.clone(),
    };
    let runner = ScanRunner::new(Arc::clone(&app.opts.registry), Arc::clone(&app.opts.system))
        .with_host(app.opts.host.clone());

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let report = runner.run(&req);
        let _ = tx.send(WorkerMsg::Scanned(report));
    });

    app.pending = Some(Pending {
        job,
        rx,
        cancel,
        started_at: Instant::now(),
    });
    app.status = None;
    app.error = None;
    app.screen = Screen::Running;
}

fn start_fix(app: &mut App) {
    let ids = app.plan.clone();
    let registry = Arc::clone(&app.opts.registry);
    let system = Arc::clone(&app.opts.system);
    let home_dir = app.opts.home_dir.clone();
    let command_timeout = app.opts.command_timeout;
    let probe_timeout = app.opts.per_probe_timeout;
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();

    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let plan: Vec<&Fix> = ids.iter().filter_map(|id| registry.fix(id)).collect();
        let audit = AuditSink::open(&home_dir);
        // raw mode: sudo may not prompt, only cached credentials count
        let privilege = SudoEscalation::new(false);
        let executor = CommandExecutor::new(command_timeout);
        let ctx = FixContext {
            registry: &registry,
            system: system.as_ref(),
            privilege: &privilege,
            executor: &executor,
            probe_timeout,
        };
        let prompt = ChannelPrompt { tx: tx.clone() };
        let outcome_tx = tx.clone();
        let run = crate::orchestrator::execute_all_observed(
            &plan,
            ConfirmationPolicy::Ask(&prompt),
            &ctx,
            &audit,
            &worker_cancel,
            &mut |outcome: &FixOutcome| {
                let _ = outcome_tx.send(WorkerMsg::Outcome(outcome.clone()));
            },
        );
        let _ = tx.send(WorkerMsg::Fixed {
            run,
            audit_path: audit.path().map(Path::to_path_buf),
        });
    });

    app.outcomes.clear();
    app.warnings.clear();
    app.audit_path = None;
    app.pending = Some(Pending {
        job: Job::Fix,
        rx,
        cancel,
        started_at: Instant::now(),
    });
    app.status = None;
    app.screen = Screen::Running;
}

fn draw(f: &mut ratatui::Frame, app: &mut App) {
    let size = f.size();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(2),
        ])
        .split(size);

    draw_header(f, chunks[0], app);
    draw_footer(f, chunks[2], app);

    match app.screen {
        Screen::Home => draw_home(f, chunks[1], app),
        Screen::Running => draw_running(f, chunks[1], app),
        Screen::Report => draw_report(f, chunks[1], app),
        Screen::Plan => draw_plan(f, chunks[1], app),
        Screen::FixResult => draw_fix_result(f, chunks[1], app),
        Screen::Logs => draw_logs(f, chunks[1], app),
        Screen::Error => draw_error(f, chunks[1], app),
        Screen::Help => draw_help(f, chunks[1]),
    }

    if app.confirm.is_some() {
        draw_confirm(f, chunks[1], app);
    }
}

fn draw_header(f: &mut ratatui::Frame, area: Rect, app: &App) {
    let title = match app.screen {
        Screen::Home => "fedchecker - menu",
        Screen::Running => "fedchecker - running",
        Screen::Report => "fedchecker - report",
        Screen::Plan => "fedchecker - fix plan",
        Screen::FixResult => "fedchecker - fix results",
        Screen::Logs => "fedchecker - audit logs",
        Screen::Error => "fedchecker - error",
        Screen::Help => "fedchecker - help",
    };
    let mut spans = vec![
        Span::styled(title, Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ];
    if let Some(report) = app.report.as_ref() {
        if matches!(app.screen, Screen::Report | Screen::Plan) {
            spans.push(Span::raw("  "));
            spans.push(Span::styled(
                format!("score {}/100", report.score()),
                score_style(report.score(), app.opts.color),
            ));
        }
    }

    let w = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(w, area);
}

fn draw_footer(f: &mut ratatui::Frame, area: Rect, app: &App) {
    let keys = if app.confirm.is_some() {
        "y: apply  n/Esc: skip this fix"
    } else {
        match app.screen {
            Screen::Home => "↑/↓: move  Enter: open  ?: help  q: quit",
            Screen::Running => "Esc: cancel",
            Screen::Report => "↑/↓: move  f: plan fixes  ?: help  Esc: back",
            Screen::Plan => "↑/↓: move  Enter/a: apply plan  ?: help  Esc: back",
            Screen::FixResult => "Enter/Esc: back to menu",
            Screen::Logs => "↑/↓: move  r: refresh  Esc: back",
            Screen::Error | Screen::Help => "any key: back",
        }
    };
    let mut lines = vec![Line::from(Span::styled(keys, Style::default().fg(Color::DarkGray)))];
    if let Some(status) = app.status.as_deref() {
        lines.push(Line::from(Span::styled(status, Style::default().fg(Color::Yellow))));
    }
    f.render_widget(Paragraph::new(lines), area);
}

fn draw_home(f: &mut ratatui::Frame, area: Rect, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let items: Vec<ListItem> = MENU
        .iter()
        .map(|item| ListItem::new(Line::from(item.title())))
        .collect();
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Menu"))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    f.render_stateful_widget(list, chunks[0], &mut app.menu_state);

    let item = app.selected_menu_item();
    let host = &app.opts.host;
    let detail = Text::from(vec![
        Line::from(Span::styled(item.title(), Style::default().add_modifier(Modifier::BOLD))),
        Line::from(""),
        Line::from(item.description()),
        Line::from(""),
        Line::from(Span::styled(
            format!("{} {} on {}", host.os_name, host.os_version, host.hostname),
            Style::default().fg(Color::DarkGray),
        )),
    ]);
    let w = Paragraph::new(detail)
        .block(Block::default().borders(Borders::ALL).title("Details"))
        .wrap(Wrap { trim: false });
    f.render_widget(w, chunks[1]);
}

fn draw_running(f: &mut ratatui::Frame, area: Rect, app: &App) {
    let spinner = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
    let s = spinner[(app.tick as usize) % spinner.len()];
    let msg = match app.pending.as_ref().map(|p| p.job) {
        Some(Job::Scan) => "Running checks...",
        Some(Job::PlanScan) => "Scanning before planning fixes...",
        Some(Job::Fix) => "Applying fixes...",
        None => "Working...",
    };

    let mut lines = vec![Line::from(vec![
        Span::styled(s, Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(" "),
        Span::raw(msg),
    ])];
    if app.fix_running() {
        lines.push(Line::from(""));
        for outcome in &app.outcomes {
            lines.push(outcome_line(outcome, app.opts.color));
        }
    }

    let w = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL))
        .wrap(Wrap { trim: false });
    let popup = if app.fix_running() {
        centered_rect(80, 70, area)
    } else {
        centered_rect(60, 20, area)
    };
    f.render_widget(w, popup);
}

fn draw_report(f: &mut ratatui::Frame, area: Rect, app: &mut App) {
    let Some(report) = app.report.as_ref() else {
        return;
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(70), Constraint::Percentage(30)])
        .split(area);

    let color = app.opts.color;
    let items: Vec<ListItem> = report
        .results()
        .map(|r| {
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:<8}", r.status.as_str()), status_style(r.status, color)),
                Span::styled(
                    format!("{:<10}", r.category.as_str()),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(r.title.clone(), Style::default().add_modifier(Modifier::BOLD)),
                Span::raw("  "),
                Span::raw(r.message.clone()),
            ]))
        })
        .collect();

    let category_scores: Vec<String> = report
        .categories()
        .iter()
        .map(|c| format!("{} {}", c.category.as_str(), c.score))
        .collect();
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Results ({})", category_scores.join(", "))),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let selected = app
        .report_state
        .selected()
        .and_then(|idx| report.results().nth(idx));
    let detail = match selected {
        Some(r) => {
            let mut lines = vec![
                Line::from(Span::styled(r.probe_id.clone(), Style::default().add_modifier(Modifier::BOLD))),
                Line::from(r.message.clone()),
            ];
            for (k, v) in &r.details {
                lines.push(Line::from(Span::styled(
                    format!("{k}: {v}"),
                    Style::default().fg(Color::DarkGray),
                )));
            }
            if let Some(fix) = r.fix.as_deref() {
                lines.push(Line::from(format!("fix: {fix}")));
            }
            Text::from(lines)
        }
        None => Text::from("No results."),
    };

    f.render_stateful_widget(list, chunks[0], &mut app.report_state);
    let w = Paragraph::new(detail)
        .block(Block::default().borders(Borders::ALL).title("Details"))
        .wrap(Wrap { trim: false });
    f.render_widget(w, chunks[1]);
}

fn draw_plan(f: &mut ratatui::Frame, area: Rect, app: &mut App) {
    if app.plan.is_empty() {
        let w = Paragraph::new("Nothing to fix.").block(Block::default().borders(Borders::ALL).title("Fix plan"));
        f.render_widget(w, area);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let registry = &app.opts.registry;
    let items: Vec<ListItem> = app
        .plan
        .iter()
        .enumerate()
        .map(|(idx, id)| ListItem::new(Line::from(format!("{}. {id}", idx + 1))))
        .collect();
    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Fix plan ({})", app.plan.len())),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let fix = app
        .plan_state
        .selected()
        .and_then(|idx| app.plan.get(idx))
        .and_then(|id| registry.fix(id));
    let detail = match fix {
        Some(fix) => {
            let mut lines = vec![
                Line::from(Span::styled(fix.description().to_string(), Style::default().add_modifier(Modifier::BOLD))),
                Line::from(""),
            ];
            lines.extend(fix.preview().into_iter().map(Line::from));
            Text::from(lines)
        }
        None => Text::from(""),
    };
    let w = Paragraph::new(detail)
        .block(Block::default().borders(Borders::ALL).title("Preview"))
        .wrap(Wrap { trim: false });

    f.render_stateful_widget(list, chunks[0], &mut app.plan_state);
    f.render_widget(w, chunks[1]);
}

fn draw_fix_result(f: &mut ratatui::Frame, area: Rect, app: &App) {
    let mut lines: Vec<Line> = app
        .outcomes
        .iter()
        .map(|o| outcome_line(o, app.opts.color))
        .collect();
    if !app.warnings.is_empty() {
        lines.push(Line::from(""));
        for w in &app.warnings {
            lines.push(Line::from(Span::styled(
                format!("WARNING: {w}"),
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            )));
        }
    }
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        match app.audit_path.as_deref() {
            Some(path) => format!("Audit log: {}", crate::logs::mask_home(path, &app.opts.home_dir)),
            None => "Audit log: not written".to_string(),
        },
        Style::default().fg(Color::DarkGray),
    )));

    let w = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Fix results"))
        .wrap(Wrap { trim: false });
    f.render_widget(w, area);
}

fn draw_logs(f: &mut ratatui::Frame, area: Rect, app: &mut App) {
    let home_dir = &app.opts.home_dir;
    let items: Vec<ListItem> = if app.logs.is_empty() {
        vec![ListItem::new("No audit logs yet.")]
    } else {
        app.logs
            .iter()
            .map(|e| {
                let failed = if e.failed > 0 {
                    Span::styled(format!("{} failed", e.failed), Style::default().fg(Color::Red))
                } else {
                    Span::styled("ok", Style::default().fg(Color::Green))
                };
                ListItem::new(Line::from(vec![
                    Span::raw(crate::logs::mask_home(&e.path, home_dir)),
                    Span::raw(format!("  {} outcome(s), ", e.outcomes)),
                    failed,
                ]))
            })
            .collect()
    };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Audit logs"))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    f.render_stateful_widget(list, area, &mut app.logs_state);
}

fn draw_confirm(f: &mut ratatui::Frame, area: Rect, app: &App) {
    let Some(req) = app.confirm.as_ref() else {
        return;
    };
    let mut lines = vec![
        Line::from(Span::styled(
            format!("Apply {}?", req.fix_id),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
    ];
    lines.extend(req.preview.iter().map(|l| Line::from(l.clone())));
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled("[y] apply   [n] skip", Style::default().fg(Color::Yellow))));

    let popup = centered_rect(70, 60, area);
    f.render_widget(Clear, popup);
    let w = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Confirm"))
        .wrap(Wrap { trim: false });
    f.render_widget(w, popup);
}

fn draw_error(f: &mut ratatui::Frame, area: Rect, app: &App) {
    let msg = app.error.as_deref().unwrap_or("unknown error");
    let w = Paragraph::new(msg)
        .style(Style::default().fg(Color::Red))
        .block(Block::default().borders(Borders::ALL).title("Error"))
        .wrap(Wrap { trim: false });
    f.render_widget(w, centered_rect(70, 40, area));
}

fn draw_help(f: &mut ratatui::Frame, area: Rect) {
    let lines = vec![
        Line::from("↑/↓ or j/k   move"),
        Line::from("Enter        open the selected entry"),
        Line::from("Esc          back; cancels a running scan"),
        Line::from("f            plan fixes from the current report"),
        Line::from("a            apply the fix plan (each fix asks first)"),
        Line::from("Ctrl-C       quit; during a fix run, skip the remaining fixes"),
        Line::from(""),
        Line::from(Span::styled(
            "Privileged fixes use cached sudo credentials. Run `sudo -v` first, or use `fedchecker fix --apply`.",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    let w = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .wrap(Wrap { trim: false });
    f.render_widget(w, area);
}

fn outcome_line(outcome: &FixOutcome, color: bool) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            format!("{:<12}", outcome.status.as_str()),
            fix_status_style(outcome.status, color),
        ),
        Span::styled(outcome.fix_id.clone(), Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::raw(outcome.message.clone()),
    ])
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
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
        .split(popup_layout[1])[1]
}

fn status_style(status: CheckStatus, enabled: bool) -> Style {
    if !enabled {
        return Style::default();
    }
    match status {
        CheckStatus::Pass => Style::default().fg(Color::Green),
        CheckStatus::Warn => Style::default().fg(Color::Yellow),
        CheckStatus::Fail => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        CheckStatus::Error => Style::default().fg(Color::Magenta),
        CheckStatus::Skipped => Style::default().fg(Color::DarkGray),
    }
}

fn fix_status_style(status: FixStatus, enabled: bool) -> Style {
    if !enabled {
        return Style::default();
    }
    match status {
        FixStatus::Applied => Style::default().fg(Color::Green),
        FixStatus::RolledBack => Style::default().fg(Color::Yellow),
        FixStatus::Skipped => Style::default().fg(Color::DarkGray),
        FixStatus::Failed => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    }
}

fn score_style(score: u8, enabled: bool) -> Style {
    if !enabled {
        return Style::default();
    }
    match score {
        90..=100 => Style::default().fg(Color::Green),
        60..=89 => Style::default().fg(Color::Yellow),
        _ => Style::default().fg(Color::Red),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::{FixStep, StepCommand};
    use crate::orchestrator::AuditLogger;
    use crate::probe::Probe;
    use crate::registry::RegistryBuilder;
    use crate::system::fake::FakeSystem;

    fn press(app: &mut App, code: KeyCode) -> bool {
        handle_key(app, KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn app_with(registry: Registry, home_dir: PathBuf) -> App {
        App::new(MenuOptions {
            registry: Arc::new(registry),
            system: Arc::new(FakeSystem::new()),
            host: HostInfo::unknown(),
            categories: Category::DEFAULT.to_vec(),
            exclude: Vec::new(),
            concurrency: 2,
            per_probe_timeout: Duration::from_secs(10),
            include_warnings: false,
            command_timeout: Duration::from_secs(5),
            home_dir,
            color: false,
        })
    }

    fn failing_registry() -> Registry {
        RegistryBuilder::new()
            .probe(
                Probe::new("health.units", Category::Health, "Units", 5, |ctx| {
                    Ok(ctx.fail("1 failed unit").with_fix("health.reset"))
                })
                .with_fixes(&["health.reset"]),
            )
            .probe(Probe::new("desktop.session", Category::Desktop, "Session", 3, |ctx| {
                Ok(ctx.pass("GNOME"))
            }))
            .fix(
                Fix::new("health.reset", "Reset failed units.", &["health.units"])
                    .step(FixStep::new("Reset", StepCommand::new("systemctl", &["reset-failed"]))),
            )
            .build()
            .expect("valid registry")
    }

    fn wait_until(app: &mut App, screen: Screen) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while app.screen != screen {
            assert!(Instant::now() < deadline, "stuck on {:?}", app.screen);
            poll_worker(app);
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn menu_navigation_wraps_and_quit_closes() {
        let mut app = app_with(failing_registry(), std::env::temp_dir());
        assert_eq!(app.selected_menu_item(), MenuItem::Scan(Category::Health));
        assert!(!press(&mut app, KeyCode::Up));
        assert_eq!(app.selected_menu_item(), MenuItem::Quit);
        assert!(press(&mut app, KeyCode::Enter));

        let mut app = app_with(failing_registry(), std::env::temp_dir());
        assert!(press(&mut app, KeyCode::Char('q')));
    }

    #[test]
    fn category_scan_shows_report() {
        let mut app = app_with(failing_registry(), std::env::temp_dir());
        assert!(!press(&mut app, KeyCode::Enter));
        assert_eq!(app.screen, Screen::Running);
        wait_until(&mut app, Screen::Report);

        let report = app.report.as_ref().expect("report");
        let ids: Vec<&str> = report.results().map(|r| r.probe_id.as_str()).collect();
        assert_eq!(ids, vec!["health.units"]);

        press(&mut app, KeyCode::Esc);
        assert_eq!(app.screen, Screen::Home);
    }

    #[test]
    fn auto_fix_scans_then_shows_plan() {
        let mut app = app_with(failing_registry(), std::env::temp_dir());
        app.menu_state.select(MENU.iter().position(|m| *m == MenuItem::AutoFix));
        press(&mut app, KeyCode::Enter);
        wait_until(&mut app, Screen::Plan);
        assert_eq!(app.plan, vec!["health.reset".to_string()]);
        assert_eq!(app.report.as_ref().map(Report::score), Some(38));
    }

    #[test]
    fn post_install_plans_only_setup_fixes() {
        let registry = RegistryBuilder::new()
            .probe(
                Probe::new("health.units", Category::Health, "Units", 5, |ctx| {
                    Ok(ctx.fail("1 failed unit").with_fix("health.reset"))
                })
                .with_fixes(&["health.reset"]),
            )
            .probe(
                Probe::new("setup.rpmfusion", Category::Setup, "RPM Fusion", 5, |ctx| {
                    Ok(ctx.fail("not enabled").with_fix("setup.enable-rpmfusion"))
                })
                .with_fixes(&["setup.enable-rpmfusion"]),
            )
            .fix(
                Fix::new("health.reset", "Reset failed units.", &["health.units"])
                    .step(FixStep::new("Reset", StepCommand::new("systemctl", &["reset-failed"]))),
            )
            .fix(
                Fix::new("setup.enable-rpmfusion", "Enable RPM Fusion.", &["setup.rpmfusion"])
                    .step(FixStep::new("Install", StepCommand::new("dnf", &["install", "-y", "rpmfusion-free-release"]))),
            )
            .build()
            .expect("valid registry");

        let mut app = app_with(registry, std::env::temp_dir());
        app.menu_state.select(MENU.iter().position(|m| *m == MenuItem::PostInstall));
        assert_eq!(app.selected_menu_item().title(), "Post-install setup");
        press(&mut app, KeyCode::Enter);
        wait_until(&mut app, Screen::Plan);
        assert_eq!(app.plan, vec!["setup.enable-rpmfusion".to_string()]);
        let report = app.report.as_ref().expect("report");
        let ids: Vec<&str> = report.results().map(|r| r.probe_id.as_str()).collect();
        assert_eq!(ids, vec!["setup.rpmfusion"]);
    }

    #[test]
    fn escape_cancels_a_running_scan() {
        let registry = RegistryBuilder::new()
            .probe(Probe::new("health.slow", Category::Health, "Slow", 1, |ctx| {
                thread::sleep(Duration::from_secs(3));
                Ok(ctx.pass("late"))
            }))
            .build()
            .expect("valid registry");
        let mut app = app_with(registry, std::env::temp_dir());
        press(&mut app, KeyCode::Enter);
        press(&mut app, KeyCode::Esc);
        assert!(app.status.is_some());
        wait_until(&mut app, Screen::Report);

        let r = app.report.as_ref().and_then(|r| r.result("health.slow")).expect("result");
        assert_eq!(r.status, CheckStatus::Error);
        assert_eq!(r.message, "cancelled");
    }

    #[test]
    fn confirmation_modal_answers_the_worker() {
        let mut app = app_with(failing_registry(), std::env::temp_dir());
        let (reply, answer) = mpsc::channel();
        app.confirm = Some(ConfirmRequest {
            fix_id: "health.reset".to_string(),
            preview: vec!["systemctl reset-failed".to_string()],
            reply,
        });
        // other keys are swallowed while the modal is open
        assert!(!press(&mut app, KeyCode::Char('q')));
        assert!(app.confirm.is_some());
        press(&mut app, KeyCode::Char('y'));
        assert!(app.confirm.is_none());
        assert_eq!(answer.recv().ok(), Some(true));

        let (reply, answer) = mpsc::channel();
        app.confirm = Some(ConfirmRequest {
            fix_id: "health.reset".to_string(),
            preview: Vec::new(),
            reply,
        });
        press(&mut app, KeyCode::Esc);
        assert_eq!(answer.recv().ok(), Some(false));
    }

    #[test]
    fn channel_prompt_declines_when_the_menu_is_gone() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let prompt = ChannelPrompt { tx };
        assert!(!prompt.confirm("health.reset", &[]));
    }

    #[test]
    fn audit_logs_screen_lists_entries() {
        let home = tempfile::tempdir().expect("tempdir");
        let log = crate::logs::AuditLog::create(home.path()).expect("audit log");
        log.record(&FixOutcome::applied("health.reset", "ok", vec![0]))
            .expect("record");

        let mut app = app_with(failing_registry(), home.path().to_path_buf());
        app.menu_state.select(MENU.iter().position(|m| *m == MenuItem::AuditLogs));
        press(&mut app, KeyCode::Enter);
        assert_eq!(app.screen, Screen::Logs);
        assert_eq!(app.logs.len(), 1);
        assert_eq!(app.logs[0].outcomes, 1);
    }

    #[test]
    fn selection_moves_wrap_around() {
        let mut state = ListState::default();
        move_selection(&mut state, 3, -1);
        assert_eq!(state.selected(), Some(2));
        move_selection(&mut state, 3, 1);
        assert_eq!(state.selected(), Some(0));
        move_selection(&mut state, 0, 1);
        assert_eq!(state.selected(), None);
    }
}
