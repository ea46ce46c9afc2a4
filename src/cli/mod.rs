use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;

use crate::config::EffectiveConfig;
use crate::core::{Category, FixOutcome, Report};
use crate::exit::{ExitCode, ExitError};
use crate::fix::{CommandExecutor, Fix, FixContext, SudoEscalation};
use crate::logs::AuditSink;
use crate::orchestrator::{ConfirmationPolicy, PlanOptions};
use crate::registry::Registry;
use crate::scan::{CancelToken, MAX_CONCURRENCY, ScanRequest, ScanRunner};
use crate::system::{LinuxSystem, SystemProbe};
use crate::ui::UiConfig;

mod interactive;

#[derive(Debug, Parser)]
#[command(
    name = "fedchecker",
    version,
    about = "Check the health of a Fedora desktop and apply safe, reversible fixes"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Per-probe timeout in seconds.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,
    /// Number of probes evaluated at the same time.
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the health checks.
    Scan(ScanArgs),
    /// Full scan of all configured categories as JSON or Markdown.
    Report(ReportArgs),
    /// Plan fixes for failed checks; `--apply` runs them.
    Fix(FixArgs),
    /// Show every probe and fix.
    List,
    /// List fix audit logs.
    Logs,
    /// Interactive terminal menu.
    Menu,
    Completion(CompletionArgs),
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    #[arg(long = "category")]
    pub categories: Vec<String>,
    #[arg(long)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[arg(long)]
    pub markdown: bool,
}

#[derive(Debug, Args)]
pub struct FixArgs {
    #[arg(long = "category")]
    pub categories: Vec<String>,
    #[arg(long)]
    pub include_warnings: bool,
    #[arg(long)]
    pub target: Vec<String>,
    #[arg(long)]
    pub apply: bool,
    /// Accept every confirmation.
    #[arg(long)]
    pub yes: bool,
    /// Choose which planned fixes to run.
    #[arg(long)]
    pub interactive: bool,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let stdin_is_tty = io::stdin().is_terminal();
    let stdout_is_tty = io::stdout().is_terminal();
    let stderr_is_tty = io::stderr().is_terminal();

    if !matches!(cli.command, Commands::Menu) {
        init_tracing(cli.verbose);
    }

    let home_dir = crate::platform::effective_home_dir()?;

    let mut cfg = crate::config::load(cli.config.as_deref(), &home_dir)
        .map_err(crate::exit::invalid_args_err)?;
    if let Some(secs) = cli.timeout {
        if secs == 0 {
            return Err(crate::exit::invalid_args("--timeout must be greater than 0"));
        }
        cfg.scan.probe_timeout_secs = secs;
    }
    if let Some(n) = cli.concurrency {
        cfg.scan.concurrency = n.clamp(1, MAX_CONCURRENCY);
    }

    let color = stdout_is_tty && cfg.ui.color && !cli.no_color;

    let ui_cfg = UiConfig {
        color,
        stdin_is_tty,
        stdout_is_tty,
        stderr_is_tty,
        max_table_rows: cfg.ui.max_table_rows,
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let show_progress = ui_cfg.stderr_is_tty && !cli.quiet && !cli.json;

    match cli.command {
        Commands::Scan(args) => {
            let runner = scan_runner()?;
            let mut req = scan_request(&cfg, &args.categories)?;
            req.exclude.extend(args.exclude);
            req.exclude.sort();
            req.exclude.dedup();
            crate::scan::validate_excludes(&req.exclude).map_err(crate::exit::invalid_args_err)?;

            let report = run_scan(&runner, &req, show_progress);
            if cli.json {
                write_json(&report)?;
            } else {
                crate::ui::print_report(&report, &ui_cfg, cfg.report.include_details);
            }
        }
        Commands::Report(args) => {
            let runner = scan_runner()?;
            let req = scan_request(&cfg, &[])?;
            let report = run_scan(&runner, &req, show_progress);
            if cli.json {
                write_json(&report)?;
            } else if args.markdown {
                let md = crate::report::render_markdown(&report, &[], cfg.report.include_details);
                write_stdout(md.as_bytes())?;
            } else {
                crate::ui::print_report(&report, &ui_cfg, cfg.report.include_details);
            }
        }
        Commands::Fix(args) => {
            if args.apply && cli.json {
                return Err(crate::exit::invalid_args("fix: --apply cannot be combined with --json"));
            }
            if args.interactive && !args.apply {
                return Err(crate::exit::invalid_args("fix: --interactive requires --apply"));
            }
            if args.apply && !(ui_cfg.stdin_is_tty && ui_cfg.stdout_is_tty) {
                return Err(crate::exit::invalid_args(
                    "fix --apply needs a terminal (stdin and stdout)",
                ));
            }

            let runner = scan_runner()?;
            let unknown: Vec<&str> = args
                .target
                .iter()
                .map(String::as_str)
                .filter(|id| runner.registry().fix(id).is_none())
                .collect();
            if !unknown.is_empty() {
                return Err(crate::exit::invalid_args(format!(
                    "fix: unknown --target: {}\nhint: `fedchecker list` shows every fix id",
                    unknown.join(", ")
                )));
            }

            let req = scan_request(&cfg, &args.categories)?;
            let report = run_scan(&runner, &req, show_progress);
            let registry = runner.registry();
            let options = PlanOptions {
                include_warnings: args.include_warnings || cfg.fix.include_warnings,
                only: args.target.clone(),
            };
            let plan = crate::orchestrator::plan_fixes(registry, &report, &options);

            if !args.apply {
                if cli.json {
                    write_json(&PlanView::new(registry, &report, &plan))?;
                } else {
                    crate::ui::print_fix_plan(&plan, registry, &ui_cfg);
                    if !plan.is_empty() && !ui_cfg.quiet {
                        println!("\nDry run. Re-run with `fedchecker fix --apply` to make these changes.");
                    }
                }
                return Ok(());
            }

            crate::ui::print_fix_plan(&plan, registry, &ui_cfg);
            if plan.is_empty() {
                return Ok(());
            }

            let plan: Vec<&Fix> = if args.interactive {
                match interactive::prompt_fix_selection(plan.len())
                    .map_err(crate::exit::invalid_args_err)?
                {
                    interactive::Selection::All => plan,
                    interactive::Selection::None => {
                        if !ui_cfg.quiet {
                            eprintln!("Nothing selected.");
                        }
                        return Ok(());
                    }
                    interactive::Selection::Indices(indices) => {
                        indices.into_iter().filter_map(|i| plan.get(i).copied()).collect()
                    }
                }
            } else {
                plan
            };

            let audit = AuditSink::open(&home_dir);
            let privilege = SudoEscalation::new(true);
            let executor = CommandExecutor::new(Duration::from_secs(cfg.fix.command_timeout_secs));
            let ctx = FixContext {
                registry,
                system: runner.system().as_ref(),
                privilege: &privilege,
                executor: &executor,
                probe_timeout: Duration::from_secs(cfg.scan.probe_timeout_secs),
            };
            let prompt = interactive::TerminalPrompt;
            let policy = if args.yes {
                ConfirmationPolicy::AssumeYes
            } else {
                ConfirmationPolicy::Ask(&prompt)
            };

            let run = crate::orchestrator::execute_all_observed(
                &plan,
                policy,
                &ctx,
                &audit,
                &CancelToken::new(),
                &mut |outcome: &FixOutcome| crate::ui::print_outcome(outcome, &ui_cfg),
            );
            crate::ui::print_fix_summary(&run, &ui_cfg);
            if let Some(path) = audit.path() {
                if !ui_cfg.quiet {
                    println!("Audit log: {}", crate::logs::mask_home(path, &home_dir));
                }
            }

            if run.has_failures() {
                let failed = run.count(crate::core::FixStatus::Failed);
                return Err(crate::exit::fix_failed(format!("{failed} fix(es) failed")));
            }
        }
        Commands::List => {
            let registry = load_registry()?;
            if cli.json {
                write_json(&CatalogView::new(&registry))?;
            } else {
                crate::ui::print_catalog(&registry, &ui_cfg);
            }
        }
        Commands::Logs => {
            let entries = crate::logs::list_audit_logs(&home_dir)?;
            if cli.json {
                write_json(&entries)?;
            } else {
                crate::ui::print_audit_logs(&entries, &home_dir, &ui_cfg);
            }
        }
        Commands::Menu => {
            if cli.json {
                return Err(crate::exit::invalid_args("menu cannot be combined with --json"));
            }
            if !(ui_cfg.stdin_is_tty && ui_cfg.stdout_is_tty) {
                return Err(crate::exit::invalid_args("menu needs a terminal (stdin and stdout)"));
            }
            let runner = scan_runner()?;
            crate::tui::run(crate::tui::MenuOptions {
                registry: Arc::clone(runner.registry()),
                system: Arc::clone(runner.system()),
                host: crate::platform::host_info(),
                categories: cfg.scan.categories.clone(),
                exclude: cfg.scan.exclude.clone(),
                concurrency: cfg.scan.concurrency,
                per_probe_timeout: Duration::from_secs(cfg.scan.probe_timeout_secs),
                include_warnings: cfg.fix.include_warnings,
                command_timeout: Duration::from_secs(cfg.fix.command_timeout_secs),
                home_dir: home_dir.clone(),
                color: ui_cfg.color,
            })?;
        }
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = std::io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "fedchecker", &mut out);
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    let text = toml::to_string_pretty(&cfg).context("failed to render config")?;
                    write_stdout(text.as_bytes())?;
                }
            } else if !ui_cfg.quiet {
                eprintln!("config: use `fedchecker config --show`");
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("FEDCHECKER_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// A broken catalog is a defect in this build, not a user error.
fn load_registry() -> Result<Registry> {
    crate::registry::catalog().map_err(|err| {
        ExitError::new(
            ExitCode::Internal,
            anyhow::Error::new(err).context("registry integrity check failed"),
        )
        .into()
    })
}

fn scan_runner() -> Result<ScanRunner> {
    let registry = Arc::new(load_registry()?);
    let system: Arc<dyn SystemProbe> = Arc::new(LinuxSystem);
    Ok(ScanRunner::new(registry, system).with_host(crate::platform::host_info()))
}

fn scan_request(cfg: &EffectiveConfig, categories: &[String]) -> Result<ScanRequest> {
    let categories = if categories.is_empty() {
        cfg.scan.categories.clone()
    } else {
        crate::config::parse_categories(categories.iter().map(String::as_str))
            .map_err(crate::exit::invalid_args_err)?
    };
    Ok(ScanRequest {
        categories,
        concurrency: cfg.scan.concurrency,
        per_probe_timeout: Duration::from_secs(cfg.scan.probe_timeout_secs),
        exclude: cfg.scan.exclude.clone(),
        cancel: CancelToken::new(),
    })
}

fn run_scan(runner: &ScanRunner, req: &ScanRequest, show_progress: bool) -> Report {
    if !show_progress {
        return runner.run(req);
    }
    let total = runner.resolve(req).len() as u64;
    let pb = indicatif::ProgressBar::new(total);
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner} {pos}/{len} {msg}") {
        pb.set_style(style);
    }
    pb.set_message("running checks...");
    pb.enable_steady_tick(Duration::from_millis(120));

    let report = runner.run_observed(req, &mut |result: &crate::core::CheckResult| {
        pb.inc(1);
        pb.set_message(result.probe_id.clone());
    });
    pb.finish_and_clear();
    report
}

#[derive(Debug, Serialize)]
struct PlanView<'a> {
    score: u8,
    generated_at: &'a str,
    fixes: Vec<FixView<'a>>,
}

impl<'a> PlanView<'a> {
    fn new(registry: &'a Registry, report: &'a Report, plan: &[&'a Fix]) -> Self {
        Self {
            score: report.score(),
            generated_at: report.generated_at(),
            fixes: plan.iter().map(|f| FixView::new(registry, f)).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct FixView<'a> {
    id: &'a str,
    category: Option<Category>,
    description: &'a str,
    targets: &'a [String],
    requires_privilege: bool,
    requires_confirmation: bool,
    rollback_available: bool,
    preview: Vec<String>,
}

impl<'a> FixView<'a> {
    fn new(registry: &Registry, fix: &'a Fix) -> Self {
        Self {
            id: fix.id(),
            category: registry.fix_category(fix.id()),
            description: fix.description(),
            targets: fix.targets(),
            requires_privilege: fix.requires_privilege(),
            requires_confirmation: fix.requires_confirmation(),
            rollback_available: fix.rollback_available(),
            preview: fix.preview(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ProbeView<'a> {
    id: &'a str,
    category: Category,
    title: &'a str,
    weight: u32,
    fixes: &'a [String],
}

#[derive(Debug, Serialize)]
struct CatalogView<'a> {
    probes: Vec<ProbeView<'a>>,
    fixes: Vec<FixView<'a>>,
}

impl<'a> CatalogView<'a> {
    fn new(registry: &'a Registry) -> Self {
        Self {
            probes: registry
                .probes()
                .iter()
                .map(|p| ProbeView {
                    id: p.id(),
                    category: p.category(),
                    title: &p.meta().title,
                    weight: p.meta().weight,
                    fixes: p.fixes(),
                })
                .collect(),
            fixes: registry.fixes().iter().map(|f| FixView::new(registry, f)).collect(),
        }
    }
}

fn write_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let mut buf = serde_json::to_vec_pretty(value)?;
    buf.push(b'\n');
    write_stdout(&buf)
}

/// A closed pipe (`| head`) is not an error.
fn write_stdout(buf: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(buf).and_then(|()| stdout.flush()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(crate::exit::invalid_args(format!(
            "unsupported shell: {other} (use bash, zsh or fish)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "fedchecker",
            "scan",
            "--category",
            "security",
            "--json",
            "--concurrency",
            "2",
        ])
        .expect("parse");
        assert!(cli.json);
        assert_eq!(cli.concurrency, Some(2));
        match cli.command {
            Commands::Scan(args) => assert_eq!(args.categories, vec!["security".to_string()]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn shells_are_case_insensitive() {
        assert!(matches!(parse_shell("Bash"), Ok(clap_complete::Shell::Bash)));
        let err = parse_shell("powershell").expect_err("unsupported");
        assert_eq!(crate::exit::exit_code(&err), 2);
    }

    #[test]
    fn catalog_view_lists_every_probe_and_fix() {
        let registry = crate::registry::catalog().expect("catalog");
        let view = serde_json::to_value(CatalogView::new(&registry)).expect("json");
        assert_eq!(view["probes"].as_array().map(Vec::len), Some(registry.probes().len()));
        assert_eq!(view["fixes"].as_array().map(Vec::len), Some(registry.fixes().len()));
        assert_eq!(view["probes"][0]["category"], "HEALTH");
    }
}
