use anyhow::Error;
use std::io::{self, Write};
use std::path::Path;
use unicode_width::UnicodeWidthChar;

use crate::core::{CheckResult, CheckStatus, FixOutcome, FixStatus, Report};
use crate::fix::Fix;
use crate::logs::{AuditLogEntry, mask_home};
use crate::orchestrator::FixRun;
use crate::registry::Registry;

const MESSAGE_WIDTH: usize = 60;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub stdin_is_tty: bool,
    pub stdout_is_tty: bool,
    pub stderr_is_tty: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "error:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "caused by:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "next:");
    let _ = writeln!(stderr, "  - re-run with `--verbose` for diagnostic logs");
    let _ = writeln!(stderr, "  - see `fedchecker --help` for commands and options");
}

/// Printed to stderr even in quiet mode.
pub fn eprintln_warnings(warnings: &[String], cfg: &UiConfig) {
    if warnings.is_empty() {
        return;
    }
    let mut stderr = io::stderr().lock();
    for w in warnings {
        let label = if cfg.color { "\x1b[1;31mWARNING\x1b[0m" } else { "WARNING" };
        let _ = writeln!(stderr, "{label}: {w}");
    }
}

pub fn print_report(report: &Report, cfg: &UiConfig, include_details: bool) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    render_report(&mut out, report, cfg, include_details);
}

pub fn render_report(out: &mut dyn Write, report: &Report, cfg: &UiConfig, include_details: bool) {
    let counts = report.counts();
    let host = report.host();
    let _ = writeln!(
        out,
        "{} {} (kernel {}) on {}",
        host.os_name, host.os_version, host.kernel, host.hostname
    );
    let _ = writeln!(
        out,
        "Health score: {}/100  (PASS {}, WARN {}, FAIL {}, ERROR {}, SKIPPED {})",
        report.score(),
        counts.pass,
        counts.warn,
        counts.fail,
        counts.error,
        counts.skipped
    );

    for category in report.categories() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} (score {})",
            category.category.title(),
            category.score
        );
        let rows = cfg.max_table_rows.max(1).min(category.results.len());
        print_results_table(out, &category.results[..rows], cfg.color, include_details);
        if category.results.len() > rows {
            let _ = writeln!(out, "... ({} more)", category.results.len() - rows);
        }
    }
}

fn print_results_table(out: &mut dyn Write, results: &[CheckResult], color: bool, include_details: bool) {
    let label_status = "STATUS";
    let label_check = "CHECK";
    let label_message = "MESSAGE";

    let status_w = visible_width_ansi(label_status).max(7);
    let check_w = results
        .iter()
        .map(|r| visible_width_ansi(&r.title))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_check));
    let message_w = results
        .iter()
        .map(|r| visible_width_ansi(&truncate_display(&r.message, MESSAGE_WIDTH)))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_message));

    let _ = writeln!(
        out,
        "{}  {}  {}  FIX",
        pad_end_ansi(label_status, status_w),
        pad_end_ansi(label_check, check_w),
        pad_end_ansi(label_message, message_w),
    );
    let _ = writeln!(
        out,
        "{}  {}  {}  ---",
        "-".repeat(status_w),
        "-".repeat(check_w),
        "-".repeat(message_w)
    );

    for r in results {
        let status = pad_end_ansi(&format_status(r.status, color), status_w);
        let check = pad_end_ansi(&r.title, check_w);
        let fix = r.fix.as_deref().unwrap_or("");
        let line = format!(
            "{status}  {check}  {}  {fix}",
            pad_end_ansi(&truncate_display(&r.message, MESSAGE_WIDTH), message_w)
        );
        let _ = writeln!(out, "{}", line.trim_end());
        if include_details && r.status != CheckStatus::Pass {
            for (k, v) in &r.details {
                let _ = writeln!(out, "{}  {k}: {v}", " ".repeat(status_w + 2));
            }
        }
    }
}

pub fn print_fix_plan(plan: &[&Fix], registry: &Registry, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    render_fix_plan(&mut out, plan, registry);
}

pub fn render_fix_plan(out: &mut dyn Write, plan: &[&Fix], registry: &Registry) {
    if plan.is_empty() {
        let _ = writeln!(out, "Nothing to fix.");
        return;
    }
    let _ = writeln!(out, "Fix plan ({} fix(es), applied in this order):", plan.len());
    for (idx, fix) in plan.iter().enumerate() {
        let category = registry
            .fix_category(fix.id())
            .map(|c| c.as_str())
            .unwrap_or("?");
        let mut flags = Vec::new();
        if fix.requires_confirmation() {
            flags.push("confirm");
        }
        if fix.requires_privilege() {
            flags.push("sudo");
        }
        if fix.rollback_available() {
            flags.push("rollback");
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "{}. {} [{}] ({})", idx + 1, fix.id(), category, flags.join(", "));
        for line in fix.preview() {
            let _ = writeln!(out, "   {line}");
        }
    }
}

pub fn print_outcome(outcome: &FixOutcome, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "{}  {}  {}",
        pad_end_ansi(&format_fix_status(outcome.status, cfg.color), 11),
        outcome.fix_id,
        outcome.message
    );
}

pub fn print_fix_summary(run: &FixRun, cfg: &UiConfig) {
    if !cfg.quiet {
        let mut out = io::stdout().lock();
        let _ = writeln!(
            out,
            "\nApplied {}, rolled back {}, skipped {}, failed {}.",
            run.count(FixStatus::Applied),
            run.count(FixStatus::RolledBack),
            run.count(FixStatus::Skipped),
            run.count(FixStatus::Failed)
        );
    }
    eprintln_warnings(&run.warnings, cfg);
}

pub fn print_catalog(registry: &Registry, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    render_catalog(&mut out, registry);
}

pub fn render_catalog(out: &mut dyn Write, registry: &Registry) {
    let _ = writeln!(out, "Probes:");
    for category in registry.categories() {
        let _ = writeln!(out, "  {}", category.title());
        for probe in registry.probes_in(category) {
            let fixes = if probe.fixes().is_empty() {
                String::new()
            } else {
                format!("  -> {}", probe.fixes().join(", "))
            };
            let _ = writeln!(
                out,
                "    {}  (weight {}){fixes}",
                pad_end_ansi(probe.id(), 28),
                probe.meta().weight
            );
        }
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Fixes:");
    for fix in registry.fixes() {
        let mut flags = Vec::new();
        if fix.requires_privilege() {
            flags.push("sudo");
        }
        if fix.requires_confirmation() {
            flags.push("confirm");
        }
        if fix.rollback_available() {
            flags.push("rollback");
        }
        let _ = writeln!(out, "  {}  [{}]", fix.id(), flags.join(", "));
        for (idx, step) in fix.steps().iter().enumerate() {
            let undo = step
                .undo
                .as_ref()
                .map(|u| format!("  (undo: {u})"))
                .unwrap_or_default();
            let _ = writeln!(out, "    {}. {}{undo}", idx + 1, step.command);
        }
    }
}

pub fn print_audit_logs(entries: &[AuditLogEntry], home_dir: &Path, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    if entries.is_empty() {
        let _ = writeln!(out, "No audit logs yet.");
        return;
    }
    for entry in entries.iter().take(cfg.max_table_rows.max(1)) {
        let failed = if entry.failed > 0 {
            let s = format!("{} failed", entry.failed);
            if cfg.color { format!("\x1b[31m{s}\x1b[0m") } else { s }
        } else {
            "ok".to_string()
        };
        let _ = writeln!(
            out,
            "{}  {} outcome(s), {failed}",
            mask_home(&entry.path, home_dir),
            entry.outcomes
        );
    }
    if entries.len() > cfg.max_table_rows.max(1) {
        let _ = writeln!(out, "... ({} more)", entries.len() - cfg.max_table_rows.max(1));
    }
}

pub fn format_status(status: CheckStatus, color: bool) -> String {
    let s = status.as_str();
    if !color {
        return s.to_string();
    }
    let code = match status {
        CheckStatus::Pass => "32",
        CheckStatus::Warn => "33",
        CheckStatus::Fail => "31",
        CheckStatus::Error => "35",
        CheckStatus::Skipped => "90",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

pub fn format_fix_status(status: FixStatus, color: bool) -> String {
    let s = status.as_str();
    if !color {
        return s.to_string();
    }
    let code = match status {
        FixStatus::Applied => "32",
        FixStatus::RolledBack => "33",
        FixStatus::Skipped => "90",
        FixStatus::Failed => "31",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

/// Cuts to `max_width` display columns, ending with "...".
fn truncate_display(s: &str, max_width: usize) -> String {
    if visible_width_ansi(s) <= max_width {
        return s.to_string();
    }
    let budget = max_width.saturating_sub(3);
    let mut width = 0;
    let mut out = String::new();
    for ch in s.chars() {
        let w = UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + w > budget {
            break;
        }
        width += w;
        out.push(ch);
    }
    format!("{out}...")
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Category, HostInfo, ProbeMeta};

    fn cfg() -> UiConfig {
        UiConfig {
            color: false,
            stdin_is_tty: false,
            stdout_is_tty: false,
            stderr_is_tty: false,
            max_table_rows: 40,
            quiet: false,
            verbose: false,
        }
    }

    fn report() -> Report {
        let disk = ProbeMeta::new("health.disk-space", Category::Health, "Disk space", 10);
        let fw = ProbeMeta::new("security.firewall", Category::Security, "Firewall", 10);
        Report::new(
            "2026-01-01T00:00:00Z",
            HostInfo::unknown(),
            vec![
                CheckResult::new(&disk, CheckStatus::Pass, "highest usage is 40% on /"),
                CheckResult::new(&fw, CheckStatus::Fail, "firewalld is not running")
                    .with_detail("unit", "firewalld.service")
                    .with_fix("security.enable-firewall"),
            ],
        )
    }

    #[test]
    fn renders_score_and_category_tables() {
        let mut buf = Vec::new();
        render_report(&mut buf, &report(), &cfg(), true);
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("Health score: 50/100"), "{text}");
        assert!(text.contains("System health (score 100)"));
        assert!(text.contains("Security (score 0)"));
        assert!(text.contains("security.enable-firewall"));
        assert!(text.contains("unit: firewalld.service"));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn colours_only_when_enabled() {
        assert_eq!(format_status(CheckStatus::Fail, false), "FAIL");
        assert_eq!(format_status(CheckStatus::Fail, true), "\x1b[31mFAIL\x1b[0m");
        assert_eq!(visible_width_ansi(&format_status(CheckStatus::Warn, true)), 4);
    }

    #[test]
    fn truncates_by_display_width() {
        assert_eq!(truncate_display("short", 10), "short");
        assert_eq!(truncate_display("abcdefghijkl", 8), "abcde...");
        assert_eq!(visible_width_ansi(&truncate_display("ディスクがいっぱいです", 9)), 9);
    }

    #[test]
    fn catalog_lists_probes_and_fixes() {
        let registry = crate::registry::catalog().expect("catalog");
        let mut buf = Vec::new();
        render_catalog(&mut buf, &registry);
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.contains("health.disk-space"));
        assert!(text.contains("drivers.unblock-wifi  [rollback]"));
        assert!(text.contains("(undo: rfkill block wifi)"));
    }
}
