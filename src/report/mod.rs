use std::fmt::Write;

use crate::core::{CheckStatus, FixOutcome, Report};

/// Markdown rendering of a scan, optionally followed by the outcomes of a fix run.
pub fn render_markdown(report: &Report, outcomes: &[FixOutcome], include_details: bool) -> String {
    let mut out = String::new();
    let host = report.host();
    let counts = report.counts();

    let _ = writeln!(out, "# fedchecker report");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Generated: {}", report.generated_at());
    let _ = writeln!(out, "- Tool version: {}", report.tool_version());
    let _ = writeln!(
        out,
        "- Host: {} ({} {}, kernel {})",
        cell(&host.hostname),
        cell(&host.os_name),
        cell(&host.os_version),
        cell(&host.kernel)
    );
    let _ = writeln!(out, "- Overall score: **{}/100**", report.score());
    let _ = writeln!(
        out,
        "- Results: {} pass, {} warn, {} fail, {} error, {} skipped",
        counts.pass, counts.warn, counts.fail, counts.error, counts.skipped
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "## Overview");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Category | Score | Checks |");
    let _ = writeln!(out, "|---|---:|---:|");
    for category in report.categories() {
        let _ = writeln!(
            out,
            "| {} | {} | {} |",
            category.category.title(),
            category.score,
            category.results.len()
        );
    }

    for category in report.categories() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## {} ({}/100)", category.category.title(), category.score);
        let _ = writeln!(out);
        let _ = writeln!(out, "| Status | Check | Message | Fix |");
        let _ = writeln!(out, "|---|---|---|---|");
        for r in &category.results {
            let fix = r.fix.as_deref().map(|f| format!("`{f}`")).unwrap_or_default();
            let mut message = cell(&r.message);
            if include_details && r.status != CheckStatus::Pass && !r.details.is_empty() {
                let details: Vec<String> = r
                    .details
                    .iter()
                    .map(|(k, v)| format!("{}: {}", cell(k), cell(v)))
                    .collect();
                message = format!("{message}<br>{}", details.join("<br>"));
            }
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                r.status,
                cell(&r.title),
                message,
                fix
            );
        }
    }

    if !outcomes.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Fixes");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Fix | Status | Message |");
        let _ = writeln!(out, "|---|---|---|");
        for o in outcomes {
            let _ = writeln!(out, "| `{}` | {} | {} |", o.fix_id, o.status.as_str(), cell(&o.message));
        }
    }

    out
}

fn cell(s: &str) -> String {
    s.replace('|', "\\|").replace(['\r', '\n'], " ")
}
