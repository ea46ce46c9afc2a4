//! Turns a report into a fix plan and runs it, one fix at a time.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use crate::core::{CheckStatus, FixFailure, FixOutcome, FixStatus, Report};
use crate::fix::{Fix, FixContext};
use crate::probe::panic_message;
use crate::registry::Registry;
use crate::scan::CancelToken;

/// Asks the user whether a fix may run.
pub trait ConfirmPrompt {
    fn confirm(&self, fix_id: &str, preview: &[String]) -> bool;
}

#[derive(Clone, Copy)]
pub enum ConfirmationPolicy<'a> {
    /// Every confirmation is accepted (`--yes`).
    AssumeYes,
    Ask(&'a dyn ConfirmPrompt),
}

/// Receives every outcome before the next fix starts.
pub trait AuditLogger {
    fn record(&self, outcome: &FixOutcome) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Also plan fixes referenced by WARN results.
    pub include_warnings: bool,
    /// Restrict the plan to these fix ids. Empty means no restriction.
    pub only: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FixRun {
    pub outcomes: Vec<FixOutcome>,
    /// Messages the user must see: rollback failures, unrecoverable failures, audit errors.
    pub warnings: Vec<String>,
}

impl FixRun {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.status == FixStatus::Failed)
    }

    pub fn count(&self, status: FixStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Fixes referenced by failing results, deduplicated, ordered by category then registry order.
pub fn plan_fixes<'r>(registry: &'r Registry, report: &Report, options: &PlanOptions) -> Vec<&'r Fix> {
    let mut seen = HashSet::new();
    let mut plan = Vec::new();
    for result in report.results() {
        let eligible = result.status.is_failure()
            || (options.include_warnings && result.status == CheckStatus::Warn);
        if !eligible {
            continue;
        }
        let Some(fix_id) = result.fix.as_deref() else {
            continue;
        };
        if !options.only.is_empty() && !options.only.iter().any(|o| o == fix_id) {
            continue;
        }
        if !seen.insert(fix_id) {
            continue;
        }
        match registry.fix(fix_id) {
            Some(fix) => plan.push(fix),
            None => tracing::warn!(probe = %result.probe_id, fix = fix_id, "result references an unknown fix"),
        }
    }
    plan.sort_by_key(|fix| (registry.fix_category(fix.id()), registry.fix_position(fix.id())));
    plan
}

pub fn execute_all(
    plan: &[&Fix],
    policy: ConfirmationPolicy<'_>,
    ctx: &FixContext<'_>,
    audit: &dyn AuditLogger,
    cancel: &CancelToken,
) -> FixRun {
    execute_all_observed(plan, policy, ctx, audit, cancel, &mut |_| {})
}

/// Like [`execute_all`], calling `observer` with each outcome as soon as it is recorded.
pub fn execute_all_observed(
    plan: &[&Fix],
    policy: ConfirmationPolicy<'_>,
    ctx: &FixContext<'_>,
    audit: &dyn AuditLogger,
    cancel: &CancelToken,
    observer: &mut dyn FnMut(&FixOutcome),
) -> FixRun {
    let mut run = FixRun::default();
    for (idx, fix) in plan.iter().enumerate() {
        let outcome = if cancel.is_cancelled() {
            FixOutcome::skipped(fix.id(), "cancelled", FixFailure::Cancelled)
        } else {
            tracing::info!(fix = %fix.id(), position = idx + 1, total = plan.len(), "starting fix");
            execute_one(fix, policy, ctx, &mut run.warnings)
        };

        if let Err(err) = audit.record(&outcome) {
            tracing::warn!(fix = %fix.id(), "failed to write audit log: {err:#}");
            run.warnings
                .push(format!("audit log: could not record {}: {err:#}", fix.id()));
        }
        observer(&outcome);
        run.outcomes.push(outcome);
    }
    run
}

fn execute_one(
    fix: &Fix,
    policy: ConfirmationPolicy<'_>,
    ctx: &FixContext<'_>,
    warnings: &mut Vec<String>,
) -> FixOutcome {
    if fix.requires_confirmation() {
        let accepted = match policy {
            ConfirmationPolicy::AssumeYes => true,
            ConfirmationPolicy::Ask(prompt) => prompt.confirm(fix.id(), &fix.preview()),
        };
        if !accepted {
            tracing::info!(fix = %fix.id(), "declined");
            return FixOutcome::skipped(fix.id(), "declined by user", FixFailure::Declined);
        }
    }

    let applied = match panic::catch_unwind(AssertUnwindSafe(|| fix.apply(ctx))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let msg = format!("internal: {}", panic_message(payload.as_ref()));
            tracing::error!(fix = %fix.id(), "{msg}");
            warnings.push(format!(
                "{} aborted ({msg}); the system may be partially modified",
                fix.id()
            ));
            return FixOutcome::failed(fix.id(), msg, Vec::new(), FixFailure::Internal);
        }
    };

    // nothing to undo when no step ran (e.g. privilege denied)
    if applied.status != FixStatus::Failed || applied.steps_executed.is_empty() {
        return applied;
    }

    if !fix.rollback_available() {
        warnings.push(format!(
            "{} failed and cannot be rolled back: {}",
            fix.id(),
            applied.message
        ));
        let mut failed = applied;
        failed.message = format!("{}; rollback not available", failed.message);
        return failed;
    }

    let rolled = match panic::catch_unwind(AssertUnwindSafe(|| fix.rollback(ctx, &applied))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            let mut out = applied.clone();
            out.message = format!("{}; rollback aborted (internal: {msg})", applied.message);
            out.failure = Some(FixFailure::Internal);
            out
        }
    };
    if rolled.status == FixStatus::Failed {
        tracing::error!(fix = %fix.id(), "rollback failed: {}", rolled.message);
        warnings.push(format!("ROLLBACK FAILED for {}: {}", fix.id(), rolled.message));
    }
    rolled
}
