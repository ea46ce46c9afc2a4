mod exec;

use std::time::{Duration, Instant};

pub use exec::{
    ALLOWED_PROGRAMS, CommandExecutor, PrivilegeEscalation, StepCommand, StepError, StepExecutor,
    StepOutputOutcome, SudoEscalation, evaluate_step_output,
};

use crate::core::{CheckStatus, FixFailure, FixOutcome, StepAttempt, StepPhase};
use crate::registry::Registry;
use crate::system::SystemProbe;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixStep {
    pub title: String,
    pub command: StepCommand,
    pub undo: Option<StepCommand>,
}

impl FixStep {
    pub fn new(title: &str, command: StepCommand) -> Self {
        Self {
            title: title.to_string(),
            command,
            undo: None,
        }
    }

    pub fn undo_with(mut self, command: StepCommand) -> Self {
        self.undo = Some(command);
        self
    }
}

/// Stands for the running Fedora release (`rpm -E %fedora`) in step arguments.
pub const FEDORA_RELEASE: &str = "{fedora}";

/// Collaborators a fix needs while it runs.
pub struct FixContext<'a> {
    pub registry: &'a Registry,
    pub system: &'a dyn SystemProbe,
    pub privilege: &'a dyn PrivilegeEscalation,
    pub executor: &'a dyn StepExecutor,
    /// Budget for re-checking target probes before applying.
    pub probe_timeout: Duration,
}

impl FixContext<'_> {
    /// True when every target probe now reports PASS or SKIPPED.
    fn is_resolved(&self, fix: &Fix) -> bool {
        fix.targets.iter().all(|id| {
            let Some(probe) = self.registry.probe(id) else {
                return false;
            };
            let deadline = Instant::now() + self.probe_timeout;
            matches!(
                probe.evaluate(self.system, deadline).status,
                CheckStatus::Pass | CheckStatus::Skipped
            )
        })
    }

    fn fedora_release(&self) -> Result<String, String> {
        let out = self
            .system
            .run("rpm", &["-E", "%fedora"], self.probe_timeout)
            .map_err(|e| format!("cannot determine the Fedora release: {e}"))?;
        let release = out.stdout.trim();
        if out.exit_code != 0 || release.is_empty() || !release.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("cannot determine the Fedora release (rpm printed {release:?})"));
        }
        Ok(release.to_string())
    }

    /// Substitutes [`FEDORA_RELEASE`] in the arguments.
    fn expand(&self, command: &StepCommand) -> Result<StepCommand, String> {
        if !command.args.iter().any(|a| a.contains(FEDORA_RELEASE)) {
            return Ok(command.clone());
        }
        let release = self.fedora_release()?;
        Ok(StepCommand {
            program: command.program.clone(),
            args: command.args.iter().map(|a| a.replace(FEDORA_RELEASE, &release)).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fix {
    id: String,
    description: String,
    targets: Vec<String>,
    requires_privilege: bool,
    requires_confirmation: bool,
    steps: Vec<FixStep>,
}

impl Fix {
    pub fn new(id: &str, description: &str, targets: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            targets: targets.iter().map(|s| s.to_string()).collect(),
            requires_privilege: false,
            requires_confirmation: true,
            steps: Vec::new(),
        }
    }

    pub fn privileged(mut self) -> Self {
        self.requires_privilege = true;
        self
    }

    /// Only for fully reversible actions without lasting side effects.
    pub fn without_confirmation(mut self) -> Self {
        self.requires_confirmation = false;
        self
    }

    pub fn step(mut self, step: FixStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn requires_privilege(&self) -> bool {
        self.requires_privilege
    }

    pub fn requires_confirmation(&self) -> bool {
        self.requires_confirmation
    }

    pub fn steps(&self) -> &[FixStep] {
        &self.steps
    }

    pub fn rollback_available(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.undo.is_some())
    }

    pub fn preview(&self) -> Vec<String> {
        let mut lines = vec![self.description.clone()];
        for (idx, step) in self.steps.iter().enumerate() {
            lines.push(format!("{}. {}: `{}`", idx + 1, step.title, step.command));
        }
        if self.requires_privilege {
            lines.push("Requires administrator privileges (sudo).".to_string());
        }
        if self.rollback_available() {
            lines.push("Rollback: automatic if a step fails.".to_string());
        } else {
            lines.push("Rollback: not available.".to_string());
        }
        lines
    }

    pub fn apply(&self, ctx: &FixContext<'_>) -> FixOutcome {
        if ctx.is_resolved(self) {
            tracing::info!(fix = %self.id, "already resolved");
            return FixOutcome::applied(&self.id, "already resolved; nothing to do", Vec::new());
        }

        if self.requires_privilege && !ctx.privilege.escalate(&self.description) {
            return FixOutcome::failed(&self.id, "privilege denied", Vec::new(), FixFailure::PrivilegeDenied);
        }

        let total = self.steps.len();
        let mut executed = Vec::new();
        let mut attempts = Vec::new();
        let mut warnings = Vec::new();

        for (idx, step) in self.steps.iter().enumerate() {
            executed.push(idx);
            tracing::info!(fix = %self.id, step = idx + 1, total, "{}", step.title);
            match self.run_command(ctx, idx, StepPhase::Apply, &step.command, &mut attempts) {
                Ok(Some(warning)) => warnings.push(format!("step {}: {warning}", idx + 1)),
                Ok(None) => {}
                Err(msg) => {
                    tracing::warn!(fix = %self.id, step = idx + 1, "step failed: {msg}");
                    return FixOutcome::failed(
                        &self.id,
                        format!("step {}/{total} ({}) failed: {msg}", idx + 1, step.title),
                        executed,
                        FixFailure::StepFailed { step: idx },
                    )
                    .with_attempts(attempts);
                }
            }
        }

        let mut message = format!("applied {total} step(s)");
        if !warnings.is_empty() {
            message.push_str(&format!(" with warnings: {}", warnings.join("; ")));
        }
        FixOutcome::applied(&self.id, message, executed).with_attempts(attempts)
    }

    /// Undoes the steps recorded in `outcome`, last first. Steps that never ran are left alone.
    pub fn rollback(&self, ctx: &FixContext<'_>, outcome: &FixOutcome) -> FixOutcome {
        let mut attempts = outcome.attempts.clone();
        if !self.rollback_available() {
            let mut out = outcome.clone();
            out.message = format!("{}; rollback not available", outcome.message);
            return out;
        }

        let mut failed_steps = Vec::new();
        let mut errors = Vec::new();
        for &idx in outcome.steps_executed.iter().rev() {
            let Some(undo) = self.steps.get(idx).and_then(|s| s.undo.as_ref()) else {
                continue;
            };
            tracing::warn!("Rolling back step {}: {}", idx + 1, undo);
            if let Err(msg) = self.run_command(ctx, idx, StepPhase::Undo, undo, &mut attempts) {
                tracing::error!(fix = %self.id, step = idx + 1, "rollback failed: {msg}");
                failed_steps.push(idx);
                errors.push(format!("step {}: {msg}", idx + 1));
            }
        }

        if let Some(&first) = failed_steps.first() {
            let mut out = FixOutcome::failed(
                &self.id,
                format!(
                    "{}; rollback failed ({}); the system may be partially modified",
                    outcome.message,
                    errors.join("; ")
                ),
                outcome.steps_executed.clone(),
                FixFailure::RollbackFailed { step: first },
            );
            out.attempts = attempts;
            return out;
        }

        FixOutcome {
            fix_id: self.id.clone(),
            status: crate::core::FixStatus::RolledBack,
            message: format!(
                "{}; rolled back {} step(s)",
                outcome.message,
                outcome.steps_executed.len()
            ),
            steps_executed: outcome.steps_executed.clone(),
            failure: outcome.failure.clone(),
            attempts,
        }
    }

    /// `Ok(Some(_))` carries a non-fatal warning.
    fn run_command(
        &self,
        ctx: &FixContext<'_>,
        step: usize,
        phase: StepPhase,
        command: &StepCommand,
        attempts: &mut Vec<StepAttempt>,
    ) -> Result<Option<String>, String> {
        let mut attempt = StepAttempt {
            step,
            phase,
            command: command.to_string(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error: None,
        };
        let command = match ctx.expand(command) {
            Ok(expanded) => expanded,
            Err(msg) => {
                attempt.error = Some(msg.clone());
                attempts.push(attempt);
                return Err(msg);
            }
        };
        attempt.command = command.to_string();

        let res = match ctx.executor.execute(&command, self.requires_privilege) {
            Ok(output) => {
                attempt.exit_code = Some(output.exit_code);
                attempt.stdout = output.stdout.clone();
                attempt.stderr = output.stderr.clone();
                match evaluate_step_output(&command, &output) {
                    StepOutputOutcome::Ok => Ok(None),
                    StepOutputOutcome::OkWithWarnings(w) => Ok(Some(w)),
                    StepOutputOutcome::Error(e) => Err(e),
                }
            }
            Err(err) => Err(err.to_string()),
        };
        if let Err(e) = &res {
            attempt.error = Some(e.clone());
        }
        attempts.push(attempt);
        res
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{Privilege, ScriptedExecutor};
    use super::*;
    use crate::core::{Category, FixStatus};
    use crate::probe::Probe;
    use crate::registry::RegistryBuilder;
    use crate::system::fake::FakeSystem;

    fn three_step_fix() -> Fix {
        Fix::new("health.f3", "Three steps", &["health.p"])
            .privileged()
            .step(FixStep::new("one", StepCommand::new("touch", &["/a"])).undo_with(StepCommand::new("rm", &["-f", "/a"])))
            .step(FixStep::new("two", StepCommand::new("touch", &["/b"])).undo_with(StepCommand::new("rm", &["-f", "/b"])))
            .step(FixStep::new("three", StepCommand::new("touch", &["/c"])).undo_with(StepCommand::new("rm", &["-f", "/c"])))
    }

    fn registry_with(fix: Fix) -> Registry {
        RegistryBuilder::new()
            .probe(
                Probe::new("health.p", Category::Health, "P", 10, |ctx| Ok(ctx.fail("broken").with_fix("health.f3")))
                    .with_fixes(&["health.f3"]),
            )
            .fix(fix)
            .build()
            .expect("valid registry")
    }

    #[test]
    fn stops_at_first_failing_step_and_rolls_back_only_executed_steps() {
        let fix = three_step_fix();
        let registry = registry_with(fix.clone());
        let system = FakeSystem::new();
        let executor = ScriptedExecutor::failing(&["touch /b"]);
        let ctx = FixContext {
            registry: &registry,
            system: &system,
            privilege: &Privilege(true),
            executor: &executor,
            probe_timeout: Duration::from_secs(1),
        };

        let applied = fix.apply(&ctx);
        assert_eq!(applied.status, FixStatus::Failed);
        assert_eq!(applied.steps_executed, vec![0, 1]);
        assert_eq!(applied.failure, Some(FixFailure::StepFailed { step: 1 }));

        let rolled = fix.rollback(&ctx, &applied);
        assert_eq!(rolled.status, FixStatus::RolledBack);
        assert_eq!(
            executor.log(),
            vec!["touch /a", "touch /b", "rm -f /b", "rm -f /a"]
        );
    }

    #[test]
    fn failed_undo_is_reported_as_rollback_failure() {
        let fix = three_step_fix();
        let registry = registry_with(fix.clone());
        let system = FakeSystem::new();
        let executor = ScriptedExecutor::failing(&["touch /c", "rm -f /b"]);
        let ctx = FixContext {
            registry: &registry,
            system: &system,
            privilege: &Privilege(true),
            executor: &executor,
            probe_timeout: Duration::from_secs(1),
        };

        let applied = fix.apply(&ctx);
        let rolled = fix.rollback(&ctx, &applied);
        assert_eq!(rolled.status, FixStatus::Failed);
        assert_eq!(rolled.failure, Some(FixFailure::RollbackFailed { step: 1 }));
        assert!(rolled.rollback_failed());
        // the remaining undo still ran
        assert!(executor.log().contains(&"rm -f /a".to_string()));
    }

    #[test]
    fn denied_privilege_fails_without_running_anything() {
        let fix = three_step_fix();
        let registry = registry_with(fix.clone());
        let system = FakeSystem::new();
        let executor = ScriptedExecutor::default();
        let ctx = FixContext {
            registry: &registry,
            system: &system,
            privilege: &Privilege(false),
            executor: &executor,
            probe_timeout: Duration::from_secs(1),
        };

        let out = fix.apply(&ctx);
        assert_eq!(out.status, FixStatus::Failed);
        assert_eq!(out.failure, Some(FixFailure::PrivilegeDenied));
        assert_eq!(out.message, "privilege denied");
        assert!(out.steps_executed.is_empty());
        assert!(executor.log().is_empty());
    }

    #[test]
    fn preview_lists_steps_without_running_them() {
        let fix = three_step_fix();
        let lines = fix.preview();
        assert_eq!(lines[0], "Three steps");
        assert_eq!(lines[1], "1. one: `touch /a`");
        assert!(lines.iter().any(|l| l.contains("sudo")));
        assert!(fix.rollback_available());

        let partial = Fix::new("x", "x", &["health.p"])
            .step(FixStep::new("a", StepCommand::new("dnf", &["clean", "all"])));
        assert!(!partial.rollback_available());
        assert_eq!(partial.preview().last().map(String::as_str), Some("Rollback: not available."));
    }

    fn release_fix() -> Fix {
        Fix::new("health.f3", "Release RPM", &["health.p"]).step(FixStep::new(
            "Install release package",
            StepCommand::new("dnf", &["install", "-y", "https://example.org/repo-release-{fedora}.noarch.rpm"]),
        ))
    }

    #[test]
    fn fedora_release_is_substituted_when_the_step_runs() {
        let fix = release_fix();
        let registry = registry_with(fix.clone());
        let system = FakeSystem::new().command("rpm -E %fedora", 0, "41\n");
        let executor = ScriptedExecutor::failing(&[]);
        let ctx = FixContext {
            registry: &registry,
            system: &system,
            privilege: &Privilege(true),
            executor: &executor,
            probe_timeout: Duration::from_secs(1),
        };

        let out = fix.apply(&ctx);
        assert_eq!(out.status, FixStatus::Applied);
        assert_eq!(
            executor.log(),
            vec!["dnf install -y https://example.org/repo-release-41.noarch.rpm"]
        );
        assert_eq!(out.attempts[0].command, executor.log()[0]);
        assert!(fix.preview()[1].contains("{fedora}"));
    }

    #[test]
    fn unknown_fedora_release_fails_the_step_without_running_it() {
        let fix = release_fix();
        let registry = registry_with(fix.clone());
        let system = FakeSystem::new().command("rpm -E %fedora", 0, "%fedora\n");
        let executor = ScriptedExecutor::failing(&[]);
        let ctx = FixContext {
            registry: &registry,
            system: &system,
            privilege: &Privilege(true),
            executor: &executor,
            probe_timeout: Duration::from_secs(1),
        };

        let out = fix.apply(&ctx);
        assert_eq!(out.status, FixStatus::Failed);
        assert_eq!(out.failure, Some(FixFailure::StepFailed { step: 0 }));
        assert!(out.message.contains("cannot determine the Fedora release"), "{}", out.message);
        assert!(executor.log().is_empty());
        assert!(out.attempts[0].error.is_some());
    }
}
