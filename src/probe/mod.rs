use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::core::{Category, CheckResult, CheckStatus, ProbeMeta};
use crate::platform::{CommandError, CommandOutput, FsUsage};
use crate::system::SystemProbe;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("timeout")]
    Timeout,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("required tool is not installed: {0}")]
    ToolMissing(String),
    #[error("{0}")]
    Failed(String),
}

impl ProbeError {
    pub const fn kind(&self) -> &'static str {
        match self {
            ProbeError::Timeout => "timeout",
            ProbeError::PermissionDenied(_) => "permission_denied",
            ProbeError::ToolMissing(_) => "tool_missing",
            ProbeError::Failed(_) => "failed",
        }
    }
}

impl From<CommandError> for ProbeError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::NotFound(cmd) => ProbeError::ToolMissing(cmd),
            CommandError::PermissionDenied(cmd) => ProbeError::PermissionDenied(cmd),
            CommandError::TimedOut { .. } => ProbeError::Timeout,
            err @ CommandError::Io { .. } => ProbeError::Failed(err.to_string()),
        }
    }
}

fn io_error(path: &Path, err: std::io::Error) -> ProbeError {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => ProbeError::PermissionDenied(path.display().to_string()),
        _ => ProbeError::Failed(format!("{}: {err}", path.display())),
    }
}

/// What a probe sees while it runs: read-only system accessors bounded by its deadline.
pub struct ProbeContext<'a> {
    meta: &'a ProbeMeta,
    system: &'a dyn SystemProbe,
    deadline: Instant,
}

impl<'a> ProbeContext<'a> {
    pub fn new(meta: &'a ProbeMeta, system: &'a dyn SystemProbe, deadline: Instant) -> Self {
        Self {
            meta,
            system,
            deadline,
        }
    }

    pub fn meta(&self) -> &ProbeMeta {
        self.meta
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn check_deadline(&self) -> Result<(), ProbeError> {
        if self.remaining().is_zero() {
            return Err(ProbeError::Timeout);
        }
        Ok(())
    }

    /// Runs a command with whatever time is left. A non-zero exit is not an error here.
    pub fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput, ProbeError> {
        self.check_deadline()?;
        Ok(self.system.run(cmd, args, self.remaining())?)
    }

    /// `Ok(None)` when the file does not exist.
    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<Option<String>, ProbeError> {
        self.check_deadline()?;
        let path = path.as_ref();
        match self.system.read_file(path) {
            Ok(s) => Ok(Some(s)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(path, err)),
        }
    }

    /// Empty when the directory does not exist.
    pub fn read_dir(&self, path: impl AsRef<Path>) -> Result<Vec<PathBuf>, ProbeError> {
        self.check_deadline()?;
        let path = path.as_ref();
        match self.system.read_dir(path) {
            Ok(entries) => Ok(entries),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(io_error(path, err)),
        }
    }

    pub fn read_link(&self, path: impl AsRef<Path>) -> Option<PathBuf> {
        self.system.read_link(path.as_ref()).ok()
    }

    pub fn file_mode(&self, path: impl AsRef<Path>) -> Result<Option<u32>, ProbeError> {
        let path = path.as_ref();
        match self.system.file_mode(path) {
            Ok(mode) => Ok(Some(mode)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(path, err)),
        }
    }

    pub fn fs_usage(&self, path: impl AsRef<Path>) -> Result<FsUsage, ProbeError> {
        self.check_deadline()?;
        let path = path.as_ref();
        self.system.fs_usage(path).map_err(|e| io_error(path, e))
    }

    pub fn env_var(&self, key: &str) -> Option<String> {
        self.system.env_var(key)
    }

    pub fn cpu_count(&self) -> usize {
        self.system.cpu_count().max(1)
    }

    pub fn pass(&self, message: impl Into<String>) -> CheckResult {
        CheckResult::new(self.meta, CheckStatus::Pass, message)
    }

    pub fn warn(&self, message: impl Into<String>) -> CheckResult {
        CheckResult::new(self.meta, CheckStatus::Warn, message)
    }

    pub fn fail(&self, message: impl Into<String>) -> CheckResult {
        CheckResult::new(self.meta, CheckStatus::Fail, message)
    }

    pub fn error(&self, message: impl Into<String>) -> CheckResult {
        CheckResult::new(self.meta, CheckStatus::Error, message)
    }

    pub fn skipped(&self, message: impl Into<String>) -> CheckResult {
        CheckResult::new(self.meta, CheckStatus::Skipped, message)
    }
}

type EvalFn = dyn Fn(&ProbeContext<'_>) -> Result<CheckResult, ProbeError> + Send + Sync;

/// A side-effect-free check producing exactly one [`CheckResult`].
pub struct Probe {
    meta: ProbeMeta,
    fixes: Vec<String>,
    eval: Box<EvalFn>,
}

impl std::fmt::Debug for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probe")
            .field("meta", &self.meta)
            .field("fixes", &self.fixes)
            .finish_non_exhaustive()
    }
}

impl Probe {
    pub fn new<F>(id: &str, category: Category, title: &str, weight: u32, eval: F) -> Self
    where
        F: Fn(&ProbeContext<'_>) -> Result<CheckResult, ProbeError> + Send + Sync + 'static,
    {
        Self {
            meta: ProbeMeta::new(id, category, title, weight),
            fixes: Vec::new(),
            eval: Box::new(eval),
        }
    }

    /// Declares the fixes this probe may reference from its results.
    pub fn with_fixes(mut self, fix_ids: &[&str]) -> Self {
        self.fixes = fix_ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn meta(&self) -> &ProbeMeta {
        &self.meta
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn category(&self) -> Category {
        self.meta.category
    }

    pub fn fixes(&self) -> &[String] {
        &self.fixes
    }

    /// Never panics and never fails: errors, deadline overruns and panics all come back as
    /// an ERROR result for this probe alone.
    pub fn evaluate(&self, system: &dyn SystemProbe, deadline: Instant) -> CheckResult {
        let ctx = ProbeContext::new(&self.meta, system, deadline);
        if ctx.check_deadline().is_err() {
            return ctx.error(ProbeError::Timeout.to_string());
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.eval)(&ctx)));
        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                tracing::debug!(probe = %self.meta.id, error = %err, "probe error");
                ctx.error(err.to_string()).with_detail("error_kind", err.kind())
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::warn!(probe = %self.meta.id, "probe panicked: {msg}");
                ctx.error(format!("internal: {msg}"))
                    .with_detail("error_kind", "internal")
            }
        };

        result.probe_id = self.meta.id.clone();
        result.title = self.meta.title.clone();
        result.category = self.meta.category;
        result.weight = self.meta.weight;

        if let Some(fix) = result.fix.as_deref() {
            if !self.fixes.iter().any(|f| f == fix) {
                let msg = format!("internal: unknown fix reference {fix}");
                tracing::warn!(probe = %self.meta.id, "{msg}");
                return ctx.error(msg).with_detail("error_kind", "internal");
            }
        }
        result
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "panic".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::fake::FakeSystem;

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn stamps_identity_onto_results() {
        let probe = Probe::new("health.x", Category::Health, "X", 7, |ctx| Ok(ctx.pass("fine")));
        let r = probe.evaluate(&FakeSystem::new(), soon());
        assert_eq!(r.probe_id, "health.x");
        assert_eq!(r.weight, 7);
        assert_eq!(r.status, CheckStatus::Pass);
    }

    #[test]
    fn missing_tool_becomes_error_result() {
        let probe = Probe::new("health.x", Category::Health, "X", 1, |ctx| {
            ctx.run("no-such-tool", &[])?;
            Ok(ctx.pass("unreachable"))
        });
        let r = probe.evaluate(&FakeSystem::new(), soon());
        assert_eq!(r.status, CheckStatus::Error);
        assert_eq!(r.details.get("error_kind").map(String::as_str), Some("tool_missing"));
    }

    #[test]
    fn permission_denied_becomes_error_result() {
        let probe = Probe::new("security.x", Category::Security, "X", 1, |ctx| {
            ctx.run("getenforce", &[])?;
            Ok(ctx.pass("unreachable"))
        });
        let r = probe.evaluate(&FakeSystem::new().denied("getenforce"), soon());
        assert_eq!(r.status, CheckStatus::Error);
        assert!(r.message.starts_with("permission denied"));
    }

    #[test]
    fn panic_is_contained_and_reported() {
        let probe = Probe::new("health.x", Category::Health, "X", 1, |_ctx| panic!("kaboom"));
        let r = probe.evaluate(&FakeSystem::new(), soon());
        assert_eq!(r.status, CheckStatus::Error);
        assert_eq!(r.message, "internal: kaboom");
    }

    #[test]
    fn expired_deadline_yields_timeout_without_running() {
        let probe = Probe::new("health.x", Category::Health, "X", 1, |_ctx| panic!("must not run"));
        let r = probe.evaluate(&FakeSystem::new(), Instant::now());
        assert_eq!(r.status, CheckStatus::Error);
        assert_eq!(r.message, "timeout");
    }

    #[test]
    fn command_overrunning_deadline_is_a_timeout() {
        let probe = Probe::new("health.x", Category::Health, "X", 1, |ctx| {
            ctx.run("journalctl", &[])?;
            Ok(ctx.pass("unreachable"))
        });
        let deadline = Instant::now() + Duration::from_millis(50);
        let r = probe.evaluate(&FakeSystem::new().hanging("journalctl"), deadline);
        assert_eq!(r.status, CheckStatus::Error);
        assert_eq!(r.message, "timeout");
    }

    #[test]
    fn undeclared_fix_reference_is_rejected() {
        let probe = Probe::new("health.x", Category::Health, "X", 1, |ctx| {
            Ok(ctx.fail("bad").with_fix("health.other"))
        })
        .with_fixes(&["health.declared"]);
        let r = probe.evaluate(&FakeSystem::new(), soon());
        assert_eq!(r.status, CheckStatus::Error);
        assert!(r.fix.is_none());
        assert!(r.message.contains("health.other"));
    }
}
