use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::{FixFailure, FixOutcome, FixStatus, StepAttempt, StepPhase};
use crate::orchestrator::AuditLogger;

const MAX_CMD_OUTPUT_BYTES: usize = 64 * 1024;
const AUDIT_PREFIX: &str = "fix-run-";
const AUDIT_SUFFIX: &str = ".jsonl";

#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    schema_version: &'static str,
    tool_version: &'static str,
    recorded_at: String,
    fix_id: &'a str,
    status: FixStatus,
    message: String,
    steps_executed: &'a [usize],
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<&'a FixFailure>,
    attempts: Vec<CommandAttemptLog>,
}

#[derive(Debug, Serialize)]
struct CommandAttemptLog {
    step: usize,
    phase: StepPhase,
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn logs_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/fedchecker/logs")
}

/// One JSON line per fix outcome, appended as the run progresses.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    home_dir: PathBuf,
}

impl AuditLog {
    pub fn create(home_dir: &Path) -> Result<Self> {
        let dir = logs_dir(home_dir);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory: {}", dir.display()))?;

        let pid = std::process::id();
        let ts = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let path = dir.join(format!("{AUDIT_PREFIX}{pid}-{ts}{AUDIT_SUFFIX}"));
        std::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to create audit log: {}", path.display()))?;

        Ok(Self {
            path,
            home_dir: home_dir.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn to_record<'a>(&self, outcome: &'a FixOutcome) -> AuditRecord<'a> {
        AuditRecord {
            schema_version: "1.0",
            tool_version: env!("CARGO_PKG_VERSION"),
            recorded_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| "unknown".to_string()),
            fix_id: &outcome.fix_id,
            status: outcome.status,
            message: mask_home_text(&outcome.message, &self.home_dir),
            steps_executed: &outcome.steps_executed,
            failure: outcome.failure.as_ref(),
            attempts: outcome
                .attempts
                .iter()
                .map(|a| command_attempt(a, &self.home_dir))
                .collect(),
        }
    }
}

impl AuditLogger for AuditLog {
    fn record(&self, outcome: &FixOutcome) -> Result<()> {
        let mut line = serde_json::to_string(&self.to_record(outcome))
            .context("failed to serialize audit record")?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open audit log: {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to write audit log: {}", self.path.display()))?;
        Ok(())
    }
}

/// Where a fix run records its outcomes. When the log file cannot be created the run still
/// proceeds, and every record attempt fails so the orchestrator reports it as a warning.
#[derive(Debug)]
pub enum AuditSink {
    File(AuditLog),
    Unavailable(String),
}

impl AuditSink {
    pub fn open(home_dir: &Path) -> Self {
        match AuditLog::create(home_dir) {
            Ok(log) => AuditSink::File(log),
            Err(err) => {
                tracing::warn!("audit log unavailable: {err:#}");
                AuditSink::Unavailable(format!("{err:#}"))
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            AuditSink::File(log) => Some(log.path()),
            AuditSink::Unavailable(_) => None,
        }
    }
}

impl AuditLogger for AuditSink {
    fn record(&self, outcome: &FixOutcome) -> Result<()> {
        match self {
            AuditSink::File(log) => log.record(outcome),
            AuditSink::Unavailable(reason) => Err(anyhow::anyhow!("audit log unavailable: {reason}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLogEntry {
    pub path: PathBuf,
    #[serde(skip)]
    pub modified: Option<SystemTime>,
    pub outcomes: usize,
    pub failed: usize,
}

/// Audit logs under the log directory, newest first. A missing directory means no logs.
pub fn list_audit_logs(home_dir: &Path) -> Result<Vec<AuditLogEntry>> {
    let dir = logs_dir(home_dir);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(&dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("failed to read log directory: {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.starts_with(AUDIT_PREFIX) || !name.ends_with(AUDIT_SUFFIX) {
            continue;
        }
        let text = std::fs::read_to_string(entry.path())
            .with_context(|| format!("failed to read audit log: {}", entry.path().display()))?;
        let mut outcomes = 0;
        let mut failed = 0;
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            outcomes += 1;
            let status = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|v| v.get("status").and_then(|s| s.as_str()).map(str::to_string));
            if status.as_deref() == Some(FixStatus::Failed.as_str()) {
                failed += 1;
            }
        }
        out.push(AuditLogEntry {
            path: entry.path().to_path_buf(),
            modified: entry.metadata().ok().and_then(|m| m.modified().ok()),
            outcomes,
            failed,
        });
    }
    out.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));
    Ok(out)
}

pub fn mask_home(path: &Path, home_dir: &Path) -> String {
    let Ok(stripped) = path.strip_prefix(home_dir) else {
        return path.display().to_string();
    };
    let stripped = stripped.display().to_string();
    if stripped.is_empty() {
        "~".to_string()
    } else {
        format!("~/{stripped}")
    }
}

fn mask_home_text(text: &str, home_dir: &Path) -> String {
    let home = home_dir.display().to_string();
    if home.len() <= 1 {
        return text.to_string();
    }
    text.replace(&home, "~")
}

fn command_attempt(attempt: &StepAttempt, home_dir: &Path) -> CommandAttemptLog {
    CommandAttemptLog {
        step: attempt.step,
        phase: attempt.phase,
        command: attempt.command.clone(),
        exit_code: attempt.exit_code,
        stdout: truncate_string(&mask_home_text(&attempt.stdout, home_dir), MAX_CMD_OUTPUT_BYTES),
        stderr: truncate_string(&mask_home_text(&attempt.stderr, home_dir), MAX_CMD_OUTPUT_BYTES),
        error: attempt.error.clone(),
    }
}

fn truncate_string(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut idx = max_bytes;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx = idx.saturating_sub(1);
    }
    let head = &s[..idx];
    format!("{head}\n...(truncated, total={} bytes)", s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(stdout: String) -> StepAttempt {
        StepAttempt {
            step: 0,
            phase: StepPhase::Apply,
            command: "dnf clean all".to_string(),
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
            error: None,
        }
    }

    #[test]
    fn appends_one_json_line_per_outcome() {
        let home = tempfile::tempdir().expect("tempdir");
        let log = AuditLog::create(home.path()).expect("create");
        assert!(log.path().starts_with(logs_dir(home.path())));

        let applied = FixOutcome::applied("health.clean-package-cache", "applied 1 step(s)", vec![0])
            .with_attempts(vec![attempt("Cleaning up\n".to_string())]);
        let failed = FixOutcome::failed(
            "security.harden-ssh",
            format!("could not write {}/x", home.path().display()),
            vec![0, 1],
            FixFailure::StepFailed { step: 1 },
        );
        log.record(&applied).expect("record");
        log.record(&failed).expect("record");

        let text = std::fs::read_to_string(log.path()).expect("read");
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["schema_version"], "1.0");
        assert_eq!(lines[0]["fix_id"], "health.clean-package-cache");
        assert_eq!(lines[0]["status"], "APPLIED");
        assert_eq!(lines[0]["attempts"][0]["command"], "dnf clean all");
        assert_eq!(lines[0]["attempts"][0]["phase"], "apply");
        assert_eq!(lines[1]["status"], "FAILED");
        assert_eq!(lines[1]["failure"]["kind"], "STEP_FAILED");
        assert_eq!(lines[1]["message"], "could not write ~/x");
        assert!(lines[1]["recorded_at"].as_str().is_some());
    }

    #[test]
    fn long_command_output_is_truncated() {
        let home = tempfile::tempdir().expect("tempdir");
        let log = AuditLog::create(home.path()).expect("create");
        let big = "é".repeat(MAX_CMD_OUTPUT_BYTES);
        let outcome = FixOutcome::applied("f", "ok", vec![0]).with_attempts(vec![attempt(big)]);
        log.record(&outcome).expect("record");

        let text = std::fs::read_to_string(log.path()).expect("read");
        let v: serde_json::Value = serde_json::from_str(text.trim()).expect("json");
        let stdout = v["attempts"][0]["stdout"].as_str().expect("stdout");
        assert!(stdout.contains("...(truncated, total="));
        assert!(stdout.len() < MAX_CMD_OUTPUT_BYTES + 100);
    }

    #[test]
    fn lists_audit_logs_with_counts() {
        let home = tempfile::tempdir().expect("tempdir");
        assert!(list_audit_logs(home.path()).expect("list").is_empty());

        let log = AuditLog::create(home.path()).expect("create");
        log.record(&FixOutcome::applied("a", "ok", vec![0])).expect("record");
        log.record(&FixOutcome::failed("b", "no", vec![0], FixFailure::StepFailed { step: 0 }))
            .expect("record");
        std::fs::write(logs_dir(home.path()).join("notes.txt"), "ignore me").expect("write");

        let entries = list_audit_logs(home.path()).expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, log.path());
        assert_eq!(entries[0].outcomes, 2);
        assert_eq!(entries[0].failed, 1);
    }

    #[test]
    fn sink_without_log_directory_reports_every_record() {
        let home = tempfile::tempdir().expect("tempdir");
        // a regular file where the .config directory should be
        std::fs::write(home.path().join(".config"), "").expect("write");
        let sink = AuditSink::open(home.path());
        assert!(sink.path().is_none());
        let err = sink
            .record(&FixOutcome::applied("a", "ok", vec![0]))
            .expect_err("unavailable");
        assert!(err.to_string().contains("audit log unavailable"));
    }

    #[test]
    fn masks_home_prefix() {
        let home = Path::new("/home/alex");
        assert_eq!(mask_home(Path::new("/home/alex/.config/x"), home), "~/.config/x");
        assert_eq!(mask_home(Path::new("/home/alex"), home), "~");
        assert_eq!(mask_home(Path::new("/etc/passwd"), home), "/etc/passwd");
    }
}
