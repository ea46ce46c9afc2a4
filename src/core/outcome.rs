use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixStatus {
    Applied,
    Failed,
    Skipped,
    RolledBack,
}

impl FixStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            FixStatus::Applied => "APPLIED",
            FixStatus::Failed => "FAILED",
            FixStatus::Skipped => "SKIPPED",
            FixStatus::RolledBack => "ROLLED_BACK",
        }
    }
}

impl fmt::Display for FixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an outcome is not a plain APPLIED. Steps are zero-based indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FixFailure {
    #[serde(rename = "PRIVILEGE_DENIED")]
    PrivilegeDenied,
    #[serde(rename = "STEP_FAILED")]
    StepFailed { step: usize },
    #[serde(rename = "ROLLBACK_FAILED")]
    RollbackFailed { step: usize },
    #[serde(rename = "DECLINED")]
    Declined,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(rename = "INTERNAL")]
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    Apply,
    Undo,
}

/// One command run on behalf of a fix, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAttempt {
    pub step: usize,
    pub phase: StepPhase,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixOutcome {
    pub fix_id: String,
    pub status: FixStatus,
    pub message: String,
    pub steps_executed: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FixFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<StepAttempt>,
}

impl FixOutcome {
    pub fn applied(fix_id: impl Into<String>, message: impl Into<String>, steps_executed: Vec<usize>) -> Self {
        Self {
            fix_id: fix_id.into(),
            status: FixStatus::Applied,
            message: message.into(),
            steps_executed,
            failure: None,
            attempts: Vec::new(),
        }
    }

    pub fn failed(
        fix_id: impl Into<String>,
        message: impl Into<String>,
        steps_executed: Vec<usize>,
        failure: FixFailure,
    ) -> Self {
        Self {
            fix_id: fix_id.into(),
            status: FixStatus::Failed,
            message: message.into(),
            steps_executed,
            failure: Some(failure),
            attempts: Vec::new(),
        }
    }

    pub fn skipped(fix_id: impl Into<String>, message: impl Into<String>, failure: FixFailure) -> Self {
        Self {
            fix_id: fix_id.into(),
            status: FixStatus::Skipped,
            message: message.into(),
            steps_executed: Vec::new(),
            failure: Some(failure),
            attempts: Vec::new(),
        }
    }

    pub fn with_attempts(mut self, attempts: Vec<StepAttempt>) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn rollback_failed(&self) -> bool {
        matches!(self.failure, Some(FixFailure::RollbackFailed { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_is_tagged_in_json() {
        let outcome = FixOutcome::failed("f", "boom", vec![0, 1], FixFailure::StepFailed { step: 1 });
        let v = serde_json::to_value(&outcome).expect("serialize");
        assert_eq!(v["status"], "FAILED");
        assert_eq!(v["failure"]["kind"], "STEP_FAILED");
        assert_eq!(v["failure"]["step"], 1);
        assert!(v.get("attempts").is_none());
    }
}
