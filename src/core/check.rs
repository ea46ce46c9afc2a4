use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Error,
    Skipped,
}

impl CheckStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Warn => "WARN",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Error => "ERROR",
            CheckStatus::Skipped => "SKIPPED",
        }
    }

    /// FAIL and ERROR are the statuses that make a result's fix eligible for planning.
    pub const fn is_failure(self) -> bool {
        matches!(self, CheckStatus::Fail | CheckStatus::Error)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static identity of a probe, copied into every result it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeMeta {
    pub id: String,
    pub category: Category,
    pub title: String,
    pub weight: u32,
}

impl ProbeMeta {
    pub fn new(id: impl Into<String>, category: Category, title: impl Into<String>, weight: u32) -> Self {
        Self {
            id: id.into(),
            category,
            title: title.into(),
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub probe_id: String,
    pub title: String,
    pub category: Category,
    pub weight: u32,
    pub status: CheckStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

impl CheckResult {
    pub fn new(meta: &ProbeMeta, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            probe_id: meta.id.clone(),
            title: meta.title.clone(),
            category: meta.category,
            weight: meta.weight,
            status,
            message: message.into(),
            details: BTreeMap::new(),
            fix: None,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_fix(mut self, fix_id: impl Into<String>) -> Self {
        self.fix = Some(fix_id.into());
        self
    }
}
