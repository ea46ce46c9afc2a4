use serde::{Deserialize, Serialize};

use crate::core::{Category, CheckResult, CheckStatus, score};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub os_name: String,
    pub os_version: String,
    pub kernel: String,
    pub hostname: String,
}

impl HostInfo {
    pub fn unknown() -> Self {
        Self {
            os_name: "unknown".to_string(),
            os_version: "unknown".to_string(),
            kernel: "unknown".to_string(),
            hostname: "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryReport {
    pub category: Category,
    pub score: u8,
    pub results: Vec<CheckResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pass: usize,
    pub warn: usize,
    pub fail: usize,
    pub error: usize,
    pub skipped: usize,
}

/// Snapshot of one scan. Built once by the scan runner and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    schema_version: String,
    tool_version: String,
    generated_at: String,
    host: HostInfo,
    score: u8,
    categories: Vec<CategoryReport>,
}

impl Report {
    /// Groups results by category (category order), keeping their relative order within a category.
    pub fn new(generated_at: impl Into<String>, host: HostInfo, results: Vec<CheckResult>) -> Self {
        let mut categories: Vec<CategoryReport> = Vec::new();
        for category in Category::ALL {
            let results: Vec<CheckResult> = results
                .iter()
                .filter(|r| r.category == category)
                .cloned()
                .collect();
            if results.is_empty() {
                continue;
            }
            categories.push(CategoryReport {
                category,
                score: score(&results),
                results,
            });
        }
        let overall = score(categories.iter().flat_map(|c| c.results.iter()));

        Self {
            schema_version: "1.0".to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: generated_at.into(),
            host,
            score: overall,
            categories,
        }
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn tool_version(&self) -> &str {
        &self.tool_version
    }

    pub fn generated_at(&self) -> &str {
        &self.generated_at
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    pub fn categories(&self) -> &[CategoryReport] {
        &self.categories
    }

    pub fn category_score(&self, category: Category) -> Option<u8> {
        self.categories
            .iter()
            .find(|c| c.category == category)
            .map(|c| c.score)
    }

    /// All results, category order then declaration order.
    pub fn results(&self) -> impl Iterator<Item = &CheckResult> {
        self.categories.iter().flat_map(|c| c.results.iter())
    }

    pub fn result(&self, probe_id: &str) -> Option<&CheckResult> {
        self.results().find(|r| r.probe_id == probe_id)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for r in self.results() {
            match r.status {
                CheckStatus::Pass => counts.pass += 1,
                CheckStatus::Warn => counts.warn += 1,
                CheckStatus::Fail => counts.fail += 1,
                CheckStatus::Error => counts.error += 1,
                CheckStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProbeMeta;

    fn result(id: &str, category: Category, status: CheckStatus) -> CheckResult {
        CheckResult::new(&ProbeMeta::new(id, category, id, 10), status, "")
    }

    #[test]
    fn groups_by_category_and_scores_each_group() {
        let report = Report::new(
            "2026-01-01T00:00:00Z",
            HostInfo::unknown(),
            vec![
                result("security.a", Category::Security, CheckStatus::Fail),
                result("health.a", Category::Health, CheckStatus::Pass),
                result("health.b", Category::Health, CheckStatus::Warn),
            ],
        );

        let cats: Vec<Category> = report.categories().iter().map(|c| c.category).collect();
        assert_eq!(cats, vec![Category::Health, Category::Security]);
        assert_eq!(report.category_score(Category::Health), Some(75));
        assert_eq!(report.category_score(Category::Security), Some(0));
        assert_eq!(report.category_score(Category::Desktop), None);
        assert_eq!(report.score(), 50);

        let ids: Vec<&str> = report.results().map(|r| r.probe_id.as_str()).collect();
        assert_eq!(ids, vec!["health.a", "health.b", "security.a"]);
        assert_eq!(report.counts().warn, 1);
    }

    #[test]
    fn serializes_statuses_and_categories_in_upper_case() {
        let report = Report::new(
            "2026-01-01T00:00:00Z",
            HostInfo::unknown(),
            vec![result("drivers.x", Category::Drivers, CheckStatus::Skipped)],
        );
        let v = serde_json::to_value(&report).expect("serialize");
        assert_eq!(v["schema_version"], "1.0");
        assert_eq!(v["score"], 100);
        assert_eq!(v["categories"][0]["category"], "DRIVERS");
        assert_eq!(v["categories"][0]["results"][0]["status"], "SKIPPED");
        assert!(v["categories"][0]["results"][0].get("fix").is_none());
    }
}
