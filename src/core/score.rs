use crate::core::{CheckResult, CheckStatus};

/// Weighted health score in `0..=100`.
///
/// PASS counts its full weight, WARN half, FAIL and ERROR nothing. SKIPPED results are left
/// out of both sides. With nothing left to count the score is 100.
pub fn score<'a>(results: impl IntoIterator<Item = &'a CheckResult>) -> u8 {
    // Work in half-weights so WARN stays integral.
    let mut earned: u64 = 0;
    let mut possible: u64 = 0;
    for r in results {
        let w = u64::from(r.weight);
        match r.status {
            CheckStatus::Skipped => continue,
            CheckStatus::Pass => earned += 2 * w,
            CheckStatus::Warn => earned += w,
            CheckStatus::Fail | CheckStatus::Error => {}
        }
        possible += 2 * w;
    }
    if possible == 0 {
        return 100;
    }
    // round half up
    let pct = (200 * earned + possible) / (2 * possible);
    pct.min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Category, ProbeMeta};

    fn result(weight: u32, status: CheckStatus) -> CheckResult {
        let meta = ProbeMeta::new(format!("p{weight}"), Category::Health, "probe", weight);
        CheckResult::new(&meta, status, "")
    }

    #[test]
    fn pass_and_fail_of_equal_weight_scores_fifty() {
        let results = [result(10, CheckStatus::Pass), result(10, CheckStatus::Fail)];
        assert_eq!(score(&results), 50);
    }

    #[test]
    fn warn_counts_half_and_skipped_is_ignored() {
        let results = [
            result(4, CheckStatus::Warn),
            result(4, CheckStatus::Pass),
            result(100, CheckStatus::Skipped),
        ];
        assert_eq!(score(&results), 75);
    }

    #[test]
    fn empty_or_all_skipped_is_a_vacuous_pass() {
        assert_eq!(score(&[]), 100);
        assert_eq!(score(&[result(3, CheckStatus::Skipped)]), 100);
    }

    #[test]
    fn errors_score_like_failures() {
        let results = [result(1, CheckStatus::Error), result(2, CheckStatus::Pass)];
        assert_eq!(score(&results), 67);
    }

    #[test]
    fn all_pass_is_one_hundred_and_rounding_stays_in_range() {
        let results = [result(7, CheckStatus::Pass), result(3, CheckStatus::Pass)];
        assert_eq!(score(&results), 100);

        let mixed = [
            result(1, CheckStatus::Warn),
            result(2, CheckStatus::Fail),
            result(5, CheckStatus::Warn),
            result(9, CheckStatus::Error),
        ];
        let s = score(&mixed);
        assert!(s <= 100);
        assert_eq!(s, 18);
    }
}
