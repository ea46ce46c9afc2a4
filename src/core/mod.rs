mod category;
mod check;
mod outcome;
mod report;
mod score;

pub use category::Category;
pub use check::{CheckResult, CheckStatus, ProbeMeta};
pub use outcome::{FixFailure, FixOutcome, FixStatus, StepAttempt, StepPhase};
pub use report::{CategoryReport, HostInfo, Report, StatusCounts};
pub use score::score;
