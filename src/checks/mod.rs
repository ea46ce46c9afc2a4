//! Built-in probes and fixes, one module per category.

pub(crate) mod desktop;
pub(crate) mod drivers;
pub(crate) mod health;
pub(crate) mod security;
pub(crate) mod setup;

use crate::fix::StepCommand;
use crate::probe::{ProbeContext, ProbeError};
use crate::platform::CommandOutput;

pub(crate) const RPMFUSION_FREE_RELEASE: &str =
    "https://mirrors.rpmfusion.org/free/fedora/rpmfusion-free-release-{fedora}.noarch.rpm";
pub(crate) const RPMFUSION_NONFREE_RELEASE: &str =
    "https://mirrors.rpmfusion.org/nonfree/fedora/rpmfusion-nonfree-release-{fedora}.noarch.rpm";

pub(crate) fn cmd(program: &str, args: &[&str]) -> StepCommand {
    StepCommand::new(program, args)
}

/// Trimmed, non-empty lines.
pub(crate) fn content_lines(s: &str) -> impl Iterator<Item = &str> {
    s.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// `Ok(None)` when the tool is not installed; other failures propagate.
pub(crate) fn run_optional(
    ctx: &ProbeContext<'_>,
    cmd: &str,
    args: &[&str],
) -> Result<Option<CommandOutput>, ProbeError> {
    match ctx.run(cmd, args) {
        Ok(out) => Ok(Some(out)),
        Err(ProbeError::ToolMissing(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// First whitespace-separated value for `key` in `Key: value kB` style text.
pub(crate) fn field_u64(text: &str, key: &str) -> Option<u64> {
    text.lines().find_map(|line| {
        let (k, rest) = line.split_once(':')?;
        if k.trim() != key {
            return None;
        }
        rest.split_whitespace().next()?.parse().ok()
    })
}

pub(crate) fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 * 100.0 / total as f64
}
