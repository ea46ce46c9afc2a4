use std::io::{self, BufRead, Write};

use anyhow::{Result, anyhow};

use crate::orchestrator::ConfirmPrompt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Selection {
    All,
    None,
    Indices(Vec<usize>),
}

pub(crate) fn prompt_fix_selection(fix_count: usize) -> Result<Selection> {
    let mut stderr = io::stderr().lock();
    write!(stderr, "Select fixes to run (e.g. 1,3-5 / all / none) [default: all]: ")?;
    stderr.flush()?;

    let mut input = String::new();
    let mut stdin = io::stdin().lock();
    let n = stdin.read_line(&mut input)?;
    if n == 0 {
        return Ok(Selection::None);
    }
    parse_selection(&input, fix_count)
}

pub(crate) fn parse_selection(input: &str, max: usize) -> Result<Selection> {
    if max == 0 {
        return Ok(Selection::None);
    }

    let s = input.trim();
    if s.is_empty() {
        return Ok(Selection::All);
    }

    let s = s.to_ascii_lowercase();
    match s.as_str() {
        "all" | "*" => return Ok(Selection::All),
        "none" | "no" | "n" | "q" | "quit" => return Ok(Selection::None),
        _ => {}
    }

    let mut selected = vec![false; max];
    for token in s.split(|c: char| c == ',' || c.is_whitespace()) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let (start, end) = match token.split_once('-') {
            Some((start, end)) => (
                parse_index(start, token)?,
                parse_index(end, token)?,
            ),
            None => {
                let idx = parse_index(token, token)?;
                (idx, idx)
            }
        };
        if start > end {
            return Err(anyhow!("invalid range (start > end): {token}"));
        }
        if end > max {
            return Err(anyhow!("selection out of range (max {max}): {token}"));
        }
        for i in start..=end {
            selected[i - 1] = true;
        }
    }

    let indices: Vec<usize> = selected
        .into_iter()
        .enumerate()
        .filter_map(|(idx, on)| on.then_some(idx))
        .collect();

    if indices.is_empty() {
        return Err(anyhow!("no fixes selected (use 'all' or 'none')"));
    }

    Ok(Selection::Indices(indices))
}

fn parse_index(s: &str, token: &str) -> Result<usize> {
    let idx = s
        .trim()
        .parse::<usize>()
        .map_err(|_| anyhow!("invalid selection: {token}"))?;
    if idx == 0 {
        return Err(anyhow!("selections start at 1: {token}"));
    }
    Ok(idx)
}

/// Asks on the terminal; only `y` / `yes` accepts.
pub(crate) struct TerminalPrompt;

impl ConfirmPrompt for TerminalPrompt {
    fn confirm(&self, fix_id: &str, preview: &[String]) -> bool {
        match confirm_on_terminal(fix_id, preview) {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(fix = fix_id, "confirmation prompt failed: {err:#}");
                false
            }
        }
    }
}

fn confirm_on_terminal(fix_id: &str, preview: &[String]) -> Result<bool> {
    let mut stderr = io::stderr().lock();
    writeln!(stderr)?;
    for line in preview {
        writeln!(stderr, "  {line}")?;
    }
    write!(stderr, "Apply {fix_id}? [y/N]: ")?;
    stderr.flush()?;

    let mut input = String::new();
    let n = io::stdin().lock().read_line(&mut input)?;
    if n == 0 {
        return Ok(false);
    }
    Ok(is_yes(&input))
}

fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
