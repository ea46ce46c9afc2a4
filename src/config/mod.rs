use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::Category;
use crate::scan::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY};

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub ui: UiConfig,
    pub scan: ScanConfig,
    pub fix: FixConfig,
    pub report: ReportConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanConfig {
    pub concurrency: usize,
    pub probe_timeout_secs: u64,
    pub categories: Vec<Category>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixConfig {
    pub include_warnings: bool,
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportConfig {
    pub include_details: bool,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            ui: UiConfig {
                color: true,
                max_table_rows: 40,
            },
            scan: ScanConfig {
                concurrency: DEFAULT_CONCURRENCY,
                probe_timeout_secs: 10,
                categories: Category::DEFAULT.to_vec(),
                exclude: Vec::new(),
            },
            fix: FixConfig {
                include_warnings: false,
                command_timeout_secs: 600,
            },
            report: ReportConfig {
                include_details: true,
            },
            config_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    ui: Option<RawUiConfig>,
    scan: Option<RawScanConfig>,
    fix: Option<RawFixConfig>,
    report: Option<RawReportConfig>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawScanConfig {
    concurrency: Option<usize>,
    probe_timeout_secs: Option<u64>,
    categories: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawFixConfig {
    include_warnings: Option<bool>,
    command_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawReportConfig {
    include_details: Option<bool>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/fedchecker/config.toml")
}

/// Defaults, then the TOML file, then `FEDCHECKER_*` variables. CLI flags are applied by the caller.
pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    load_with_env(config_path, home_dir, |key| std::env::var(key).ok())
}

fn load_with_env(
    config_path: Option<&Path>,
    home_dir: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .or_else(|| {
            env("FEDCHECKER_CONFIG")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s)
            .with_context(|| format!("failed to parse config file (TOML): {}", path.display()))?;
        apply_raw_config(&mut cfg, raw)?;
        cfg.config_path = Some(path.display().to_string());
    } else if config_path.is_some() {
        anyhow::bail!("config file not found: {}", path.display());
    }

    apply_env_overrides(&mut cfg, env)?;
    cfg.scan.concurrency = cfg.scan.concurrency.clamp(1, MAX_CONCURRENCY);
    crate::scan::validate_excludes(&cfg.scan.exclude).context("scan.exclude")?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) -> Result<()> {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    if let Some(scan) = raw.scan {
        if let Some(concurrency) = scan.concurrency {
            cfg.scan.concurrency = concurrency;
        }
        if let Some(secs) = scan.probe_timeout_secs {
            cfg.scan.probe_timeout_secs = positive_secs(secs).context("scan.probe_timeout_secs")?;
        }
        if let Some(categories) = scan.categories {
            cfg.scan.categories = parse_categories(categories.iter().map(String::as_str))
                .context("scan.categories")?;
        }
        if let Some(exclude) = scan.exclude {
            cfg.scan.exclude = exclude;
        }
    }

    if let Some(fix) = raw.fix {
        if let Some(include_warnings) = fix.include_warnings {
            cfg.fix.include_warnings = include_warnings;
        }
        if let Some(secs) = fix.command_timeout_secs {
            cfg.fix.command_timeout_secs = positive_secs(secs).context("fix.command_timeout_secs")?;
        }
    }

    if let Some(report) = raw.report {
        if let Some(include_details) = report.include_details {
            cfg.report.include_details = include_details;
        }
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut EffectiveConfig, env: impl Fn(&str) -> Option<String>) -> Result<()> {
    if let Some(v) = env("FEDCHECKER_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).context("FEDCHECKER_UI_COLOR")?;
    }
    if let Some(v) = env("FEDCHECKER_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .context("FEDCHECKER_UI_MAX_TABLE_ROWS")?;
    }
    if let Some(v) = env("FEDCHECKER_SCAN_CONCURRENCY") {
        cfg.scan.concurrency = v
            .trim()
            .parse::<usize>()
            .context("FEDCHECKER_SCAN_CONCURRENCY")?;
    }
    if let Some(v) = env("FEDCHECKER_SCAN_PROBE_TIMEOUT_SECS") {
        let secs = v
            .trim()
            .parse::<u64>()
            .context("FEDCHECKER_SCAN_PROBE_TIMEOUT_SECS")?;
        cfg.scan.probe_timeout_secs = positive_secs(secs).context("FEDCHECKER_SCAN_PROBE_TIMEOUT_SECS")?;
    }
    if let Some(v) = env("FEDCHECKER_SCAN_CATEGORIES") {
        let parts = split_list(&v);
        if !parts.is_empty() {
            cfg.scan.categories = parse_categories(parts.iter().map(String::as_str))
                .context("FEDCHECKER_SCAN_CATEGORIES")?;
        }
    }
    if let Some(v) = env("FEDCHECKER_SCAN_EXCLUDE") {
        let parts = split_list(&v);
        if !parts.is_empty() {
            cfg.scan.exclude = parts;
        }
    }
    if let Some(v) = env("FEDCHECKER_FIX_INCLUDE_WARNINGS") {
        cfg.fix.include_warnings = parse_bool(&v).context("FEDCHECKER_FIX_INCLUDE_WARNINGS")?;
    }
    if let Some(v) = env("FEDCHECKER_FIX_COMMAND_TIMEOUT_SECS") {
        let secs = v
            .trim()
            .parse::<u64>()
            .context("FEDCHECKER_FIX_COMMAND_TIMEOUT_SECS")?;
        cfg.fix.command_timeout_secs = positive_secs(secs).context("FEDCHECKER_FIX_COMMAND_TIMEOUT_SECS")?;
    }
    if let Some(v) = env("FEDCHECKER_REPORT_INCLUDE_DETAILS") {
        cfg.report.include_details = parse_bool(&v).context("FEDCHECKER_REPORT_INCLUDE_DETAILS")?;
    }

    Ok(())
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Deduplicated, in scan order.
pub fn parse_categories<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Vec<Category>> {
    let mut out = Vec::new();
    for name in names {
        let category: Category = name.parse().map_err(anyhow::Error::msg)?;
        if !out.contains(&category) {
            out.push(category);
        }
    }
    out.sort();
    Ok(out)
}

fn positive_secs(secs: u64) -> Result<u64> {
    if secs == 0 {
        anyhow::bail!("timeout must be at least 1 second");
    }
    Ok(secs)
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "invalid boolean: {s} (expected true|false|1|0|yes|no|on|off)"
        )),
    }
}
