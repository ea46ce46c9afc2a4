use std::collections::BTreeMap;

use crate::core::{Category, CheckResult};
use crate::fix::{Fix, FixStep};
use crate::probe::{Probe, ProbeContext, ProbeError};

use super::{cmd, content_lines};

const INSTALL_FIREWALL: &str = "security.install-firewall";
const ENABLE_FIREWALL: &str = "security.enable-firewall";
const ENFORCE_SELINUX: &str = "security.enforce-selinux";
const ENABLE_SELINUX: &str = "security.enable-selinux";
const HARDEN_SSH: &str = "security.harden-ssh";
const ENABLE_AUTOMATIC_UPDATES: &str = "security.enable-automatic-updates";
const RESTORE_FILE_PERMISSIONS: &str = "security.restore-file-permissions";

const SSHD_CONFIG: &str = "/etc/ssh/sshd_config";
const SSHD_CONFIG_BACKUP: &str = "/etc/ssh/sshd_config.fedchecker.bak";
const SELINUX_CONFIG: &str = "/etc/selinux/config";
const SELINUX_CONFIG_BACKUP: &str = "/etc/selinux/config.fedchecker.bak";

/// Files and the permission bits they may carry.
const SENSITIVE_FILES: &[(&str, u32)] = &[
    ("/etc/passwd", 0o644),
    ("/etc/shadow", 0o700),
    ("/etc/gshadow", 0o700),
    ("/etc/sudoers", 0o440),
];

pub(crate) fn probes() -> Vec<Probe> {
    vec![
        Probe::new("security.firewall", Category::Security, "Firewall", 10, firewall)
            .with_fixes(&[INSTALL_FIREWALL, ENABLE_FIREWALL]),
        Probe::new("security.selinux", Category::Security, "SELinux", 10, selinux)
            .with_fixes(&[ENFORCE_SELINUX, ENABLE_SELINUX]),
        Probe::new("security.ssh-root-login", Category::Security, "SSH root login", 8, ssh_root_login)
            .with_fixes(&[HARDEN_SSH]),
        Probe::new(
            "security.automatic-updates",
            Category::Security,
            "Automatic updates",
            5,
            automatic_updates,
        )
        .with_fixes(&[ENABLE_AUTOMATIC_UPDATES]),
        Probe::new("security.password-policy", Category::Security, "Password policy", 3, password_policy),
        Probe::new("security.file-permissions", Category::Security, "System file permissions", 8, file_permissions)
            .with_fixes(&[RESTORE_FILE_PERMISSIONS]),
        Probe::new("security.kernel-hardening", Category::Security, "Kernel hardening", 5, kernel_hardening),
    ]
}

pub(crate) fn fixes() -> Vec<Fix> {
    vec![
        Fix::new(INSTALL_FIREWALL, "Install and start firewalld.", &["security.firewall"])
            .privileged()
            .step(FixStep::new("Install firewalld", cmd("dnf", &["install", "-y", "firewalld"])))
            .step(FixStep::new(
                "Enable firewalld.service",
                cmd("systemctl", &["enable", "--now", "firewalld.service"]),
            )),
        Fix::new(ENABLE_FIREWALL, "Enable and start firewalld.", &["security.firewall"])
            .privileged()
            .step(
                FixStep::new(
                    "Enable firewalld.service",
                    cmd("systemctl", &["enable", "--now", "firewalld.service"]),
                )
                .undo_with(cmd("systemctl", &["disable", "--now", "firewalld.service"])),
            ),
        Fix::new(ENFORCE_SELINUX, "Switch SELinux from permissive to enforcing mode.", &["security.selinux"])
            .privileged()
            .step(FixStep::new("Set enforcing", cmd("setenforce", &["1"])).undo_with(cmd("setenforce", &["0"]))),
        Fix::new(
            ENABLE_SELINUX,
            "Enable SELinux in enforcing mode. The filesystem is relabelled on the next boot.",
            &["security.selinux"],
        )
        .privileged()
        .step(
            FixStep::new("Back up SELinux config", cmd("cp", &["-a", SELINUX_CONFIG, SELINUX_CONFIG_BACKUP]))
                .undo_with(cmd("rm", &["-f", SELINUX_CONFIG_BACKUP])),
        )
        .step(
            FixStep::new(
                "Set SELINUX=enforcing",
                cmd("sed", &["-i", "s/^SELINUX=.*/SELINUX=enforcing/", SELINUX_CONFIG]),
            )
            .undo_with(cmd("cp", &["-a", SELINUX_CONFIG_BACKUP, SELINUX_CONFIG])),
        )
        .step(
            FixStep::new("Schedule relabel", cmd("touch", &["/.autorelabel"]))
                .undo_with(cmd("rm", &["-f", "/.autorelabel"])),
        ),
        Fix::new(
            HARDEN_SSH,
            "Disable root and empty-password logins over SSH.",
            &["security.ssh-root-login"],
        )
        .privileged()
        .step(
            FixStep::new("Back up sshd_config", cmd("cp", &["-a", SSHD_CONFIG, SSHD_CONFIG_BACKUP]))
                .undo_with(cmd("rm", &["-f", SSHD_CONFIG_BACKUP])),
        )
        .step(
            FixStep::new(
                "Disable root and empty-password login",
                cmd(
                    "sed",
                    &[
                        "-i",
                        "-E",
                        "-e",
                        "s/^#?[[:space:]]*PermitRootLogin[[:space:]].*/PermitRootLogin no/",
                        "-e",
                        "s/^#?[[:space:]]*PermitEmptyPasswords[[:space:]].*/PermitEmptyPasswords no/",
                        SSHD_CONFIG,
                    ],
                ),
            )
            .undo_with(cmd("cp", &["-a", SSHD_CONFIG_BACKUP, SSHD_CONFIG])),
        )
        .step(
            FixStep::new("Reload sshd", cmd("systemctl", &["reload", "sshd.service"]))
                .undo_with(cmd("systemctl", &["reload", "sshd.service"])),
        ),
        Fix::new(
            ENABLE_AUTOMATIC_UPDATES,
            "Install dnf-automatic and enable its timer.",
            &["security.automatic-updates"],
        )
        .privileged()
        .step(FixStep::new("Install dnf-automatic", cmd("dnf", &["install", "-y", "dnf-automatic"])))
        .step(FixStep::new(
            "Enable dnf-automatic.timer",
            cmd("systemctl", &["enable", "--now", "dnf-automatic.timer"]),
        )),
        Fix::new(
            RESTORE_FILE_PERMISSIONS,
            "Restore the standard permissions of account and sudo configuration files.",
            &["security.file-permissions"],
        )
        .privileged()
        .step(FixStep::new("Fix /etc/passwd", cmd("chmod", &["644", "/etc/passwd"])))
        .step(FixStep::new("Fix /etc/shadow", cmd("chmod", &["000", "/etc/shadow"])))
        .step(FixStep::new("Fix /etc/gshadow", cmd("chmod", &["000", "/etc/gshadow"])))
        .step(FixStep::new("Fix /etc/sudoers", cmd("chmod", &["440", "/etc/sudoers"]))),
    ]
}

fn firewall(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let units = ctx.run("systemctl", &["list-unit-files", "firewalld.service"])?;
    if !units.stdout.contains("firewalld.service") {
        return Ok(ctx.fail("firewalld is not installed").with_fix(INSTALL_FIREWALL));
    }
    let active = ctx.run("systemctl", &["is-active", "firewalld.service"])?;
    if active.stdout.trim() != "active" {
        return Ok(ctx.fail("firewalld is not running").with_fix(ENABLE_FIREWALL));
    }
    let zone = match ctx.run("firewall-cmd", &["--get-default-zone"]) {
        Ok(out) if out.success() => out.stdout.trim().to_string(),
        Err(ProbeError::Timeout) => return Err(ProbeError::Timeout),
        _ => "unknown".to_string(),
    };
    Ok(ctx.pass("firewalld is active").with_detail("default_zone", zone))
}

fn selinux(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let out = ctx.run("getenforce", &[])?;
    let mode = out.stdout.trim();
    match mode.to_ascii_lowercase().as_str() {
        "enforcing" => Ok(ctx.pass("enforcing")),
        "permissive" => Ok(ctx.warn("permissive: policy violations are only logged").with_fix(ENFORCE_SELINUX)),
        "disabled" => Ok(ctx.fail("SELinux is disabled").with_fix(ENABLE_SELINUX)),
        _ => Err(ProbeError::Failed(format!("unexpected getenforce output: {mode}"))),
    }
}

/// Effective global sshd settings. Like sshd, the first occurrence of a keyword wins and
/// `Match` blocks end the global section of a file.
fn sshd_settings<'a>(files: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, String> {
    let mut settings = BTreeMap::new();
    for text in files {
        for line in content_lines(text) {
            if line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, |c: char| c.is_whitespace() || c == '=');
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let key = key.to_ascii_lowercase();
            if key == "match" {
                break;
            }
            settings
                .entry(key)
                .or_insert_with(|| value.trim_start_matches(['=', ' ', '\t']).trim().to_ascii_lowercase());
        }
    }
    settings
}

fn ssh_root_login(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let Some(main) = ctx.read_file(SSHD_CONFIG)? else {
        return Ok(ctx.skipped("OpenSSH server is not configured"));
    };
    // Fedora includes the drop-in directory at the top of sshd_config.
    let mut texts = Vec::new();
    for path in ctx.read_dir("/etc/ssh/sshd_config.d")? {
        if path.extension().is_some_and(|e| e == "conf") {
            if let Some(text) = ctx.read_file(&path)? {
                texts.push(text);
            }
        }
    }
    texts.push(main);
    let settings = sshd_settings(texts.iter().map(String::as_str));

    let mut problems = Vec::new();
    if settings.get("permitrootlogin").map(String::as_str) == Some("yes") {
        problems.push("PermitRootLogin yes");
    }
    if settings.get("permitemptypasswords").map(String::as_str) == Some("yes") {
        problems.push("PermitEmptyPasswords yes");
    }
    if problems.is_empty() {
        let root = settings
            .get("permitrootlogin")
            .cloned()
            .unwrap_or_else(|| "prohibit-password".to_string());
        return Ok(ctx.pass(format!("PermitRootLogin {root}")));
    }
    Ok(ctx.fail(problems.join(", ")).with_fix(HARDEN_SSH))
}

fn automatic_updates(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    for timer in ["dnf-automatic.timer", "dnf5-automatic.timer"] {
        let out = ctx.run("systemctl", &["is-enabled", timer])?;
        if out.stdout.trim() == "enabled" {
            return Ok(ctx.pass(format!("{timer} is enabled")));
        }
    }
    Ok(ctx
        .warn("automatic updates are not enabled")
        .with_fix(ENABLE_AUTOMATIC_UPDATES))
}

fn password_policy(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let text = ctx.read_file("/etc/security/pwquality.conf")?.unwrap_or_default();
    let minlen = content_lines(&text)
        .filter(|l| !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .filter(|(k, _)| k.trim() == "minlen")
        .filter_map(|(_, v)| v.trim().parse::<u32>().ok())
        .last();
    match minlen {
        Some(n) if n < 8 => Ok(ctx.warn(format!("minimum password length is {n}"))),
        Some(n) => Ok(ctx.pass(format!("minimum password length is {n}"))),
        None => Ok(ctx.pass("pwquality defaults in effect")),
    }
}

fn file_permissions(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let mut bad = Vec::new();
    let mut result_details = Vec::new();
    for &(path, allowed) in SENSITIVE_FILES {
        let Some(mode) = ctx.file_mode(path)? else {
            continue;
        };
        result_details.push((path, format!("{mode:04o}")));
        if mode & !allowed != 0 {
            bad.push(format!("{path} is {mode:04o}"));
        }
    }
    let result = if bad.is_empty() {
        ctx.pass("account files have safe permissions")
    } else {
        ctx.fail(bad.join(", ")).with_fix(RESTORE_FILE_PERMISSIONS)
    };
    Ok(result_details
        .into_iter()
        .fold(result, |r, (path, mode)| r.with_detail(path, mode)))
}

fn kernel_hardening(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let read = |path: &str| -> Result<Option<i64>, ProbeError> {
        Ok(ctx.read_file(path)?.and_then(|v| v.trim().parse().ok()))
    };
    let mut weak = Vec::new();
    if let Some(v) = read("/proc/sys/kernel/randomize_va_space")? {
        if v != 2 {
            weak.push(format!("kernel.randomize_va_space={v}"));
        }
    }
    if let Some(v) = read("/proc/sys/net/ipv4/conf/all/rp_filter")? {
        if !(1..=2).contains(&v) {
            weak.push(format!("net.ipv4.conf.all.rp_filter={v}"));
        }
    }
    if let Some(v) = read("/proc/sys/kernel/kptr_restrict")? {
        if v < 1 {
            weak.push(format!("kernel.kptr_restrict={v}"));
        }
    }
    if weak.is_empty() {
        return Ok(ctx.pass("kernel hardening settings are in place"));
    }
    Ok(ctx.warn(weak.join(", ")))
}
