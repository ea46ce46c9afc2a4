use crate::core::{Category, CheckResult};
use crate::fix::{Fix, FixStep};
use crate::probe::{Probe, ProbeContext, ProbeError};

use super::{cmd, content_lines, field_u64, percent, run_optional};

const CLEAN_PACKAGE_CACHE: &str = "health.clean-package-cache";
const CREATE_SWAPFILE: &str = "health.create-swapfile";
const RESET_FAILED_UNITS: &str = "health.reset-failed-units";
const REPAIR_PACKAGES: &str = "health.repair-packages";
const AUTOREMOVE_PACKAGES: &str = "health.autoremove-packages";

const VIRTUAL_FILESYSTEMS: &[&str] = &[
    "autofs",
    "binfmt_misc",
    "bpf",
    "cgroup",
    "cgroup2",
    "configfs",
    "debugfs",
    "devpts",
    "devtmpfs",
    "efivarfs",
    "fusectl",
    "hugetlbfs",
    "mqueue",
    "nsfs",
    "overlay",
    "proc",
    "pstore",
    "ramfs",
    "rpc_pipefs",
    "securityfs",
    "selinuxfs",
    "squashfs",
    "sysfs",
    "tmpfs",
    "tracefs",
];

pub(crate) fn probes() -> Vec<Probe> {
    vec![
        Probe::new("health.disk-space", Category::Health, "Disk space", 10, disk_space)
            .with_fixes(&[CLEAN_PACKAGE_CACHE]),
        Probe::new("health.memory", Category::Health, "Memory usage", 8, memory),
        Probe::new("health.cpu-temperature", Category::Health, "CPU temperature", 6, cpu_temperature),
        Probe::new("health.swap", Category::Health, "Swap", 4, swap).with_fixes(&[CREATE_SWAPFILE]),
        Probe::new("health.failed-units", Category::Health, "Failed systemd units", 8, failed_units)
            .with_fixes(&[RESET_FAILED_UNITS]),
        Probe::new("health.system-load", Category::Health, "System load", 5, system_load),
        Probe::new("health.zombie-processes", Category::Health, "Zombie processes", 3, zombie_processes),
        Probe::new("health.package-database", Category::Health, "Package database", 8, package_database)
            .with_fixes(&[REPAIR_PACKAGES]),
        Probe::new("health.journal-errors", Category::Health, "Journal errors", 3, journal_errors),
        Probe::new("health.orphaned-packages", Category::Health, "Orphaned packages", 3, orphaned_packages)
            .with_fixes(&[AUTOREMOVE_PACKAGES]),
    ]
}

pub(crate) fn fixes() -> Vec<Fix> {
    vec![
        Fix::new(
            CLEAN_PACKAGE_CACHE,
            "Free disk space by cleaning the package cache, unused packages and old journal files.",
            &["health.disk-space"],
        )
        .privileged()
        .step(FixStep::new("Clean dnf cache", cmd("dnf", &["clean", "all"])))
        .step(FixStep::new("Remove unused packages", cmd("dnf", &["autoremove", "-y"])))
        .step(FixStep::new(
            "Vacuum journal older than 14 days",
            cmd("journalctl", &["--vacuum-time=14d"]),
        )),
        Fix::new(CREATE_SWAPFILE, "Create and enable a 4 GiB swap file at /swapfile.", &["health.swap"])
            .privileged()
            .step(
                FixStep::new("Allocate /swapfile", cmd("fallocate", &["-l", "4G", "/swapfile"]))
                    .undo_with(cmd("rm", &["-f", "/swapfile"])),
            )
            .step(
                FixStep::new("Restrict permissions", cmd("chmod", &["600", "/swapfile"]))
                    .undo_with(cmd("chmod", &["644", "/swapfile"])),
            )
            .step(
                FixStep::new("Format as swap", cmd("mkswap", &["/swapfile"]))
                    .undo_with(cmd("wipefs", &["-a", "/swapfile"])),
            )
            .step(
                FixStep::new("Enable swap", cmd("swapon", &["/swapfile"]))
                    .undo_with(cmd("swapoff", &["/swapfile"])),
            ),
        Fix::new(
            RESET_FAILED_UNITS,
            "Clear the failed state of systemd units.",
            &["health.failed-units"],
        )
        .privileged()
        .step(FixStep::new("Reset failed units", cmd("systemctl", &["reset-failed"]))),
        Fix::new(
            REPAIR_PACKAGES,
            "Synchronise installed packages with the enabled repositories.",
            &["health.package-database"],
        )
        .privileged()
        .step(FixStep::new("Run distro-sync", cmd("dnf", &["distro-sync", "-y"]))),
        Fix::new(
            AUTOREMOVE_PACKAGES,
            "Remove packages that were installed as dependencies and are no longer needed.",
            &["health.orphaned-packages"],
        )
        .privileged()
        .step(FixStep::new("Remove unused packages", cmd("dnf", &["autoremove", "-y"]))),
    ]
}

/// Mount points backed by block devices, with `/proc/mounts` octal escapes decoded.
fn real_mount_points(mounts: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mount_point), Some(fstype)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if !device.starts_with('/') || VIRTUAL_FILESYSTEMS.contains(&fstype) {
            continue;
        }
        let mount_point = unescape_mount(mount_point);
        if !out.contains(&mount_point) {
            out.push(mount_point);
        }
    }
    out
}

fn unescape_mount(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let octal = bytes
            .get(i + 1..i + 4)
            .filter(|d| bytes[i] == b'\\' && d.iter().all(|b| (b'0'..=b'7').contains(b)))
            .map(|d| d.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0')))
            .and_then(|v| u8::try_from(v).ok());
        match octal {
            Some(v) => {
                out.push(v);
                i += 4;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn disk_space(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let mounts = ctx.read_file("/proc/mounts")?.unwrap_or_default();
    let mut points = real_mount_points(&mounts);
    if points.is_empty() {
        points.push("/".to_string());
    }

    let mut measured = Vec::new();
    for mount_point in &points {
        let usage = match ctx.fs_usage(mount_point) {
            Ok(usage) => usage,
            Err(ProbeError::Timeout) => return Err(ProbeError::Timeout),
            Err(err) => {
                tracing::debug!(mount_point = %mount_point, "skipping mount: {err}");
                continue;
            }
        };
        if usage.total_bytes > 0 {
            measured.push((mount_point.clone(), usage.used_percent()));
        }
    }

    let Some((worst, pct)) = measured
        .iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .cloned()
    else {
        return Ok(ctx.skipped("no filesystem could be measured"));
    };

    let result = if pct >= 95.0 {
        ctx.fail(format!("{worst} is {pct:.0}% full")).with_fix(CLEAN_PACKAGE_CACHE)
    } else if pct >= 85.0 {
        ctx.warn(format!("{worst} is {pct:.0}% full")).with_fix(CLEAN_PACKAGE_CACHE)
    } else {
        ctx.pass(format!("highest usage is {pct:.0}% on {worst}"))
    };
    Ok(measured
        .into_iter()
        .fold(result, |r, (mp, pct)| r.with_detail(mp, format!("{pct:.0}%"))))
}

fn memory(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let meminfo = ctx
        .read_file("/proc/meminfo")?
        .ok_or_else(|| ProbeError::Failed("/proc/meminfo is missing".to_string()))?;
    let (Some(total), Some(available)) = (
        field_u64(&meminfo, "MemTotal"),
        field_u64(&meminfo, "MemAvailable"),
    ) else {
        return Err(ProbeError::Failed("MemTotal/MemAvailable not found in /proc/meminfo".to_string()));
    };
    let pct = percent(total.saturating_sub(available), total);
    let msg = format!(
        "{pct:.0}% used ({} MiB of {} MiB available)",
        available / 1024,
        total / 1024
    );
    let result = if pct >= 95.0 {
        ctx.fail(msg)
    } else if pct >= 85.0 {
        ctx.warn(msg)
    } else {
        ctx.pass(msg)
    };
    Ok(result.with_detail("used_percent", format!("{pct:.1}")))
}

fn cpu_temperature(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let mut max: Option<(String, f64)> = None;
    for zone in ctx.read_dir("/sys/class/thermal")? {
        let Some(name) = zone.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with("thermal_zone") {
            continue;
        }
        let Some(raw) = ctx.read_file(zone.join("temp"))? else {
            continue;
        };
        let Ok(millis) = raw.trim().parse::<i64>() else {
            continue;
        };
        let celsius = millis as f64 / 1000.0;
        if max.as_ref().is_none_or(|(_, m)| celsius > *m) {
            max = Some((name.to_string(), celsius));
        }
    }

    let Some((zone, celsius)) = max else {
        return Ok(ctx.skipped("no thermal sensors found"));
    };
    let msg = format!("{celsius:.0}°C ({zone})");
    let result = if celsius >= 90.0 {
        ctx.fail(msg)
    } else if celsius >= 75.0 {
        ctx.warn(msg)
    } else {
        ctx.pass(msg)
    };
    Ok(result.with_detail("zone", zone))
}

fn swap(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let meminfo = ctx
        .read_file("/proc/meminfo")?
        .ok_or_else(|| ProbeError::Failed("/proc/meminfo is missing".to_string()))?;
    let total = field_u64(&meminfo, "SwapTotal").unwrap_or(0);
    if total == 0 {
        return Ok(ctx.warn("no swap configured").with_fix(CREATE_SWAPFILE));
    }
    let free = field_u64(&meminfo, "SwapFree").unwrap_or(total);
    let pct = percent(total.saturating_sub(free), total);
    let msg = format!("{pct:.0}% of {} MiB in use", total / 1024);
    Ok(if pct >= 80.0 { ctx.warn(msg) } else { ctx.pass(msg) })
}

fn failed_units(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let out = ctx.run("systemctl", &["--failed", "--no-legend", "--no-pager", "--plain"])?;
    if !out.success() && out.stdout.trim().is_empty() {
        return Err(ProbeError::Failed(format!(
            "systemctl exited with status {}",
            out.exit_code
        )));
    }
    let units: Vec<&str> = content_lines(&out.stdout)
        .filter_map(|l| l.split_whitespace().next())
        .collect();
    if units.is_empty() {
        return Ok(ctx.pass("no failed units"));
    }
    Ok(ctx
        .fail(format!("{} failed unit(s): {}", units.len(), units.join(", ")))
        .with_fix(RESET_FAILED_UNITS))
}

fn system_load(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let loadavg = ctx
        .read_file("/proc/loadavg")?
        .ok_or_else(|| ProbeError::Failed("/proc/loadavg is missing".to_string()))?;
    let load: f64 = loadavg
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ProbeError::Failed(format!("unexpected /proc/loadavg: {}", loadavg.trim())))?;
    let cpus = ctx.cpu_count();
    let per_cpu = load / cpus as f64;
    let msg = format!("1-minute load {load:.2} on {cpus} CPU(s)");
    let result = if per_cpu >= 2.0 {
        ctx.fail(msg)
    } else if per_cpu >= 1.0 {
        ctx.warn(msg)
    } else {
        ctx.pass(msg)
    };
    Ok(result.with_detail("load_per_cpu", format!("{per_cpu:.2}")))
}

/// Process state from a `/proc/<pid>/stat` line. The command name may itself contain ')'.
fn process_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

fn zombie_processes(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let mut zombies = 0usize;
    for entry in ctx.read_dir("/proc")? {
        let is_pid = entry
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
        if !is_pid {
            continue;
        }
        // processes may exit while we walk
        let stat = match ctx.read_file(entry.join("stat")) {
            Ok(Some(stat)) => stat,
            Ok(None) | Err(ProbeError::PermissionDenied(_)) | Err(ProbeError::Failed(_)) => continue,
            Err(err) => return Err(err),
        };
        if process_state(&stat) == Some('Z') {
            zombies += 1;
        }
    }
    if zombies == 0 {
        return Ok(ctx.pass("no zombie processes"));
    }
    Ok(ctx.warn(format!("{zombies} zombie process(es)")))
}

fn package_database(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let out = ctx.run("dnf", &["check"])?;
    let problems: Vec<&str> = content_lines(&out.stdout).collect();
    if out.success() && problems.is_empty() {
        return Ok(ctx.pass("no problems reported by dnf check"));
    }
    let first = problems
        .first()
        .copied()
        .or_else(|| content_lines(&out.stderr).next())
        .unwrap_or("dnf check failed");
    Ok(ctx
        .fail(format!("{} problem(s) reported: {first}", problems.len().max(1)))
        .with_detail("exit_code", out.exit_code.to_string())
        .with_fix(REPAIR_PACKAGES))
}

fn journal_errors(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let out = ctx.run("journalctl", &["-p", "err", "-b", "-q", "--no-pager"])?;
    let count = content_lines(&out.stdout).count();
    let msg = format!("{count} error(s) logged since boot");
    Ok(if count > 100 { ctx.warn(msg) } else { ctx.pass(msg) })
}

fn orphaned_packages(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let Some(out) = run_optional(ctx, "dnf", &["repoquery", "--unneeded", "-q"])? else {
        return Ok(ctx.skipped("dnf is not installed"));
    };
    let count = content_lines(&out.stdout).count();
    if count > 10 {
        return Ok(ctx
            .warn(format!("{count} packages are no longer needed"))
            .with_fix(AUTOREMOVE_PACKAGES));
    }
    Ok(ctx.pass(format!("{count} unneeded package(s)")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testing::evaluate;
    use crate::core::CheckStatus;
    use crate::system::fake::FakeSystem;

    const GIB: u64 = 1024 * 1024 * 1024;

    const MOUNTS: &str = "\
/dev/nvme0n1p3 / btrfs rw,relatime 0 0
proc /proc proc rw 0 0
tmpfs /tmp tmpfs rw 0 0
/dev/nvme0n1p2 /boot ext4 rw 0 0
/dev/nvme0n1p3 /home btrfs rw 0 0
/dev/sdb1 /run/media/user/My\\040Disk vfat rw 0 0
";

    #[test]
    fn mount_points_skip_virtual_filesystems() {
        assert_eq!(
            real_mount_points(MOUNTS),
            vec!["/", "/boot", "/home", "/run/media/user/My Disk"]
        );
    }

    #[test]
    fn disk_space_reports_fullest_mount() {
        let sys = FakeSystem::new()
            .file("/proc/mounts", MOUNTS)
            .usage("/", 100 * GIB, 50 * GIB)
            .usage("/boot", GIB, GIB / 50)
            .usage("/home", 100 * GIB, 50 * GIB);
        let r = evaluate(probes(), "health.disk-space", &sys);
        assert_eq!(r.status, CheckStatus::Fail);
        assert!(r.message.starts_with("/boot is 98% full"), "{}", r.message);
        assert_eq!(r.fix.as_deref(), Some(CLEAN_PACKAGE_CACHE));
    }

    #[test]
    fn disk_space_passes_with_room() {
        let sys = FakeSystem::new()
            .file("/proc/mounts", "/dev/sda1 / ext4 rw 0 0\n")
            .usage("/", 100 * GIB, 60 * GIB);
        let r = evaluate(probes(), "health.disk-space", &sys);
        assert_eq!(r.status, CheckStatus::Pass);
        assert_eq!(r.fix, None);
    }

    #[test]
    fn memory_thresholds() {
        let sys = FakeSystem::new().file(
            "/proc/meminfo",
            "MemTotal: 1000000 kB\nMemFree: 10 kB\nMemAvailable: 100000 kB\n",
        );
        assert_eq!(evaluate(probes(), "health.memory", &sys).status, CheckStatus::Warn);

        let sys = FakeSystem::new().file("/proc/meminfo", "MemTotal: 1000000 kB\n");
        let r = evaluate(probes(), "health.memory", &sys);
        assert_eq!(r.status, CheckStatus::Error);
        assert_eq!(r.details.get("error_kind").map(String::as_str), Some("failed"));
    }

    #[test]
    fn cpu_temperature_without_sensors_is_skipped() {
        let r = evaluate(probes(), "health.cpu-temperature", &FakeSystem::new());
        assert_eq!(r.status, CheckStatus::Skipped);
    }

    #[test]
    fn cpu_temperature_uses_hottest_zone() {
        let sys = FakeSystem::new()
            .dir("/sys/class/thermal", &["cooling_device0", "thermal_zone0", "thermal_zone1"])
            .file("/sys/class/thermal/thermal_zone0/temp", "45000\n")
            .file("/sys/class/thermal/thermal_zone1/temp", "92000\n");
        let r = evaluate(probes(), "health.cpu-temperature", &sys);
        assert_eq!(r.status, CheckStatus::Fail);
        assert_eq!(r.details.get("zone").map(String::as_str), Some("thermal_zone1"));
    }

    #[test]
    fn missing_swap_suggests_swapfile() {
        let sys = FakeSystem::new().file("/proc/meminfo", "MemTotal: 1000 kB\nSwapTotal: 0 kB\nSwapFree: 0 kB\n");
        let r = evaluate(probes(), "health.swap", &sys);
        assert_eq!(r.status, CheckStatus::Warn);
        assert_eq!(r.fix.as_deref(), Some(CREATE_SWAPFILE));
    }

    #[test]
    fn failed_units_are_listed() {
        let sys = FakeSystem::new().command(
            "systemctl --failed --no-legend --no-pager --plain",
            0,
            "foo.service loaded failed failed Foo\nbar.mount loaded failed failed Bar\n",
        );
        let r = evaluate(probes(), "health.failed-units", &sys);
        assert_eq!(r.status, CheckStatus::Fail);
        assert_eq!(r.message, "2 failed unit(s): foo.service, bar.mount");
        assert_eq!(r.fix.as_deref(), Some(RESET_FAILED_UNITS));
    }

    #[test]
    fn load_is_scaled_by_cpu_count() {
        let sys = FakeSystem::new()
            .cpus(4)
            .file("/proc/loadavg", "5.00 3.00 2.00 2/900 1234\n");
        assert_eq!(evaluate(probes(), "health.system-load", &sys).status, CheckStatus::Warn);
        let sys = sys.cpus(2);
        assert_eq!(evaluate(probes(), "health.system-load", &sys).status, CheckStatus::Fail);
    }

    #[test]
    fn counts_zombies_from_proc() {
        let sys = FakeSystem::new()
            .dir("/proc", &["1", "42", "self", "77"])
            .file("/proc/1/stat", "1 (systemd) S 0 1 1")
            .file("/proc/42/stat", "42 (weird) name)) Z 1 42 42")
            .file("/proc/77/stat", "77 (bash) R 1 77 77");
        let r = evaluate(probes(), "health.zombie-processes", &sys);
        assert_eq!(r.status, CheckStatus::Warn);
        assert_eq!(r.message, "1 zombie process(es)");
    }

    #[test]
    fn package_database_without_dnf_is_an_error() {
        let r = evaluate(probes(), "health.package-database", &FakeSystem::new());
        assert_eq!(r.status, CheckStatus::Error);
        assert_eq!(r.details.get("error_kind").map(String::as_str), Some("tool_missing"));
        assert_eq!(r.fix, None);
    }

    #[test]
    fn package_database_problems_fail() {
        let sys = FakeSystem::new().command("dnf check", 1, "foo-1.0 has missing requires of libbar\n");
        let r = evaluate(probes(), "health.package-database", &sys);
        assert_eq!(r.status, CheckStatus::Fail);
        assert_eq!(r.fix.as_deref(), Some(REPAIR_PACKAGES));
    }

    #[test]
    fn many_orphans_warn() {
        let list: String = (0..12).map(|i| format!("pkg{i}-1.0.x86_64\n")).collect();
        let sys = FakeSystem::new().command("dnf repoquery --unneeded -q", 0, &list);
        let r = evaluate(probes(), "health.orphaned-packages", &sys);
        assert_eq!(r.status, CheckStatus::Warn);
        assert_eq!(r.fix.as_deref(), Some(AUTOREMOVE_PACKAGES));
    }

    #[test]
    fn hanging_command_times_out() {
        let sys = FakeSystem::new().hanging("journalctl -p err -b -q --no-pager");
        let probe = probes()
            .into_iter()
            .find(|p| p.id() == "health.journal-errors")
            .expect("probe");
        let r = probe.evaluate(&sys, std::time::Instant::now() + std::time::Duration::from_millis(50));
        assert_eq!(r.status, CheckStatus::Error);
        assert_eq!(r.message, "timeout");
    }
}
