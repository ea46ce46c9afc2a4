//! Post-install setup: package manager tuning, third-party repositories, codecs and
//! developer tooling. Scanned only when the `setup` category is selected.

use crate::core::{Category, CheckResult};
use crate::fix::{Fix, FixStep};
use crate::probe::{Probe, ProbeContext, ProbeError};

use super::desktop::FLATHUB_URL;
use super::{RPMFUSION_FREE_RELEASE, RPMFUSION_NONFREE_RELEASE, cmd, content_lines, run_optional};

const TUNE_DNF: &str = "setup.tune-dnf";
const ENABLE_RPMFUSION: &str = "setup.enable-rpmfusion";
const ENABLE_FLATHUB: &str = "setup.enable-flathub";
const ENABLE_OPENH264: &str = "setup.enable-openh264";
const INSTALL_CODECS: &str = "setup.install-codecs";
const INSTALL_DEVTOOLS: &str = "setup.install-devtools";

const DNF_CONF: &str = "/etc/dnf/dnf.conf";
const DNF_CONF_BACKUP: &str = "/etc/dnf/dnf.conf.fedchecker.bak";
const PARALLEL_DOWNLOADS: u32 = 10;

const OPENH264_REPO: &str = "fedora-cisco-openh264";

/// Checked by the codecs probe.
const ESSENTIAL_CODECS: &[&str] = &[
    "gstreamer1-plugins-good",
    "gstreamer1-plugins-bad-free",
    "gstreamer1-plugin-openh264",
    "ffmpeg",
    "libva",
    "libva-utils",
];

/// Installed by the codecs fix. The freeworld builds come from RPM Fusion.
const CODEC_PACKAGES: &[&str] = &[
    "gstreamer1-plugins-bad-free",
    "gstreamer1-plugins-bad-freeworld",
    "gstreamer1-plugins-good",
    "gstreamer1-plugins-ugly",
    "gstreamer1-plugins-ugly-free",
    "gstreamer1-plugin-openh264",
    "gstreamer1-libav",
    "ffmpeg",
    "ffmpeg-libs",
    "libavcodec-freeworld",
    "libva",
    "libva-utils",
    "mesa-va-drivers",
    "intel-media-driver",
    "libvdpau",
    "vdpauinfo",
    "lame",
    "lame-libs",
    "opus",
    "flac",
    "wavpack",
];

const DEVTOOL_PACKAGES: &[&str] = &["git", "make", "gcc", "gcc-c++", "kernel-devel", "kernel-headers"];
const DEVTOOL_GROUPS: &[&str] = &["@development-tools", "@c-development"];

pub(crate) fn probes() -> Vec<Probe> {
    vec![
        Probe::new("setup.dnf", Category::Setup, "DNF download settings", 3, dnf_settings)
            .with_fixes(&[TUNE_DNF]),
        Probe::new("setup.rpmfusion", Category::Setup, "RPM Fusion", 5, rpmfusion)
            .with_fixes(&[ENABLE_RPMFUSION]),
        Probe::new("setup.flathub", Category::Setup, "Flathub", 4, flathub).with_fixes(&[ENABLE_FLATHUB]),
        Probe::new("setup.openh264", Category::Setup, "Cisco OpenH264", 3, openh264)
            .with_fixes(&[ENABLE_OPENH264]),
        Probe::new("setup.codecs", Category::Setup, "Multimedia codecs", 4, codecs)
            .with_fixes(&[INSTALL_CODECS]),
        Probe::new("setup.devtools", Category::Setup, "Development tools", 2, devtools)
            .with_fixes(&[INSTALL_DEVTOOLS]),
    ]
}

pub(crate) fn fixes() -> Vec<Fix> {
    let parallel = format!("/^\\[main\\]/a max_parallel_downloads={PARALLEL_DOWNLOADS}");
    let mut codecs = vec!["install", "-y", "--skip-unavailable"];
    codecs.extend_from_slice(CODEC_PACKAGES);
    let mut devtools = vec!["install", "-y", "--skip-unavailable"];
    devtools.extend_from_slice(DEVTOOL_GROUPS);
    devtools.extend_from_slice(DEVTOOL_PACKAGES);

    vec![
        Fix::new(
            TUNE_DNF,
            "Enable parallel downloads and the fastest-mirror plugin in dnf.conf.",
            &["setup.dnf"],
        )
        .privileged()
        .step(
            FixStep::new("Back up dnf.conf", cmd("cp", &["-a", DNF_CONF, DNF_CONF_BACKUP]))
                .undo_with(cmd("rm", &["-f", DNF_CONF_BACKUP])),
        )
        .step(
            FixStep::new(
                "Set max_parallel_downloads and fastestmirror",
                cmd(
                    "sed",
                    &[
                        "-i",
                        "-E",
                        "-e",
                        "/^[[:space:]]*(max_parallel_downloads|fastestmirror)[[:space:]]*=/d",
                        "-e",
                        parallel.as_str(),
                        "-e",
                        "/^\\[main\\]/a fastestmirror=True",
                        DNF_CONF,
                    ],
                ),
            )
            .undo_with(cmd("cp", &["-a", DNF_CONF_BACKUP, DNF_CONF])),
        ),
        Fix::new(
            ENABLE_RPMFUSION,
            "Install the RPM Fusion free and nonfree release packages for this Fedora release.",
            &["setup.rpmfusion"],
        )
        .privileged()
        .step(FixStep::new(
            "Install RPM Fusion release packages",
            cmd("dnf", &["install", "-y", RPMFUSION_FREE_RELEASE, RPMFUSION_NONFREE_RELEASE]),
        )),
        Fix::new(ENABLE_FLATHUB, "Install Flatpak and add the Flathub remote.", &["setup.flathub"])
            .privileged()
            .step(FixStep::new("Install flatpak", cmd("dnf", &["install", "-y", "flatpak"])))
            .step(
                FixStep::new(
                    "Add flathub",
                    cmd("flatpak", &["remote-add", "--if-not-exists", "flathub", FLATHUB_URL]),
                )
                .undo_with(cmd("flatpak", &["remote-delete", "flathub"])),
            ),
        Fix::new(
            ENABLE_OPENH264,
            "Enable the Cisco OpenH264 repository and install the H.264 codec.",
            &["setup.openh264"],
        )
        .privileged()
        .step(
            FixStep::new(
                "Enable fedora-cisco-openh264",
                cmd("dnf", &["config-manager", "setopt", "fedora-cisco-openh264.enabled=1"]),
            )
            .undo_with(cmd("dnf", &["config-manager", "setopt", "fedora-cisco-openh264.enabled=0"])),
        )
        .step(FixStep::new(
            "Install openh264",
            cmd("dnf", &["install", "-y", "openh264", "mozilla-openh264", "gstreamer1-plugin-openh264"]),
        )),
        Fix::new(
            INSTALL_CODECS,
            "Install GStreamer, FFmpeg, VA-API/VDPAU and audio codec packages. Enable RPM Fusion first for the full set.",
            &["setup.codecs"],
        )
        .privileged()
        .step(FixStep::new("Install codec packages", cmd("dnf", &codecs))),
        Fix::new(
            INSTALL_DEVTOOLS,
            "Install the development-tools and C development groups with git, gcc and kernel headers.",
            &["setup.devtools"],
        )
        .privileged()
        .step(FixStep::new("Install development tools", cmd("dnf", &devtools))),
    ]
}

/// Value of `key` in the `[main]` section.
fn dnf_option<'a>(conf: &'a str, key: &str) -> Option<&'a str> {
    let mut in_main = false;
    for line in content_lines(conf) {
        if line.starts_with('[') {
            in_main = line == "[main]";
            continue;
        }
        if !in_main || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((k, v)) if k.trim() == key => return Some(v.trim()),
            _ => {}
        }
    }
    None
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn dnf_settings(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let Some(conf) = ctx.read_file(DNF_CONF)? else {
        return Ok(ctx.skipped("dnf.conf not found"));
    };
    let parallel = dnf_option(&conf, "max_parallel_downloads");
    let fastest = dnf_option(&conf, "fastestmirror");

    let mut missing = Vec::new();
    if parallel.and_then(|v| v.parse::<u32>().ok()).is_none_or(|n| n < PARALLEL_DOWNLOADS) {
        missing.push(format!("max_parallel_downloads below {PARALLEL_DOWNLOADS}"));
    }
    if !fastest.is_some_and(is_truthy) {
        missing.push("fastestmirror disabled".to_string());
    }

    let result = if missing.is_empty() {
        ctx.pass("parallel downloads and fastest mirror enabled")
    } else {
        ctx.fail(missing.join(", ")).with_fix(TUNE_DNF)
    };
    Ok(result
        .with_detail("max_parallel_downloads", parallel.unwrap_or("not set"))
        .with_detail("fastestmirror", fastest.unwrap_or("not set")))
}

/// Enabled repository ids, or `None` when dnf is not installed.
fn enabled_repos(ctx: &ProbeContext<'_>) -> Result<Option<Vec<String>>, ProbeError> {
    let Some(out) = run_optional(ctx, "dnf", &["repolist", "--enabled"])? else {
        return Ok(None);
    };
    Ok(Some(
        content_lines(&out.stdout)
            .filter_map(|l| l.split_whitespace().next())
            .filter(|id| *id != "repo")
            .map(str::to_string)
            .collect(),
    ))
}

/// Packages `rpm -q` reports as not installed, or `None` when rpm is not installed.
fn missing_packages(ctx: &ProbeContext<'_>, packages: &[&str]) -> Result<Option<Vec<String>>, ProbeError> {
    let args = [&["-q"][..], packages].concat();
    let Some(out) = run_optional(ctx, "rpm", &args)? else {
        return Ok(None);
    };
    Ok(Some(
        content_lines(&out.stdout)
            .filter_map(|l| l.strip_prefix("package ")?.strip_suffix(" is not installed"))
            .map(str::to_string)
            .collect(),
    ))
}

fn rpmfusion(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let Some(repos) = enabled_repos(ctx)? else {
        return Ok(ctx.skipped("dnf is not installed"));
    };
    let missing: Vec<&str> = ["rpmfusion-free", "rpmfusion-nonfree"]
        .into_iter()
        .filter(|id| !repos.iter().any(|r| r == id))
        .collect();
    if missing.is_empty() {
        return Ok(ctx.pass("free and nonfree repositories enabled"));
    }
    Ok(ctx
        .fail(format!("not enabled: {}", missing.join(", ")))
        .with_fix(ENABLE_RPMFUSION))
}

fn flathub(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let Some(out) = run_optional(ctx, "flatpak", &["remotes"])? else {
        return Ok(ctx.fail("Flatpak is not installed").with_fix(ENABLE_FLATHUB));
    };
    let configured = content_lines(&out.stdout).any(|l| l.split_whitespace().next() == Some("flathub"));
    if configured {
        return Ok(ctx.pass("Flathub remote configured"));
    }
    Ok(ctx.fail("Flathub remote is not configured").with_fix(ENABLE_FLATHUB))
}

fn openh264(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let Some(repos) = enabled_repos(ctx)? else {
        return Ok(ctx.skipped("dnf is not installed"));
    };
    if !repos.iter().any(|r| r == OPENH264_REPO) {
        return Ok(ctx.fail(format!("{OPENH264_REPO} is disabled")).with_fix(ENABLE_OPENH264));
    }
    let missing = missing_packages(ctx, &["openh264"])?.unwrap_or_default();
    if !missing.is_empty() {
        return Ok(ctx.fail("openh264 is not installed").with_fix(ENABLE_OPENH264));
    }
    Ok(ctx.pass("repository enabled and codec installed"))
}

fn codecs(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let Some(missing) = missing_packages(ctx, ESSENTIAL_CODECS)? else {
        return Ok(ctx.skipped("rpm is not available"));
    };
    if missing.is_empty() {
        return Ok(ctx.pass("essential codecs installed"));
    }
    Ok(ctx
        .fail(format!("{} of {} essential codecs missing", missing.len(), ESSENTIAL_CODECS.len()))
        .with_detail("missing", missing.join(", "))
        .with_fix(INSTALL_CODECS))
}

fn devtools(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let Some(missing) = missing_packages(ctx, DEVTOOL_PACKAGES)? else {
        return Ok(ctx.skipped("rpm is not available"));
    };
    if missing.is_empty() {
        return Ok(ctx.pass("build tools installed"));
    }
    Ok(ctx
        .fail(format!("missing: {}", missing.join(", ")))
        .with_fix(INSTALL_DEVTOOLS))
}
