use crate::core::{Category, CheckResult};
use crate::fix::{Fix, FixStep};
use crate::probe::{Probe, ProbeContext, ProbeError};

use super::{RPMFUSION_FREE_RELEASE, RPMFUSION_NONFREE_RELEASE, cmd, content_lines, run_optional};

const INSTALL_NVIDIA: &str = "drivers.install-nvidia";
const INSTALL_WIFI_FIRMWARE: &str = "drivers.install-wifi-firmware";
const UNBLOCK_WIFI: &str = "drivers.unblock-wifi";
const INSTALL_AUDIO_FIRMWARE: &str = "drivers.install-audio-firmware";
const ENABLE_BLUETOOTH: &str = "drivers.enable-bluetooth";
const INSTALL_FWUPD: &str = "drivers.install-fwupd";
const INSTALL_VA_DRIVERS: &str = "drivers.install-va-drivers";

pub(crate) fn probes() -> Vec<Probe> {
    vec![
        Probe::new("drivers.nvidia", Category::Drivers, "NVIDIA driver", 8, nvidia)
            .with_fixes(&[INSTALL_NVIDIA]),
        Probe::new("drivers.wifi", Category::Drivers, "Wi-Fi", 6, wifi)
            .with_fixes(&[INSTALL_WIFI_FIRMWARE, UNBLOCK_WIFI]),
        Probe::new("drivers.audio", Category::Drivers, "Audio devices", 5, audio)
            .with_fixes(&[INSTALL_AUDIO_FIRMWARE]),
        Probe::new("drivers.bluetooth", Category::Drivers, "Bluetooth", 3, bluetooth)
            .with_fixes(&[ENABLE_BLUETOOTH]),
        Probe::new("drivers.firmware", Category::Drivers, "Firmware updates", 3, firmware)
            .with_fixes(&[INSTALL_FWUPD]),
        Probe::new(
            "drivers.video-acceleration",
            Category::Drivers,
            "Video acceleration",
            3,
            video_acceleration,
        )
        .with_fixes(&[INSTALL_VA_DRIVERS]),
    ]
}

pub(crate) fn fixes() -> Vec<Fix> {
    vec![
        Fix::new(
            INSTALL_NVIDIA,
            "Install the proprietary NVIDIA driver (RPM Fusion akmod). A reboot is required afterwards.",
            &["drivers.nvidia"],
        )
        .privileged()
        .step(FixStep::new(
            "Enable RPM Fusion",
            cmd("dnf", &["install", "-y", RPMFUSION_FREE_RELEASE, RPMFUSION_NONFREE_RELEASE]),
        ))
        .step(FixStep::new(
            "Install akmod-nvidia",
            cmd("dnf", &["install", "-y", "akmod-nvidia", "xorg-x11-drv-nvidia-cuda"]),
        )),
        Fix::new(
            INSTALL_WIFI_FIRMWARE,
            "Install the Linux firmware collection for wireless adapters.",
            &["drivers.wifi"],
        )
        .privileged()
        .step(FixStep::new("Install linux-firmware", cmd("dnf", &["install", "-y", "linux-firmware"]))),
        Fix::new(UNBLOCK_WIFI, "Lift the rfkill soft block on wireless devices.", &["drivers.wifi"])
            .without_confirmation()
            .step(
                FixStep::new("Unblock Wi-Fi", cmd("rfkill", &["unblock", "wifi"]))
                    .undo_with(cmd("rfkill", &["block", "wifi"])),
            ),
        Fix::new(
            INSTALL_AUDIO_FIRMWARE,
            "Install audio firmware and the PipeWire ALSA bridge.",
            &["drivers.audio"],
        )
        .privileged()
        .step(FixStep::new(
            "Install audio packages",
            cmd("dnf", &["install", "-y", "alsa-firmware", "pipewire-alsa"]),
        )),
        Fix::new(ENABLE_BLUETOOTH, "Enable and start the Bluetooth service.", &["drivers.bluetooth"])
            .privileged()
            .step(
                FixStep::new(
                    "Enable bluetooth.service",
                    cmd("systemctl", &["enable", "--now", "bluetooth.service"]),
                )
                .undo_with(cmd("systemctl", &["disable", "--now", "bluetooth.service"])),
            ),
        Fix::new(INSTALL_FWUPD, "Install fwupd for firmware updates.", &["drivers.firmware"])
            .privileged()
            .step(FixStep::new("Install fwupd", cmd("dnf", &["install", "-y", "fwupd"]))),
        Fix::new(
            INSTALL_VA_DRIVERS,
            "Install VA-API drivers and tools for hardware video decoding.",
            &["drivers.video-acceleration"],
        )
        .privileged()
        .step(FixStep::new(
            "Install VA-API packages",
            cmd("dnf", &["install", "-y", "libva-utils", "mesa-va-drivers"]),
        )),
    ]
}

fn loaded_modules(ctx: &ProbeContext<'_>) -> Result<Vec<String>, ProbeError> {
    let modules = ctx.read_file("/proc/modules")?.unwrap_or_default();
    Ok(modules
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_string)
        .collect())
}

/// `lspci` output, or empty when pciutils is not installed.
fn pci_devices(ctx: &ProbeContext<'_>) -> Result<String, ProbeError> {
    Ok(run_optional(ctx, "lspci", &[])?
        .map(|out| out.stdout)
        .unwrap_or_default())
}

fn nvidia(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let devices = pci_devices(ctx)?;
    let gpu = devices.lines().find(|l| {
        l.contains("NVIDIA") && (l.contains("VGA") || l.contains("3D controller") || l.contains("Display"))
    });
    let Some(gpu) = gpu else {
        return Ok(ctx.skipped("No NVIDIA GPU detected"));
    };
    let gpu = gpu.split_once(": ").map_or(gpu, |(_, name)| name).trim().to_string();

    let modules = loaded_modules(ctx)?;
    let result = if modules.iter().any(|m| m == "nvidia") {
        ctx.pass("proprietary NVIDIA driver is loaded")
    } else if modules.iter().any(|m| m == "nouveau") {
        ctx.warn("using the open-source nouveau driver").with_fix(INSTALL_NVIDIA)
    } else {
        ctx.fail("no driver is loaded for the NVIDIA GPU").with_fix(INSTALL_NVIDIA)
    };
    Ok(result.with_detail("gpu", gpu))
}

fn wifi(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let mut interfaces = Vec::new();
    for iface in ctx.read_dir("/sys/class/net")? {
        let wireless = !ctx.read_dir(iface.join("wireless"))?.is_empty()
            || ctx.read_link(iface.join("phy80211")).is_some();
        if wireless {
            if let Some(name) = iface.file_name().and_then(|n| n.to_str()) {
                interfaces.push(name.to_string());
            }
        }
    }

    if interfaces.is_empty() {
        let devices = pci_devices(ctx)?;
        let controller = devices
            .lines()
            .find(|l| l.contains("Network controller") || l.contains("Wireless"));
        return Ok(match controller {
            Some(line) => ctx
                .fail("wireless controller found but no wireless interface is available")
                .with_detail("controller", line.trim())
                .with_fix(INSTALL_WIFI_FIRMWARE),
            None => ctx.skipped("no wireless hardware detected"),
        });
    }

    let Some(out) = run_optional(ctx, "rfkill", &["list", "wifi"])? else {
        return Ok(ctx.pass(format!("wireless interface(s): {}", interfaces.join(", "))));
    };
    let blocked = |kind: &str| {
        content_lines(&out.stdout).any(|l| {
            l.strip_prefix(kind)
                .is_some_and(|rest| rest.trim_start_matches(':').trim() == "yes")
        })
    };
    let result = if blocked("Hard blocked") {
        ctx.warn("wireless is disabled by a hardware switch")
    } else if blocked("Soft blocked") {
        ctx.fail("wireless is soft-blocked by rfkill").with_fix(UNBLOCK_WIFI)
    } else {
        ctx.pass(format!("wireless interface(s): {}", interfaces.join(", ")))
    };
    Ok(result.with_detail("interfaces", interfaces.join(",")))
}

fn audio(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let cards = ctx.read_file("/proc/asound/cards")?.unwrap_or_default();
    let names: Vec<&str> = content_lines(&cards)
        .filter(|l| l.split_whitespace().next().is_some_and(|n| n.parse::<u32>().is_ok()))
        .collect();
    if names.is_empty() {
        return Ok(ctx.fail("no sound cards detected").with_fix(INSTALL_AUDIO_FIRMWARE));
    }
    Ok(ctx.pass(format!("{} sound card(s)", names.len())))
}

fn bluetooth(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let adapters = ctx.read_dir("/sys/class/bluetooth")?;
    if adapters.is_empty() {
        return Ok(ctx.skipped("no Bluetooth adapter detected"));
    }
    let out = ctx.run("systemctl", &["is-active", "bluetooth.service"])?;
    let state = out.stdout.trim();
    if state == "active" {
        return Ok(ctx.pass(format!("{} adapter(s), service active", adapters.len())));
    }
    Ok(ctx
        .fail(format!("bluetooth.service is {}", if state.is_empty() { "unknown" } else { state }))
        .with_fix(ENABLE_BLUETOOTH))
}

fn firmware(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let Some(out) = run_optional(ctx, "fwupdmgr", &["--version"])? else {
        return Ok(ctx.error("fwupdmgr is not installed").with_fix(INSTALL_FWUPD));
    };
    let version = content_lines(&out.stdout).next().unwrap_or("unknown").to_string();
    Ok(ctx.pass("fwupd is available").with_detail("version", version))
}

fn video_acceleration(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let Some(out) = run_optional(ctx, "vainfo", &[])? else {
        return Ok(ctx.warn("vainfo is not installed").with_fix(INSTALL_VA_DRIVERS));
    };
    let profiles = out.stdout.lines().filter(|l| l.contains("VAProfile")).count();
    if profiles == 0 {
        return Ok(ctx.warn("no VA-API profiles available").with_fix(INSTALL_VA_DRIVERS));
    }
    Ok(ctx.pass(format!("{profiles} VA-API profile(s)")))
}
