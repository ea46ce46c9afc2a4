use crate::core::{Category, CheckResult};
use crate::fix::{Fix, FixStep};
use crate::probe::{Probe, ProbeContext, ProbeError};

use super::{cmd, content_lines, run_optional};

const INSTALL_FONTS: &str = "desktop.install-fonts";
const INSTALL_FLATPAK: &str = "desktop.install-flatpak";
const ADD_FLATHUB: &str = "desktop.add-flathub";
const START_PORTAL: &str = "desktop.start-portal";

pub(crate) const FLATHUB_URL: &str = "https://dl.flathub.org/repo/flathub.flatpakrepo";

pub(crate) fn probes() -> Vec<Probe> {
    vec![
        Probe::new("desktop.session", Category::Desktop, "Desktop session", 3, session),
        Probe::new("desktop.display-server", Category::Desktop, "Display server", 3, display_server),
        Probe::new("desktop.fonts", Category::Desktop, "Fonts", 2, fonts).with_fixes(&[INSTALL_FONTS]),
        Probe::new("desktop.flatpak", Category::Desktop, "Flatpak", 3, flatpak)
            .with_fixes(&[INSTALL_FLATPAK, ADD_FLATHUB]),
        Probe::new("desktop.portals", Category::Desktop, "Desktop portals", 3, portals)
            .with_fixes(&[START_PORTAL]),
    ]
}

pub(crate) fn fixes() -> Vec<Fix> {
    vec![
        Fix::new(INSTALL_FONTS, "Install a basic set of fonts.", &["desktop.fonts"])
            .privileged()
            .step(FixStep::new(
                "Install font packages",
                cmd(
                    "dnf",
                    &["install", "-y", "google-noto-sans-fonts", "liberation-fonts", "dejavu-sans-fonts"],
                ),
            )),
        Fix::new(INSTALL_FLATPAK, "Install Flatpak.", &["desktop.flatpak"])
            .privileged()
            .step(FixStep::new("Install flatpak", cmd("dnf", &["install", "-y", "flatpak"]))),
        Fix::new(ADD_FLATHUB, "Add the Flathub remote.", &["desktop.flatpak"])
            .privileged()
            .step(
                FixStep::new(
                    "Add flathub",
                    cmd("flatpak", &["remote-add", "--if-not-exists", "flathub", FLATHUB_URL]),
                )
                .undo_with(cmd("flatpak", &["remote-delete", "flathub"])),
            ),
        Fix::new(START_PORTAL, "Start the desktop portal service for this session.", &["desktop.portals"])
            .without_confirmation()
            .step(
                FixStep::new(
                    "Start xdg-desktop-portal",
                    cmd("systemctl", &["--user", "start", "xdg-desktop-portal.service"]),
                )
                .undo_with(cmd("systemctl", &["--user", "stop", "xdg-desktop-portal.service"])),
            ),
    ]
}

fn session(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let desktop = ctx
        .env_var("XDG_CURRENT_DESKTOP")
        .or_else(|| ctx.env_var("DESKTOP_SESSION"));
    Ok(match desktop {
        Some(name) => ctx.pass(name.clone()).with_detail("desktop", name),
        None => ctx.skipped("no graphical session detected"),
    })
}

fn display_server(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let Some(kind) = ctx.env_var("XDG_SESSION_TYPE") else {
        return Ok(ctx.skipped("no graphical session detected"));
    };
    Ok(match kind.as_str() {
        "wayland" => ctx.pass("Wayland"),
        "x11" => ctx.pass("X11"),
        "tty" => ctx.skipped("text console session"),
        other => ctx.warn(format!("unrecognised session type: {other}")),
    })
}

fn fonts(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let Some(out) = run_optional(ctx, "fc-list", &[])? else {
        return Ok(ctx.skipped("fontconfig is not installed"));
    };
    let count = content_lines(&out.stdout).count();
    if count < 50 {
        return Ok(ctx.warn(format!("only {count} fonts installed")).with_fix(INSTALL_FONTS));
    }
    Ok(ctx.pass(format!("{count} fonts installed")))
}

fn flatpak(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    let Some(out) = run_optional(ctx, "flatpak", &["remotes"])? else {
        return Ok(ctx.warn("Flatpak is not installed").with_fix(INSTALL_FLATPAK));
    };
    let remotes: Vec<&str> = content_lines(&out.stdout)
        .filter_map(|l| l.split_whitespace().next())
        .collect();
    if remotes.contains(&"flathub") {
        return Ok(ctx.pass(format!("remotes: {}", remotes.join(", "))));
    }
    Ok(ctx.fail("Flathub remote is not configured").with_fix(ADD_FLATHUB))
}

fn portals(ctx: &ProbeContext<'_>) -> Result<CheckResult, ProbeError> {
    if ctx.env_var("DBUS_SESSION_BUS_ADDRESS").is_none() {
        return Ok(ctx.skipped("no session bus"));
    }
    let out = ctx.run("systemctl", &["--user", "is-active", "xdg-desktop-portal.service"])?;
    if out.stdout.trim() == "active" {
        return Ok(ctx.pass("xdg-desktop-portal is running"));
    }
    Ok(ctx.fail("xdg-desktop-portal is not running").with_fix(START_PORTAL))
}
