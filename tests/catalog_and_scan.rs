use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn fedchecker_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fedchecker"));
    cmd.env("HOME", home);
    for key in [
        "SUDO_UID",
        "SUDO_GID",
        "SUDO_USER",
        "FEDCHECKER_CONFIG",
        "FEDCHECKER_UI_COLOR",
        "FEDCHECKER_UI_MAX_TABLE_ROWS",
        "FEDCHECKER_SCAN_CONCURRENCY",
        "FEDCHECKER_SCAN_PROBE_TIMEOUT_SECS",
        "FEDCHECKER_SCAN_CATEGORIES",
        "FEDCHECKER_SCAN_EXCLUDE",
        "FEDCHECKER_FIX_INCLUDE_WARNINGS",
        "FEDCHECKER_FIX_COMMAND_TIMEOUT_SECS",
        "FEDCHECKER_REPORT_INCLUDE_DETAILS",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

fn run_ok(cmd: &mut Command) -> Output {
    let out = cmd.output().expect("run fedchecker");
    assert!(
        out.status.success(),
        "status: {:?}\nstderr: {}",
        out.status.code(),
        String::from_utf8_lossy(&out.stderr)
    );
    out
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home = std::env::temp_dir().join(format!("fedchecker-catalog-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

const STATUSES: [&str; 5] = ["PASS", "WARN", "FAIL", "ERROR", "SKIPPED"];

#[test]
fn list_json_is_cross_referenced() {
    let home = make_temp_home();
    let out = run_ok(fedchecker_cmd(&home).args(["--json", "list"]));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("catalog json");

    let probes = v["probes"].as_array().expect("probes");
    let fixes = v["fixes"].as_array().expect("fixes");
    assert!(!probes.is_empty());
    assert!(!fixes.is_empty());

    let probe_ids: HashSet<&str> = probes.iter().filter_map(|p| p["id"].as_str()).collect();
    let fix_ids: HashSet<&str> = fixes.iter().filter_map(|f| f["id"].as_str()).collect();
    assert_eq!(probe_ids.len(), probes.len(), "duplicate probe ids");
    assert_eq!(fix_ids.len(), fixes.len(), "duplicate fix ids");

    for p in probes {
        assert!(p["weight"].as_u64().unwrap_or(0) > 0, "{p}");
        for f in p["fixes"].as_array().expect("probe fixes") {
            assert!(fix_ids.contains(f.as_str().unwrap_or("")), "{p}");
        }
    }
    for f in fixes {
        assert!(!f["category"].is_null(), "{f}");
        assert!(!f["preview"].as_array().expect("preview").is_empty(), "{f}");
        for t in f["targets"].as_array().expect("targets") {
            assert!(probe_ids.contains(t.as_str().unwrap_or("")), "{f}");
        }
    }
    assert!(fix_ids.contains("drivers.unblock-wifi"));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn list_text_groups_by_category() {
    let home = make_temp_home();
    let out = run_ok(fedchecker_cmd(&home).args(["--no-color", "list"]));
    let text = String::from_utf8_lossy(&out.stdout);
    let health = text.find("System health").expect("health section");
    let desktop = text.find("Desktop environment").expect("desktop section");
    assert!(health < desktop);
    assert!(text.contains("drivers.unblock-wifi"));
    assert!(!text.contains('\u{1b}'), "no ANSI escapes when piped");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn list_includes_post_install_setup_last() {
    let home = make_temp_home();
    let out = run_ok(fedchecker_cmd(&home).args(["--no-color", "list"]));
    let text = String::from_utf8_lossy(&out.stdout);
    let desktop = text.find("Desktop environment").expect("desktop section");
    let setup = text.find("Post-install setup").expect("setup section");
    assert!(desktop < setup);
    for id in ["setup.tune-dnf", "setup.enable-rpmfusion", "setup.enable-flathub", "setup.install-codecs"] {
        assert!(text.contains(id), "{id}");
    }
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn scan_json_has_stable_shape() {
    let home = make_temp_home();
    let out = run_ok(fedchecker_cmd(&home).args([
        "--json",
        "--timeout",
        "3",
        "scan",
        "--category",
        "desktop",
    ]));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("report json");

    assert!(v["schema_version"].is_string());
    assert_eq!(v["tool_version"], env!("CARGO_PKG_VERSION"));
    assert!(v["generated_at"].is_string());
    assert!(v["host"]["kernel"].is_string());
    let score = v["score"].as_u64().expect("score");
    assert!(score <= 100);

    let categories = v["categories"].as_array().expect("categories");
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0]["category"], "DESKTOP");
    for r in categories[0]["results"].as_array().expect("results") {
        let id = r["probe_id"].as_str().expect("probe_id");
        assert!(id.starts_with("desktop."), "{id}");
        let status = r["status"].as_str().expect("status");
        assert!(STATUSES.contains(&status), "{status}");
    }
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn scan_exclude_drops_probes() {
    let home = make_temp_home();
    let out = run_ok(fedchecker_cmd(&home).args([
        "--json",
        "--timeout",
        "3",
        "scan",
        "--category",
        "desktop",
        "--exclude",
        "desktop.*",
    ]));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("report json");
    assert_eq!(v["score"], 100);
    let results: usize = v["categories"]
        .as_array()
        .expect("categories")
        .iter()
        .map(|c| c["results"].as_array().map_or(0, Vec::len))
        .sum();
    assert_eq!(results, 0);
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn report_markdown_renders_sections() {
    let home = make_temp_home();
    let out = run_ok(
        fedchecker_cmd(&home)
            .env("FEDCHECKER_SCAN_CATEGORIES", "desktop")
            .args(["--timeout", "3", "report", "--markdown"]),
    );
    let md = String::from_utf8_lossy(&out.stdout);
    assert!(md.starts_with("# fedchecker report\n"));
    assert!(md.contains("## Overview"));
    assert!(md.contains("- Overall score: **"));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn logs_json_is_empty_for_a_fresh_home() {
    let home = make_temp_home();
    let out = run_ok(fedchecker_cmd(&home).args(["--json", "logs"]));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("logs json");
    assert_eq!(v, serde_json::json!([]));
    let _ = std::fs::remove_dir_all(&home);
}
