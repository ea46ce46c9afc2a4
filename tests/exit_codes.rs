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
        "FEDCHECKER_LOG",
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

fn run(home: &Path, args: &[&str]) -> Output {
    fedchecker_cmd(home).args(args).output().expect("run fedchecker")
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home = std::env::temp_dir().join(format!("fedchecker-exit-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

#[test]
fn completion_unknown_shell_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "nope"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("unsupported shell"));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn completion_bash_succeeds() {
    let home = make_temp_home();
    let out = run(&home, &["completion", "bash"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("fedchecker"));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn fix_apply_requires_tty_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["fix", "--apply"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn fix_apply_with_json_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["--json", "fix", "--apply", "--yes"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn fix_interactive_without_apply_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["fix", "--interactive"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn fix_unknown_target_exits_2_with_hint() {
    let home = make_temp_home();
    let out = run(&home, &["fix", "--target", "health.no-such-fix"]);
    assert_eq!(out.status.code(), Some(2));
    let err = stderr(&out);
    assert!(err.contains("health.no-such-fix"), "stderr: {err}");
    assert!(err.contains("fedchecker list"), "stderr: {err}");
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn menu_requires_tty_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["menu"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn scan_invalid_exclude_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["scan", "--exclude", "["]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn scan_unknown_category_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["scan", "--category", "network"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("unknown category"));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn zero_timeout_exits_2() {
    let home = make_temp_home();
    let out = run(&home, &["--timeout", "0", "scan"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn missing_config_file_exits_2() {
    let home = make_temp_home();
    let missing = home.join("nope.toml");
    let out = run(&home, &["--config", missing.to_str().expect("utf-8 path"), "list"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("config file not found"));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn malformed_config_file_exits_2() {
    let home = make_temp_home();
    let dir = home.join(".config/fedchecker");
    std::fs::create_dir_all(&dir).expect("create config dir");
    std::fs::write(dir.join("config.toml"), "[scan]\nconcurrency = \"many\"\n").expect("write config");
    let out = run(&home, &["list"]);
    assert_eq!(out.status.code(), Some(2));
    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn invalid_env_value_exits_2() {
    let home = make_temp_home();
    let out = fedchecker_cmd(&home)
        .env("FEDCHECKER_UI_COLOR", "maybe")
        .args(["list"])
        .output()
        .expect("run fedchecker");
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("FEDCHECKER_UI_COLOR"));
    let _ = std::fs::remove_dir_all(&home);
}
