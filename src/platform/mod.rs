use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use wait_timeout::ChildExt;

use crate::core::HostInfo;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command not found: {0}")]
    NotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("timed out after {timeout:?}: {cmd}")]
    TimedOut { cmd: String, timeout: Duration },
    #[error("failed to run {cmd}: {source}")]
    Io {
        cmd: String,
        #[source]
        source: std::io::Error,
    },
}

pub fn run_command(cmd: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError> {
    let mut command = Command::new(cmd);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("LC_ALL", "C");

    let mut child = command.spawn().map_err(|e| spawn_error(cmd, e))?;

    // drain both pipes while waiting; a child blocked on a full pipe never exits
    let stdout = child.stdout.take().map(drain_pipe);
    let stderr = child.stderr.take().map(drain_pipe);

    let status = match child.wait_timeout(timeout).map_err(|e| CommandError::Io {
        cmd: cmd.to_string(),
        source: e,
    })? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CommandError::TimedOut {
                cmd: cmd.to_string(),
                timeout,
            });
        }
    };

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: collect_pipe(stdout),
        stderr: collect_pipe(stderr),
    })
}

fn drain_pipe<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect_pipe(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

/// Runs a command attached to the current terminal (for password prompts).
pub fn run_interactive(cmd: &str, args: &[&str]) -> Result<i32, CommandError> {
    let status = Command::new(cmd)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| spawn_error(cmd, e))?;
    Ok(status.code().unwrap_or(-1))
}

fn spawn_error(cmd: &str, err: std::io::Error) -> CommandError {
    match err.kind() {
        std::io::ErrorKind::NotFound => CommandError::NotFound(cmd.to_string()),
        std::io::ErrorKind::PermissionDenied => CommandError::PermissionDenied(cmd.to_string()),
        _ => CommandError::Io {
            cmd: cmd.to_string(),
            source: err,
        },
    }
}

pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[derive(Debug, Clone)]
pub struct InvokingUser {
    pub uid: u32,
    pub gid: u32,
    pub username: Option<String>,
    pub home_dir: PathBuf,
}

pub fn invoking_user() -> Option<InvokingUser> {
    let uid = std::env::var("SUDO_UID").ok()?.parse::<u32>().ok()?;
    let gid = std::env::var("SUDO_GID").ok()?.parse::<u32>().ok()?;
    let username = std::env::var("SUDO_USER").ok();
    let home_dir = home_dir_for_uid(uid)?;

    Some(InvokingUser {
        uid,
        gid,
        username,
        home_dir,
    })
}

pub fn effective_home_dir() -> Result<PathBuf> {
    if let Some(user) = invoking_user() {
        return Ok(user.home_dir);
    }
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("HOME is not set"))
}

#[cfg(unix)]
fn home_dir_for_uid(uid: u32) -> Option<PathBuf> {
    use std::ffi::CStr;

    unsafe {
        let bufsize = libc::sysconf(libc::_SC_GETPW_R_SIZE_MAX);
        let bufsize = if bufsize <= 0 {
            16 * 1024
        } else {
            bufsize as usize
        };
        let mut buf = vec![0u8; bufsize];
        let mut pwd: libc::passwd = std::mem::zeroed();
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        let rc = libc::getpwuid_r(
            uid as libc::uid_t,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut result,
        );
        if rc != 0 || result.is_null() || pwd.pw_dir.is_null() {
            return None;
        }

        let dir = CStr::from_ptr(pwd.pw_dir).to_string_lossy().to_string();
        if dir.trim().is_empty() {
            return None;
        }
        Some(PathBuf::from(dir))
    }
}

#[cfg(not(unix))]
fn home_dir_for_uid(_uid: u32) -> Option<PathBuf> {
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl FsUsage {
    /// Used share in percent, as `df` reports it (reserved blocks count as used).
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 * 100.0 / self.total_bytes as f64
    }
}

#[cfg(unix)]
pub fn fs_usage(path: &Path) -> std::io::Result<FsUsage> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    unsafe {
        let mut st: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut st) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        let frsize = st.f_frsize as u64;
        Ok(FsUsage {
            total_bytes: st.f_blocks as u64 * frsize,
            available_bytes: st.f_bavail as u64 * frsize,
        })
    }
}

#[cfg(not(unix))]
pub fn fs_usage(_path: &Path) -> std::io::Result<FsUsage> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "statvfs is not available on this platform",
    ))
}

pub fn host_info() -> HostInfo {
    let mut host = HostInfo::unknown();
    if let Ok(s) = std::fs::read_to_string("/etc/os-release") {
        let (name, version) = parse_os_release(&s);
        if let Some(name) = name {
            host.os_name = name;
        }
        if let Some(version) = version {
            host.os_version = version;
        }
    }
    if let Ok(s) = std::fs::read_to_string("/proc/sys/kernel/osrelease") {
        host.kernel = s.trim().to_string();
    }
    if let Ok(s) = std::fs::read_to_string("/proc/sys/kernel/hostname") {
        host.hostname = s.trim().to_string();
    }
    host
}

fn parse_os_release(s: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut version = None;
    for line in s.lines() {
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let v = v.trim().trim_matches('"').to_string();
        match k.trim() {
            "NAME" => name = Some(v),
            "VERSION_ID" => version = Some(v),
            _ => {}
        }
    }
    (name, version)
}
