//! Read-only access to the machine being diagnosed.
//!
//! Probes never touch the OS directly; everything goes through [`SystemProbe`] so that the
//! live implementation can be swapped for canned data in tests.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platform::{self, CommandError, CommandOutput, FsUsage};

pub trait SystemProbe: Send + Sync {
    fn run(&self, cmd: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError>;
    fn read_file(&self, path: &Path) -> io::Result<String>;
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
    /// Permission bits (`st_mode & 0o7777`).
    fn file_mode(&self, path: &Path) -> io::Result<u32>;
    fn fs_usage(&self, path: &Path) -> io::Result<FsUsage>;
    fn env_var(&self, key: &str) -> Option<String>;
    fn cpu_count(&self) -> usize;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxSystem;

impl SystemProbe for LinuxSystem {
    fn run(&self, cmd: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError> {
        tracing::debug!(cmd, ?args, ?timeout, "probe command");
        platform::run_command(cmd, args, timeout)
    }

    fn read_file(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(path)? {
            out.push(entry?.path());
        }
        out.sort();
        Ok(out)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }

    #[cfg(unix)]
    fn file_mode(&self, path: &Path) -> io::Result<u32> {
        use std::os::unix::fs::PermissionsExt;
        Ok(std::fs::metadata(path)?.permissions().mode() & 0o7777)
    }

    #[cfg(not(unix))]
    fn file_mode(&self, _path: &Path) -> io::Result<u32> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "file modes are unix-only"))
    }

    fn fs_usage(&self, path: &Path) -> io::Result<FsUsage> {
        platform::fs_usage(path)
    }

    fn env_var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    fn cpu_count(&self) -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
