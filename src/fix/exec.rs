use std::fmt;
use std::time::Duration;

use crate::platform::{self, CommandError, CommandOutput};

/// Programs a fix step may run. Checked when the registry is built and again before execution.
pub const ALLOWED_PROGRAMS: &[&str] = &[
    "chmod",
    "cp",
    "dnf",
    "fallocate",
    "flatpak",
    "journalctl",
    "mkswap",
    "rfkill",
    "rm",
    "sed",
    "setenforce",
    "swapoff",
    "swapon",
    "systemctl",
    "touch",
    "wipefs",
];

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StepCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl StepCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        ALLOWED_PROGRAMS.contains(&self.program.as_str())
    }
}

impl fmt::Display for StepCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('\'') {
                write!(f, " '{}'", arg.replace('\'', "'\\''"))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("privilege escalation was denied")]
    PrivilegeDenied,
    #[error("command is not on the allowlist: {0}")]
    NotAllowed(String),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Runs fix step commands on the host.
pub trait StepExecutor: Send + Sync {
    fn execute(&self, command: &StepCommand, privileged: bool) -> Result<CommandOutput, StepError>;
}

pub trait PrivilegeEscalation: Send + Sync {
    /// Returns whether administrator privileges are available for the coming steps.
    fn escalate(&self, reason: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl StepExecutor for CommandExecutor {
    fn execute(&self, command: &StepCommand, privileged: bool) -> Result<CommandOutput, StepError> {
        if !command.is_allowed() {
            return Err(StepError::NotAllowed(command.to_string()));
        }
        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();

        if privileged && !platform::is_root() {
            let mut sudo_args = vec!["-n", command.program.as_str()];
            sudo_args.extend(args.iter().copied());
            tracing::info!(command = %command, "running via sudo");
            let out = platform::run_command("sudo", &sudo_args, self.timeout)?;
            if out.exit_code != 0 && out.stderr.contains("a password is required") {
                return Err(StepError::PrivilegeDenied);
            }
            return Ok(out);
        }

        tracing::info!(command = %command, "running");
        Ok(platform::run_command(&command.program, &args, self.timeout)?)
    }
}

/// `sudo`-based escalation. Interactive mode may prompt on the terminal; otherwise only
/// cached credentials (or running as root) count.
#[derive(Debug, Clone)]
pub struct SudoEscalation {
    interactive: bool,
}

impl SudoEscalation {
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }
}

impl PrivilegeEscalation for SudoEscalation {
    fn escalate(&self, reason: &str) -> bool {
        if platform::is_root() {
            return true;
        }
        let granted = if self.interactive {
            let prompt = format!("[sudo] password for %u ({}): ", reason.replace('%', "%%"));
            matches!(platform::run_interactive("sudo", &["-v", "-p", &prompt]), Ok(0))
        } else {
            platform::run_command("sudo", &["-n", "true"], Duration::from_secs(10))
                .map(|out| out.success())
                .unwrap_or(false)
        };
        if !granted {
            tracing::warn!(reason, "privilege escalation denied");
        }
        granted
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutputOutcome {
    Ok,
    OkWithWarnings(String),
    Error(String),
}

pub fn evaluate_step_output(command: &StepCommand, output: &CommandOutput) -> StepOutputOutcome {
    let text = format!("{}\n{}", output.stdout, output.stderr);

    match command.program.as_str() {
        "dnf" => {
            if output.exit_code == 0 {
                return StepOutputOutcome::Ok;
            }
            if text.contains("Nothing to do") {
                return StepOutputOutcome::OkWithWarnings("dnf reported nothing to do".to_string());
            }
            if text.contains("superuser privileges") || text.contains("must be run as root") {
                return StepOutputOutcome::Error(
                    "dnf needs administrator privileges; re-run with sudo available".to_string(),
                );
            }
            if text.contains("Unable to find a match") || text.contains("No match for argument") {
                return StepOutputOutcome::Error(format!(
                    "package not found in enabled repositories: {}",
                    first_line(&text)
                ));
            }
            if text.contains("Curl error") || text.contains("Cannot download") {
                return StepOutputOutcome::Error(
                    "package download failed; check the network connection and mirrors".to_string(),
                );
            }
            exit_error(output)
        }
        "systemctl" => {
            if output.exit_code == 0 {
                return StepOutputOutcome::Ok;
            }
            if text.contains("not found") || text.contains("does not exist") {
                return StepOutputOutcome::Error(format!("unit not found: {}", first_line(&text)));
            }
            if text.contains("Access denied") || text.contains("Interactive authentication required") {
                return StepOutputOutcome::Error(
                    "systemctl was refused; administrator privileges are required".to_string(),
                );
            }
            exit_error(output)
        }
        "setenforce" => {
            if output.exit_code == 0 {
                return StepOutputOutcome::Ok;
            }
            if text.contains("SELinux is disabled") {
                return StepOutputOutcome::Error(
                    "SELinux is disabled; enable it in /etc/selinux/config and reboot".to_string(),
                );
            }
            exit_error(output)
        }
        "swapon" => {
            if output.exit_code == 0 {
                return StepOutputOutcome::Ok;
            }
            if text.contains("Device or resource busy") {
                return StepOutputOutcome::OkWithWarnings("swap file is already active".to_string());
            }
            exit_error(output)
        }
        _ => {
            if output.exit_code == 0 {
                StepOutputOutcome::Ok
            } else {
                exit_error(output)
            }
        }
    }
}

fn exit_error(output: &CommandOutput) -> StepOutputOutcome {
    let line = first_line(&output.stderr);
    if line.is_empty() {
        StepOutputOutcome::Error(format!("exited with status {}", output.exit_code))
    } else {
        StepOutputOutcome::Error(format!("exited with status {}: {line}", output.exit_code))
    }
}

fn first_line(s: &str) -> &str {
    s.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}
