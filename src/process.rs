//! Controlled command execution for build and install sequences.
//!
//! [`CommandRunner`] is the seam between the pipeline and the operating
//! system. [`SystemRunner`] spawns real processes; tests substitute their own
//! runner to observe ordering without touching the host.

use std::io;
use std::process::{Command, Stdio};

use log::{debug, info};

use crate::descriptor::CommandSpec;
use crate::environment::{BuildEnvironment, ResourceLimits};
use crate::error::{PipelineError, Result};

/// Captured result of one command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, or `None` if terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Executes one already-expanded command inside a build environment.
pub trait CommandRunner {
    /// Run `cmd` to completion. `Err` means the process could not be started.
    fn run(&self, cmd: &CommandSpec, env: &BuildEnvironment) -> io::Result<CommandOutput>;
}

/// Runs commands as real child processes, without a shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &CommandSpec, env: &BuildEnvironment) -> io::Result<CommandOutput> {
        let dir = match &cmd.dir {
            Some(rel) => env.work_dir().join(rel),
            None => env.work_dir().to_path_buf(),
        };

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .current_dir(&dir)
            .env_clear()
            .envs(env.vars())
            .stdin(Stdio::null());
        apply_limits(&mut command, env.limits());

        let output = command.output()?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(unix)]
fn apply_limits(command: &mut Command, limits: ResourceLimits) {
    use std::os::unix::process::CommandExt;

    if limits.is_unlimited() {
        return;
    }

    fn set_limit(resource: RlimitResource, value: u64) -> io::Result<()> {
        let lim = libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        };
        // SAFETY: setrlimit only reads the struct passed by reference.
        if unsafe { libc::setrlimit(resource, &lim) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    // SAFETY: the hook only calls setrlimit, which is async-signal-safe.
    unsafe {
        command.pre_exec(move || {
            if let Some(secs) = limits.cpu_seconds {
                set_limit(libc::RLIMIT_CPU, secs)?;
            }
            if let Some(bytes) = limits.file_size_bytes {
                set_limit(libc::RLIMIT_FSIZE, bytes)?;
            }
            Ok(())
        });
    }
}

#[cfg(all(unix, target_os = "linux", target_env = "gnu"))]
type RlimitResource = libc::__rlimit_resource_t;

#[cfg(all(unix, not(all(target_os = "linux", target_env = "gnu"))))]
type RlimitResource = libc::c_int;

#[cfg(not(unix))]
fn apply_limits(_command: &mut Command, _limits: ResourceLimits) {}

/// Run `commands` strictly in order.
///
/// Each command is expanded against the environment's variables first. The
/// first failure stops the sequence; later commands never start.
pub fn run_sequence(
    runner: &dyn CommandRunner,
    label: &str,
    commands: &[CommandSpec],
    env: &BuildEnvironment,
) -> Result<()> {
    for (i, raw) in commands.iter().enumerate() {
        let cmd = raw.expand(env.vars());
        let line = cmd.to_string();
        info!("[{label} {}/{}] {line}", i + 1, commands.len());

        let output = runner
            .run(&cmd, env)
            .map_err(|e| PipelineError::CommandExecution {
                command: line.clone(),
                code: None,
                stderr: format!("failed to start: {e}"),
            })?;

        if !output.stdout.trim().is_empty() {
            debug!("{}", output.stdout.trim_end());
        }

        if !output.success() {
            return Err(PipelineError::CommandExecution {
                command: line,
                code: output.code,
                stderr: output.stderr,
            });
        }

        if !output.stderr.trim().is_empty() {
            debug!("{}", output.stderr.trim_end());
        }
    }
    Ok(())
}
